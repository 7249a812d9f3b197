//! Works out how a caller relates to an order.
//!
//! A caller is the order's buyer, the seller (owner of the order's store),
//! both, or neither. Both the order state machine and the chat gate on this.

use market_storage::{StorageError, StorageService};
use market_types::{ObjectId, Order, StorageKey, Store};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
	#[error("Order not found")]
	OrderNotFound,
	#[error("Storage error: {0}")]
	Storage(String),
}

/// The caller's roles on one order. Both flags may be set when a seller buys
/// from their own store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Participant {
	pub is_buyer: bool,
	pub is_seller: bool,
}

impl Participant {
	/// Classifies `user_id` against an order and, when it still exists, its store.
	pub fn of(order: &Order, store: Option<&Store>, user_id: &str) -> Self {
		Self {
			is_buyer: order.is_buyer(user_id),
			is_seller: store.is_some_and(|store| store.is_owner(user_id)),
		}
	}

	/// Buyer, seller or both.
	pub fn is_participant(&self) -> bool {
		self.is_buyer || self.is_seller
	}
}

/// An order together with its store and the caller's roles, loaded once.
#[derive(Debug, Clone)]
pub struct OrderParticipants {
	pub order: Order,
	/// `None` when the store record no longer exists.
	pub store: Option<Store>,
	pub participant: Participant,
}

/// Loads the records needed to decide who may act on an order.
///
/// Shared by the state machine, the chat and order queries so that every
/// path classifies callers the same way.
pub struct ParticipantResolver {
	storage: Arc<StorageService>,
}

impl ParticipantResolver {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Loads the order and its store and classifies `user_id`.
	pub async fn resolve(
		&self,
		order_id: &ObjectId,
		user_id: &str,
	) -> Result<OrderParticipants, ResolveError> {
		let order: Order = match self
			.storage
			.retrieve(StorageKey::Orders.as_str(), &order_id.to_hex())
			.await
		{
			Ok(order) => order,
			Err(StorageError::NotFound) => return Err(ResolveError::OrderNotFound),
			Err(e) => return Err(ResolveError::Storage(e.to_string())),
		};

		let store: Option<Store> = match self
			.storage
			.retrieve(StorageKey::Stores.as_str(), &order.store_id.to_hex())
			.await
		{
			Ok(store) => Some(store),
			Err(StorageError::NotFound) => None,
			Err(e) => return Err(ResolveError::Storage(e.to_string())),
		};

		let participant = Participant::of(&order, store.as_ref(), user_id);
		Ok(OrderParticipants {
			order,
			store,
			participant,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::Fixture;

	#[tokio::test]
	async fn test_roles() {
		let fx = Fixture::new().await;
		let resolver = ParticipantResolver::new(fx.storage.clone());
		let order = fx.order("buyer-1").await;

		let buyer = resolver.resolve(&order.id, "buyer-1").await.unwrap();
		assert_eq!(
			buyer.participant,
			Participant {
				is_buyer: true,
				is_seller: false
			}
		);

		let seller = resolver.resolve(&order.id, &fx.seller_id).await.unwrap();
		assert!(seller.participant.is_seller && !seller.participant.is_buyer);

		let stranger = resolver.resolve(&order.id, "someone").await.unwrap();
		assert!(!stranger.participant.is_participant());
	}

	#[tokio::test]
	async fn test_seller_buying_from_own_store() {
		let fx = Fixture::new().await;
		let resolver = ParticipantResolver::new(fx.storage.clone());
		let order = fx.order(&fx.seller_id).await;

		let both = resolver.resolve(&order.id, &fx.seller_id).await.unwrap();
		assert!(both.participant.is_buyer && both.participant.is_seller);
	}

	#[tokio::test]
	async fn test_missing_order_and_store() {
		let fx = Fixture::new().await;
		let resolver = ParticipantResolver::new(fx.storage.clone());
		assert!(matches!(
			resolver.resolve(&ObjectId::new(), "buyer-1").await,
			Err(ResolveError::OrderNotFound)
		));

		let order = fx.order("buyer-1").await;
		fx.remove_store().await;
		let resolved = resolver.resolve(&order.id, &fx.seller_id).await.unwrap();
		assert!(resolved.store.is_none());
		assert!(!resolved.participant.is_participant());
	}
}
