//! Order state machine implementation.
//!
//! Orders start in `pending`. The seller accepts or rejects a pending order
//! and completes an accepted one; the buyer may cancel while it is still
//! pending. `rejected`, `completed` and `cancelled` are terminal. Each
//! change is committed with a compare-and-swap so concurrent requests on
//! the same order cannot both succeed.

use crate::engine::event_bus::EventBus;
use crate::participants::{Participant, ParticipantResolver, ResolveError};
use chrono::Utc;
use market_storage::{StorageError, StorageService, Versioned};
use market_types::{
	truncate_id, Caller, MarketEvent, ObjectId, Order, OrderEvent, OrderStatus, StorageKey,
};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Errors that can occur during order state management.
#[derive(Debug, Error)]
pub enum OrderStateError {
	#[error("Invalid status")]
	InvalidStatus,
	#[error("Invalid order ID")]
	InvalidOrderId,
	#[error("Order not found")]
	OrderNotFound,
	#[error("Store not found")]
	StoreNotFound,
	#[error("{0}")]
	Forbidden(&'static str),
	/// The order is not in the status the requested change starts from.
	#[error("{0}")]
	InvalidTransition(&'static str),
	/// Every compare-and-swap attempt lost to a concurrent writer.
	#[error("Order was modified concurrently")]
	Conflict,
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<ResolveError> for OrderStateError {
	fn from(err: ResolveError) -> Self {
		match err {
			ResolveError::OrderNotFound => OrderStateError::OrderNotFound,
			ResolveError::Storage(detail) => OrderStateError::Storage(detail),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Actor {
	Buyer,
	Seller,
}

/// One row of the transition table, keyed by the requested status.
#[derive(Debug)]
struct TransitionRule {
	actor: Actor,
	from: OrderStatus,
	/// Returned when the caller does not hold `actor`'s role.
	role_denied: &'static str,
	/// Returned when the order is not in `from`.
	wrong_state: &'static str,
}

static TRANSITIONS: Lazy<HashMap<OrderStatus, TransitionRule>> = Lazy::new(|| {
	HashMap::from([
		(
			OrderStatus::Accepted,
			TransitionRule {
				actor: Actor::Seller,
				from: OrderStatus::Pending,
				role_denied: "Only seller can accept/reject",
				wrong_state: "Order must be pending to accept",
			},
		),
		(
			OrderStatus::Rejected,
			TransitionRule {
				actor: Actor::Seller,
				from: OrderStatus::Pending,
				role_denied: "Only seller can accept/reject",
				wrong_state: "Order must be pending to reject",
			},
		),
		(
			OrderStatus::Completed,
			TransitionRule {
				actor: Actor::Seller,
				from: OrderStatus::Accepted,
				role_denied: "Only seller can mark as completed",
				wrong_state: "Order must be accepted to complete",
			},
		),
		(
			OrderStatus::Cancelled,
			TransitionRule {
				actor: Actor::Buyer,
				from: OrderStatus::Pending,
				role_denied: "Only buyer can cancel",
				wrong_state: "Can only cancel pending orders",
			},
		),
	])
});

/// Manages order status transitions and persistence.
pub struct OrderStateMachine {
	storage: Arc<StorageService>,
	resolver: ParticipantResolver,
	event_bus: EventBus,
	write_attempts: u32,
}

impl OrderStateMachine {
	/// Creates a state machine that gives up after `write_attempts` lost
	/// compare-and-swap rounds (at least one).
	pub fn new(storage: Arc<StorageService>, event_bus: EventBus, write_attempts: u32) -> Self {
		Self {
			resolver: ParticipantResolver::new(storage.clone()),
			storage,
			event_bus,
			write_attempts: write_attempts.max(1),
		}
	}

	/// Applies `requested` (a raw status string) to the order on behalf of
	/// `caller` and returns the updated order.
	pub async fn transition(
		&self,
		order_id: &str,
		caller: &Caller,
		requested: &str,
	) -> Result<Order, OrderStateError> {
		let target: OrderStatus = requested
			.parse()
			.map_err(|_| OrderStateError::InvalidStatus)?;
		let order_id: ObjectId = order_id
			.parse()
			.map_err(|_| OrderStateError::InvalidOrderId)?;
		self.transition_to(&order_id, caller, target).await
	}

	/// Typed form of [`transition`](Self::transition).
	#[instrument(skip_all, fields(order_id = %truncate_id(&order_id.to_hex()), to = %target))]
	pub async fn transition_to(
		&self,
		order_id: &ObjectId,
		caller: &Caller,
		target: OrderStatus,
	) -> Result<Order, OrderStateError> {
		let resolved = self.resolver.resolve(order_id, &caller.id).await?;
		if resolved.store.is_none() {
			return Err(OrderStateError::StoreNotFound);
		}
		let participant = resolved.participant;
		if !participant.is_participant() {
			return Err(OrderStateError::Forbidden("Forbidden"));
		}

		// Each attempt re-reads the bytes the swap compares against.
		for attempt in 1..=self.write_attempts {
			let current = self.versioned_order(order_id).await?;
			Self::authorize(participant, current.value.status, target)?;

			let mut updated = current.value.clone();
			updated.status = target;
			updated.updated_at = Utc::now();

			let swapped = self
				.storage
				.compare_and_swap(
					StorageKey::Orders.as_str(),
					&order_id.to_hex(),
					&current.raw,
					&updated,
				)
				.await
				.map_err(storage_error)?;
			if swapped {
				let from = current.value.status;
				tracing::info!(from = %from, to = %target, "Order status updated");
				self.event_bus
					.publish(MarketEvent::Order(OrderEvent::StatusChanged {
						order_id: *order_id,
						from,
						to: target,
					}));
				return Ok(updated);
			}

			tracing::debug!(attempt, "Order changed during update, re-reading");
		}

		tracing::warn!(attempts = self.write_attempts, "Giving up on contended order");
		Err(OrderStateError::Conflict)
	}

	/// Checks that `participant` may move an order from `current` to `target`.
	///
	/// Role bars are checked before the current status, so a caller without
	/// the role is refused the same way whatever state the order is in. The
	/// buyer bars apply to whoever bought the order, including a seller
	/// ordering from their own store.
	fn authorize(
		participant: Participant,
		current: OrderStatus,
		target: OrderStatus,
	) -> Result<(), OrderStateError> {
		let rule = TRANSITIONS
			.get(&target)
			.ok_or(OrderStateError::Forbidden(
				"Order cannot be moved back to pending",
			))?;

		let has_role = match rule.actor {
			Actor::Seller => participant.is_seller && !participant.is_buyer,
			Actor::Buyer => participant.is_buyer,
		};
		if !has_role {
			return Err(OrderStateError::Forbidden(rule.role_denied));
		}
		if current != rule.from {
			return Err(OrderStateError::InvalidTransition(rule.wrong_state));
		}
		Ok(())
	}

	/// Whether any actor may move an order from `from` to `to`.
	pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
		TRANSITIONS.get(&to).is_some_and(|rule| rule.from == from)
	}

	/// Loads an order by id.
	pub async fn get_order(&self, order_id: &ObjectId) -> Result<Order, OrderStateError> {
		self.storage
			.retrieve(StorageKey::Orders.as_str(), &order_id.to_hex())
			.await
			.map_err(storage_error)
	}

	async fn versioned_order(&self, order_id: &ObjectId) -> Result<Versioned<Order>, OrderStateError> {
		self.storage
			.retrieve_versioned(StorageKey::Orders.as_str(), &order_id.to_hex())
			.await
			.map_err(storage_error)
	}
}

fn storage_error(err: StorageError) -> OrderStateError {
	match err {
		StorageError::NotFound => OrderStateError::OrderNotFound,
		other => OrderStateError::Storage(other.to_string()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::Fixture;

	const BUYER: &str = "buyer-1";

	fn machine(fx: &Fixture) -> OrderStateMachine {
		OrderStateMachine::new(fx.storage.clone(), EventBus::default(), 3)
	}

	fn buyer() -> Caller {
		Caller::new(BUYER, "Buyer")
	}

	fn expect_forbidden(result: Result<Order, OrderStateError>, message: &str) {
		match result {
			Err(OrderStateError::Forbidden(got)) => assert_eq!(got, message),
			other => panic!("expected Forbidden({}), got {:?}", message, other),
		}
	}

	fn expect_invalid(result: Result<Order, OrderStateError>, message: &str) {
		match result {
			Err(OrderStateError::InvalidTransition(got)) => assert_eq!(got, message),
			other => panic!("expected InvalidTransition({}), got {:?}", message, other),
		}
	}

	#[test]
	fn test_transition_table() {
		use OrderStatus::*;
		assert!(OrderStateMachine::is_valid_transition(Pending, Accepted));
		assert!(OrderStateMachine::is_valid_transition(Pending, Rejected));
		assert!(OrderStateMachine::is_valid_transition(Pending, Cancelled));
		assert!(OrderStateMachine::is_valid_transition(Accepted, Completed));
		assert!(!OrderStateMachine::is_valid_transition(Accepted, Cancelled));
		assert!(!OrderStateMachine::is_valid_transition(Pending, Completed));
		for from in OrderStatus::all() {
			assert!(!OrderStateMachine::is_valid_transition(from, Pending));
			if from.is_terminal() {
				for to in OrderStatus::all() {
					assert!(!OrderStateMachine::is_valid_transition(from, to));
				}
			}
		}
	}

	#[tokio::test]
	async fn test_seller_accepts_then_completes() {
		let fx = Fixture::new().await;
		let sm = machine(&fx);
		let order = fx.order(BUYER).await;
		let id = order.id.to_hex();

		let accepted = sm.transition(&id, &fx.seller(), "accepted").await.unwrap();
		assert_eq!(accepted.status, OrderStatus::Accepted);
		assert!(accepted.updated_at >= order.updated_at);

		let completed = sm.transition(&id, &fx.seller(), "completed").await.unwrap();
		assert_eq!(completed.status, OrderStatus::Completed);
		assert_eq!(fx.stored_order(&order.id).await, completed);
	}

	#[tokio::test]
	async fn test_buyer_cancels_pending() {
		let fx = Fixture::new().await;
		let sm = machine(&fx);
		let order = fx.order(BUYER).await;

		let cancelled = sm
			.transition(&order.id.to_hex(), &buyer(), "cancelled")
			.await
			.unwrap();
		assert_eq!(cancelled.status, OrderStatus::Cancelled);
	}

	#[tokio::test]
	async fn test_role_bars() {
		let fx = Fixture::new().await;
		let sm = machine(&fx);
		let order = fx.order(BUYER).await;
		let id = order.id.to_hex();

		expect_forbidden(
			sm.transition(&id, &buyer(), "accepted").await,
			"Only seller can accept/reject",
		);
		expect_forbidden(
			sm.transition(&id, &buyer(), "rejected").await,
			"Only seller can accept/reject",
		);
		expect_forbidden(
			sm.transition(&id, &buyer(), "completed").await,
			"Only seller can mark as completed",
		);
		expect_forbidden(
			sm.transition(&id, &fx.seller(), "cancelled").await,
			"Only buyer can cancel",
		);
		expect_forbidden(
			sm.transition(&id, &fx.seller(), "pending").await,
			"Order cannot be moved back to pending",
		);
		expect_forbidden(
			sm.transition(&id, &Caller::new("stranger", "x"), "cancelled").await,
			"Forbidden",
		);

		assert_eq!(fx.stored_order(&order.id).await, order);
	}

	#[tokio::test]
	async fn test_wrong_current_state() {
		let fx = Fixture::new().await;
		let sm = machine(&fx);

		let pending = fx.order(BUYER).await.id.to_hex();
		expect_invalid(
			sm.transition(&pending, &fx.seller(), "completed").await,
			"Order must be accepted to complete",
		);

		let accepted = fx
			.order_with_status(BUYER, OrderStatus::Accepted)
			.await
			.id
			.to_hex();
		expect_invalid(
			sm.transition(&accepted, &fx.seller(), "accepted").await,
			"Order must be pending to accept",
		);
		expect_invalid(
			sm.transition(&accepted, &fx.seller(), "rejected").await,
			"Order must be pending to reject",
		);
		expect_invalid(
			sm.transition(&accepted, &buyer(), "cancelled").await,
			"Can only cancel pending orders",
		);
	}

	#[tokio::test]
	async fn test_terminal_states_accept_nothing() {
		let fx = Fixture::new().await;
		let sm = machine(&fx);
		let both = Caller::new(fx.seller_id.clone(), "Owner");

		for status in [
			OrderStatus::Rejected,
			OrderStatus::Completed,
			OrderStatus::Cancelled,
		] {
			let order = fx.order_with_status(&fx.seller_id, status).await;
			for target in OrderStatus::all() {
				let result = sm.transition(&order.id.to_hex(), &both, target.as_str()).await;
				assert!(result.is_err(), "{} -> {} should fail", status, target);
			}
			assert_eq!(fx.stored_order(&order.id).await.status, status);
		}
	}

	#[tokio::test]
	async fn test_owner_buying_from_own_store_is_held_to_buyer_bars() {
		let fx = Fixture::new().await;
		let sm = machine(&fx);
		let owner = fx.seller();

		let pending = fx.order(&fx.seller_id).await;
		for (target, message) in [
			("accepted", "Only seller can accept/reject"),
			("rejected", "Only seller can accept/reject"),
		] {
			match sm.transition(&pending.id.to_hex(), &owner, target).await {
				Err(OrderStateError::Forbidden(msg)) => assert_eq!(msg, message),
				other => panic!("{} should be forbidden, got {:?}", target, other),
			}
		}
		assert_eq!(fx.stored_order(&pending.id).await.status, OrderStatus::Pending);

		let accepted = fx
			.order_with_status(&fx.seller_id, OrderStatus::Accepted)
			.await;
		match sm.transition(&accepted.id.to_hex(), &owner, "completed").await {
			Err(OrderStateError::Forbidden(msg)) => {
				assert_eq!(msg, "Only seller can mark as completed")
			},
			other => panic!("complete should be forbidden, got {:?}", other),
		}

		let cancelled = sm
			.transition(&pending.id.to_hex(), &owner, "cancelled")
			.await
			.unwrap();
		assert_eq!(cancelled.status, OrderStatus::Cancelled);
	}

	#[tokio::test]
	async fn test_input_errors() {
		let fx = Fixture::new().await;
		let sm = machine(&fx);
		let order = fx.order(BUYER).await;

		assert!(matches!(
			sm.transition("not-an-id", &buyer(), "shipped").await,
			Err(OrderStateError::InvalidStatus)
		));
		assert!(matches!(
			sm.transition("not-an-id", &buyer(), "cancelled").await,
			Err(OrderStateError::InvalidOrderId)
		));
		assert!(matches!(
			sm.transition(&ObjectId::new().to_hex(), &buyer(), "cancelled")
				.await,
			Err(OrderStateError::OrderNotFound)
		));

		fx.remove_store().await;
		assert!(matches!(
			sm.transition(&order.id.to_hex(), &buyer(), "cancelled").await,
			Err(OrderStateError::StoreNotFound)
		));
	}

	#[tokio::test]
	async fn test_concurrent_accept_and_reject() {
		let fx = Fixture::new().await;
		let sm = Arc::new(machine(&fx));
		let id = fx.order(BUYER).await.id.to_hex();

		let mut handles = Vec::new();
		for target in ["accepted", "rejected", "accepted", "rejected"] {
			let sm = sm.clone();
			let id = id.clone();
			let seller = fx.seller();
			handles.push(tokio::spawn(async move {
				sm.transition(&id, &seller, target).await
			}));
		}

		let mut winners = Vec::new();
		for handle in handles {
			match handle.await.unwrap() {
				Ok(order) => winners.push(order.status),
				Err(OrderStateError::InvalidTransition(_)) | Err(OrderStateError::Conflict) => {}
				Err(other) => panic!("unexpected error {:?}", other),
			}
		}
		assert_eq!(winners.len(), 1);

		let stored = fx.stored_order(&id.parse().unwrap()).await;
		assert_eq!(stored.status, winners[0]);
	}

	#[tokio::test]
	async fn test_publishes_status_change() {
		let fx = Fixture::new().await;
		let bus = EventBus::default();
		let mut events = bus.subscribe();
		let sm = OrderStateMachine::new(fx.storage.clone(), bus, 3);
		let order = fx.order(BUYER).await;

		sm.transition(&order.id.to_hex(), &fx.seller(), "rejected")
			.await
			.unwrap();

		match events.recv().await.unwrap() {
			MarketEvent::Order(OrderEvent::StatusChanged { order_id, from, to }) => {
				assert_eq!(order_id, order.id);
				assert_eq!(from, OrderStatus::Pending);
				assert_eq!(to, OrderStatus::Rejected);
			}
			other => panic!("unexpected event {:?}", other),
		}
	}
}
