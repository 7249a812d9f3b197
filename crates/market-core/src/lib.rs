//! Core engine for the campus marketplace.
//!
//! Ties the storage and identity services to the three flows the HTTP layer
//! exposes: the order status state machine, the order-scoped chat and order
//! placement. [`MarketEngine`] is built from configuration by
//! [`MarketBuilder`] and is cheap to clone into request handlers.

use market_account::AccountError;
use thiserror::Error;

pub mod builder;
pub mod chat;
pub mod engine;
pub mod orders;
pub mod participants;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use builder::{BuilderError, MarketBuilder, MarketFactories};
pub use chat::{ChatError, ChatService, ChatSettings};
pub use engine::{event_bus::EventBus, EngineError, MarketEngine};
pub use orders::{OrderService, PlacementError};
pub use participants::{OrderParticipants, Participant, ParticipantResolver, ResolveError};
pub use state::{OrderStateError, OrderStateMachine};

/// Failure of any engine operation, classified by how a caller should react.
///
/// The message of every variant except `Internal` is safe to show to the end
/// user. `Internal` carries backend detail meant for the log only.
#[derive(Debug, Error)]
pub enum MarketError {
	#[error("{0}")]
	Unauthenticated(String),
	#[error("{0}")]
	Validation(String),
	#[error("{0}")]
	BadRequest(String),
	#[error("{0}")]
	NotFound(String),
	#[error("{0}")]
	Forbidden(String),
	/// The order is not in the status the requested change needs.
	#[error("{0}")]
	InvalidState(String),
	#[error("{0}")]
	Conflict(String),
	#[error("Internal error: {0}")]
	Internal(String),
}

impl From<AccountError> for MarketError {
	fn from(err: AccountError) -> Self {
		match err {
			AccountError::ExpiredToken => MarketError::Unauthenticated("Token expired".into()),
			AccountError::InvalidToken(_) => MarketError::Unauthenticated("Unauthorized".into()),
			AccountError::Configuration(detail) => MarketError::Internal(detail),
		}
	}
}

impl From<OrderStateError> for MarketError {
	fn from(err: OrderStateError) -> Self {
		let message = err.to_string();
		match err {
			OrderStateError::InvalidStatus | OrderStateError::InvalidOrderId => {
				MarketError::Validation(message)
			}
			OrderStateError::OrderNotFound | OrderStateError::StoreNotFound => {
				MarketError::NotFound(message)
			}
			OrderStateError::Forbidden(_) => MarketError::Forbidden(message),
			OrderStateError::InvalidTransition(_) => MarketError::InvalidState(message),
			OrderStateError::Conflict => MarketError::Conflict(message),
			OrderStateError::Storage(detail) => MarketError::Internal(detail),
		}
	}
}

impl From<ChatError> for MarketError {
	fn from(err: ChatError) -> Self {
		let message = err.to_string();
		match err {
			ChatError::InvalidOrderId | ChatError::InvalidLastMessageId => {
				MarketError::BadRequest(message)
			}
			ChatError::InvalidText { .. } => MarketError::Validation(message),
			ChatError::OrderNotFound => MarketError::NotFound(message),
			ChatError::Unauthorized => MarketError::Forbidden(message),
			ChatError::Storage(detail) => MarketError::Internal(detail),
		}
	}
}

impl From<PlacementError> for MarketError {
	fn from(err: PlacementError) -> Self {
		let message = err.to_string();
		match err {
			PlacementError::MissingDetails
			| PlacementError::InvalidStoreId
			| PlacementError::InvalidProductId
			| PlacementError::InvalidOrderId
			| PlacementError::InvalidQuantity
			| PlacementError::ForeignProduct
			| PlacementError::InsufficientStock(_)
			| PlacementError::InvalidPrice(_)
			| PlacementError::TotalMismatch => MarketError::Validation(message),
			PlacementError::StoreNotFound
			| PlacementError::ProductNotFound
			| PlacementError::OrderNotFound => MarketError::NotFound(message),
			PlacementError::Forbidden => MarketError::Forbidden(message),
			PlacementError::Conflict => MarketError::Conflict(message),
			PlacementError::Storage(detail) => MarketError::Internal(detail),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_token_errors_hide_detail() {
		let err: MarketError = AccountError::InvalidToken("InvalidSignature".into()).into();
		assert_eq!(err.to_string(), "Unauthorized");
		let err: MarketError = AccountError::ExpiredToken.into();
		assert_eq!(err.to_string(), "Token expired");
	}

	#[test]
	fn test_domain_errors_keep_user_message() {
		let err: MarketError = OrderStateError::Conflict.into();
		assert!(matches!(err, MarketError::Conflict(ref m) if m == "Order was modified concurrently"));

		let err: MarketError = ChatError::Unauthorized.into();
		assert!(matches!(err, MarketError::Forbidden(ref m) if m == "Unauthorized access to this chat"));

		let err: MarketError = PlacementError::InsufficientStock("Maggi".into()).into();
		assert!(matches!(err, MarketError::Validation(ref m) if m == "Insufficient stock for Maggi"));

		let err: MarketError = OrderStateError::Storage("disk full".into()).into();
		assert!(matches!(err, MarketError::Internal(_)));
	}
}
