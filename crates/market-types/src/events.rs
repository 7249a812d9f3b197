//! Events published on the internal event bus.
//!
//! Components publish after a state change is persisted. Subscribers treat
//! events as hints: anything they need is re-read from storage.

use serde::{Deserialize, Serialize};

use crate::{ObjectId, OrderStatus};

/// Every event carried by the bus, grouped by the component that emits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketEvent {
	Order(OrderEvent),
	Chat(ChatEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderEvent {
	/// A buyer placed a new order.
	Placed {
		order_id: ObjectId,
		store_id: ObjectId,
		buyer_id: String,
	},
	/// The order state machine committed a status change.
	StatusChanged {
		order_id: ObjectId,
		from: OrderStatus,
		to: OrderStatus,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChatEvent {
	/// A message was appended to a chat. Wakes pollers waiting on `chat_id`.
	MessageSent {
		chat_id: ObjectId,
		message_id: ObjectId,
	},
}
