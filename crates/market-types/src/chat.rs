//! Chat messages exchanged between an order's buyer and seller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ObjectId;

/// Which side of the order sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
	Buyer,
	Seller,
}

impl fmt::Display for SenderRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SenderRole::Buyer => f.write_str("buyer"),
			SenderRole::Seller => f.write_str("seller"),
		}
	}
}

/// An immutable message in an order's chat.
///
/// The chat id is always the order id. Message ids are issued in creation
/// order, so sorting by id sorts by send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
	#[serde(rename = "_id")]
	pub id: ObjectId,
	pub chat_id: ObjectId,
	pub order_id: ObjectId,
	pub sender_id: String,
	#[serde(rename = "senderType")]
	pub sender_role: SenderRole,
	pub text: String,
	pub created_at: DateTime<Utc>,
}

impl ChatMessage {
	/// Storage id under the messages namespace: `<chatId>:<messageId>`.
	pub fn storage_id(&self) -> String {
		message_storage_id(&self.chat_id, &self.id)
	}
}

/// Key prefix shared by every message of one chat.
pub fn chat_storage_prefix(chat_id: &ObjectId) -> String {
	format!("{}:", chat_id)
}

pub fn message_storage_id(chat_id: &ObjectId, message_id: &ObjectId) -> String {
	format!("{}:{}", chat_id, message_id)
}
