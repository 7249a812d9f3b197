//! Order records and the order status lifecycle.
//!
//! An order is created once in [`OrderStatus::Pending`] and afterwards changes
//! only through the status transitions enforced by the order state machine in
//! `market-core`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ObjectId;

/// A buyer's purchase from one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
	#[serde(rename = "_id")]
	pub id: ObjectId,
	pub buyer_id: String,
	/// Display name copied from the buyer's token at placement.
	pub buyer_name: String,
	pub store_id: ObjectId,
	pub items: Vec<OrderItem>,
	/// Sum of unit price times quantity over `items`, computed at placement.
	#[serde(with = "rust_decimal::serde::float")]
	pub total_amount: Decimal,
	pub status: OrderStatus,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Order {
	pub fn is_buyer(&self, user_id: &str) -> bool {
		self.buyer_id == user_id
	}
}

/// One line of an order, snapshotted from the product at placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
	pub product_id: ObjectId,
	pub name: String,
	/// Unit price as a decimal string, as stored on the product.
	pub price: String,
	pub quantity: u32,
	#[serde(default)]
	pub image: Vec<String>,
}

/// Status of an order.
///
/// `Pending` is the initial state; `Accepted` can still move to `Completed`;
/// the remaining three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
	Pending,
	Accepted,
	Rejected,
	Completed,
	Cancelled,
}

impl OrderStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::Pending => "pending",
			OrderStatus::Accepted => "accepted",
			OrderStatus::Rejected => "rejected",
			OrderStatus::Completed => "completed",
			OrderStatus::Cancelled => "cancelled",
		}
	}

	/// No transition leaves a terminal status.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			OrderStatus::Rejected | OrderStatus::Completed | OrderStatus::Cancelled
		)
	}

	pub fn all() -> [OrderStatus; 5] {
		[
			OrderStatus::Pending,
			OrderStatus::Accepted,
			OrderStatus::Rejected,
			OrderStatus::Completed,
			OrderStatus::Cancelled,
		]
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Raised when a status string is not one of the five known values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
	type Err = UnknownStatus;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		OrderStatus::all()
			.into_iter()
			.find(|status| status.as_str() == s)
			.ok_or_else(|| UnknownStatus(s.to_string()))
	}
}
