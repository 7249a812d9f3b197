//! Store and product records.
//!
//! These are owned by the catalog side of the marketplace. The order and chat
//! flows only read them, apart from the stock decrement made at placement.

use serde::{Deserialize, Serialize};

use crate::ObjectId;

/// A student-run store. `user_id` is the seller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
	#[serde(rename = "_id")]
	pub id: ObjectId,
	pub user_id: String,
	pub name: String,
	#[serde(default)]
	pub hostel: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub floor: Option<String>,
}

impl Store {
	pub fn is_owner(&self, user_id: &str) -> bool {
		self.user_id == user_id
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
	#[serde(rename = "_id")]
	pub id: ObjectId,
	pub store_id: ObjectId,
	pub name: String,
	/// Decimal string such as `"40"` or `"19.99"`.
	pub price: String,
	pub stock: u32,
	#[serde(default)]
	pub image: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub size: Option<String>,
}
