//! Request, response and error types for the market HTTP API.
//!
//! Field names follow the camelCase JSON used by the existing web client.
//! Error bodies carry a single human-readable `message`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use crate::{ChatMessage, Order};

/// Body of `POST /api/updateOrderStatus`.
///
/// Both fields are optional at the serde level so that a missing field
/// produces the API's own 400 message rather than a deserialization error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderStatusRequest {
	pub order_id: Option<String>,
	pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOrderStatusResponse {
	pub message: String,
	pub order: Order,
}

/// Body of `POST /api/chat/send`.
///
/// Length bounds on `text` are enforced by the chat service after trimming.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
	#[serde(default)]
	#[validate(length(min = 1, message = "orderId is required"))]
	pub order_id: String,
	#[serde(default)]
	pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
	pub message: String,
	pub data: ChatMessage,
}

/// Query string of the chat history and poll endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatQuery {
	pub order_id: Option<String>,
	pub last_message_id: Option<String>,
}

/// Body of `POST /api/placeOrder`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
	#[serde(default)]
	#[validate(length(min = 1, message = "Missing order details"))]
	pub store_id: String,
	#[serde(default)]
	#[validate(length(min = 1, message = "Missing order details"), nested)]
	pub items: Vec<PlaceOrderItem>,
	/// Client-computed total. When present it must match the server total.
	#[serde(default, with = "rust_decimal::serde::float_option")]
	pub total_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderItem {
	pub product_id: String,
	#[validate(range(min = 1, message = "Quantity must be at least 1"))]
	pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderResponse {
	pub message: String,
	pub order: Order,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersResponse {
	pub orders: Vec<Order>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
	pub order: Order,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
	pub status: String,
}

/// JSON body returned for every failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub message: String,
}

/// API error with its HTTP status.
#[derive(Debug, Clone, PartialEq)]
pub enum APIError {
	/// Malformed or invalid input (400). Also used for invalid state changes.
	BadRequest { message: String },
	/// Missing, invalid or expired token (401).
	Unauthorized { message: String },
	/// Caller is not allowed to perform the action (403).
	Forbidden { message: String },
	/// Referenced record does not exist (404).
	NotFound { message: String },
	/// Record changed underneath the request (409).
	Conflict { message: String },
	/// Unexpected failure (500). The message is generic; details go to logs.
	InternalServerError { message: String },
}

impl APIError {
	pub fn bad_request(message: impl Into<String>) -> Self {
		APIError::BadRequest {
			message: message.into(),
		}
	}

	pub fn internal() -> Self {
		APIError::InternalServerError {
			message: "Internal Server Error".to_string(),
		}
	}

	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::Unauthorized { .. } => 401,
			APIError::Forbidden { .. } => 403,
			APIError::NotFound { .. } => 404,
			APIError::Conflict { .. } => 409,
			APIError::InternalServerError { .. } => 500,
		}
	}

	pub fn message(&self) -> &str {
		match self {
			APIError::BadRequest { message }
			| APIError::Unauthorized { message }
			| APIError::Forbidden { message }
			| APIError::NotFound { message }
			| APIError::Conflict { message }
			| APIError::InternalServerError { message } => message,
		}
	}

	pub fn to_error_response(&self) -> ErrorResponse {
		ErrorResponse {
			message: self.message().to_string(),
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let kind = match self {
			APIError::BadRequest { .. } => "Bad Request",
			APIError::Unauthorized { .. } => "Unauthorized",
			APIError::Forbidden { .. } => "Forbidden",
			APIError::NotFound { .. } => "Not Found",
			APIError::Conflict { .. } => "Conflict",
			APIError::InternalServerError { .. } => "Internal Server Error",
		};
		write!(f, "{}: {}", kind, self.message())
	}
}

impl std::error::Error for APIError {}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status = StatusCode::from_u16(self.status_code())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}
