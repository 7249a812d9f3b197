//! Chat endpoints for an order's buyer and seller.
//!
//! `GET /api/chat/messages` is a long poll: it answers as soon as a message
//! newer than `lastMessageId` exists, or with `[]` after the configured wait.

use super::{json_body, to_api_error, validation_message};
use crate::auth::Authenticated;
use crate::server::AppState;
use axum::{
	extract::{rejection::JsonRejection, Query, State},
	http::StatusCode,
	Json,
};
use market_types::{APIError, ChatMessage, ChatQuery, SendMessageRequest, SendMessageResponse};
use validator::Validate;

fn required_order_id(query: &ChatQuery) -> Result<&str, APIError> {
	query
		.order_id
		.as_deref()
		.filter(|id| !id.is_empty())
		.ok_or_else(|| APIError::bad_request("orderId is required"))
}

/// Handles GET /api/chat/history.
pub async fn history(
	State(state): State<AppState>,
	Authenticated(caller): Authenticated,
	Query(query): Query<ChatQuery>,
) -> Result<Json<Vec<ChatMessage>>, APIError> {
	let order_id = required_order_id(&query)?;
	let messages = state
		.engine
		.chat_history(&caller, order_id)
		.await
		.map_err(|e| to_api_error("chat_history", e))?;
	Ok(Json(messages))
}

/// Handles GET /api/chat/messages.
pub async fn poll_messages(
	State(state): State<AppState>,
	Authenticated(caller): Authenticated,
	Query(query): Query<ChatQuery>,
) -> Result<Json<Vec<ChatMessage>>, APIError> {
	let order_id = required_order_id(&query)?;
	let last_message_id = query.last_message_id.as_deref().filter(|id| !id.is_empty());
	let messages = state
		.engine
		.poll_messages(&caller, order_id, last_message_id)
		.await
		.map_err(|e| to_api_error("poll_messages", e))?;
	Ok(Json(messages))
}

/// Handles POST /api/chat/send.
pub async fn send_message(
	State(state): State<AppState>,
	Authenticated(caller): Authenticated,
	payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SendMessageResponse>), APIError> {
	let request = json_body(payload)?;
	if let Err(errors) = request.validate() {
		return Err(APIError::bad_request(validation_message(&errors)));
	}

	let message = state
		.engine
		.send_message(&caller, &request.order_id, &request.text)
		.await
		.map_err(|e| to_api_error("send_message", e))?;

	Ok((
		StatusCode::CREATED,
		Json(SendMessageResponse {
			message: "Message sent successfully".into(),
			data: message,
		}),
	))
}
