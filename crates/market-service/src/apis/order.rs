//! Order endpoints: placement, status changes and queries.

use super::{json_body, to_api_error, validation_message};
use crate::auth::Authenticated;
use crate::server::AppState;
use axum::{
	extract::{rejection::JsonRejection, Path, State},
	http::StatusCode,
	Json,
};
use market_types::{
	APIError, OrderResponse, OrdersResponse, PlaceOrderRequest, PlaceOrderResponse,
	UpdateOrderStatusRequest, UpdateOrderStatusResponse,
};
use validator::Validate;

/// Handles POST /api/updateOrderStatus.
pub async fn update_order_status(
	State(state): State<AppState>,
	Authenticated(caller): Authenticated,
	payload: Result<Json<UpdateOrderStatusRequest>, JsonRejection>,
) -> Result<Json<UpdateOrderStatusResponse>, APIError> {
	let request = json_body(payload)?;
	let (Some(order_id), Some(status)) = (
		request.order_id.filter(|id| !id.is_empty()),
		request.status.filter(|status| !status.is_empty()),
	) else {
		return Err(APIError::bad_request("Missing orderId or status"));
	};

	let order = state
		.engine
		.update_order_status(&caller, &order_id, &status)
		.await
		.map_err(|e| to_api_error("update_order_status", e))?;

	Ok(Json(UpdateOrderStatusResponse {
		message: "Order status updated".into(),
		order,
	}))
}

/// Handles POST /api/placeOrder.
pub async fn place_order(
	State(state): State<AppState>,
	Authenticated(caller): Authenticated,
	payload: Result<Json<PlaceOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PlaceOrderResponse>), APIError> {
	let request = json_body(payload)?;
	if let Err(errors) = request.validate() {
		return Err(APIError::bad_request(validation_message(&errors)));
	}

	let order = state
		.engine
		.place_order(&caller, request)
		.await
		.map_err(|e| to_api_error("place_order", e))?;

	Ok((
		StatusCode::CREATED,
		Json(PlaceOrderResponse {
			message: "Order Placed Successfully".into(),
			order,
		}),
	))
}

/// Handles GET /api/getMyOrders.
pub async fn get_my_orders(
	State(state): State<AppState>,
	Authenticated(caller): Authenticated,
) -> Result<Json<OrdersResponse>, APIError> {
	let orders = state
		.engine
		.buyer_orders(&caller)
		.await
		.map_err(|e| to_api_error("get_my_orders", e))?;
	Ok(Json(OrdersResponse { orders }))
}

/// Handles GET /api/getStoreOrders/{store_id}.
pub async fn get_store_orders(
	State(state): State<AppState>,
	Authenticated(caller): Authenticated,
	Path(store_id): Path<String>,
) -> Result<Json<OrdersResponse>, APIError> {
	let orders = state
		.engine
		.store_orders(&caller, &store_id)
		.await
		.map_err(|e| to_api_error("get_store_orders", e))?;
	Ok(Json(OrdersResponse { orders }))
}

/// Handles GET /api/orders/{order_id}.
pub async fn get_order(
	State(state): State<AppState>,
	Authenticated(caller): Authenticated,
	Path(order_id): Path<String>,
) -> Result<Json<OrderResponse>, APIError> {
	let order = state
		.engine
		.order(&caller, &order_id)
		.await
		.map_err(|e| to_api_error("get_order", e))?;
	Ok(Json(OrderResponse { order }))
}
