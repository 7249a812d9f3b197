//! HTTP server for the market API.
//!
//! Every route lives under `/api`. All routes except `/api/health` require
//! a bearer token.

use crate::apis::{chat, order};
use axum::{
	extract::DefaultBodyLimit,
	http::{HeaderName, HeaderValue, Method},
	response::Json,
	routing::{get, post},
	Router,
};
use market_config::{ApiConfig, CorsConfig};
use market_core::MarketEngine;
use market_types::HealthResponse;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<MarketEngine>,
}

/// Builds the router with all routes and middleware.
pub fn router(engine: Arc<MarketEngine>, api_config: &ApiConfig) -> Router {
	let api = Router::new()
		.route("/health", get(health))
		.route("/updateOrderStatus", post(order::update_order_status))
		.route("/placeOrder", post(order::place_order))
		.route("/getMyOrders", get(order::get_my_orders))
		.route("/getStoreOrders/{store_id}", get(order::get_store_orders))
		.route("/orders/{order_id}", get(order::get_order))
		.route("/chat/history", get(chat::history))
		.route("/chat/messages", get(chat::poll_messages))
		.route("/chat/send", post(chat::send_message));

	Router::new()
		.nest("/api", api)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(cors_layer(api_config.cors.as_ref()))
				.layer(DefaultBodyLimit::max(api_config.max_request_size)),
		)
		.with_state(AppState { engine })
}

/// Starts the HTTP server and serves until the listener fails.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<MarketEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(engine, &api_config);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;
	tracing::info!(address = %bind_address, "Market API listening");

	axum::serve(listener, app).await?;
	Ok(())
}

async fn health() -> Json<HealthResponse> {
	Json(HealthResponse {
		status: "ok".into(),
	})
}

/// Permissive unless origins are configured. Entries that do not parse as
/// header values or methods are skipped with a warning.
fn cors_layer(cors: Option<&CorsConfig>) -> CorsLayer {
	let Some(cors) = cors else {
		return CorsLayer::permissive();
	};

	let mut layer = CorsLayer::new();
	layer = if cors.allowed_origins.iter().any(|origin| origin == "*") {
		layer.allow_origin(Any)
	} else {
		layer.allow_origin(parse_all::<HeaderValue>(&cors.allowed_origins, "origin"))
	};
	layer = if cors.allowed_methods.is_empty() {
		layer.allow_methods([Method::GET, Method::POST, Method::OPTIONS])
	} else {
		layer.allow_methods(parse_all::<Method>(&cors.allowed_methods, "method"))
	};
	if cors.allowed_headers.is_empty() {
		layer.allow_headers(Any)
	} else {
		layer.allow_headers(parse_all::<HeaderName>(&cors.allowed_headers, "header"))
	}
}

fn parse_all<T: std::str::FromStr>(values: &[String], what: &'static str) -> Vec<T> {
	values
		.iter()
		.filter_map(|value| match value.parse() {
			Ok(parsed) => Some(parsed),
			Err(_) => {
				tracing::warn!(value = %value, kind = what, "Ignoring invalid CORS entry");
				None
			}
		})
		.collect()
}
