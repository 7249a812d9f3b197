//! The market engine.
//!
//! [`MarketEngine`] owns the shared services and exposes every operation
//! the HTTP layer serves, converting component errors into [`MarketError`].
//! [`MarketEngine::run`] drives the background work: periodic storage
//! cleanup and event logging until shutdown.

pub mod event_bus;

use crate::chat::{ChatService, ChatSettings};
use crate::orders::OrderService;
use crate::state::OrderStateMachine;
use crate::MarketError;
use event_bus::EventBus;
use market_account::IdentityService;
use market_config::Config;
use market_storage::StorageService;
use market_types::{
	truncate_id, Caller, ChatEvent, ChatMessage, MarketEvent, Order, OrderEvent, PlaceOrderRequest,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;

/// Errors that can occur while the engine's background loop runs.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Service error: {0}")]
	Service(String),
}

/// Main market engine.
///
/// Cloning is cheap; every clone shares the same services and event bus.
#[derive(Clone)]
pub struct MarketEngine {
	pub(crate) config: Config,
	pub(crate) storage: Arc<StorageService>,
	pub(crate) identity: Arc<IdentityService>,
	pub(crate) event_bus: EventBus,
	pub(crate) state_machine: Arc<OrderStateMachine>,
	pub(crate) chat: Arc<ChatService>,
	pub(crate) orders: Arc<OrderService>,
}

impl MarketEngine {
	/// Wires the order, chat and placement services over shared storage.
	pub fn new(
		config: Config,
		storage: Arc<StorageService>,
		identity: Arc<IdentityService>,
		event_bus: EventBus,
	) -> Self {
		let attempts = config.market.write_attempts;
		let chat_settings = ChatSettings {
			poll_timeout: config.poll_timeout(),
			poll_interval: config.poll_interval(),
			max_message_length: config.chat.max_message_length,
		};

		Self {
			state_machine: Arc::new(OrderStateMachine::new(
				storage.clone(),
				event_bus.clone(),
				attempts,
			)),
			chat: Arc::new(ChatService::new(
				storage.clone(),
				event_bus.clone(),
				chat_settings,
			)),
			orders: Arc::new(OrderService::new(storage.clone(), event_bus.clone(), attempts)),
			config,
			storage,
			identity,
			event_bus,
		}
	}

	/// Runs background tasks until Ctrl-C.
	pub async fn run(&self) -> Result<(), EngineError> {
		let interval_secs = self.config.storage.cleanup_interval_seconds;
		if interval_secs == 0 {
			return Err(EngineError::Config(
				"cleanup_interval_seconds must be positive".into(),
			));
		}

		let storage = self.storage.clone();
		let cleanup_handle = tokio::spawn(async move {
			let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
			loop {
				interval.tick().await;
				match storage.cleanup_expired().await {
					Ok(0) => {}
					Ok(count) => tracing::debug!(count, "Removed expired storage entries"),
					Err(e) => tracing::warn!(error = %e, "Storage cleanup failed"),
				}
			}
		});

		let mut events = self.event_bus.subscribe();
		let result = loop {
			tokio::select! {
				event = events.recv() => match event {
					Ok(event) => log_event(&event),
					Err(RecvError::Lagged(skipped)) => {
						tracing::debug!(skipped, "Event log fell behind");
					}
					Err(RecvError::Closed) => {
						break Err(EngineError::Service("Event bus closed".into()));
					}
				},
				_ = tokio::signal::ctrl_c() => break Ok(()),
			}
		};

		cleanup_handle.abort();
		result
	}

	/// Verifies a bearer token.
	pub async fn authenticate(&self, token: &str) -> Result<Caller, MarketError> {
		Ok(self.identity.verify(token).await?)
	}

	/// Moves an order to `status` on behalf of `caller`.
	pub async fn update_order_status(
		&self,
		caller: &Caller,
		order_id: &str,
		status: &str,
	) -> Result<Order, MarketError> {
		Ok(self.state_machine.transition(order_id, caller, status).await?)
	}

	/// Appends a message to the order's chat.
	pub async fn send_message(
		&self,
		caller: &Caller,
		order_id: &str,
		text: &str,
	) -> Result<ChatMessage, MarketError> {
		Ok(self.chat.send(order_id, caller, text).await?)
	}

	/// All messages of the order's chat, oldest first.
	pub async fn chat_history(
		&self,
		caller: &Caller,
		order_id: &str,
	) -> Result<Vec<ChatMessage>, MarketError> {
		Ok(self.chat.history(order_id, caller).await?)
	}

	/// Waits for messages newer than `last_message_id`, up to the configured
	/// poll timeout. Returns an empty list when none arrive.
	pub async fn poll_messages(
		&self,
		caller: &Caller,
		order_id: &str,
		last_message_id: Option<&str>,
	) -> Result<Vec<ChatMessage>, MarketError> {
		Ok(self.chat.poll(order_id, caller, last_message_id).await?)
	}

	pub async fn place_order(
		&self,
		caller: &Caller,
		request: PlaceOrderRequest,
	) -> Result<Order, MarketError> {
		Ok(self.orders.place_order(caller, request).await?)
	}

	/// Orders placed by `caller`, newest first.
	pub async fn buyer_orders(&self, caller: &Caller) -> Result<Vec<Order>, MarketError> {
		Ok(self.orders.list_buyer_orders(caller).await?)
	}

	/// Orders placed with a store the caller owns.
	pub async fn store_orders(
		&self,
		caller: &Caller,
		store_id: &str,
	) -> Result<Vec<Order>, MarketError> {
		Ok(self.orders.list_store_orders(caller, store_id).await?)
	}

	pub async fn order(&self, caller: &Caller, order_id: &str) -> Result<Order, MarketError> {
		Ok(self.orders.get_order(caller, order_id).await?)
	}

	/// Returns a reference to the event bus.
	pub fn event_bus(&self) -> &EventBus {
		&self.event_bus
	}

	/// Returns a reference to the config.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns a reference to the storage service.
	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub fn identity(&self) -> &Arc<IdentityService> {
		&self.identity
	}
}

fn log_event(event: &MarketEvent) {
	match event {
		MarketEvent::Order(OrderEvent::Placed {
			order_id, store_id, ..
		}) => tracing::info!(
			order_id = %truncate_id(&order_id.to_hex()),
			store_id = %truncate_id(&store_id.to_hex()),
			"Order placed"
		),
		MarketEvent::Order(OrderEvent::StatusChanged { order_id, from, to }) => tracing::info!(
			order_id = %truncate_id(&order_id.to_hex()),
			%from,
			%to,
			"Order status changed"
		),
		MarketEvent::Chat(ChatEvent::MessageSent { chat_id, .. }) => {
			tracing::trace!(chat_id = %truncate_id(&chat_id.to_hex()), "Chat message")
		}
	}
}
