//! Order-scoped chat between a buyer and the store's seller.
//!
//! Every order has exactly one chat whose id is the order id. Messages are
//! immutable once written and are read back in id order. Clients follow a
//! chat with [`ChatService::poll`], which holds the request open until a
//! newer message arrives or the poll deadline passes.

use crate::engine::event_bus::EventBus;
use crate::participants::{OrderParticipants, ParticipantResolver, ResolveError};
use chrono::Utc;
use market_storage::StorageService;
use market_types::{
	chat_storage_prefix, truncate_id, Caller, ChatEvent, ChatMessage, MarketEvent, ObjectId,
	SenderRole, StorageKey,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::instrument;

#[derive(Debug, Error)]
pub enum ChatError {
	#[error("Invalid Order ID")]
	InvalidOrderId,
	#[error("Invalid lastMessageId")]
	InvalidLastMessageId,
	#[error("Message text must be between 1 and {max} characters")]
	InvalidText { max: usize },
	#[error("Order not found")]
	OrderNotFound,
	#[error("Unauthorized access to this chat")]
	Unauthorized,
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<ResolveError> for ChatError {
	fn from(err: ResolveError) -> Self {
		match err {
			ResolveError::OrderNotFound => ChatError::OrderNotFound,
			ResolveError::Storage(detail) => ChatError::Storage(detail),
		}
	}
}

/// Tunables for the chat, normally taken from the `[chat]` config section.
#[derive(Debug, Clone)]
pub struct ChatSettings {
	/// How long a poll waits for new messages before returning empty.
	pub poll_timeout: Duration,
	/// How often a waiting poll re-reads storage when no event wakes it.
	pub poll_interval: Duration,
	pub max_message_length: usize,
}

impl Default for ChatSettings {
	fn default() -> Self {
		Self {
			poll_timeout: Duration::from_secs(30),
			poll_interval: Duration::from_secs(1),
			max_message_length: 1000,
		}
	}
}

/// Order-scoped chat: send, full history and long-poll for new messages.
///
/// Only the order's buyer and the store's seller may use a chat. Messages
/// are immutable once written.
pub struct ChatService {
	storage: Arc<StorageService>,
	resolver: ParticipantResolver,
	event_bus: EventBus,
	settings: ChatSettings,
	/// Held while a message id is allocated and the message written, so ids
	/// become visible to readers in increasing order.
	append_lock: Mutex<()>,
}

impl ChatService {
	pub fn new(storage: Arc<StorageService>, event_bus: EventBus, settings: ChatSettings) -> Self {
		Self {
			resolver: ParticipantResolver::new(storage.clone()),
			storage,
			event_bus,
			settings,
			append_lock: Mutex::new(()),
		}
	}

	pub fn settings(&self) -> &ChatSettings {
		&self.settings
	}

	/// Appends a message to the order's chat.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn send(
		&self,
		order_id: &str,
		caller: &Caller,
		text: &str,
	) -> Result<ChatMessage, ChatError> {
		let text = text.trim();
		let length = text.chars().count();
		if length == 0 || length > self.settings.max_message_length {
			return Err(ChatError::InvalidText {
				max: self.settings.max_message_length,
			});
		}

		let access = self.authorize(order_id, caller).await?;
		let sender_role = if access.participant.is_buyer {
			SenderRole::Buyer
		} else {
			SenderRole::Seller
		};
		let chat_id = access.order.id;

		let message = {
			let _guard = self.append_lock.lock().await;
			let message = ChatMessage {
				id: ObjectId::new(),
				chat_id,
				order_id: chat_id,
				sender_id: caller.id.clone(),
				sender_role,
				text: text.to_string(),
				created_at: Utc::now(),
			};
			self.storage
				.store(StorageKey::Messages.as_str(), &message.storage_id(), &message)
				.await
				.map_err(|e| ChatError::Storage(e.to_string()))?;
			message
		};

		tracing::debug!(message_id = %message.id, role = %sender_role, "Message sent");
		self.event_bus
			.publish(MarketEvent::Chat(ChatEvent::MessageSent {
				chat_id,
				message_id: message.id,
			}));
		Ok(message)
	}

	/// Every message of the order's chat, oldest first.
	pub async fn history(
		&self,
		order_id: &str,
		caller: &Caller,
	) -> Result<Vec<ChatMessage>, ChatError> {
		let access = self.authorize(order_id, caller).await?;
		self.storage
			.retrieve_prefixed(
				StorageKey::Messages.as_str(),
				&chat_storage_prefix(&access.order.id),
			)
			.await
			.map_err(|e| ChatError::Storage(e.to_string()))
	}

	/// Long-polls the chat for messages newer than `last_seen`.
	///
	/// Returns as soon as at least one such message exists, or an empty list
	/// once the poll timeout elapses. With no `last_seen` any message counts.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn poll(
		&self,
		order_id: &str,
		caller: &Caller,
		last_seen: Option<&str>,
	) -> Result<Vec<ChatMessage>, ChatError> {
		let access = self.authorize(order_id, caller).await?;
		let last_seen = last_seen
			.map(|id| id.parse::<ObjectId>())
			.transpose()
			.map_err(|_| ChatError::InvalidLastMessageId)?;
		let chat_id = access.order.id;

		// Subscribe before the first read so a message committed in between
		// still wakes this poll.
		let mut events = self.event_bus.subscribe();
		let deadline = Instant::now() + self.settings.poll_timeout;
		let mut ticker = tokio::time::interval_at(
			Instant::now() + self.settings.poll_interval,
			self.settings.poll_interval,
		);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			let fresh = self.messages_after(&chat_id, last_seen.as_ref()).await?;
			if !fresh.is_empty() {
				return Ok(fresh);
			}

			tokio::select! {
				_ = tokio::time::sleep_until(deadline) => {
					tracing::trace!("Poll timed out");
					return Ok(Vec::new());
				}
				_ = ticker.tick() => {}
				_ = next_message_in(&mut events, chat_id) => {}
			}
		}
	}

	/// Messages of `chat_id` with an id greater than `after`, ascending.
	async fn messages_after(
		&self,
		chat_id: &ObjectId,
		after: Option<&ObjectId>,
	) -> Result<Vec<ChatMessage>, ChatError> {
		let prefix = chat_storage_prefix(chat_id);
		let ids = self
			.storage
			.list_ids(StorageKey::Messages.as_str(), &prefix)
			.await
			.map_err(|e| ChatError::Storage(e.to_string()))?;

		let mut messages = Vec::new();
		for id in ids {
			let newer = id[prefix.len()..]
				.parse::<ObjectId>()
				.is_ok_and(|message_id| after.is_none_or(|after| message_id > *after));
			if !newer {
				continue;
			}
			let message: ChatMessage = self
				.storage
				.retrieve(StorageKey::Messages.as_str(), &id)
				.await
				.map_err(|e| ChatError::Storage(e.to_string()))?;
			messages.push(message);
		}
		Ok(messages)
	}

	/// Resolves the caller's access to the chat of `order_id`.
	async fn authorize(
		&self,
		order_id: &str,
		caller: &Caller,
	) -> Result<OrderParticipants, ChatError> {
		let order_id: ObjectId = order_id.parse().map_err(|_| ChatError::InvalidOrderId)?;
		let access = self.resolver.resolve(&order_id, &caller.id).await?;
		if !access.participant.is_participant() {
			return Err(ChatError::Unauthorized);
		}
		Ok(access)
	}
}

/// Resolves when a `MessageSent` event for `chat_id` arrives, or when the
/// receiver lagged and may have missed one. Never resolves once the bus is
/// closed.
async fn next_message_in(events: &mut broadcast::Receiver<MarketEvent>, chat_id: ObjectId) {
	loop {
		match events.recv().await {
			Ok(MarketEvent::Chat(ChatEvent::MessageSent { chat_id: sent, .. })) if sent == chat_id => {
				return
			}
			Ok(_) => continue,
			Err(broadcast::error::RecvError::Lagged(_)) => return,
			Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
		}
	}
}
