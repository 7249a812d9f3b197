//! In-process broadcast of [`MarketEvent`]s.
//!
//! Publishing never fails: an event with no subscribers is dropped. Slow
//! subscribers may lag and miss events, so receivers must treat events as
//! wake-up hints and re-read state from storage.

use market_types::MarketEvent;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// Cloneable handle to a broadcast channel of market events.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<MarketEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Receives every event published after this call.
	pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
		self.sender.subscribe()
	}

	pub fn publish(&self, event: MarketEvent) {
		// No receivers is not an error.
		let _ = self.sender.send(event);
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY)
	}
}
