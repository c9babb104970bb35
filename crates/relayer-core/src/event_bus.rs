//! Broadcast channel for gas station events.

use relayer_types::GasStationEvent;
use tokio::sync::broadcast;

/// Fan-out of [`GasStationEvent`]s to any number of subscribers.
///
/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<GasStationEvent>,
}

impl EventBus {
	/// `capacity` bounds how many events a slow subscriber may lag behind
	/// before it starts missing them.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Each subscriber sees every event published after it subscribed.
	pub fn subscribe(&self) -> broadcast::Receiver<GasStationEvent> {
		self.sender.subscribe()
	}

	/// Fails only when nobody is listening.
	pub fn publish(
		&self,
		event: GasStationEvent,
	) -> Result<(), broadcast::error::SendError<GasStationEvent>> {
		self.sender.send(event)?;
		Ok(())
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1000)
	}
}
