//! Outbound half of a persistent connection.
//!
//! Inbound frames never flow through this trait: the server's read loop
//! hands them to the dispatcher, which settles the session's pending slot.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::error::{Error, Result};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Sends serialized envelopes to one connected peer.
pub trait Transport: Send + Sync {
	fn send(&self, message: String) -> BoxFuture<'_, Result<()>>;

	fn is_connected(&self) -> bool;
}

/// Transport feeding a connection's writer task through a channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
	tx: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
	pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
		Self { tx }
	}

	/// Creates the transport together with the receiver its writer task drains.
	pub fn pair() -> (Self, mpsc::UnboundedReceiver<String>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}
}

impl Transport for ChannelTransport {
	fn send(&self, message: String) -> BoxFuture<'_, Result<()>> {
		let result = self.tx.send(message).map_err(|_| Error::Transport("connection writer has shut down".into()));
		Box::pin(async move { result })
	}

	fn is_connected(&self) -> bool {
		!self.tx.is_closed()
	}
}
