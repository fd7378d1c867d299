//! Bridge to the Enterprise Assistant.
//!
//! The assistant connects over its own persistent channel. Each device
//! session may have one satellite request outstanding, correlated by the
//! `nodeid` the assistant echoes back. Failures are never retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rps_protocol::satellite::{SatelliteReply, SatelliteRequest};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::transport::Transport;

pub struct EnterpriseAssistant {
	transport: RwLock<Option<Arc<dyn Transport>>>,
	pending: Mutex<HashMap<String, oneshot::Sender<SatelliteReply>>>,
	deadline: Duration,
}

impl EnterpriseAssistant {
	pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

	pub fn new(deadline: Duration) -> Self {
		Self {
			transport: RwLock::new(None),
			pending: Mutex::new(HashMap::new()),
			deadline,
		}
	}

	pub fn attach(&self, transport: Arc<dyn Transport>) {
		if self.transport.write().replace(transport).is_some() {
			warn!(target = "rps.ea", "replaced an existing enterprise assistant connection");
		} else {
			info!(target = "rps.ea", "enterprise assistant connected");
		}
	}

	/// Drops `transport` if it is still the current connection; outstanding
	/// requests then fail with a closed channel. A connection that was already
	/// replaced by [`attach`](Self::attach) leaves the bridge untouched.
	pub fn detach(&self, transport: &Arc<dyn Transport>) {
		{
			let mut current = self.transport.write();
			if !current.as_ref().is_some_and(|t| Arc::ptr_eq(t, transport)) {
				debug!(target = "rps.ea", "replaced enterprise assistant connection closed");
				return;
			}
			current.take();
		}
		let dropped = self.pending.lock().drain().count();
		info!(target = "rps.ea", dropped, "enterprise assistant disconnected");
	}

	pub fn is_attached(&self) -> bool {
		self.transport.read().as_ref().is_some_and(|t| t.is_connected())
	}

	/// Sends `request` and waits for the reply addressed to its `nodeid`.
	pub async fn request(&self, request: &SatelliteRequest) -> Result<SatelliteReply> {
		let node_id = request.nodeid.clone();
		let transport = self
			.transport
			.read()
			.as_ref()
			.filter(|t| t.is_connected())
			.cloned()
			.ok_or_else(|| Error::EnterpriseAssistant("not connected".into()))?;

		let message = serde_json::to_string(request).map_err(rps_protocol::Error::from)?;
		let (tx, rx) = oneshot::channel();
		if self.pending.lock().insert(node_id.clone(), tx).is_some() {
			warn!(target = "rps.ea", %node_id, "replaced an unsettled satellite request");
		}

		debug!(target = "rps.ea", %node_id, subaction = request.kind.subaction(), "sending satellite request");
		if let Err(err) = transport.send(message).await {
			self.pending.lock().remove(&node_id);
			return Err(err);
		}

		let reply = match tokio::time::timeout(self.deadline, rx).await {
			Ok(Ok(reply)) => reply,
			Ok(Err(_)) => return Err(Error::ChannelClosed(node_id)),
			Err(_) => {
				self.pending.lock().remove(&node_id);
				warn!(target = "rps.ea", %node_id, deadline = ?self.deadline, "satellite request timed out");
				return Err(Error::GatewayTimeout(self.deadline));
			}
		};

		match &reply.response.error {
			Some(error) => Err(Error::EnterpriseAssistant(error.clone())),
			None => Ok(reply),
		}
	}

	/// Routes a raw reply from the assistant; `Ok(false)` when nobody waits on it.
	pub fn deliver(&self, raw: &str) -> Result<bool> {
		let reply: SatelliteReply = serde_json::from_str(raw).map_err(rps_protocol::Error::from)?;
		match self.pending.lock().remove(&reply.nodeid) {
			Some(tx) => {
				debug!(target = "rps.ea", node_id = %reply.nodeid, subaction = %reply.subaction, "satellite reply");
				Ok(tx.send(reply).is_ok())
			}
			None => {
				debug!(target = "rps.ea", node_id = %reply.nodeid, "satellite reply with no request outstanding; dropped");
				Ok(false)
			}
		}
	}

	/// Forgets the slot of a device session that went away.
	pub fn forget(&self, node_id: &str) {
		self.pending.lock().remove(node_id);
	}
}

impl Default for EnterpriseAssistant {
	fn default() -> Self {
		Self::new(Self::DEFAULT_DEADLINE)
	}
}

#[cfg(test)]
mod tests {
	use rps_protocol::satellite::SatelliteRequestKind;
	use serde_json::json;

	use super::*;
	use crate::transport::ChannelTransport;

	fn profile_request(node: &str) -> SatelliteRequest {
		SatelliteRequest::new(node, "host1", 0, SatelliteRequestKind::ProfileRequest)
	}

	#[tokio::test]
	async fn correlates_reply_by_node_id() {
		let bridge = Arc::new(EnterpriseAssistant::default());
		let (transport, mut rx) = ChannelTransport::pair();
		bridge.attach(Arc::new(transport));

		let task = tokio::spawn({
			let bridge = Arc::clone(&bridge);
			async move { bridge.request(&profile_request("node-1")).await }
		});

		let sent: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
		assert_eq!(sent["nodeid"], "node-1");
		assert!(!bridge.deliver(&json!({"action": "satellite", "nodeid": "node-2", "response": {}}).to_string()).unwrap());

		let reply = json!({"action": "satellite", "subaction": "802.1x-ProFile-Request", "nodeid": "node-1", "response": {"username": "host1"}});
		assert!(bridge.deliver(&reply.to_string()).unwrap());
		let reply = task.await.unwrap().unwrap();
		assert_eq!(reply.response.username.as_deref(), Some("host1"));
	}

	#[tokio::test]
	async fn reply_error_is_a_failure() {
		let bridge = Arc::new(EnterpriseAssistant::default());
		let (transport, mut rx) = ChannelTransport::pair();
		bridge.attach(Arc::new(transport));

		let task = tokio::spawn({
			let bridge = Arc::clone(&bridge);
			async move { bridge.request(&profile_request("node-1")).await }
		});
		rx.recv().await.unwrap();
		bridge.deliver(&json!({"action": "satellite", "nodeid": "node-1", "response": {"error": "no such profile"}}).to_string()).unwrap();
		assert!(matches!(task.await.unwrap(), Err(Error::EnterpriseAssistant(msg)) if msg == "no such profile"));
	}

	#[tokio::test(start_paused = true)]
	async fn times_out_independently() {
		let bridge = EnterpriseAssistant::new(Duration::from_secs(5));
		let (transport, _rx) = ChannelTransport::pair();
		bridge.attach(Arc::new(transport));
		let err = bridge.request(&profile_request("node-1")).await.unwrap_err();
		assert!(matches!(err, Error::GatewayTimeout(d) if d == Duration::from_secs(5)));
		assert!(!bridge.deliver(&json!({"action": "satellite", "nodeid": "node-1"}).to_string()).unwrap());
	}

	#[test]
	fn closing_a_replaced_connection_keeps_the_new_one() {
		let bridge = EnterpriseAssistant::default();
		let (old, _old_rx) = ChannelTransport::pair();
		let (new, _new_rx) = ChannelTransport::pair();
		let old: Arc<dyn Transport> = Arc::new(old);
		let new: Arc<dyn Transport> = Arc::new(new);

		bridge.attach(Arc::clone(&old));
		bridge.attach(Arc::clone(&new));
		bridge.detach(&old);
		assert!(bridge.is_attached());

		bridge.detach(&new);
		assert!(!bridge.is_attached());
	}

	#[tokio::test]
	async fn detach_fails_outstanding_requests() {
		let bridge = Arc::new(EnterpriseAssistant::default());
		let (transport, mut rx) = ChannelTransport::pair();
		let transport: Arc<dyn Transport> = Arc::new(transport);
		bridge.attach(Arc::clone(&transport));

		let task = tokio::spawn({
			let bridge = Arc::clone(&bridge);
			async move { bridge.request(&profile_request("node-1")).await }
		});
		rx.recv().await.unwrap();
		bridge.detach(&transport);
		assert!(matches!(task.await.unwrap(), Err(Error::ChannelClosed(node)) if node == "node-1"));
	}

	#[tokio::test]
	async fn unattached_bridge_fails_fast() {
		let bridge = EnterpriseAssistant::default();
		assert!(matches!(bridge.request(&profile_request("node-1")).await, Err(Error::EnterpriseAssistant(_))));
	}
}
