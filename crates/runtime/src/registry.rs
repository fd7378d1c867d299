use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::session::Session;
use crate::transport::Transport;

/// Shared map of live device sessions, keyed by client id.
///
/// Cloning yields another handle to the same map.
#[derive(Clone, Default)]
pub struct SessionRegistry {
	sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a freshly connected device and returns its session.
	///
	/// An existing session under the same id is closed and replaced.
	pub fn connect(&self, client_id: impl Into<String>, transport: Arc<dyn Transport>) -> Arc<Session> {
		let client_id = client_id.into();
		let session = Arc::new(Session::new(client_id.clone(), Some(transport)));
		let previous = self.sessions.write().insert(client_id.clone(), Arc::clone(&session));
		if let Some(previous) = previous {
			previous.close();
			debug!(target = "rps.session", %client_id, "replaced existing session");
		}
		info!(target = "rps.session", %client_id, "device connected");
		session
	}

	pub fn get(&self, client_id: &str) -> Option<Arc<Session>> {
		self.sessions.read().get(client_id).cloned()
	}

	/// Removes and closes the session; any pending request fails.
	pub fn disconnect(&self, client_id: &str) -> Option<Arc<Session>> {
		let session = self.sessions.write().remove(client_id)?;
		session.close();
		info!(target = "rps.session", %client_id, "device disconnected");
		Some(session)
	}

	pub fn len(&self) -> usize {
		self.sessions.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.read().is_empty()
	}

	pub fn ids(&self) -> Vec<String> {
		self.sessions.read().keys().cloned().collect()
	}
}

impl std::fmt::Debug for SessionRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionRegistry").field("sessions", &self.len()).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::ChannelTransport;

	#[test]
	fn connect_get_disconnect() {
		let registry = SessionRegistry::new();
		let (transport, _rx) = ChannelTransport::pair();
		let session = registry.connect("c1", Arc::new(transport));
		assert_eq!(registry.len(), 1);
		assert!(Arc::ptr_eq(&registry.get("c1").unwrap(), &session));
		assert!(session.transport().is_some());

		let removed = registry.disconnect("c1").unwrap();
		assert!(removed.transport().is_none());
		assert!(registry.get("c1").is_none());
		assert!(registry.disconnect("c1").is_none());
	}

	#[test]
	fn clones_share_state() {
		let registry = SessionRegistry::new();
		let other = registry.clone();
		let (transport, _rx) = ChannelTransport::pair();
		registry.connect("c1", Arc::new(transport));
		assert_eq!(other.ids(), vec!["c1".to_string()]);
	}
}
