//! WebSocket endpoints.
//!
//! Devices connect to `/`; each connection becomes one session with a
//! generated id. The Enterprise Assistant connects to its own path and is
//! attached to the bridge for as long as its socket stays open.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use rps::memory::{StaticDomains, StaticProfiles};
use rps::{Collaborators, Dispatcher, JsonFileSecrets, Services};
use rps_runtime::{ChannelTransport, EnterpriseAssistant, SessionRegistry, Transport};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::http_collaborators::{HttpCertificateAuthority, HttpRemoteAccess, NoCertificateAuthority, NoRemoteAccess};

#[derive(Clone)]
pub struct AppState {
	pub dispatcher: Arc<Dispatcher>,
	pub enterprise: Arc<EnterpriseAssistant>,
}

impl AppState {
	pub fn new(services: Services) -> Self {
		let enterprise = Arc::clone(&services.enterprise);
		Self {
			dispatcher: Arc::new(Dispatcher::new(Arc::new(services))),
			enterprise,
		}
	}

	/// Builds the engine and its collaborators from `config`.
	pub fn from_config(config: &Config) -> Result<Self> {
		let settings = config.settings();
		let timeout = Duration::from_secs(config.collaborators.http_timeout_secs);
		let remote_access: Arc<dyn rps::RemoteAccessRegistry> = match &config.collaborators.mps_url {
			Some(url) => Arc::new(HttpRemoteAccess::new(url, timeout).context("remote access registry client")?),
			None => {
				warn!(target = "rps.server", "[collaborators].mps_url not set; remote access registry updates are skipped");
				Arc::new(NoRemoteAccess)
			}
		};
		let certificates: Arc<dyn rps::CertificateAuthority> = match &config.collaborators.ca_url {
			Some(url) => Arc::new(HttpCertificateAuthority::new(url, timeout).context("certificate service client")?),
			None => Arc::new(NoCertificateAuthority),
		};
		let collaborators = Collaborators {
			profiles: Arc::new(StaticProfiles::new(config.profiles.clone())),
			domains: Arc::new(StaticDomains::new(config.domains.clone())),
			secrets: Arc::new(JsonFileSecrets::new(&config.collaborators.secrets_file)),
			remote_access,
			certificates,
		};
		let enterprise = Arc::new(EnterpriseAssistant::new(settings.enterprise_assistant_deadline));
		Ok(Self::new(Services::new(settings, SessionRegistry::new(), enterprise, collaborators)))
	}
}

pub fn router(state: AppState, enterprise_assistant_path: &str) -> Router {
	Router::new()
		.route("/", get(device_handler))
		.route(enterprise_assistant_path, get(enterprise_handler))
		.with_state(state)
}

/// Serves until the listener fails.
pub async fn serve(listener: TcpListener, state: AppState, enterprise_assistant_path: &str) -> Result<()> {
	let addr = listener.local_addr().context("listener has no local address")?;
	info!(target = "rps.server", %addr, ea_path = enterprise_assistant_path, "accepting connections");
	axum::serve(listener, router(state, enterprise_assistant_path)).await.context("server error")
}

async fn device_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
	ws.on_upgrade(move |socket| handle_device(socket, state))
}

async fn enterprise_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
	ws.on_upgrade(move |socket| handle_enterprise_assistant(socket, state))
}

/// Drains `outbound` into the socket until either side closes.
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut outbound: UnboundedReceiver<String>) {
	while let Some(text) = outbound.recv().await {
		if let Err(err) = sink.send(Message::Text(text.into())).await {
			debug!(target = "rps.server", error = %err, "socket write failed");
			break;
		}
	}
	let _ = sink.close().await;
}

async fn handle_device(socket: WebSocket, state: AppState) {
	let client_id = Uuid::new_v4().to_string();
	let (sink, mut stream) = socket.split();
	let (transport, outbound) = ChannelTransport::pair();
	state.dispatcher.connect(&client_id, Arc::new(transport));
	let writer = tokio::spawn(write_loop(sink, outbound));

	while let Some(frame) = stream.next().await {
		let text = match frame {
			Ok(Message::Text(text)) => text,
			Ok(Message::Close(_)) => break,
			Ok(_) => continue,
			Err(err) => {
				debug!(target = "rps.server", %client_id, error = %err, "device socket error");
				break;
			}
		};
		if let Err(err) = state.dispatcher.handle(&client_id, text.as_str()).await {
			debug!(target = "rps.server", %client_id, error = %err, "message not dispatched");
		}
	}

	state.dispatcher.disconnect(&client_id);
	writer.abort();
}

async fn handle_enterprise_assistant(socket: WebSocket, state: AppState) {
	let (sink, mut stream) = socket.split();
	let (transport, outbound) = ChannelTransport::pair();
	let transport: Arc<dyn Transport> = Arc::new(transport);
	state.enterprise.attach(Arc::clone(&transport));
	let writer = tokio::spawn(write_loop(sink, outbound));

	while let Some(frame) = stream.next().await {
		let text = match frame {
			Ok(Message::Text(text)) => text,
			Ok(Message::Close(_)) => break,
			Ok(_) => continue,
			Err(err) => {
				debug!(target = "rps.server", error = %err, "enterprise assistant socket error");
				break;
			}
		};
		match state.enterprise.deliver(text.as_str()) {
			Ok(true) => {}
			Ok(false) => debug!(target = "rps.ea", "unsolicited satellite reply"),
			Err(err) => warn!(target = "rps.ea", error = %err, "malformed satellite reply"),
		}
	}

	state.enterprise.detach(&transport);
	writer.abort();
}
