//! Entry point for everything a device sends.
//!
//! Replies are handed to the invoker, heartbeats are dropped and commands are
//! validated into a [`Command`] before a workflow task is spawned for them.
//! Validation never touches the device; a rejected command produces an
//! `error` notification and nothing else.

use std::collections::HashSet;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use rps_protocol::{ClientMethod, ClientMsg, CommandPayload, ProtocolVersion};
use rps_runtime::{Invoker, Session, Settlement, StatusCategory, Transport};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::collaborators::{ActivationMode, Domain, Profile};
use crate::device::DeviceInfo;
use crate::error::{Error, Result};
use crate::password;
use crate::workflow::activation::Activation;
use crate::workflow::deactivation::Deactivation;
use crate::workflow::maintenance::{MaintenanceTask, run_task};
use crate::workflow::{Context, Services, execute};

const UUID_LEN: usize = 36;
const DEFAULT_USERNAME: &str = "admin";

/// Digest credentials the session starts a workflow with.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
	pub username: String,
	pub password: String,
}

impl std::fmt::Debug for Credentials {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Credentials").field("username", &self.username).finish_non_exhaustive()
	}
}

/// A validated command, ready to run.
#[derive(Debug)]
pub enum Command {
	Activation {
		device: DeviceInfo,
		profile: Profile,
		domain: Option<Domain>,
		credentials: Credentials,
	},
	Deactivation {
		device: DeviceInfo,
		credentials: Credentials,
	},
	Maintenance {
		device: DeviceInfo,
		task: MaintenanceTask,
		credentials: Credentials,
	},
}

impl Command {
	pub fn name(&self) -> &'static str {
		match self {
			Command::Activation { .. } => "activation",
			Command::Deactivation { .. } => "deactivation",
			Command::Maintenance { .. } => "maintenance",
		}
	}

	fn credentials(&self) -> &Credentials {
		match self {
			Command::Activation { credentials, .. } | Command::Deactivation { credentials, .. } | Command::Maintenance { credentials, .. } => credentials,
		}
	}
}

/// What happened to one inbound message.
#[derive(Debug)]
pub enum Dispatched {
	/// A device reply, and whether it completed the pending request.
	Reply(Settlement),
	Heartbeat,
	/// A workflow task was spawned; it resolves to the failure reason, if any.
	Started(JoinHandle<std::result::Result<(), String>>),
}

pub struct Dispatcher {
	services: Arc<Services>,
	active: Arc<Mutex<HashSet<String>>>,
}

impl Dispatcher {
	pub fn new(services: Arc<Services>) -> Self {
		Self {
			services,
			active: Arc::default(),
		}
	}

	pub fn services(&self) -> &Arc<Services> {
		&self.services
	}

	/// Registers a freshly connected device.
	pub fn connect(&self, client_id: &str, transport: Arc<dyn Transport>) -> Arc<Session> {
		info!(target = "rps.dispatch", client_id, "device connected");
		self.services.registry.connect(client_id, transport)
	}

	/// Drops the session; a pending request fails with a channel-closed error.
	pub fn disconnect(&self, client_id: &str) {
		if self.services.registry.disconnect(client_id).is_some() {
			info!(target = "rps.dispatch", client_id, "device disconnected");
		}
		self.services.enterprise.forget(client_id);
		self.active.lock().remove(client_id);
	}

	/// Handles one raw message from the device behind `client_id`.
	///
	/// Rejected commands are reported to the device before the error is
	/// returned.
	pub async fn handle(&self, client_id: &str, raw: &str) -> Result<Dispatched> {
		let session = self
			.services
			.registry
			.get(client_id)
			.ok_or_else(|| Error::Runtime(rps_runtime::Error::NoClientSocket(client_id.to_string())))?;
		let msg = match ClientMsg::parse(raw) {
			Ok(msg) => msg,
			Err(err) => {
				let err = Error::from(err);
				warn!(target = "rps.dispatch", client_id, error = %err, "unreadable message rejected");
				self.reject(session, &err).await;
				return Err(err);
			}
		};

		if !msg.method.is_command() {
			return Ok(self.reply(&session, &msg));
		}

		let started = match self.validate(client_id, &msg).await {
			Ok(command) => self.start(Arc::clone(&session), command),
			Err(err) => Err(err),
		};
		match started {
			Ok(handle) => Ok(Dispatched::Started(handle)),
			Err(err) => {
				warn!(target = "rps.dispatch", client_id, method = ?msg.method, error = %err, "command rejected");
				self.reject(session, &err).await;
				Err(err)
			}
		}
	}

	/// Reports a message the dispatcher refused with an `error` notification.
	async fn reject(&self, session: Arc<Session>, err: &Error) {
		let cx = Context::new(session, Arc::clone(&self.services));
		cx.set_status(StatusCategory::Overall, format!("Failed: {err}"));
		cx.notify(false).await;
	}

	fn reply(&self, session: &Session, msg: &ClientMsg) -> Dispatched {
		if msg.method == ClientMethod::HeartbeatResponse {
			debug!(target = "rps.dispatch", client_id = session.id(), "heartbeat");
			return Dispatched::Heartbeat;
		}
		let settlement = match msg.payload_bytes() {
			Ok(raw) => Invoker::deliver(session, &raw),
			Err(err) => session.settle(Err(rps_runtime::Error::UnexpectedParse(err.to_string()))),
		};
		Dispatched::Reply(settlement)
	}

	/// Checks a command's envelope and payload without contacting the device.
	pub async fn validate(&self, client_id: &str, msg: &ClientMsg) -> Result<Command> {
		self.check_version(msg)?;
		let payload = msg.command_payload()?;
		let guid = match payload.uuid.as_deref() {
			Some(uuid) if uuid.len() == UUID_LEN => uuid.to_string(),
			Some(uuid) => return Err(Error::validation(format!("device {client_id}: malformed uuid '{uuid}'"))),
			None => return Err(Error::validation(format!("device {client_id}: missing uuid"))),
		};
		let tenant_id = msg.tenant_id.clone().unwrap_or_default();
		let device = DeviceInfo::from_payload(&guid, &payload, &tenant_id);

		match msg.method {
			ClientMethod::Activation => self.validate_activation(client_id, device, &payload).await,
			ClientMethod::Deactivation => {
				let credentials = self.stored_credentials(client_id, &device, &payload).await?;
				Ok(Command::Deactivation { device, credentials })
			}
			ClientMethod::Maintenance => {
				let task = payload
					.task
					.as_deref()
					.ok_or_else(|| Error::validation(format!("device {client_id}: maintenance without a task")))?;
				let task = MaintenanceTask::parse(client_id, &device, task, payload.task_arg.as_ref())?;
				let credentials = self.stored_credentials(client_id, &device, &payload).await?;
				Ok(Command::Maintenance { device, task, credentials })
			}
			ClientMethod::Response | ClientMethod::HeartbeatResponse => Err(Error::validation(format!("{:?} is not a command", msg.method))),
		}
	}

	fn check_version(&self, msg: &ClientMsg) -> Result<()> {
		let Some(remote) = msg.protocol_version.as_deref() else {
			return Ok(());
		};
		let remote: ProtocolVersion = remote.parse()?;
		let local: ProtocolVersion = self.services.settings.identity.protocol_version.parse()?;
		if local.is_compatible_with(&remote) {
			Ok(())
		} else {
			Err(Error::validation(format!("protocol version {remote} is not supported by server version {local}")))
		}
	}

	async fn validate_activation(&self, client_id: &str, device: DeviceInfo, payload: &CommandPayload) -> Result<Command> {
		let password = payload
			.password
			.clone()
			.filter(|p| !p.is_empty())
			.ok_or_else(|| Error::validation(format!("device {client_id}: activation requires the current AMT password")))?;

		let minimum = &self.services.settings.min_firmware;
		if firmware_version(&device.firmware) < firmware_version(minimum) {
			return Err(Error::validation(format!(
				"device {client_id}: firmware '{}' is older than the supported minimum {minimum}",
				device.firmware
			)));
		}

		let name = payload
			.profile
			.as_deref()
			.filter(|p| !p.is_empty())
			.ok_or_else(|| Error::validation(format!("device {client_id}: activation requires a profile")))?;
		let profiles = &self.services.collaborators.profiles;
		let profile = profiles
			.profile(name, &device.tenant_id)
			.await?
			.ok_or_else(|| Error::validation(format!("device {client_id}: profile '{name}' not found")))?;
		if !profile.generate_random_password && !profile.amt_password.as_deref().is_some_and(password::is_compliant) {
			return Err(Error::validation(format!("profile '{name}' has no compliant AMT password")));
		}

		let domain = match profile.activation {
			ActivationMode::Client => None,
			ActivationMode::Admin => Some(self.provisioning_domain(client_id, &device).await?),
		};

		let credentials = Credentials {
			username: payload.username.clone().unwrap_or_else(|| DEFAULT_USERNAME.into()),
			password,
		};
		Ok(Command::Activation {
			device,
			profile,
			domain,
			credentials,
		})
	}

	/// Domain for admin control, checked against the device's trusted roots.
	async fn provisioning_domain(&self, client_id: &str, device: &DeviceInfo) -> Result<Domain> {
		let fqdn = device
			.fqdn
			.as_deref()
			.ok_or_else(|| Error::validation(format!("device {client_id}: admin control requires a DNS suffix")))?;
		let domain = self
			.services
			.collaborators
			.domains
			.domain_for(fqdn, &device.tenant_id)
			.await?
			.ok_or_else(|| Error::validation(format!("device {client_id}: no provisioning domain for '{fqdn}'")))?;
		let root = domain
			.root_certificate()
			.ok_or_else(|| Error::validation(format!("domain '{}' has no certificate chain", domain.name)))?;
		let der = STANDARD
			.decode(root)
			.map_err(|err| Error::validation(format!("domain '{}' root certificate: {err}", domain.name)))?;
		let hash = hex::encode(Sha256::digest(&der));
		if !device.cert_hashes.contains(&hash) {
			return Err(Error::validation(format!(
				"device {client_id}: root certificate of domain '{}' is not trusted by the device",
				domain.name
			)));
		}
		Ok(domain)
	}

	/// Password from the payload, else the one saved at activation.
	async fn stored_credentials(&self, client_id: &str, device: &DeviceInfo, payload: &CommandPayload) -> Result<Credentials> {
		let username = payload.username.clone().unwrap_or_else(|| DEFAULT_USERNAME.into());
		if let Some(password) = payload.password.clone().filter(|p| !p.is_empty()) {
			return Ok(Credentials { username, password });
		}
		match self.services.collaborators.secrets.credentials(&device.guid).await? {
			Some(stored) => Ok(Credentials {
				username: DEFAULT_USERNAME.into(),
				password: stored.amt_password,
			}),
			None => Err(Error::validation(format!("device {client_id}: no AMT password supplied or stored"))),
		}
	}

	/// Spawns the workflow for `command`; one workflow per session at a time.
	pub fn start(&self, session: Arc<Session>, command: Command) -> Result<JoinHandle<std::result::Result<(), String>>> {
		let client_id = session.id().to_string();
		let Some(claim) = ActiveClaim::acquire(&self.active, &client_id) else {
			return Err(Error::validation(format!("device {client_id}: a workflow is already running")));
		};
		let credentials = command.credentials();
		session.set_credentials(&credentials.username, &credentials.password);
		info!(target = "rps.dispatch", client_id = %client_id, command = command.name(), "starting workflow");

		let cx = Context::new(session, Arc::clone(&self.services));
		Ok(tokio::spawn(async move {
			let _claim = claim;
			match command {
				Command::Activation { device, profile, domain, .. } => execute(Activation::new(device, profile, domain), cx).await,
				Command::Deactivation { device, .. } => execute(Deactivation::new(device), cx).await,
				Command::Maintenance { device, task, .. } => run_task(task, device, cx).await,
			}
		}))
	}

	pub fn is_busy(&self, client_id: &str) -> bool {
		self.active.lock().contains(client_id)
	}
}

/// Marks a session busy until dropped, including when its task panics or is
/// aborted.
struct ActiveClaim {
	active: Arc<Mutex<HashSet<String>>>,
	client_id: String,
}

impl ActiveClaim {
	fn acquire(active: &Arc<Mutex<HashSet<String>>>, client_id: &str) -> Option<Self> {
		active.lock().insert(client_id.to_string()).then(|| Self {
			active: Arc::clone(active),
			client_id: client_id.to_string(),
		})
	}
}

impl Drop for ActiveClaim {
	fn drop(&mut self) {
		self.active.lock().remove(&self.client_id);
	}
}

/// `major.minor.revision`, missing or non-numeric parts read as zero.
fn firmware_version(version: &str) -> (u32, u32, u32) {
	let mut parts = version.split('.').map(|p| {
		p.chars()
			.take_while(char::is_ascii_digit)
			.collect::<String>()
			.parse()
			.unwrap_or(0)
	});
	(parts.next().unwrap_or(0), parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}
