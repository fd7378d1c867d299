//! Workflow engine.
//!
//! A workflow is a state enum plus a step function. Each step builds one
//! request from the workflow's own context, sends it through the
//! [`Invoker`], stores what it needs from the reply and names the next
//! state. A failed exchange goes through [`ErrorRecovery`], which either
//! re-runs the failed step (after an authentication refresh) or ends the
//! workflow. Terminal outcomes land in the session's status projection and,
//! for top-level runs, in a notification to the device.

pub mod activation;
pub mod deactivation;
pub mod ieee8021x;
pub mod maintenance;
pub mod tls;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rps_protocol::ServerMsg;
use rps_protocol::wsman::{Envelope, WsmanResponse};
use rps_runtime::{EnterpriseAssistant, ErrorRecovery, Invoker, Recovery, Session, SessionRegistry, StatusCategory};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::collaborators::{CertificateAuthority, DomainStore, ProfileStore, RemoteAccessRegistry, SecretsStore};
use crate::error::{Error, Result};
use crate::settings::EngineSettings;

/// External services the workflows consume.
#[derive(Clone)]
pub struct Collaborators {
	pub profiles: Arc<dyn ProfileStore>,
	pub domains: Arc<dyn DomainStore>,
	pub secrets: Arc<dyn SecretsStore>,
	pub remote_access: Arc<dyn RemoteAccessRegistry>,
	pub certificates: Arc<dyn CertificateAuthority>,
}

/// Everything a workflow needs besides its session, built once at startup.
pub struct Services {
	pub registry: SessionRegistry,
	pub invoker: Invoker,
	pub recovery: ErrorRecovery,
	pub enterprise: Arc<EnterpriseAssistant>,
	pub collaborators: Collaborators,
	pub settings: EngineSettings,
}

impl Services {
	pub fn new(settings: EngineSettings, registry: SessionRegistry, enterprise: Arc<EnterpriseAssistant>, collaborators: Collaborators) -> Self {
		Self {
			registry,
			invoker: Invoker::new(settings.identity.clone(), settings.invoke_policy()),
			recovery: ErrorRecovery::new(settings.recovery_policy()),
			enterprise,
			collaborators,
			settings,
		}
	}
}

impl fmt::Debug for Services {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Services")
			.field("registry", &self.registry)
			.field("settings", &self.settings)
			.finish_non_exhaustive()
	}
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow<S> {
	Continue(S),
	/// Re-enter `S`, consuming one of the run's step retries.
	Retry(S),
	Fail(String),
	Succeed,
}

#[async_trait]
pub trait Workflow: Send {
	type State: Copy + fmt::Debug + Send + Sync;

	const NAME: &'static str;

	/// Category the terminal outcome is reported under.
	const CATEGORY: StatusCategory;

	fn initial(&self) -> Self::State;

	async fn step(&mut self, cx: &Context, state: Self::State) -> Result<Flow<Self::State>>;

	fn success_status(&self) -> String;

	fn failure_status(&self, reason: &str) -> String {
		format!("Failed: {reason}")
	}
}

/// The session a workflow runs against, plus shared services.
#[derive(Clone)]
pub struct Context {
	session: Arc<Session>,
	services: Arc<Services>,
}

impl Context {
	pub fn new(session: Arc<Session>, services: Arc<Services>) -> Self {
		Self { session, services }
	}

	pub fn session(&self) -> &Session {
		&self.session
	}

	pub fn services(&self) -> &Services {
		&self.services
	}

	pub fn settings(&self) -> &EngineSettings {
		&self.services.settings
	}

	pub fn collaborators(&self) -> &Collaborators {
		&self.services.collaborators
	}

	pub fn client_id(&self) -> &str {
		self.session.id()
	}

	pub async fn invoke(&self, envelope: &Envelope) -> Result<WsmanResponse> {
		Ok(self.services.invoker.invoke(&self.session, envelope).await?)
	}

	/// Enumerates `class` and pulls every instance.
	///
	/// The pull is granted the configured decode retries.
	pub async fn enumerate(&self, class: &str) -> Result<Vec<Map<String, Value>>> {
		let enumeration = self.invoke(&Envelope::enumerate(class)).await?;
		let context = enumeration
			.enumeration_context()
			.ok_or_else(|| Error::Runtime(rps_runtime::Error::UnexpectedParse(format!("{class} enumeration without a context"))))?
			.to_string();
		let policy = self.services.settings.enumeration_policy();
		let pulled = self.services.invoker.invoke_with(&self.session, &Envelope::pull(class, &context), policy).await?;
		Ok(pulled.pulled(class).into_iter().cloned().collect())
	}

	pub fn set_status(&self, category: StatusCategory, status: impl Into<String>) {
		self.session.set_status(category, status);
	}

	/// Sends the terminal notification for the session's current status.
	pub async fn notify(&self, success: bool) {
		let identity = &self.services.settings.identity;
		let status = self.session.status().to_json();
		let message = if success { ServerMsg::success(identity, status) } else { ServerMsg::error(identity, status) };
		let Some(transport) = self.session.transport() else {
			warn!(target = "rps.workflow", client_id = %self.client_id(), "device gone before terminal notification");
			return;
		};
		match message.to_json() {
			Ok(json) => {
				if let Err(err) = transport.send(json).await {
					warn!(target = "rps.workflow", client_id = %self.client_id(), error = %err, "terminal notification not sent");
				}
			}
			Err(err) => warn!(target = "rps.workflow", client_id = %self.client_id(), error = %err, "terminal notification not encoded"),
		}
	}
}

/// Drives `workflow` to a terminal state and records the outcome under the
/// workflow's status category. Returns the failure reason on `Failed`.
pub async fn run<W: Workflow>(workflow: &mut W, cx: &Context) -> std::result::Result<(), String> {
	let outcome = drive(workflow, cx).await;
	match &outcome {
		Ok(()) => {
			cx.set_status(W::CATEGORY, workflow.success_status());
			info!(target = "rps.workflow", client_id = %cx.client_id(), workflow = W::NAME, "workflow succeeded");
		}
		Err(reason) => {
			cx.set_status(W::CATEGORY, workflow.failure_status(reason));
			warn!(target = "rps.workflow", client_id = %cx.client_id(), workflow = W::NAME, %reason, "workflow failed");
		}
	}
	outcome
}

/// Runs a top-level workflow and notifies the device of the outcome.
pub async fn execute<W: Workflow>(mut workflow: W, cx: Context) -> std::result::Result<(), String> {
	let outcome = run(&mut workflow, &cx).await;
	cx.notify(outcome.is_ok()).await;
	outcome
}

/// Drives `workflow` to a terminal state without touching the status projection.
pub(crate) async fn drive<W: Workflow>(workflow: &mut W, cx: &Context) -> std::result::Result<(), String> {
	let mut state = workflow.initial();
	let mut retries = 0u32;
	let limit = cx.settings().step_retries;

	loop {
		debug!(target = "rps.workflow", client_id = %cx.client_id(), workflow = W::NAME, ?state, "entering state");
		match workflow.step(cx, state).await {
			Ok(Flow::Continue(next)) => state = next,
			Ok(Flow::Retry(at)) => {
				retries += 1;
				if retries > limit {
					return Err(format!("exceeded {limit} retries at {at:?}"));
				}
				debug!(target = "rps.workflow", client_id = %cx.client_id(), workflow = W::NAME, state = ?at, attempt = retries, "re-entering state");
				state = at;
			}
			Ok(Flow::Succeed) => return Ok(()),
			Ok(Flow::Fail(reason)) => return Err(reason),
			Err(Error::Runtime(err)) => match cx.services.recovery.recover(&cx.session, &err) {
				Recovery::Retry => debug!(target = "rps.workflow", client_id = %cx.client_id(), workflow = W::NAME, ?state, "retrying after recovery"),
				Recovery::Fail(reason) => return Err(reason),
			},
			Err(err) => return Err(err.to_string()),
		}
	}
}

/// Checks the `ReturnValue` of an invoked method.
pub(crate) fn check_return(response: &WsmanResponse, method: &str) -> std::result::Result<(), String> {
	match response.return_value(method) {
		Some(0) => Ok(()),
		Some(code) => Err(format!("{method} returned {code}")),
		None => Err(format!("{method} reply has no ReturnValue")),
	}
}

/// `InstanceID` selector of a reference in a method's output.
pub(crate) fn output_reference(response: &WsmanResponse, method: &str, name: &str) -> Option<String> {
	let reference = response.output(method)?.get(name)?;
	rps_protocol::wsman::selector_value(reference, "InstanceID").map(str::to_string)
}

/// A text property of an instance.
pub(crate) fn text<'a>(instance: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
	match instance.get(name)? {
		Value::String(s) => Some(s.as_str()),
		Value::Object(o) => o.get("#text").and_then(Value::as_str),
		_ => None,
	}
}
