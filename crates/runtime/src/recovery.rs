//! Classification of failed exchanges.
//!
//! Every workflow routes a failed step through [`ErrorRecovery::recover`]:
//! an authentication failure refreshes the session's digest challenge and
//! asks for the step to be retried, everything else ends the workflow.

use rps_protocol::DigestChallenge;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::policy::RecoveryPolicy;
use crate::session::Session;

/// Reason reported once the unauthorized limit is reached.
pub const EXCEEDED_RETRY_ATTEMPTS: &str = "Exceeded retry attempts";

/// States of the recovery sub-machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
	Errored,
	Unauthorized,
	BadRequest,
	Unknown,
	/// Challenge refreshed; the failed step may run again.
	Authorized,
	FailedAuthorized,
	Failed,
}

/// What the calling workflow should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
	Retry,
	Fail(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorRecovery {
	policy: RecoveryPolicy,
}

impl ErrorRecovery {
	pub fn new(policy: RecoveryPolicy) -> Self {
		Self { policy }
	}

	/// First transition out of `Errored`.
	pub fn classify(error: &Error) -> RecoveryState {
		match error.http_status() {
			Some(401) => RecoveryState::Unauthorized,
			Some(400) => RecoveryState::BadRequest,
			_ => RecoveryState::Unknown,
		}
	}

	/// Runs the sub-machine to a terminal state for one failed exchange.
	pub fn recover(&self, session: &Session, error: &Error) -> Recovery {
		let state = Self::classify(error);
		debug!(target = "rps.recovery", client_id = %session.id(), from = ?RecoveryState::Errored, to = ?state, %error, "classified failure");

		let (terminal, recovery) = match state {
			RecoveryState::Unauthorized => self.unauthorized(session, error),
			RecoveryState::BadRequest => {
				session.reset_unauthorized();
				let reason = match error.fault() {
					Some(fault) => match fault.subcode {
						Some(subcode) => format!("{subcode}: {}", fault.reason),
						None => fault.reason,
					},
					None => error.to_string(),
				};
				(RecoveryState::Failed, Recovery::Fail(reason))
			}
			_ => {
				session.reset_unauthorized();
				let reason = error.fault().map(|fault| fault.reason).unwrap_or_else(|| error.to_string());
				(RecoveryState::Failed, Recovery::Fail(reason))
			}
		};

		match &recovery {
			Recovery::Retry => info!(target = "rps.recovery", client_id = %session.id(), state = ?terminal, "retrying with refreshed challenge"),
			Recovery::Fail(reason) => warn!(target = "rps.recovery", client_id = %session.id(), state = ?terminal, %reason, "unrecoverable failure"),
		}
		recovery
	}

	fn unauthorized(&self, session: &Session, error: &Error) -> (RecoveryState, Recovery) {
		let header = match error {
			Error::Http(failure) => failure.header("WWW-Authenticate"),
			_ => None,
		};
		match header.map(DigestChallenge::parse) {
			Some(Ok(challenge)) if DigestChallenge::realm_is_valid(&challenge.realm) => session.set_challenge(challenge),
			Some(Ok(challenge)) => {
				session.reset_unauthorized();
				return (RecoveryState::Failed, Recovery::Fail(format!("invalid digest realm '{}'", challenge.realm)));
			}
			Some(Err(err)) => {
				session.reset_unauthorized();
				return (RecoveryState::Failed, Recovery::Fail(err.to_string()));
			}
			None => debug!(target = "rps.recovery", client_id = %session.id(), "401 without a challenge; keeping the current one"),
		}

		let attempts = session.record_unauthorized();
		if attempts < self.policy.unauthorized_limit {
			(RecoveryState::Authorized, Recovery::Retry)
		} else {
			session.reset_unauthorized();
			(RecoveryState::FailedAuthorized, Recovery::Fail(EXCEEDED_RETRY_ATTEMPTS.into()))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::HttpFailure;

	const REALM: &str = "Digest:A3829B3827DE4D33D4449B366831FD01";

	fn unauthorized(realm: &str, nonce: &str) -> Error {
		Error::Http(HttpFailure {
			status: 401,
			headers: vec![("WWW-Authenticate".into(), format!(r#"Digest realm="{realm}", nonce="{nonce}", qop="auth""#))],
			body: String::new(),
		})
	}

	#[test]
	fn third_unauthorized_fails_and_resets_counter() {
		let session = Session::new("c1", None);
		let recovery = ErrorRecovery::default();

		assert_eq!(recovery.recover(&session, &unauthorized(REALM, "n1")), Recovery::Retry);
		assert_eq!(session.challenge().unwrap().nonce, "n1");
		assert_eq!(recovery.recover(&session, &unauthorized(REALM, "n2")), Recovery::Retry);
		assert_eq!(session.unauthorized_attempts(), 2);
		assert_eq!(recovery.recover(&session, &unauthorized(REALM, "n3")), Recovery::Fail(EXCEEDED_RETRY_ATTEMPTS.into()));
		assert_eq!(session.unauthorized_attempts(), 0);
	}

	#[test]
	fn invalid_realm_is_terminal() {
		let session = Session::new("c1", None);
		let outcome = ErrorRecovery::default().recover(&session, &unauthorized("Digest:lowercase", "n1"));
		assert!(matches!(outcome, Recovery::Fail(reason) if reason.contains("invalid digest realm")));
		assert!(session.challenge().is_none());
	}

	#[test]
	fn bad_request_reports_fault() {
		let session = Session::new("c1", None);
		session.record_unauthorized();
		let body = concat!(
			"<a:Envelope xmlns:a=\"http://www.w3.org/2003/05/soap-envelope\"><a:Header/><a:Body><a:Fault>",
			"<a:Code><a:Value>a:Sender</a:Value><a:Subcode><a:Value>w:InvalidParameter</a:Value></a:Subcode></a:Code>",
			"<a:Reason><a:Text>Bad selector</a:Text></a:Reason></a:Fault></a:Body></a:Envelope>"
		);
		let error = Error::Http(HttpFailure {
			status: 400,
			headers: Vec::new(),
			body: body.into(),
		});
		assert_eq!(ErrorRecovery::classify(&error), RecoveryState::BadRequest);
		assert_eq!(ErrorRecovery::default().recover(&session, &error), Recovery::Fail("InvalidParameter: Bad selector".into()));
		assert_eq!(session.unauthorized_attempts(), 0);
	}

	#[test]
	fn other_failures_are_unknown() {
		let session = Session::new("c1", None);
		let error = Error::GatewayTimeout(std::time::Duration::from_secs(12));
		assert_eq!(ErrorRecovery::classify(&error), RecoveryState::Unknown);
		assert!(matches!(ErrorRecovery::default().recover(&session, &error), Recovery::Fail(reason) if reason.contains("gateway timeout")));
	}
}
