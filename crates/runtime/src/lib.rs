//! Device session runtime.
//!
//! Owns everything that happens between "a controller is connected" and "a
//! workflow step got its answer": per-connection [`Session`] state, the
//! shared [`SessionRegistry`], the [`Invoker`] that correlates a request with
//! its reply under a deadline, the [`ErrorRecovery`] sub-machine that
//! classifies failed exchanges, and the [`EnterpriseAssistant`] bridge.

pub mod enterprise;
pub mod error;
pub mod fake_transport;
pub mod invoker;
pub mod policy;
pub mod recovery;
pub mod registry;
pub mod session;
pub mod transport;

pub use enterprise::EnterpriseAssistant;
pub use error::{Error, HttpFailure, Result};
pub use invoker::Invoker;
pub use policy::{InvokePolicy, RecoveryPolicy};
pub use recovery::{ErrorRecovery, Recovery, RecoveryState};
pub use registry::SessionRegistry;
pub use session::{ConnectionParams, Session, Settlement, StatusCategory, StatusProjection};
pub use transport::{ChannelTransport, Transport};
