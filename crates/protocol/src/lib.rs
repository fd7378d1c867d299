//! Wire types for the device provisioning protocol.
//!
//! This crate contains the serde-serializable types and codecs used between
//! the provisioning server and a connected management controller. These types
//! represent the "protocol layer" - the shapes of data as they appear on the
//! wire, with no I/O and no session state.
//!
//! # Layers
//!
//! * [`envelope`]: the JSON transport envelope and the base64 command payloads
//! * [`http`] and [`chunked`]: the HTTP/1.1 framing tunnelled inside the envelope
//! * [`digest`]: authentication challenges and `Authorization` headers
//! * [`wsman`]: WS-Management SOAP request builders and response reader
//! * [`satellite`]: the Enterprise Assistant JSON protocol
//! * [`version`]: protocol-version compatibility rule

pub mod chunked;
pub mod digest;
pub mod envelope;
pub mod error;
pub mod http;
pub mod satellite;
pub mod version;
pub mod wsman;

pub use digest::DigestChallenge;
pub use envelope::*;
pub use error::{Error, Result};
pub use version::ProtocolVersion;
