//! Remote provisioning of AMT-class devices.
//!
//! Devices connect over a persistent socket and ask to be activated,
//! deactivated or maintained. The [`Dispatcher`] validates each command and
//! spawns the matching workflow from [`workflow`]; workflows talk to the
//! device through the session runtime and to the outside world through the
//! traits in [`collaborators`].

pub mod collaborators;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod password;
pub mod secrets_file;
pub mod settings;
pub mod workflow;

pub use collaborators::{
	ActivationMode, CertificateAuthority, DeviceCredentials, DeviceRecord, Domain, DomainStore, Ieee8021xProfile, IssuedCertificate, Profile, ProfileStore,
	RemoteAccessRegistry, SecretsStore, TlsMode,
};
pub use device::DeviceInfo;
pub use dispatcher::{Command, Credentials, Dispatched, Dispatcher};
pub use error::{CollaboratorError, Error, Result};
pub use secrets_file::JsonFileSecrets;
pub use settings::EngineSettings;
pub use workflow::{Collaborators, Context, Services};
