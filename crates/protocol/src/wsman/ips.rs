//! `IPS_` class requests used by activation and 802.1x enrollment.

use super::{EndpointReference, Envelope, Param};

pub const HOST_BASED_SETUP_SERVICE: &str = "IPS_HostBasedSetupService";
pub const IEEE8021X_SETTINGS: &str = "IPS_IEEE8021xSettings";

/// `NetAdminPassEncryptionType = 2` means the password is an HTTP digest hash.
const DIGEST_MD5: &str = "2";

pub fn host_based_setup_get() -> Envelope {
	Envelope::get(HOST_BASED_SETUP_SERVICE)
}

/// Client control mode activation.
pub fn setup(hashed_admin_password: &str) -> Envelope {
	Envelope::invoke(
		HOST_BASED_SETUP_SERVICE,
		"Setup",
		&[("NetAdminPassEncryptionType", Param::text(DIGEST_MD5)), ("NetworkAdminPassword", Param::text(hashed_admin_password))],
	)
}

/// Admin control mode activation; `signature` covers `configNonce || mcNonce`.
pub fn admin_setup(hashed_admin_password: &str, mc_nonce: &str, signature: &str) -> Envelope {
	Envelope::invoke(
		HOST_BASED_SETUP_SERVICE,
		"AdminSetup",
		&[
			("NetAdminPassEncryptionType", Param::text(DIGEST_MD5)),
			("NetworkAdminPassword", Param::text(hashed_admin_password)),
			("McNonce", Param::text(mc_nonce)),
			("SigningAlgorithm", Param::text(2)),
			("DigitalSignature", Param::text(signature)),
		],
	)
}

pub fn add_next_cert_in_chain(certificate: &str, is_leaf: bool, is_root: bool) -> Envelope {
	Envelope::invoke(
		HOST_BASED_SETUP_SERVICE,
		"AddNextCertInChain",
		&[
			("NextCertificate", Param::text(certificate)),
			("IsLeafCertificate", Param::text(is_leaf)),
			("IsRootCertificate", Param::text(is_root)),
		],
	)
}

pub fn ieee8021x_settings_get() -> Envelope {
	Envelope::get(IEEE8021X_SETTINGS)
}

/// Binds the client certificate and the server's issuing root.
pub fn ieee8021x_set_certificates(server_root_instance: &str, client_certificate_instance: &str) -> Envelope {
	Envelope::invoke(
		IEEE8021X_SETTINGS,
		"SetCertificates",
		&[
			(
				"ServerCertificateIssuer",
				Param::Reference(EndpointReference::new(super::amt::PUBLIC_KEY_CERTIFICATE, "InstanceID", server_root_instance)),
			),
			(
				"ClientCertificate",
				Param::Reference(EndpointReference::new(super::amt::PUBLIC_KEY_CERTIFICATE, "InstanceID", client_certificate_instance)),
			),
		],
	)
}
