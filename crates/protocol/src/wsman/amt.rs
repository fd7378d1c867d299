//! `AMT_` class requests used by the provisioning workflows.

use super::{EndpointReference, Envelope, Param};

pub const GENERAL_SETTINGS: &str = "AMT_GeneralSettings";
pub const SETUP_AND_CONFIGURATION_SERVICE: &str = "AMT_SetupAndConfigurationService";
pub const TIME_SYNCHRONIZATION_SERVICE: &str = "AMT_TimeSynchronizationService";
pub const ETHERNET_PORT_SETTINGS: &str = "AMT_EthernetPortSettings";
pub const PUBLIC_KEY_CERTIFICATE: &str = "AMT_PublicKeyCertificate";
pub const PUBLIC_KEY_MANAGEMENT_SERVICE: &str = "AMT_PublicKeyManagementService";
pub const PUBLIC_PRIVATE_KEY_PAIR: &str = "AMT_PublicPrivateKeyPair";
pub const TLS_CREDENTIAL_CONTEXT: &str = "AMT_TLSCredentialContext";
pub const TLS_PROTOCOL_ENDPOINT_COLLECTION: &str = "AMT_TLSProtocolEndpointCollection";
pub const TLS_SETTING_DATA: &str = "AMT_TLSSettingData";
pub const AUTHORIZATION_SERVICE: &str = "AMT_AuthorizationService";

/// Instance id of the wired (802.3) TLS settings.
pub const REMOTE_TLS_INSTANCE: &str = "Intel(r) AMT 802.3 TLS Settings";
/// Instance id of the local (LMS) TLS settings.
pub const LOCAL_TLS_INSTANCE: &str = "Intel(r) AMT LMS TLS Settings";
/// Instance id of the wired ethernet port.
pub const WIRED_PORT_INSTANCE: &str = "Intel(r) AMT Ethernet Port Settings 0";

pub fn general_settings_get() -> Envelope {
	Envelope::get(GENERAL_SETTINGS)
}

/// `ProvisioningMode = 1` returns the engine to pre-provisioning.
pub fn unprovision() -> Envelope {
	Envelope::invoke(SETUP_AND_CONFIGURATION_SERVICE, "Unprovision", &[("ProvisioningMode", Param::text(1))])
}

pub fn set_mebx_password(password: &str) -> Envelope {
	Envelope::invoke(SETUP_AND_CONFIGURATION_SERVICE, "SetMEBxPassword", &[("Password", Param::text(password))])
}

pub fn commit_changes() -> Envelope {
	Envelope::invoke(SETUP_AND_CONFIGURATION_SERVICE, "CommitChanges", &[])
}

pub fn get_low_accuracy_time_synch() -> Envelope {
	Envelope::invoke(TIME_SYNCHRONIZATION_SERVICE, "GetLowAccuracyTimeSynch", &[])
}

/// `ta0` is the engine time just read; `tm1`/`tm2` the host clock in seconds.
pub fn set_high_accuracy_time_synch(ta0: i64, tm1: i64, tm2: i64) -> Envelope {
	Envelope::invoke(
		TIME_SYNCHRONIZATION_SERVICE,
		"SetHighAccuracyTimeSynch",
		&[("Ta0", Param::text(ta0)), ("Tm1", Param::text(tm1)), ("Tm2", Param::text(tm2))],
	)
}

pub fn add_trusted_root_certificate(certificate: &str) -> Envelope {
	Envelope::invoke(PUBLIC_KEY_MANAGEMENT_SERVICE, "AddTrustedRootCertificate", &[("CertificateBlob", Param::text(certificate))])
}

/// RSA (`KeyAlgorithm = 0`) 2048-bit key pair.
pub fn generate_key_pair() -> Envelope {
	Envelope::invoke(
		PUBLIC_KEY_MANAGEMENT_SERVICE,
		"GenerateKeyPair",
		&[("KeyAlgorithm", Param::text(0)), ("KeyLength", Param::text(2048))],
	)
}

pub fn add_certificate(certificate: &str) -> Envelope {
	Envelope::invoke(PUBLIC_KEY_MANAGEMENT_SERVICE, "AddCertificate", &[("CertificateBlob", Param::text(certificate))])
}

/// Asks the engine to sign a null-signed CSR with the given key pair.
pub fn generate_pkcs10_request(key_pair_instance: &str, null_signed_csr: &str) -> Envelope {
	Envelope::invoke(
		PUBLIC_KEY_MANAGEMENT_SERVICE,
		"GeneratePKCS10RequestEx",
		&[
			("KeyPair", Param::Reference(EndpointReference::new(PUBLIC_PRIVATE_KEY_PAIR, "InstanceID", key_pair_instance))),
			("SigningAlgorithm", Param::text(1)),
			("NullSignedCertificateRequest", Param::text(null_signed_csr)),
		],
	)
}

/// Binds a certificate to the TLS protocol endpoint collection.
pub fn create_tls_credential_context(certificate_instance: &str) -> Envelope {
	Envelope::create(
		TLS_CREDENTIAL_CONTEXT,
		&[
			(
				"ElementInContext".into(),
				Param::Reference(EndpointReference::new(PUBLIC_KEY_CERTIFICATE, "InstanceID", certificate_instance)),
			),
			(
				"ElementProvidingContext".into(),
				Param::Reference(EndpointReference::new(
					TLS_PROTOCOL_ENDPOINT_COLLECTION,
					"ElementName",
					"TLSProtocolEndpointInstances Collection",
				)),
			),
		],
	)
}

/// Sets the admin account password; `digest_password` is the base64 of the
/// raw `MD5(admin:realm:password)`.
pub fn set_admin_acl_entry(username: &str, digest_password: &str) -> Envelope {
	Envelope::invoke(
		AUTHORIZATION_SERVICE,
		"SetAdminAclEntryEx",
		&[("Username", Param::text(username)), ("DigestPassword", Param::text(digest_password))],
	)
}
