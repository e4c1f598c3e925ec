//! Hardware credential ceremonies (WebAuthn-style registration and
//! authentication).
//!
//! The server speaks JSON with base64url binary fields. The platform
//! authenticator speaks raw bytes. `CredentialBridge` converts between the
//! two and maps platform failures onto a small error set the UI can render.
//! Server input is accepted with or without padding; output is always
//! unpadded base64url.

use async_trait::async_trait;
use base64::{
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
    Engine,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("ceremony cancelled")]
    Cancelled,

    #[error("ceremony failed: {0}")]
    Failed(String),

    #[error("platform has no credential support")]
    Unsupported,

    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

/// Failure reported by the platform authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// User declined, timed out, or the platform denied the request.
    #[error("not allowed")]
    NotAllowed,
    #[error("aborted")]
    Aborted,
    #[error("not supported")]
    NotSupported,
    #[error("{0}")]
    Other(String),
}

impl From<PlatformError> for CredentialError {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::NotAllowed | PlatformError::Aborted => CredentialError::Cancelled,
            PlatformError::NotSupported => CredentialError::Unsupported,
            PlatformError::Other(msg) => CredentialError::Failed(msg),
        }
    }
}

// ── Server options (base64url) ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelyingParty {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    /// base64url user handle.
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubKeyCredParam {
    #[serde(rename = "type")]
    pub kind: String,
    pub alg: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    /// base64url credential id.
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resident_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_verification: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationOptions {
    pub challenge: String,
    pub rp: RelyingParty,
    pub user: UserEntity,
    #[serde(default)]
    pub pub_key_cred_params: Vec<PubKeyCredParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub exclude_credentials: Vec<CredentialDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_selection: Option<AuthenticatorSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    pub challenge: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rp_id: Option<String>,
    #[serde(default)]
    pub allow_credentials: Vec<CredentialDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_verification: Option<String>,
}

// ── Platform requests (raw bytes) ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDescriptor {
    pub id: Vec<u8>,
    pub transports: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CreationRequest {
    pub challenge: Vec<u8>,
    pub rp: RelyingParty,
    pub user_id: Vec<u8>,
    pub user_name: String,
    pub user_display_name: String,
    pub pub_key_cred_params: Vec<PubKeyCredParam>,
    pub timeout: Option<u64>,
    pub exclude_credentials: Vec<RawDescriptor>,
    pub authenticator_selection: Option<AuthenticatorSelection>,
    pub attestation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AssertionRequest {
    pub challenge: Vec<u8>,
    pub timeout: Option<u64>,
    pub rp_id: Option<String>,
    pub allow_credentials: Vec<RawDescriptor>,
    pub user_verification: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RawAttestation {
    pub raw_id: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub attestation_object: Vec<u8>,
    pub transports: Vec<String>,
    pub authenticator_attachment: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RawAssertion {
    pub raw_id: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user_handle: Option<Vec<u8>>,
    pub authenticator_attachment: Option<String>,
}

// ── Ceremony results (base64url, unpadded) ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub attestation_object: String,
    pub transports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub authenticator_data: String,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CeremonyResponse {
    Registration(RegistrationResponse),
    Authentication(AuthenticationResponse),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CeremonyResult {
    pub id: String,
    pub raw_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<String>,
    pub response: CeremonyResponse,
}

pub const PUBLIC_KEY_TYPE: &str = "public-key";

// ── Platform seam ─────────────────────────────────────────────────────────────

#[async_trait]
pub trait PlatformAuthenticator: Send + Sync {
    /// Side-effect-free capability probe.
    fn is_supported(&self) -> bool;

    async fn platform_authenticator_available(&self) -> Result<bool, PlatformError>;

    async fn create(&self, request: CreationRequest) -> Result<RawAttestation, PlatformError>;

    async fn get(&self, request: AssertionRequest) -> Result<RawAssertion, PlatformError>;
}

/// Authenticator for hosts without ceremony support.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailablePlatform;

#[async_trait]
impl PlatformAuthenticator for UnavailablePlatform {
    fn is_supported(&self) -> bool {
        false
    }

    async fn platform_authenticator_available(&self) -> Result<bool, PlatformError> {
        Ok(false)
    }

    async fn create(&self, _: CreationRequest) -> Result<RawAttestation, PlatformError> {
        Err(PlatformError::NotSupported)
    }

    async fn get(&self, _: AssertionRequest) -> Result<RawAssertion, PlatformError> {
        Err(PlatformError::NotSupported)
    }
}

// ── Bridge ────────────────────────────────────────────────────────────────────

fn b64url_decode(field: &str, value: &str) -> Result<Vec<u8>, CredentialError> {
    let trimmed = value.trim();
    let decoded = if trimmed.ends_with('=') {
        URL_SAFE.decode(trimmed)
    } else {
        URL_SAFE_NO_PAD.decode(trimmed)
    };
    decoded.map_err(|e| CredentialError::InvalidOptions(format!("{field}: {e}")))
}

fn b64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn raw_descriptors(field: &str, list: &[CredentialDescriptor]) -> Result<Vec<RawDescriptor>, CredentialError> {
    list.iter()
        .map(|d| {
            Ok(RawDescriptor {
                id: b64url_decode(field, &d.id)?,
                transports: d.transports.clone(),
            })
        })
        .collect()
}

pub struct CredentialBridge {
    platform: Arc<dyn PlatformAuthenticator>,
}

impl CredentialBridge {
    pub fn new(platform: Arc<dyn PlatformAuthenticator>) -> Self {
        Self { platform }
    }

    pub fn supported(&self) -> bool {
        self.platform.is_supported()
    }

    /// `false` when the probe itself fails.
    pub async fn platform_authenticator_available(&self) -> bool {
        if !self.supported() {
            return false;
        }
        match self.platform.platform_authenticator_available().await {
            Ok(available) => available,
            Err(e) => {
                debug!(error = %e, "platform authenticator probe failed");
                false
            }
        }
    }

    pub async fn register(&self, options: CreationOptions) -> Result<CeremonyResult, CredentialError> {
        if !self.supported() {
            return Err(CredentialError::Unsupported);
        }
        let request = CreationRequest {
            challenge: b64url_decode("challenge", &options.challenge)?,
            user_id: b64url_decode("user.id", &options.user.id)?,
            exclude_credentials: raw_descriptors("excludeCredentials", &options.exclude_credentials)?,
            rp: options.rp,
            user_name: options.user.name,
            user_display_name: options.user.display_name,
            pub_key_cred_params: options.pub_key_cred_params,
            timeout: options.timeout,
            authenticator_selection: options.authenticator_selection,
            attestation: options.attestation,
        };
        let raw = self.platform.create(request).await.map_err(|e| {
            warn!(error = %e, "credential registration failed");
            CredentialError::from(e)
        })?;
        info!("hardware credential registered");

        let id = b64url(&raw.raw_id);
        Ok(CeremonyResult {
            raw_id: id.clone(),
            id,
            kind: PUBLIC_KEY_TYPE.to_string(),
            authenticator_attachment: raw.authenticator_attachment,
            response: CeremonyResponse::Registration(RegistrationResponse {
                client_data_json: b64url(&raw.client_data_json),
                attestation_object: b64url(&raw.attestation_object),
                transports: raw.transports,
            }),
        })
    }

    pub async fn authenticate(&self, options: RequestOptions) -> Result<CeremonyResult, CredentialError> {
        if !self.supported() {
            return Err(CredentialError::Unsupported);
        }
        let request = AssertionRequest {
            challenge: b64url_decode("challenge", &options.challenge)?,
            allow_credentials: raw_descriptors("allowCredentials", &options.allow_credentials)?,
            timeout: options.timeout,
            rp_id: options.rp_id,
            user_verification: options.user_verification,
        };
        let raw = self.platform.get(request).await.map_err(|e| {
            warn!(error = %e, "credential assertion failed");
            CredentialError::from(e)
        })?;
        info!("hardware credential assertion produced");

        let id = b64url(&raw.raw_id);
        Ok(CeremonyResult {
            raw_id: id.clone(),
            id,
            kind: PUBLIC_KEY_TYPE.to_string(),
            authenticator_attachment: raw.authenticator_attachment,
            response: CeremonyResponse::Authentication(AuthenticationResponse {
                client_data_json: b64url(&raw.client_data_json),
                authenticator_data: b64url(&raw.authenticator_data),
                signature: b64url(&raw.signature),
                user_handle: raw.user_handle.as_deref().map(b64url),
            }),
        })
    }
}
