use async_trait::async_trait;
use keel_core::credential::{
    AssertionRequest, CeremonyResponse, CreationOptions, CreationRequest, CredentialBridge,
    CredentialDescriptor, PlatformAuthenticator, PlatformError, RawAssertion, RawAttestation,
    RelyingParty, RequestOptions, UserEntity,
};
use keel_core::credential::CredentialError;
use keel_core::{CoreConfig, CoreError, Session};
use keel_store::{MemoryBackend, StorageBackend};
use parking_lot::Mutex;
use std::sync::Arc;

/// Records what it was asked and answers from a script.
#[derive(Default)]
struct FakeAuthenticator {
    fail_with: Mutex<Option<PlatformError>>,
    last_creation: Mutex<Option<CreationRequest>>,
    last_assertion: Mutex<Option<AssertionRequest>>,
}

#[async_trait]
impl PlatformAuthenticator for FakeAuthenticator {
    fn is_supported(&self) -> bool {
        true
    }

    async fn platform_authenticator_available(&self) -> Result<bool, PlatformError> {
        Err(PlatformError::Other("probe crashed".into()))
    }

    async fn create(&self, request: CreationRequest) -> Result<RawAttestation, PlatformError> {
        *self.last_creation.lock() = Some(request);
        if let Some(e) = self.fail_with.lock().clone() {
            return Err(e);
        }
        Ok(RawAttestation {
            raw_id: vec![0xfb, 0xff, 0x01],
            client_data_json: br#"{"type":"webauthn.create"}"#.to_vec(),
            attestation_object: vec![0xa3, 0x01, 0x02],
            transports: vec!["internal".into(), "hybrid".into()],
            authenticator_attachment: Some("platform".into()),
        })
    }

    async fn get(&self, request: AssertionRequest) -> Result<RawAssertion, PlatformError> {
        *self.last_assertion.lock() = Some(request);
        if let Some(e) = self.fail_with.lock().clone() {
            return Err(e);
        }
        Ok(RawAssertion {
            raw_id: vec![9, 9, 9],
            client_data_json: br#"{"type":"webauthn.get"}"#.to_vec(),
            authenticator_data: vec![1; 37],
            signature: vec![0x30, 0x45],
            user_handle: Some(b"user".to_vec()),
            authenticator_attachment: None,
        })
    }
}

fn creation_options() -> CreationOptions {
    CreationOptions {
        challenge: "AAECAw".into(),
        rp: RelyingParty {
            id: Some("keel.example".into()),
            name: "Keel".into(),
        },
        user: UserEntity {
            id: "dXNlcg==".into(),
            name: "ana".into(),
            display_name: "Ana".into(),
        },
        pub_key_cred_params: vec![],
        timeout: Some(60_000),
        exclude_credentials: vec![CredentialDescriptor {
            kind: "public-key".into(),
            id: "CQkJ".into(),
            transports: vec!["usb".into()],
        }],
        authenticator_selection: None,
        attestation: None,
    }
}

fn request_options() -> RequestOptions {
    RequestOptions {
        challenge: "BAUG".into(),
        timeout: None,
        rp_id: Some("keel.example".into()),
        allow_credentials: vec![CredentialDescriptor {
            kind: "public-key".into(),
            id: "CQkJ".into(),
            transports: vec![],
        }],
        user_verification: Some("required".into()),
    }
}

#[tokio::test]
async fn registration_decodes_inputs_and_encodes_outputs() {
    let fake = Arc::new(FakeAuthenticator::default());
    let bridge = CredentialBridge::new(fake.clone());
    let result = bridge.register(creation_options()).await.unwrap();

    let request = fake.last_creation.lock().clone().unwrap();
    assert_eq!(request.challenge, vec![0, 1, 2, 3]);
    assert_eq!(request.user_id, b"user".to_vec());
    assert_eq!(request.exclude_credentials[0].id, vec![9, 9, 9]);

    assert_eq!(result.id, "-_8B");
    assert_eq!(result.raw_id, result.id);
    assert_eq!(result.kind, "public-key");
    assert_eq!(result.authenticator_attachment.as_deref(), Some("platform"));
    match &result.response {
        CeremonyResponse::Registration(r) => {
            assert_eq!(r.attestation_object, "owEC");
            assert_eq!(r.transports, vec!["internal", "hybrid"]);
            assert!(!r.client_data_json.contains('='));
        }
        other => panic!("unexpected response {other:?}"),
    }

    let json = serde_json::to_value(&result).unwrap();
    assert!(json["response"].get("clientDataJSON").is_some());
    assert_eq!(json["rawId"], "-_8B");
}

#[tokio::test]
async fn authentication_roundtrip() {
    let fake = Arc::new(FakeAuthenticator::default());
    let bridge = CredentialBridge::new(fake.clone());
    let result = bridge.authenticate(request_options()).await.unwrap();

    let request = fake.last_assertion.lock().clone().unwrap();
    assert_eq!(request.challenge, vec![4, 5, 6]);
    assert_eq!(request.allow_credentials[0].id, vec![9, 9, 9]);
    match result.response {
        CeremonyResponse::Authentication(r) => {
            assert_eq!(r.user_handle.as_deref(), Some("dXNlcg"));
            assert_eq!(r.signature, "MEU");
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn platform_failures_map_to_typed_outcomes() {
    let fake = Arc::new(FakeAuthenticator::default());
    let bridge = CredentialBridge::new(fake.clone());

    *fake.fail_with.lock() = Some(PlatformError::NotAllowed);
    assert!(matches!(bridge.register(creation_options()).await, Err(CredentialError::Cancelled)));

    *fake.fail_with.lock() = Some(PlatformError::Other("TPM busy".into()));
    match bridge.authenticate(request_options()).await {
        Err(CredentialError::Failed(msg)) => assert_eq!(msg, "TPM busy"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn malformed_challenge_never_reaches_platform() {
    let fake = Arc::new(FakeAuthenticator::default());
    let bridge = CredentialBridge::new(fake.clone());
    let mut options = creation_options();
    options.challenge = "not*base64".into();
    assert!(matches!(bridge.register(options).await, Err(CredentialError::InvalidOptions(_))));
    assert!(fake.last_creation.lock().is_none());
}

#[tokio::test]
async fn probe_failure_reads_as_unavailable() {
    let bridge = CredentialBridge::new(Arc::new(FakeAuthenticator::default()));
    assert!(bridge.supported());
    assert!(!bridge.platform_authenticator_available().await);
}

#[tokio::test]
async fn session_surfaces_cancellation() {
    let fake = Arc::new(FakeAuthenticator::default());
    *fake.fail_with.lock() = Some(PlatformError::Aborted);
    let session = Session::with_backends(
        CoreConfig::default(),
        vec![Arc::new(MemoryBackend::new("m")) as Arc<dyn StorageBackend>],
        fake,
    )
    .unwrap();
    assert!(matches!(
        session.register(creation_options()).await,
        Err(CoreError::CeremonyCancelled)
    ));
}
