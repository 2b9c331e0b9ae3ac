//! Test harnesses for the enrollment and redemption E2E tests.
//!
//! Requests go straight into the axum router with `tower::ServiceExt::oneshot`
//! (no network). Devices are simulated with real RSA keys and self-signed
//! certificates carrying the attestation extension.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use rcgen::{CertificateParams, CustomExtension, DistinguishedName, DnType, KeyPair};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tower::ServiceExt;

use keybind_auth::envelope::{encode_base64, seal_payload, wrap_file_for_device};
use keybind_auth::{
    AttestationPayload, AttestationVerifier, ServerKeyPair, SessionMaterial,
    ANDROID_KEY_ATTESTATION_OID,
};
use keybind_daemon::services::{
    EnrollmentService, RedemptionPolicy, RedemptionService, RequestRateLimiter, SharedSecret,
};
use keybind_daemon::{router, AppState, DeviceRecordStore, SqliteDeviceStore};

/// Application secret the test daemon expects in `X-Signature`.
pub const APK_SIGNATURE: &str = "test-apk-signature";

/// File content every enrolled device receives.
pub const PAYLOAD: &[u8] = b"the protected file\nsecond line\n";

/// Alias token embedded in test certificates.
pub const ALIAS: &str = "keyAlias_0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0";

// ============================================================================
// Keys
// ============================================================================

/// One server key per test binary.
pub fn server_key() -> Arc<ServerKeyPair> {
    static KEY: OnceLock<Arc<ServerKeyPair>> = OnceLock::new();
    KEY.get_or_init(|| Arc::new(ServerKeyPair::generate(1024).expect("server key")))
        .clone()
}

/// Device keys, generated once. rcgen only signs with RSA keys of 2048 bits
/// or more.
fn device_keys() -> &'static [RsaPrivateKey; 2] {
    static KEYS: OnceLock<[RsaPrivateKey; 2]> = OnceLock::new();
    KEYS.get_or_init(|| {
        let generate = || RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).expect("device key");
        [generate(), generate()]
    })
}

fn oid_arcs(oid: &str) -> Vec<u64> {
    oid.split('.').map(|arc| arc.parse().expect("numeric arc")).collect()
}

fn build_cert(key: &RsaPrivateKey, attested: bool, alias: Option<&str>) -> Vec<u8> {
    let pem = key.to_pkcs8_pem(LineEnding::LF).expect("pkcs8 pem");
    let key_pair = KeyPair::from_pem_and_sign_algo(&pem, &rcgen::PKCS_RSA_SHA256)
        .expect("rcgen key pair");

    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, "Android Keystore Key");
    if attested {
        params.custom_extensions.push(CustomExtension::from_oid_content(
            &oid_arcs(ANDROID_KEY_ATTESTATION_OID),
            vec![0x30, 0x00],
        ));
    }
    if let Some(alias) = alias {
        params.custom_extensions.push(CustomExtension::from_oid_content(
            &[1, 3, 6, 1, 4, 1, 99999, 1],
            alias.as_bytes().to_vec(),
        ));
    }

    params
        .self_signed(&key_pair)
        .expect("self-signed certificate")
        .der()
        .to_vec()
}

// ============================================================================
// Simulated device
// ============================================================================

/// A simulated device holding an attested key.
pub struct TestDevice {
    pub device_id: String,
    pub phone_number: String,
    pub cert_der: Vec<u8>,
    key: &'static RsaPrivateKey,
}

impl TestDevice {
    /// Attested device with the alias extension.
    pub fn attested(device_id: &str) -> Self {
        Self::build(device_id, 0, true, Some(ALIAS))
    }

    /// Attested device whose certificate carries no alias.
    pub fn without_alias(device_id: &str) -> Self {
        Self::build(device_id, 0, true, None)
    }

    /// Device whose certificate lacks the attestation extension.
    pub fn unattested(device_id: &str) -> Self {
        Self::build(device_id, 0, false, Some(ALIAS))
    }

    /// Same identifier, different key: a second enrollment of one device.
    pub fn rekeyed(device_id: &str) -> Self {
        Self::build(device_id, 1, true, Some(ALIAS))
    }

    fn build(device_id: &str, slot: usize, attested: bool, alias: Option<&str>) -> Self {
        let key = &device_keys()[slot];
        Self {
            device_id: device_id.to_string(),
            phone_number: "+10000000000".to_string(),
            cert_der: build_cert(key, attested, alias),
            key,
        }
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }

    /// Base64 PKCS#1 v1.5 SHA-256 signature with the device key.
    pub fn sign(&self, message: &[u8]) -> String {
        let signer = SigningKey::<Sha256>::new(self.key.clone());
        encode_base64(signer.sign(message).to_vec())
    }

    /// Base64 signature with a key that is not this device's.
    pub fn sign_with_other_key(&self, message: &[u8]) -> String {
        let other = device_keys()
            .iter()
            .find(|k| !std::ptr::eq(*k, self.key))
            .expect("second device key");
        encode_base64(SigningKey::<Sha256>::new(other.clone()).sign(message).to_vec())
    }

    pub fn payload(&self) -> AttestationPayload {
        AttestationPayload {
            device_identifier: self.device_id.clone(),
            phone_number: self.phone_number.clone(),
            attestation_certificate: encode_base64(&self.cert_der),
        }
    }

    /// A complete, correctly signed `POST /data` body.
    pub fn enrollment_body(&self, server: &ServerKeyPair) -> serde_json::Value {
        let sealed = seal_payload(&self.payload(), server.public_key()).expect("seal payload");
        let signature = self.sign(sealed.data.as_bytes());
        serde_json::json!({
            "aesKey": sealed.aes_key,
            "data": sealed.data,
            "iv": sealed.iv,
            "signature": signature,
        })
    }

    /// Recover the one-time code from an enrollment response.
    pub fn decrypt_code(&self, encrypted_code_b64: &str) -> String {
        let ciphertext = keybind_auth::envelope::decode_base64("encrypted_code", encrypted_code_b64)
            .expect("encrypted_code base64");
        let plaintext = self
            .key
            .decrypt(Pkcs1v15Encrypt, &ciphertext)
            .expect("code decrypts with device key");
        String::from_utf8(plaintext).expect("code is UTF-8")
    }

    /// A correctly signed `POST /getkey` body.
    pub fn redemption_body(&self, code: &str) -> serde_json::Value {
        serde_json::json!({ "code": code, "signature": self.sign(code.as_bytes()) })
    }
}

/// Encrypt arbitrary plaintext the way a device would, without signing.
///
/// Returns `(aesKey, data, iv)`.
pub fn seal_raw(plaintext: &[u8], server: &ServerKeyPair) -> (String, String, String) {
    let session = SessionMaterial::generate();
    let server_public =
        RsaPublicKey::from_public_key_pem(server.public_key_pem()).expect("server pem");
    let wrapped = server_public
        .encrypt(&mut rand::rngs::OsRng, Pkcs1v15Encrypt, session.key())
        .expect("wrap session key");
    (
        encode_base64(wrapped),
        encode_base64(wrap_file_for_device(plaintext, &session)),
        session.iv_base64(),
    )
}

// ============================================================================
// Daemon
// ============================================================================

/// Response captured from the router.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("JSON response body")
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).expect("UTF-8 response body")
    }

    /// The `error` message of a failure response.
    pub fn error(&self) -> String {
        self.json()["error"]
            .as_str()
            .expect("error field")
            .to_string()
    }
}

/// Successful enrollment as seen by the device.
pub struct Enrollment {
    pub code: String,
    pub encrypted_file: Vec<u8>,
}

/// Test daemon wired exactly like the binary, over in-memory SQLite.
pub struct TestDaemon {
    pub app: Router,
    pub store: Arc<dyn DeviceRecordStore>,
    pub server_key: Arc<ServerKeyPair>,
}

impl TestDaemon {
    /// Create a new test daemon with default policy and no rate limit.
    pub async fn new() -> Self {
        Self::with_policy(RedemptionPolicy::default()).await
    }

    pub async fn with_policy(policy: RedemptionPolicy) -> Self {
        let store = SqliteDeviceStore::open("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");
        Self::with_store(Arc::new(store), policy, None)
    }

    pub async fn with_rate_limit(limiter: RequestRateLimiter) -> Self {
        let store = SqliteDeviceStore::open("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");
        Self::with_store(Arc::new(store), RedemptionPolicy::default(), Some(limiter))
    }

    /// Build a daemon over any record store.
    pub fn with_store(
        store: Arc<dyn DeviceRecordStore>,
        policy: RedemptionPolicy,
        limiter: Option<RequestRateLimiter>,
    ) -> Self {
        let server_key = server_key();
        let secret = SharedSecret::new(APK_SIGNATURE);
        let state = AppState {
            server_key: server_key.clone(),
            secret: secret.clone(),
            enrollment: EnrollmentService::new(
                store.clone(),
                server_key.clone(),
                AttestationVerifier::default(),
                secret.clone(),
                Arc::from(PAYLOAD),
            ),
            redemption: RedemptionService::new(store.clone(), server_key.clone(), secret, policy),
        };

        Self {
            app: router(state, limiter),
            store,
            server_key,
        }
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.app.clone().oneshot(request).await.expect("router is infallible");
        let status = response.status();
        let content_type = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body")
            .to_vec();
        TestResponse {
            status,
            content_type,
            body,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let request = Request::builder()
            .uri(path)
            .body(Body::empty())
            .expect("request");
        self.send(request).await
    }

    /// POST a raw body with an optional `X-Signature` header.
    pub async fn post_raw(
        &self,
        path: &str,
        secret: Option<&str>,
        body: impl Into<Body>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header("x-signature", secret);
        }
        self.send(builder.body(body.into()).expect("request")).await
    }

    /// POST JSON with the correct application secret.
    pub async fn post(&self, path: &str, body: &serde_json::Value) -> TestResponse {
        self.post_raw(path, Some(APK_SIGNATURE), body.to_string())
            .await
    }

    /// Enroll `device`, asserting success.
    pub async fn enroll(&self, device: &TestDevice) -> Enrollment {
        let response = self
            .post("/data", &device.enrollment_body(&self.server_key))
            .await;
        assert_eq!(response.status, StatusCode::OK, "enrollment: {}", response.text());

        let json = response.json();
        let encrypted_code = json["encrypted_code"].as_str().expect("encrypted_code");
        let encrypted_file = json["encrypted_file"].as_str().expect("encrypted_file");
        Enrollment {
            code: device.decrypt_code(encrypted_code),
            encrypted_file: keybind_auth::envelope::decode_base64("encrypted_file", encrypted_file)
                .expect("encrypted_file base64"),
        }
    }
}
