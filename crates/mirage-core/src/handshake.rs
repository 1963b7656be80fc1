//! Signed Hello v2 handshake.
//!
//! The client opens the control connection and sends a signed hello; the
//! host verifies, answers with a signed response that echoes the hello
//! nonce, and both sides derive the media session key. The UDP
//! registration token rides inside the signed response body, so a client
//! that authenticated the response has also authenticated the token.
//!
//! # Client state machine
//!
//! ```text
//! ┌──────┐  start()   ┌──────────────────┐  accepted   ┌───────┐
//! │ Idle │───────────►│ AwaitingResponse │────────────►│ Ready │
//! └──────┘            └──────────────────┘             └───────┘
//!                         │          │
//!                rejected │          │ timeout (5 s)
//!                         ▼          ▼
//!                      ┌──────────────┐
//!                      │    Failed    │
//!                      └──────────────┘
//! ```
//!
//! On the host, exactly one hello is accepted per connection; duplicates
//! and out-of-order messages are rejected.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use mirage_crypto::{
    CanonicalPayload, DeviceIdentity, RegistrationToken, ReplayGuard, SessionKey,
    identity::verify_signature,
    session::{DerivationInputs, derive_session_key},
};
use mirage_proto::payloads::session::{Capabilities, HelloResponseV2, HelloV2, Negotiation};
use rand::RngCore;

use crate::error::HandshakeError;

/// Time the client waits for a hello response.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Rejection reason: the host requires an out-of-band trust approval
/// before it will stream. The trust surface itself is an external
/// collaborator; the data plane only reports the code.
pub const REASON_REQUIRES_AUTH: u32 = 100;

/// Rejection reason: unsupported protocol version.
pub const REASON_UNSUPPORTED_VERSION: u32 = 101;

/// Static identity fields the client advertises in its hello.
#[derive(Debug, Clone)]
pub struct DeviceMetadata {
    /// Stable device identifier.
    pub device_id: String,
    /// Human-readable device name.
    pub device_name: String,
    /// Device class ("mac", "ipad", ...).
    pub device_type: String,
    /// Capability advertisement.
    pub capabilities: Capabilities,
    /// Codec/transport negotiation.
    pub negotiation: Negotiation,
    /// Optional cloud account binding.
    pub icloud_user_id: Option<String>,
}

/// Everything both sides hold once the handshake succeeds.
pub struct SessionEstablished {
    /// Peer device identifier.
    pub peer_id: String,
    /// 32-byte media session key.
    pub session_key: SessionKey,
    /// Token authorizing the client's UDP endpoint.
    pub registration_token: RegistrationToken,
}

impl std::fmt::Debug for SessionEstablished {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEstablished").field("peer_id", &self.peer_id).finish_non_exhaustive()
    }
}

fn random_nonce_hex() -> String {
    let mut nonce = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    hex::encode(nonce)
}

fn decode_nonce(hex_nonce: &str) -> Result<[u8; 16], HandshakeError> {
    let bytes =
        hex::decode(hex_nonce).map_err(|_| HandshakeError::MalformedField("nonce"))?;
    bytes.try_into().map_err(|_| HandshakeError::MalformedField("nonce"))
}

/// Canonical signing payload of a hello: every field except the signature.
fn hello_canonical(hello: &HelloV2) -> Result<CanonicalPayload, HandshakeError> {
    let mut payload = CanonicalPayload::new()
        .field("deviceID", hello.device_id.clone())
        .field("deviceName", hello.device_name.clone())
        .field("deviceType", hello.device_type.clone())
        .field_u64("protocolVersion", u64::from(hello.protocol_version))
        .field_json("capabilities", &hello.capabilities)?
        .field_json("negotiation", &hello.negotiation)?
        .field("keyID", hello.key_id.clone())
        .field("publicKey", hello.public_key.clone())
        .field_u64("timestampMs", hello.timestamp_ms)
        .field("nonce", hello.nonce.clone());
    if let Some(user) = &hello.icloud_user_id {
        payload = payload.field("iCloudUserID", user.clone());
    }
    Ok(payload)
}

/// Canonical signing payload of a response: every field except the
/// signature. The registration token is included; it is authenticated.
fn response_canonical(response: &HelloResponseV2) -> Result<CanonicalPayload, HandshakeError> {
    let mut payload = CanonicalPayload::new()
        .field_bool("accepted", response.accepted)
        .field_bool("requiresAuth", response.requires_auth)
        .field("requestNonce", response.request_nonce.clone())
        .field("hostID", response.host_id.clone())
        .field("keyID", response.key_id.clone())
        .field("publicKey", response.public_key.clone())
        .field_u64("timestampMs", response.timestamp_ms)
        .field("nonce", response.nonce.clone());
    if let Some(code) = response.reason_code {
        payload = payload.field_u64("reasonCode", u64::from(code));
    }
    if let Some(token) = &response.udp_registration_token {
        payload = payload.field("udpRegistrationToken", token.clone());
    }
    Ok(payload)
}

/// Build and sign a client hello.
pub fn build_hello(
    identity: &DeviceIdentity,
    meta: &DeviceMetadata,
    now_ms: u64,
) -> Result<HelloV2, HandshakeError> {
    let mut hello = HelloV2 {
        device_id: meta.device_id.clone(),
        device_name: meta.device_name.clone(),
        device_type: meta.device_type.clone(),
        protocol_version: mirage_proto::PROTOCOL_VERSION,
        capabilities: meta.capabilities.clone(),
        negotiation: meta.negotiation.clone(),
        icloud_user_id: meta.icloud_user_id.clone(),
        key_id: identity.key_id(),
        public_key: BASE64.encode(identity.public_key_bytes()),
        timestamp_ms: now_ms,
        nonce: random_nonce_hex(),
        signature: String::new(),
    };
    hello.signature = BASE64.encode(identity.sign(&hello_canonical(&hello)?));
    Ok(hello)
}

/// Verify a hello's signature against its embedded public key.
pub fn verify_hello(hello: &HelloV2) -> Result<(), HandshakeError> {
    let public_key = BASE64
        .decode(&hello.public_key)
        .map_err(|_| HandshakeError::MalformedField("publicKey"))?;
    let signature = BASE64
        .decode(&hello.signature)
        .map_err(|_| HandshakeError::MalformedField("signature"))?;
    verify_signature(&public_key, &hello_canonical(hello)?, &signature)?;
    Ok(())
}

/// Verify a response's signature against its embedded public key.
pub fn verify_response(response: &HelloResponseV2) -> Result<(), HandshakeError> {
    let public_key = BASE64
        .decode(&response.public_key)
        .map_err(|_| HandshakeError::MalformedField("publicKey"))?;
    let signature = BASE64
        .decode(&response.signature)
        .map_err(|_| HandshakeError::MalformedField("signature"))?;
    verify_signature(&public_key, &response_canonical(response)?, &signature)?;
    Ok(())
}

fn derivation_inputs(hello: &HelloV2, response: &HelloResponseV2) -> DerivationInputs {
    DerivationInputs {
        client_id: hello.device_id.clone(),
        client_key_id: hello.key_id.clone(),
        client_nonce: hello.nonce.clone(),
        host_id: response.host_id.clone(),
        host_key_id: response.key_id.clone(),
        host_nonce: response.nonce.clone(),
    }
}

/// Client-side handshake driver.
#[derive(Debug)]
pub struct ClientHandshake<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    identity: DeviceIdentity,
    meta: DeviceMetadata,
    state: State,
    hello: Option<HelloV2>,
    sent_at: Option<I>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    AwaitingResponse,
    Ready,
    Failed,
}

impl<I> ClientHandshake<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a handshake driver for one connection attempt.
    #[must_use]
    pub fn new(identity: DeviceIdentity, meta: DeviceMetadata) -> Self {
        Self { identity, meta, state: State::Idle, hello: None, sent_at: None }
    }

    /// Whether the handshake reached the ready state.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    /// Build the hello to send; transitions to awaiting-response.
    ///
    /// # Errors
    ///
    /// - [`HandshakeError::InvalidState`] if called twice
    pub fn start(&mut self, now: I, now_ms: u64) -> Result<HelloV2, HandshakeError> {
        if self.state != State::Idle {
            return Err(HandshakeError::InvalidState { state: self.state_name() });
        }
        let hello = build_hello(&self.identity, &self.meta, now_ms)?;
        self.hello = Some(hello.clone());
        self.sent_at = Some(now);
        self.state = State::AwaitingResponse;
        Ok(hello)
    }

    /// Handle the host response: verify, check the nonce echo, derive the
    /// session key, decode the registration token.
    ///
    /// # Errors
    ///
    /// Any error is terminal for the connection; the caller tears down.
    pub fn handle_response(
        &mut self,
        response: &HelloResponseV2,
    ) -> Result<SessionEstablished, HandshakeError> {
        if self.state != State::AwaitingResponse {
            return Err(HandshakeError::InvalidState { state: self.state_name() });
        }
        let Some(hello) = self.hello.clone() else {
            return Err(HandshakeError::InvalidState { state: self.state_name() });
        };

        verify_response(response).inspect_err(|_| self.state = State::Failed)?;

        if response.request_nonce != hello.nonce {
            self.state = State::Failed;
            return Err(HandshakeError::NonceMismatch);
        }

        if !response.accepted || response.requires_auth {
            self.state = State::Failed;
            return Err(HandshakeError::Rejected(
                response.reason_code.unwrap_or(REASON_REQUIRES_AUTH),
            ));
        }

        let token_b64 = response
            .udp_registration_token
            .as_ref()
            .ok_or(HandshakeError::MalformedField("udpRegistrationToken"))?;
        let token_bytes: [u8; 32] = BASE64
            .decode(token_b64)
            .map_err(|_| HandshakeError::MalformedField("udpRegistrationToken"))?
            .try_into()
            .map_err(|_| HandshakeError::MalformedField("udpRegistrationToken"))?;

        let peer_public = BASE64
            .decode(&response.public_key)
            .map_err(|_| HandshakeError::MalformedField("publicKey"))?;
        let session_key = derive_session_key(
            &self.identity,
            &peer_public,
            &derivation_inputs(&hello, response),
        )
        .inspect_err(|_| self.state = State::Failed)?;

        self.state = State::Ready;
        Ok(SessionEstablished {
            peer_id: response.host_id.clone(),
            session_key,
            registration_token: RegistrationToken::from_bytes(token_bytes),
        })
    }

    /// Check the response deadline.
    ///
    /// # Errors
    ///
    /// - [`HandshakeError::Timeout`] once 5 s elapse without a response
    pub fn tick(&mut self, now: I) -> Result<(), HandshakeError> {
        if self.state == State::AwaitingResponse
            && let Some(sent) = self.sent_at
            && now >= sent
            && now - sent > HANDSHAKE_TIMEOUT
        {
            self.state = State::Failed;
            return Err(HandshakeError::Timeout { elapsed: now - sent });
        }
        Ok(())
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            State::Idle => "idle",
            State::AwaitingResponse => "awaitingResponse",
            State::Ready => "ready",
            State::Failed => "failed",
        }
    }
}

/// What the host hands its session layer after accepting a hello.
pub struct HostAccepted {
    /// Signed response to send back.
    pub response: HelloResponseV2,
    /// Established session state.
    pub session: SessionEstablished,
}

impl std::fmt::Debug for HostAccepted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostAccepted").field("session", &self.session).finish_non_exhaustive()
    }
}

/// Host-side handshake acceptor for one connection.
#[derive(Debug)]
pub struct HostHandshake {
    identity: DeviceIdentity,
    host_id: String,
    completed: bool,
}

impl HostHandshake {
    /// Create an acceptor for one connection.
    #[must_use]
    pub fn new(identity: DeviceIdentity, host_id: String) -> Self {
        Self { identity, host_id, completed: false }
    }

    /// Validate a client hello and produce the signed acceptance.
    ///
    /// `replay` is shared across connections: nonce reuse anywhere on the
    /// host within the replay horizon is rejected.
    ///
    /// # Errors
    ///
    /// - [`HandshakeError::DuplicateHello`] on a second hello
    /// - [`HandshakeError::UnsupportedVersion`] for unknown versions
    /// - signature/replay errors from the crypto layer
    pub fn handle_hello(
        &mut self,
        hello: &HelloV2,
        replay: &mut ReplayGuard,
        now_ms: u64,
    ) -> Result<HostAccepted, HandshakeError> {
        if self.completed {
            return Err(HandshakeError::DuplicateHello);
        }

        if hello.protocol_version != mirage_proto::PROTOCOL_VERSION {
            return Err(HandshakeError::UnsupportedVersion(hello.protocol_version));
        }

        verify_hello(hello)?;
        replay.check(hello.timestamp_ms, decode_nonce(&hello.nonce)?, now_ms)?;

        let token = RegistrationToken::generate();
        let mut response = HelloResponseV2 {
            accepted: true,
            reason_code: None,
            requires_auth: false,
            request_nonce: hello.nonce.clone(),
            host_id: self.host_id.clone(),
            key_id: self.identity.key_id(),
            public_key: BASE64.encode(self.identity.public_key_bytes()),
            timestamp_ms: now_ms,
            nonce: random_nonce_hex(),
            udp_registration_token: Some(BASE64.encode(token.as_bytes())),
            signature: String::new(),
        };
        response.signature = BASE64.encode(self.identity.sign(&response_canonical(&response)?));

        let client_public = BASE64
            .decode(&hello.public_key)
            .map_err(|_| HandshakeError::MalformedField("publicKey"))?;
        let session_key = derive_session_key(
            &self.identity,
            &client_public,
            &derivation_inputs(hello, &response),
        )?;

        self.completed = true;
        Ok(HostAccepted {
            response,
            session: SessionEstablished {
                peer_id: hello.device_id.clone(),
                session_key,
                registration_token: token,
            },
        })
    }

    /// Build a signed rejection without establishing a session.
    pub fn reject(
        &mut self,
        hello: &HelloV2,
        reason_code: u32,
        now_ms: u64,
    ) -> Result<HelloResponseV2, HandshakeError> {
        let mut response = HelloResponseV2 {
            accepted: false,
            reason_code: Some(reason_code),
            requires_auth: reason_code == REASON_REQUIRES_AUTH,
            request_nonce: hello.nonce.clone(),
            host_id: self.host_id.clone(),
            key_id: self.identity.key_id(),
            public_key: BASE64.encode(self.identity.public_key_bytes()),
            timestamp_ms: now_ms,
            nonce: random_nonce_hex(),
            udp_registration_token: None,
            signature: String::new(),
        };
        response.signature = BASE64.encode(self.identity.sign(&response_canonical(&response)?));
        self.completed = true;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use mirage_proto::payloads::stream::{ColorSpace, PixelFormat};

    use super::*;

    type Ms = Duration;

    fn at(ms: u64) -> Ms {
        Duration::from_millis(ms)
    }

    fn metadata(device_id: &str) -> DeviceMetadata {
        DeviceMetadata {
            device_id: device_id.to_string(),
            device_name: "Test Device".to_string(),
            device_type: "mac".to_string(),
            capabilities: Capabilities { max_streams: 4, hevc: true, p3: true, max_fps: 120 },
            negotiation: Negotiation {
                protocol_version: 1,
                preferred_pixel_format: PixelFormat::Nv12,
                color_space: ColorSpace::Srgb,
            },
            icloud_user_id: None,
        }
    }

    fn run_exchange() -> (SessionEstablished, SessionEstablished) {
        let client_identity = DeviceIdentity::generate();
        let host_identity = DeviceIdentity::generate();

        let mut client: ClientHandshake<Ms> =
            ClientHandshake::new(client_identity, metadata("client-1"));
        let hello = client.start(at(0), 1_000_000).unwrap();

        let mut host = HostHandshake::new(host_identity, "host-1".to_string());
        let mut replay = ReplayGuard::default();
        let accepted = host.handle_hello(&hello, &mut replay, 1_000_100).unwrap();

        let client_session = client.handle_response(&accepted.response).unwrap();
        (client_session, accepted.session)
    }

    #[test]
    fn full_exchange_derives_matching_keys() {
        let (client_session, host_session) = run_exchange();
        assert_eq!(
            client_session.session_key.as_bytes(),
            host_session.session_key.as_bytes()
        );
        assert!(
            host_session
                .registration_token
                .matches(client_session.registration_token.as_bytes())
        );
        assert_eq!(client_session.peer_id, "host-1");
        assert_eq!(host_session.peer_id, "client-1");
    }

    #[test]
    fn tampered_hello_is_rejected() {
        let client_identity = DeviceIdentity::generate();
        let mut client: ClientHandshake<Ms> =
            ClientHandshake::new(client_identity, metadata("client-1"));
        let mut hello = client.start(at(0), 1_000_000).unwrap();
        hello.device_name = "Evil Device".to_string();

        let mut host = HostHandshake::new(DeviceIdentity::generate(), "host-1".to_string());
        let mut replay = ReplayGuard::default();
        assert!(matches!(
            host.handle_hello(&hello, &mut replay, 1_000_100),
            Err(HandshakeError::Crypto(_))
        ));
    }

    #[test]
    fn replayed_hello_is_rejected() {
        let client_identity = DeviceIdentity::generate();
        let mut client: ClientHandshake<Ms> =
            ClientHandshake::new(client_identity, metadata("client-1"));
        let hello = client.start(at(0), 1_000_000).unwrap();

        let host_identity = DeviceIdentity::generate();
        let mut replay = ReplayGuard::default();

        let mut host = HostHandshake::new(host_identity.clone(), "host-1".to_string());
        host.handle_hello(&hello, &mut replay, 1_000_100).unwrap();

        // Same hello replayed on a new connection.
        let mut second = HostHandshake::new(host_identity, "host-1".to_string());
        assert!(matches!(
            second.handle_hello(&hello, &mut replay, 1_001_000),
            Err(HandshakeError::Crypto(mirage_crypto::CryptoError::NonceReplayed))
        ));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let mut client: ClientHandshake<Ms> =
            ClientHandshake::new(DeviceIdentity::generate(), metadata("client-1"));
        let hello = client.start(at(0), 1_000_000).unwrap();

        let mut host = HostHandshake::new(DeviceIdentity::generate(), "host-1".to_string());
        let mut replay = ReplayGuard::default();
        // Host clock is 2 minutes ahead of the hello timestamp.
        assert!(matches!(
            host.handle_hello(&hello, &mut replay, 1_120_000),
            Err(HandshakeError::Crypto(mirage_crypto::CryptoError::TimestampSkew { .. }))
        ));
    }

    #[test]
    fn duplicate_hello_on_same_connection_is_rejected() {
        let mut client: ClientHandshake<Ms> =
            ClientHandshake::new(DeviceIdentity::generate(), metadata("client-1"));
        let hello = client.start(at(0), 1_000_000).unwrap();

        let mut host = HostHandshake::new(DeviceIdentity::generate(), "host-1".to_string());
        let mut replay = ReplayGuard::default();
        host.handle_hello(&hello, &mut replay, 1_000_100).unwrap();
        assert!(matches!(
            host.handle_hello(&hello, &mut replay, 1_000_200),
            Err(HandshakeError::DuplicateHello)
        ));
    }

    #[test]
    fn unsupported_version_is_rejected_before_signature_work() {
        let mut client: ClientHandshake<Ms> =
            ClientHandshake::new(DeviceIdentity::generate(), metadata("client-1"));
        let mut hello = client.start(at(0), 1_000_000).unwrap();
        hello.protocol_version = 9;

        let mut host = HostHandshake::new(DeviceIdentity::generate(), "host-1".to_string());
        let mut replay = ReplayGuard::default();
        assert!(matches!(
            host.handle_hello(&hello, &mut replay, 1_000_100),
            Err(HandshakeError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn rejection_reaches_client_as_reason_code() {
        let mut client: ClientHandshake<Ms> =
            ClientHandshake::new(DeviceIdentity::generate(), metadata("client-1"));
        let hello = client.start(at(0), 1_000_000).unwrap();

        let mut host = HostHandshake::new(DeviceIdentity::generate(), "host-1".to_string());
        let response = host.reject(&hello, REASON_REQUIRES_AUTH, 1_000_100).unwrap();

        assert!(matches!(
            client.handle_response(&response),
            Err(HandshakeError::Rejected(REASON_REQUIRES_AUTH))
        ));
        assert!(!client.is_ready());
    }

    #[test]
    fn response_with_wrong_nonce_echo_is_rejected() {
        let mut client: ClientHandshake<Ms> =
            ClientHandshake::new(DeviceIdentity::generate(), metadata("client-1"));
        let hello = client.start(at(0), 1_000_000).unwrap();

        let mut host = HostHandshake::new(DeviceIdentity::generate(), "host-1".to_string());
        let mut replay = ReplayGuard::default();
        let mut accepted = host.handle_hello(&hello, &mut replay, 1_000_100).unwrap();

        // Re-bind the response to a different request nonce and re-sign it
        // with an attacker key; the client must notice one way or another.
        accepted.response.request_nonce = "00".repeat(16);
        assert!(client.handle_response(&accepted.response).is_err());
    }

    #[test]
    fn timeout_fails_the_handshake() {
        let mut client: ClientHandshake<Ms> =
            ClientHandshake::new(DeviceIdentity::generate(), metadata("client-1"));
        let _ = client.start(at(0), 1_000_000).unwrap();

        assert!(client.tick(at(4_900)).is_ok());
        assert!(matches!(
            client.tick(at(5_100)),
            Err(HandshakeError::Timeout { .. })
        ));
        assert!(!client.is_ready());
    }

    #[test]
    fn start_twice_is_invalid() {
        let mut client: ClientHandshake<Ms> =
            ClientHandshake::new(DeviceIdentity::generate(), metadata("client-1"));
        client.start(at(0), 1_000_000).unwrap();
        assert!(matches!(
            client.start(at(1), 1_000_001),
            Err(HandshakeError::InvalidState { state: "awaitingResponse" })
        ));
    }

    #[test]
    fn signature_survives_field_reordering_of_wire_json() {
        // The canonical payload is rebuilt from decoded fields, so a wire
        // encoder that emits keys in any order still verifies.
        let mut client: ClientHandshake<Ms> =
            ClientHandshake::new(DeviceIdentity::generate(), metadata("client-1"));
        let hello = client.start(at(0), 1_000_000).unwrap();

        let bytes = mirage_proto::canonical::canonical_json(&hello).unwrap();
        let decoded: HelloV2 = mirage_proto::canonical::from_json(&bytes).unwrap();
        verify_hello(&decoded).unwrap();
    }
}
