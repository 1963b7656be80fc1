//! Mirage streaming host.
//!
//! Production glue around [`mirage_core`]: a TCP control listener running
//! the signed handshake, a shared UDP data socket gated by registration
//! tokens, and per-stream encode/send tasks driving the capture and
//! encoder seams. Platform capture adapters are injected by the embedder;
//! [`synthetic`] provides loopback doubles for verification.
//!
//! # Task layout
//!
//! - **accept loop**: one control task per client connection
//! - **udp loop**: registration gating on the data socket
//! - **per stream**: an encode task (capture → encoder) and a sender task
//!   (fragment → seal → burst)

mod error;
mod packet_sender;
mod streams;
pub mod synthetic;

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU16, Ordering},
    },
    time::{Instant, SystemTime},
};

pub use error::HostError;
use mirage_core::{
    EncoderConfig, StreamConfig, StreamError,
    grace::{ErrorGraceWindow, GraceDecision},
    handshake::HostHandshake,
    probe::plan_stages,
    resize::capped_even_dimensions,
    send_budget::{CaptureKind, FragmentSizing, SendBudget},
    stream_context::HostStreamContext,
    traits::{CaptureSource, VideoEncoder},
};
use mirage_crypto::{
    DeviceIdentity, MediaCipher, RegistrationToken, ReplayGuard,
    media_aead::{Direction, MediaKind, PacketContext},
};
use mirage_proto::{
    ControlPayload, EnvelopeDecoder, ProtocolError,
    audio::AudioPacketHeader,
    checksum::fragment_checksum,
    payloads::{input::InputEvent, quality::QualityTestRequest, stream::ResizeAck},
    probe::ProbePacketHeader,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
    sync::{Mutex, RwLock, mpsc},
    task::AbortHandle,
};

/// Host service configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Interface to bind (usually "0.0.0.0").
    pub bind_address: String,
    /// TCP control port.
    pub control_port: u16,
    /// UDP data port.
    pub data_port: u16,
    /// Host device identifier advertised in responses.
    pub host_id: String,
    /// Transport tuning shared by all streams.
    pub stream: StreamConfig,
    /// Default encoder configuration for new streams.
    pub encoder: EncoderConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            control_port: mirage_proto::CONTROL_PORT,
            data_port: mirage_proto::DATA_PORT,
            host_id: "mirage-host".to_string(),
            stream: StreamConfig::default(),
            encoder: EncoderConfig::default(),
        }
    }
}

/// Events surfaced to the embedding application.
#[derive(Debug)]
pub enum HostEvent {
    /// A client completed the handshake.
    ClientConnected {
        /// Session identifier.
        session_id: u64,
        /// Client device identifier.
        device_id: String,
    },
    /// A client disconnected.
    ClientDisconnected {
        /// Session identifier.
        session_id: u64,
        /// Human-readable reason.
        reason: String,
    },
    /// Client asked for the shareable window list; reply with
    /// [`MirageHost::send_control`].
    WindowListRequested {
        /// Requesting session.
        session_id: u64,
    },
    /// A control message the library does not consume internally.
    Control {
        /// Originating session.
        session_id: u64,
        /// The message.
        payload: ControlPayload,
    },
}

struct SessionHandle {
    session_id: u64,
    device_id: String,
    token: RegistrationToken,
    cipher: Arc<MediaCipher>,
    peer: Arc<RwLock<Option<SocketAddr>>>,
    control_tx: mpsc::Sender<ControlPayload>,
}

struct StreamHandle {
    session_id: u64,
    context: Arc<Mutex<HostStreamContext<Instant>>>,
    commands: mpsc::Sender<streams::StreamCommand>,
    budget: Arc<Mutex<SendBudget>>,
    aborts: Vec<AbortHandle>,
}

struct HostShared {
    identity: DeviceIdentity,
    config: HostConfig,
    socket: Arc<UdpSocket>,
    replay: Mutex<ReplayGuard>,
    sessions: RwLock<HashMap<u64, Arc<SessionHandle>>>,
    streams: RwLock<HashMap<u16, Arc<StreamHandle>>>,
    next_stream_id: AtomicU16,
    events: mpsc::Sender<HostEvent>,
    input_events: mpsc::Sender<(u64, InputEvent)>,
}

/// Handle to a running host service.
pub struct MirageHost {
    /// Events for the embedding application.
    pub events: mpsc::Receiver<HostEvent>,
    /// Input events on the dedicated low-latency queue.
    pub input_events: mpsc::Receiver<(u64, InputEvent)>,
    shared: Arc<HostShared>,
    control_addr: SocketAddr,
    data_addr: SocketAddr,
    aborts: Vec<AbortHandle>,
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Bind the host service and start accepting clients.
pub async fn bind(identity: DeviceIdentity, config: HostConfig) -> Result<MirageHost, HostError> {
    let listener = TcpListener::bind((config.bind_address.as_str(), config.control_port))
        .await
        .map_err(|e| HostError::Bind(format!("control listener: {e}")))?;
    let control_addr = listener.local_addr()?;

    let socket = UdpSocket::bind((config.bind_address.as_str(), config.data_port))
        .await
        .map_err(|e| HostError::Bind(format!("data socket: {e}")))?;
    let data_addr = socket.local_addr()?;

    let (events_tx, events_rx) = mpsc::channel(256);
    let (input_tx, input_rx) = mpsc::channel(512);

    let shared = Arc::new(HostShared {
        identity,
        config,
        socket: Arc::new(socket),
        replay: Mutex::new(ReplayGuard::default()),
        sessions: RwLock::new(HashMap::new()),
        streams: RwLock::new(HashMap::new()),
        next_stream_id: AtomicU16::new(1),
        events: events_tx,
        input_events: input_tx,
    });

    let mut aborts = Vec::with_capacity(2);

    let accept_shared = Arc::clone(&shared);
    aborts.push(
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let shared = Arc::clone(&accept_shared);
                        tokio::spawn(async move {
                            handle_connection(shared, stream, addr).await;
                        });
                    },
                    Err(err) => {
                        tracing::error!(%err, "accept failed");
                    },
                }
            }
        })
        .abort_handle(),
    );

    let udp_shared = Arc::clone(&shared);
    aborts.push(tokio::spawn(run_registration(udp_shared)).abort_handle());

    tracing::info!(%control_addr, %data_addr, "host service bound");
    Ok(MirageHost {
        events: events_rx,
        input_events: input_rx,
        shared,
        control_addr,
        data_addr,
        aborts,
    })
}

impl MirageHost {
    /// Bound control address.
    #[must_use]
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    /// Bound data address.
    #[must_use]
    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    /// Send a control message to a connected session.
    pub async fn send_control(
        &self,
        session_id: u64,
        payload: ControlPayload,
    ) -> Result<(), HostError> {
        let session = self
            .shared
            .sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(HostError::UnknownSession(session_id))?;
        session.control_tx.send(payload).await.map_err(|_| HostError::Closed)
    }

    /// Start a stream for a session with injected capture/encode adapters.
    ///
    /// Returns the allocated stream identifier. The first encoded frame is
    /// forced to be a keyframe.
    pub async fn start_stream(
        &self,
        session_id: u64,
        capture: Box<dyn CaptureSource>,
        encoder: Box<dyn VideoEncoder>,
        capture_kind: CaptureKind,
    ) -> Result<u16, HostError> {
        let session = self
            .shared
            .sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(HostError::UnknownSession(session_id))?;

        let stream_id = self.shared.next_stream_id.fetch_add(1, Ordering::Relaxed);
        if stream_id == 0 {
            return Err(StreamError::StreamIdsExhausted.into());
        }

        let encoder_config = self.shared.config.encoder;
        let sizing = FragmentSizing::new(self.shared.config.stream.max_packet_size)?;
        let context = Arc::new(Mutex::new(HostStreamContext::new(
            stream_id,
            encoder_config,
            self.shared.config.stream.stream_scale,
        )));
        let budget = Arc::new(Mutex::new(SendBudget::new(
            encoder_config.width,
            encoder_config.height,
            encoder_config.target_frame_rate,
        )));

        let (frames_tx, frames_rx) = mpsc::channel(4);
        let (commands_tx, commands_rx) = mpsc::channel(16);

        let mut aborts = Vec::with_capacity(2);
        aborts.push(
            tokio::spawn(packet_sender::run_sender(
                packet_sender::SenderTask {
                    socket: Arc::clone(&self.shared.socket),
                    peer: Arc::clone(&session.peer),
                    cipher: Arc::clone(&session.cipher),
                    stream_id,
                    sizing,
                    budget: Arc::clone(&budget),
                    context: Arc::clone(&context),
                },
                frames_rx,
            ))
            .abort_handle(),
        );
        aborts.push(
            tokio::spawn(streams::run_encode(streams::EncodeTask {
                capture,
                encoder,
                capture_kind,
                context: Arc::clone(&context),
                budget: Arc::clone(&budget),
                frames: frames_tx,
                directives: commands_rx,
            }))
            .abort_handle(),
        );

        self.shared.streams.write().await.insert(
            stream_id,
            Arc::new(StreamHandle {
                session_id,
                context,
                commands: commands_tx,
                budget,
                aborts,
            }),
        );
        tracing::info!(session_id, stream_id, "stream started");
        Ok(stream_id)
    }

    /// Stop a stream and cancel its tasks.
    pub async fn stop_stream(&self, stream_id: u16) -> Result<(), HostError> {
        let Some(stream) = self.shared.streams.write().await.remove(&stream_id) else {
            return Err(StreamError::UnknownStream(stream_id).into());
        };
        for abort in &stream.aborts {
            abort.abort();
        }
        tracing::info!(stream_id, "stream stopped");
        Ok(())
    }

    /// Seal and send one audio packet to a session's registered endpoint.
    pub async fn send_audio(
        &self,
        session_id: u64,
        header: AudioPacketHeader,
        payload: &[u8],
    ) -> Result<(), HostError> {
        let session = self
            .shared
            .sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(HostError::UnknownSession(session_id))?;
        let Some(peer) = *session.peer.read().await else {
            return Err(HostError::Transport("peer not registered".to_string()));
        };

        let mut header = header;
        header.set_payload_length(payload.len() as u32);
        header.set_checksum(fragment_checksum(payload));

        let ctx = PacketContext {
            kind: MediaKind::Audio,
            epoch: 0,
            stream_id: header.stream_id(),
            sequence: header.sequence_number(),
            fragment_index: header.fragment_index(),
        };
        let sealed = session.cipher.seal(&ctx, payload);

        let mut datagram = Vec::with_capacity(AudioPacketHeader::SIZE + sealed.len());
        datagram.extend_from_slice(&header.to_bytes());
        datagram.extend_from_slice(&sealed);
        self.shared.socket.send_to(&datagram, peer).await?;
        Ok(())
    }

    /// Abort every service task.
    pub fn stop(&self) {
        for abort in &self.aborts {
            abort.abort();
        }
    }
}

/// UDP loop: gate media by registration before any peer is trusted.
async fn run_registration(shared: Arc<HostShared>) {
    let mut buf = vec![0u8; 2048];
    loop {
        let (len, addr) = match shared.socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                tracing::warn!(%err, "data socket receive failed");
                continue;
            },
        };
        let datagram = &buf[..len];

        if datagram.len() == mirage_proto::REGISTRATION_TOKEN_LEN {
            register_by_token(&shared, datagram, addr).await;
        } else if datagram.len() == 20
            && datagram[..4] == mirage_proto::REGISTRATION_MAGIC.to_be_bytes()
        {
            register_by_device_id(&shared, &datagram[4..20], addr).await;
        } else {
            // Media from unregistered peers is dropped silently; clients do
            // not send media in this revision.
            tracing::trace!(%addr, len, "ignoring datagram on data port");
        }
    }
}

async fn register_by_token(shared: &Arc<HostShared>, token: &[u8], addr: SocketAddr) {
    let sessions = shared.sessions.read().await;
    for session in sessions.values() {
        if session.token.matches(token) {
            *session.peer.write().await = Some(addr);
            tracing::info!(session_id = session.session_id, %addr, "udp endpoint registered");
            return;
        }
    }
    tracing::debug!(%addr, "registration token matched no session");
}

/// Legacy registration: `magic || deviceID(16)`, where the 16 bytes are the
/// hex-decoded device UUID.
async fn register_by_device_id(shared: &Arc<HostShared>, raw_id: &[u8], addr: SocketAddr) {
    let sessions = shared.sessions.read().await;
    for session in sessions.values() {
        let hex_id: String =
            session.device_id.chars().filter(char::is_ascii_hexdigit).collect();
        if hex::decode(hex_id).is_ok_and(|bytes| bytes == raw_id) {
            *session.peer.write().await = Some(addr);
            tracing::info!(session_id = session.session_id, %addr, "legacy udp registration");
            return;
        }
    }
}

/// One control connection: handshake, then dispatch until disconnect.
async fn handle_connection(shared: Arc<HostShared>, stream: TcpStream, addr: SocketAddr) {
    stream.set_nodelay(true).ok();
    let (mut reader, mut writer) = stream.into_split();

    let (control_tx, mut control_rx) = mpsc::channel::<ControlPayload>(64);
    let writer_task = tokio::spawn(async move {
        while let Some(payload) = control_rx.recv().await {
            let Ok(envelope) = payload.into_envelope() else { continue };
            let mut wire = Vec::with_capacity(envelope.encoded_len());
            if envelope.encode(&mut wire).is_err() {
                continue;
            }
            if writer.write_all(&wire).await.is_err() {
                break;
            }
        }
    });

    let mut decoder = EnvelopeDecoder::new();
    let mut grace: ErrorGraceWindow<Instant> = ErrorGraceWindow::default();
    let mut handshake = HostHandshake::new(shared.identity.clone(), shared.config.host_id.clone());
    let mut session: Option<Arc<SessionHandle>> = None;
    let mut buf = vec![0u8; 16 * 1024];

    let reason = loop {
        let len = match reader.read(&mut buf).await {
            Ok(0) => break "peer closed control channel".to_string(),
            Ok(len) => {
                grace.on_success();
                len
            },
            Err(err) if is_transient(&err) => {
                match grace.on_transient_error(Instant::now()) {
                    GraceDecision::Tolerate => continue,
                    GraceDecision::Disconnect => {
                        break format!("control errors exceeded grace window: {err}");
                    },
                }
            },
            Err(err) => break format!("control read failed: {err}"),
        };

        decoder.extend(&buf[..len]);
        let mut disconnect = None;
        loop {
            match decoder.next_envelope() {
                Ok(None) => break,
                Ok(Some(envelope)) => match ControlPayload::from_envelope(&envelope) {
                    Ok(payload) => {
                        match dispatch(
                            &shared,
                            &mut handshake,
                            &mut session,
                            &control_tx,
                            payload,
                        )
                        .await
                        {
                            Ok(()) => {},
                            Err(reason) => {
                                disconnect = Some(reason);
                                break;
                            },
                        }
                    },
                    Err(ProtocolError::UnknownType(raw)) => {
                        tracing::debug!(message_type = raw, "skipping unknown control message");
                    },
                    Err(err) => {
                        tracing::warn!(%err, %addr, "undecodable control payload");
                    },
                },
                Err(err) => {
                    disconnect = Some(format!("control framing error: {err}"));
                    break;
                },
            }
        }
        if let Some(reason) = disconnect {
            break reason;
        }
    };

    writer_task.abort();
    if let Some(session) = session {
        teardown_session(&shared, &session, &reason).await;
    }
    tracing::debug!(%addr, reason, "control connection closed");
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::TimedOut
    )
}

/// Handle one decoded control message. `Err` carries a disconnect reason.
async fn dispatch(
    shared: &Arc<HostShared>,
    handshake: &mut HostHandshake,
    session: &mut Option<Arc<SessionHandle>>,
    control_tx: &mpsc::Sender<ControlPayload>,
    payload: ControlPayload,
) -> Result<(), String> {
    // Pre-handshake, only Hello is legal.
    let Some(active) = session.clone() else {
        return match payload {
            ControlPayload::Hello(hello) => {
                accept_hello(shared, handshake, session, control_tx, &hello).await
            },
            other => Err(format!(
                "message {:?} before handshake",
                other.message_type()
            )),
        };
    };

    match payload {
        ControlPayload::Hello(_) => {
            // Duplicate or out-of-order handshake attempts are fatal.
            return Err("duplicate hello on established connection".to_string());
        },
        ControlPayload::Ping => {
            let _ = control_tx.send(ControlPayload::Pong).await;
        },
        ControlPayload::Pong => {},
        ControlPayload::InputEvent(event) => {
            // Dedicated low-latency queue; never the coordination path.
            let _ = shared.input_events.send((active.session_id, event)).await;
        },
        ControlPayload::KeyframeRequest(request) => {
            handle_keyframe_request(shared, &active, request.stream_id).await;
        },
        ControlPayload::ResizeRequest(request) => {
            handle_resize(shared, &active, control_tx, request).await;
        },
        ControlPayload::EncoderSettingsChange(change) => {
            handle_settings_change(shared, &active, change).await;
        },
        ControlPayload::QualityTestRequest(request) => {
            let shared = Arc::clone(shared);
            let peer = Arc::clone(&active.peer);
            tokio::spawn(async move {
                run_probe(shared, peer, request).await;
            });
        },
        ControlPayload::WindowListRequest(_) => {
            let _ = shared
                .events
                .send(HostEvent::WindowListRequested { session_id: active.session_id })
                .await;
        },
        ControlPayload::Goodbye(goodbye) => {
            return Err(format!("client goodbye: {}", goodbye.reason));
        },
        other => {
            let _ = shared
                .events
                .send(HostEvent::Control { session_id: active.session_id, payload: other })
                .await;
        },
    }
    Ok(())
}

async fn accept_hello(
    shared: &Arc<HostShared>,
    handshake: &mut HostHandshake,
    session: &mut Option<Arc<SessionHandle>>,
    control_tx: &mpsc::Sender<ControlPayload>,
    hello: &mirage_proto::payloads::session::HelloV2,
) -> Result<(), String> {
    let accepted = {
        let mut replay = shared.replay.lock().await;
        handshake.handle_hello(hello, &mut replay, unix_millis())
    };
    let accepted = match accepted {
        Ok(accepted) => accepted,
        Err(err) => {
            // The client gets a signed rejection where one can be built;
            // the connection dies either way.
            if let Ok(rejection) = handshake.reject(
                hello,
                mirage_core::handshake::REASON_UNSUPPORTED_VERSION,
                unix_millis(),
            ) {
                let _ = control_tx.send(ControlPayload::HelloResponse(rejection)).await;
            }
            return Err(format!("handshake failed: {err}"));
        },
    };

    let session_id = rand::random::<u64>();
    let cipher = Arc::new(MediaCipher::new(
        &accepted.session.session_key,
        Direction::HostToClient,
    ));
    let handle = Arc::new(SessionHandle {
        session_id,
        device_id: hello.device_id.clone(),
        token: accepted.session.registration_token.clone(),
        cipher,
        peer: Arc::new(RwLock::new(None)),
        control_tx: control_tx.clone(),
    });

    shared.sessions.write().await.insert(session_id, Arc::clone(&handle));
    *session = Some(handle);

    let _ = control_tx.send(ControlPayload::HelloResponse(accepted.response)).await;
    let _ = shared
        .events
        .send(HostEvent::ClientConnected { session_id, device_id: hello.device_id.clone() })
        .await;
    tracing::info!(session_id, device = %hello.device_id, "client connected");
    Ok(())
}

async fn handle_keyframe_request(
    shared: &Arc<HostShared>,
    session: &Arc<SessionHandle>,
    stream_id: u16,
) {
    let Some(stream) = shared.streams.read().await.get(&stream_id).cloned() else {
        tracing::debug!(stream_id, "keyframe request for unknown stream");
        return;
    };
    if stream.session_id != session.session_id {
        tracing::warn!(stream_id, "keyframe request from foreign session");
        return;
    }

    let directive = stream.context.lock().await.request_keyframe(Instant::now());
    if let Some(directive) = directive {
        tracing::debug!(stream_id, mode = ?directive.mode, "keyframe recovery");
        let _ = stream.commands.send(streams::StreamCommand::Encode(directive.encode)).await;
    }
}

async fn handle_resize(
    shared: &Arc<HostShared>,
    session: &Arc<SessionHandle>,
    control_tx: &mpsc::Sender<ControlPayload>,
    request: mirage_proto::payloads::stream::ResizeRequest,
) {
    let Some(stream) = shared.streams.read().await.get(&request.stream_id).cloned() else {
        return;
    };
    if stream.session_id != session.session_id {
        return;
    }

    // Server-side re-validation of the client's geometry.
    let (width, height) = capped_even_dimensions(request.pixel_width, request.pixel_height);
    {
        let mut context = stream.context.lock().await;
        let mut config = *context.config();
        config.width = width;
        config.height = height;
        context.set_config(config);
        context.set_dimension_token(request.dimension_token);
        let _ = stream.commands.send(streams::StreamCommand::Reconfigure(config)).await;
        // New parameter sets are needed at the new geometry.
        if let Some(directive) = context.request_keyframe(Instant::now()) {
            let _ = stream.commands.send(streams::StreamCommand::Encode(directive.encode)).await;
        }
        stream
            .budget
            .lock()
            .await
            .reconfigure(width, height, config.target_frame_rate);
    }

    let _ = control_tx
        .send(ControlPayload::ResizeAck(ResizeAck {
            stream_id: request.stream_id,
            dimension_token: request.dimension_token,
        }))
        .await;
    tracing::debug!(stream = request.stream_id, width, height, "resize applied");
}

async fn handle_settings_change(
    shared: &Arc<HostShared>,
    session: &Arc<SessionHandle>,
    change: mirage_proto::payloads::stream::EncoderSettingsChange,
) {
    let Some(stream) = shared.streams.read().await.get(&change.stream_id).cloned() else {
        return;
    };
    if stream.session_id != session.session_id {
        return;
    }

    let mut context = stream.context.lock().await;
    let mut config = *context.config();
    config.bitrate_bps = change.bitrate_bps;
    config.target_frame_rate = change.target_frame_rate;
    config.pixel_format = change.pixel_format;
    config.color_space = change.color_space;
    config.keyframe_interval = change.keyframe_interval;
    config.latency_mode = change.latency_mode;
    config.quality_mode = change.quality_mode;
    context.set_config(config);
    let _ = stream.commands.send(streams::StreamCommand::Reconfigure(config)).await;
    stream
        .budget
        .lock()
        .await
        .reconfigure(config.width, config.height, config.target_frame_rate);
    tracing::info!(stream = change.stream_id, bitrate = change.bitrate_bps, "settings changed");
}

/// Emit probe datagrams at each stage's target rate.
async fn run_probe(
    shared: Arc<HostShared>,
    peer: Arc<RwLock<Option<SocketAddr>>>,
    request: QualityTestRequest,
) {
    let Some(peer) = *peer.read().await else {
        tracing::debug!(test = request.test_id, "probe requested before registration");
        return;
    };

    let started = Instant::now();
    let filler = vec![0u8; request.payload_size as usize];
    for plan in plan_stages(&request) {
        for seq in 0..plan.datagram_count {
            let mut header = ProbePacketHeader::new(
                request.test_id,
                plan.stage.id,
                seq as u32,
                request.payload_size,
            );
            header.set_timestamp_ns(started.elapsed().as_nanos() as u64);

            let mut datagram =
                Vec::with_capacity(ProbePacketHeader::SIZE + filler.len());
            datagram.extend_from_slice(&header.to_bytes());
            datagram.extend_from_slice(&filler);
            if shared.socket.send_to(&datagram, peer).await.is_err() {
                return;
            }
            tokio::time::sleep(plan.interval).await;
        }
    }
    tracing::debug!(test = request.test_id, "probe emission complete");
}

/// Tear down a session: cancel its streams, free its entry, notify.
async fn teardown_session(shared: &Arc<HostShared>, session: &Arc<SessionHandle>, reason: &str) {
    shared.sessions.write().await.remove(&session.session_id);

    let mut streams = shared.streams.write().await;
    let owned: Vec<u16> = streams
        .iter()
        .filter(|(_, stream)| stream.session_id == session.session_id)
        .map(|(&id, _)| id)
        .collect();
    for stream_id in owned {
        if let Some(stream) = streams.remove(&stream_id) {
            for abort in &stream.aborts {
                abort.abort();
            }
        }
    }
    drop(streams);

    let _ = shared
        .events
        .send(HostEvent::ClientDisconnected {
            session_id: session.session_id,
            reason: reason.to_string(),
        })
        .await;
    tracing::info!(session_id = session.session_id, reason, "session torn down");
}
