//! Mirage streaming client.
//!
//! Production glue around [`mirage_core`]'s pure state machines: a TCP
//! control connection carrying framed envelopes, a UDP socket receiving
//! sealed media, and a coordination task that owns the per-stream
//! controllers and resize pipelines. The embedding application consumes
//! [`ClientEvent`]s and drives decoders; this crate never touches a
//! platform framework.
//!
//! # Task layout
//!
//! - **control reader**: envelope extraction → coordination
//! - **control writer**: input fast path + general control queue
//! - **udp receiver**: demux → decrypt → reassemble → coordination
//! - **coordination**: controllers, resize, probe accumulation, keepalive

mod control;
mod error;
mod event;
mod media;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

pub use error::ClientError;
pub use event::ClientEvent;
use mirage_core::{
    StreamConfig,
    handshake::{ClientHandshake, DeviceMetadata, HANDSHAKE_TIMEOUT, SessionEstablished},
    probe::ProbeAccumulator,
    reassembler::{AssembledFrame, ReassemblerConfig},
    resize::{LayoutInput, ResizePipeline},
    stream_controller::{ControllerAction, StreamController},
};
use mirage_crypto::{DeviceIdentity, MediaCipher, media_aead::Direction};
use mirage_proto::{
    ControlPayload, EnvelopeDecoder,
    audio::AudioCodec,
    payloads::{
        input::InputEvent,
        quality::QualityTestRequest,
        stream::KeyframeRequest,
    },
    probe::ProbePacketHeader,
};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpStream, UdpSocket},
    sync::{RwLock, mpsc},
    task::AbortHandle,
};

/// Keepalive cadence on the control channel.
const PING_INTERVAL: Duration = Duration::from_secs(1);

/// Pong deadline after a ping; missing it degrades stream health.
const PONG_TIMEOUT: Duration = Duration::from_secs(1);

/// Client connection configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host address (IP or name).
    pub host: String,
    /// TCP control port.
    pub control_port: u16,
    /// UDP data port.
    pub data_port: u16,
    /// Identity fields advertised in the hello.
    pub metadata: DeviceMetadata,
    /// Transport tuning.
    pub stream: StreamConfig,
}

impl ClientConfig {
    /// Config for a host at the default ports.
    #[must_use]
    pub fn for_host(host: impl Into<String>, metadata: DeviceMetadata) -> Self {
        Self {
            host: host.into(),
            control_port: mirage_proto::CONTROL_PORT,
            data_port: mirage_proto::DATA_PORT,
            metadata,
            stream: StreamConfig::default(),
        }
    }
}

/// Application-issued commands into the coordination task.
#[derive(Debug)]
pub enum ClientCommand {
    /// Send a control message to the host.
    SendControl(ControlPayload),
    /// The decoder reported a fault for a stream.
    DecoderFault {
        /// Affected stream.
        stream_id: u16,
    },
    /// The renderer reported new drawable geometry.
    Layout {
        /// Affected stream.
        stream_id: u16,
        /// Reported geometry.
        layout: LayoutInput,
    },
    /// Evaluate a finished quality test and report it to the host.
    EvaluateProbe {
        /// The request whose stages define the evaluation.
        request: QualityTestRequest,
    },
    /// Send a goodbye and shut the session down.
    Disconnect,
}

/// Messages into the coordination task from the I/O tasks.
#[derive(Debug)]
pub(crate) enum CoordMsg {
    ControlIn(ControlPayload),
    Assembled(AssembledFrame),
    ReassemblyStalled { stream_id: u16 },
    Audio { stream_id: u16, codec: Option<AudioCodec>, timestamp_ns: u64, payload: Vec<u8> },
    Probe(ProbePacketHeader),
    Command(ClientCommand),
    ReaderDied { reason: String },
}

/// Handle to a connected client session.
pub struct MirageClient {
    /// Events for the embedding application.
    pub events: mpsc::Receiver<ClientEvent>,
    commands: mpsc::Sender<CoordMsg>,
    input: mpsc::Sender<InputEvent>,
    aborts: Vec<AbortHandle>,
}

impl MirageClient {
    /// Send a control message to the host.
    pub async fn send_control(&self, payload: ControlPayload) -> Result<(), ClientError> {
        self.command(ClientCommand::SendControl(payload)).await
    }

    /// Send an input event on the low-latency path.
    ///
    /// Input for blocked streams is dropped by the writer, not here.
    pub async fn send_input(&self, event: InputEvent) -> Result<(), ClientError> {
        self.input.send(event).await.map_err(|_| ClientError::Closed)
    }

    /// Report a decoder fault; starts the keyframe recovery loop.
    pub async fn report_decoder_fault(&self, stream_id: u16) -> Result<(), ClientError> {
        self.command(ClientCommand::DecoderFault { stream_id }).await
    }

    /// Report renderer layout; may publish a resize to the host.
    pub async fn report_layout(
        &self,
        stream_id: u16,
        layout: LayoutInput,
    ) -> Result<(), ClientError> {
        self.command(ClientCommand::Layout { stream_id, layout }).await
    }

    /// Evaluate a completed probe and send the result to the host.
    pub async fn evaluate_probe(&self, request: QualityTestRequest) -> Result<(), ClientError> {
        self.command(ClientCommand::EvaluateProbe { request }).await
    }

    /// Graceful disconnect.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.command(ClientCommand::Disconnect).await
    }

    /// Abort every session task.
    pub fn stop(&self) {
        for abort in &self.aborts {
            abort.abort();
        }
    }

    async fn command(&self, command: ClientCommand) -> Result<(), ClientError> {
        self.commands.send(CoordMsg::Command(command)).await.map_err(|_| ClientError::Closed)
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Connect to a host: signed handshake, UDP registration, task spawn.
pub async fn connect(
    identity: DeviceIdentity,
    config: ClientConfig,
) -> Result<MirageClient, ClientError> {
    let control_addr = format!("{}:{}", config.host, config.control_port);
    let mut stream = TcpStream::connect(&control_addr)
        .await
        .map_err(|e| ClientError::Connect(format!("control connect failed: {e}")))?;
    stream.set_nodelay(true).ok();

    // Signed hello exchange.
    let mut handshake: ClientHandshake<Instant> =
        ClientHandshake::new(identity, config.metadata.clone());
    let hello = handshake.start(Instant::now(), unix_millis())?;
    let envelope = ControlPayload::Hello(hello).into_envelope()?;
    let mut wire = Vec::with_capacity(envelope.encoded_len());
    envelope.encode(&mut wire)?;
    stream.write_all(&wire).await?;

    let session = await_hello_response(&mut stream, &mut handshake).await?;
    tracing::info!(host = %session.peer_id, "handshake complete");

    // UDP registration: prove our endpoint with the session token.
    let udp = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| ClientError::Connect(format!("udp bind failed: {e}")))?;
    udp.connect(format!("{}:{}", config.host, config.data_port))
        .await
        .map_err(|e| ClientError::Connect(format!("udp connect failed: {e}")))?;
    udp.send(session.registration_token.as_bytes()).await?;

    let receive_cipher = MediaCipher::new(&session.session_key, Direction::HostToClient);

    // Channels and shared state.
    let (events_tx, events_rx) = mpsc::channel::<ClientEvent>(256);
    let (coord_tx, coord_rx) = mpsc::channel::<CoordMsg>(256);
    let (control_out_tx, control_out_rx) = mpsc::channel::<ControlPayload>(64);
    let (input_tx, input_rx) = mpsc::channel::<InputEvent>(256);
    let (media_cmd_tx, media_cmd_rx) = mpsc::channel::<media::MediaCommand>(16);
    let blocked_streams = Arc::new(RwLock::new(HashSet::new()));

    let (read_half, write_half) = stream.into_split();

    let mut aborts = Vec::with_capacity(4);
    aborts.push(
        tokio::spawn(control::run_writer(
            write_half,
            control_out_rx,
            input_rx,
            Arc::clone(&blocked_streams),
        ))
        .abort_handle(),
    );

    let reader_coord = coord_tx.clone();
    aborts.push(
        tokio::spawn(async move {
            let reason = control::run_reader(read_half, reader_coord.clone()).await;
            let _ = reader_coord.send(CoordMsg::ReaderDied { reason }).await;
        })
        .abort_handle(),
    );

    aborts.push(
        tokio::spawn(media::run_receiver(
            udp,
            receive_cipher,
            ReassemblerConfig::from(&config.stream),
            media_cmd_rx,
            coord_tx.clone(),
        ))
        .abort_handle(),
    );

    aborts.push(
        tokio::spawn(run_coordination(Coordination {
            rx: coord_rx,
            events: events_tx,
            control_out: control_out_tx,
            media_commands: media_cmd_tx,
            blocked_streams,
            recovery_interval: config.stream.keyframe_timeout,
        }))
        .abort_handle(),
    );

    Ok(MirageClient { events: events_rx, commands: coord_tx, input: input_tx, aborts })
}

/// Read envelopes until the hello response arrives or the deadline passes.
async fn await_hello_response(
    stream: &mut TcpStream,
    handshake: &mut ClientHandshake<Instant>,
) -> Result<SessionEstablished, ClientError> {
    use tokio::io::AsyncReadExt;

    let mut decoder = EnvelopeDecoder::new();
    let mut buf = vec![0u8; 16 * 1024];

    let result = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        loop {
            let len = stream.read(&mut buf).await?;
            if len == 0 {
                return Err(ClientError::Connect("host closed during handshake".to_string()));
            }
            decoder.extend(&buf[..len]);
            while let Some(envelope) = decoder.next_envelope().map_err(ClientError::from)? {
                match ControlPayload::from_envelope(&envelope) {
                    Ok(ControlPayload::HelloResponse(response)) => {
                        return Ok(handshake.handle_response(&response)?);
                    },
                    Ok(other) => {
                        tracing::debug!(?other, "ignoring pre-handshake message");
                    },
                    Err(err) => {
                        tracing::debug!(%err, "undecodable pre-handshake envelope");
                    },
                }
            }
        }
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(_) => Err(ClientError::Handshake(mirage_core::HandshakeError::Timeout {
            elapsed: HANDSHAKE_TIMEOUT,
        })),
    }
}

struct Coordination {
    rx: mpsc::Receiver<CoordMsg>,
    events: mpsc::Sender<ClientEvent>,
    control_out: mpsc::Sender<ControlPayload>,
    media_commands: mpsc::Sender<media::MediaCommand>,
    blocked_streams: Arc<RwLock<HashSet<u16>>>,
    recovery_interval: Duration,
}

/// Main coordination loop: owns controllers, resize pipelines, and probe
/// accumulators; multiplexes I/O notifications, app commands, and timers.
async fn run_coordination(mut coord: Coordination) {
    let mut controllers: HashMap<u16, StreamController<Instant>> = HashMap::new();
    let mut resize: HashMap<u16, ResizePipeline<Instant>> = HashMap::new();
    let mut accumulators: HashMap<u32, ProbeAccumulator> = HashMap::new();
    let mut stall_requests: HashMap<u16, Instant> = HashMap::new();

    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let mut last_ping = Instant::now();
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            message = coord.rx.recv() => {
                let Some(message) = message else { break };
                match message {
                    CoordMsg::Assembled(frame) => {
                        let stream_id = frame.stream_id;
                        let controller = controller_for(&mut controllers, stream_id, coord.recovery_interval);
                        let actions = controller.on_frame_assembled(frame, Instant::now());
                        execute_actions(&coord, stream_id, actions).await;
                    },
                    CoordMsg::ReassemblyStalled { stream_id } => {
                        // Too many incomplete frames: ask for a keyframe, at
                        // most once per recovery interval.
                        let now = Instant::now();
                        let due = stall_requests
                            .get(&stream_id)
                            .is_none_or(|last| now.duration_since(*last) >= coord.recovery_interval);
                        if due {
                            stall_requests.insert(stream_id, now);
                            let _ = coord
                                .control_out
                                .send(ControlPayload::KeyframeRequest(KeyframeRequest { stream_id }))
                                .await;
                        }
                    },
                    CoordMsg::Audio { stream_id, codec, timestamp_ns, payload } => {
                        let _ = coord
                            .events
                            .send(ClientEvent::AudioPacket { stream_id, codec, timestamp_ns, payload })
                            .await;
                    },
                    CoordMsg::Probe(header) => {
                        accumulators
                            .entry(header.test_id())
                            .or_insert_with(|| ProbeAccumulator::new(header.test_id()))
                            .record(&header);
                    },
                    CoordMsg::ControlIn(payload) => {
                        if handle_control_in(
                            &coord,
                            &mut controllers,
                            &mut resize,
                            &mut last_pong,
                            payload,
                        )
                        .await
                        .is_break()
                        {
                            break;
                        }
                    },
                    CoordMsg::Command(command) => {
                        if handle_command(
                            &coord,
                            &mut controllers,
                            &mut resize,
                            &mut accumulators,
                            command,
                        )
                        .await
                        .is_break()
                        {
                            break;
                        }
                    },
                    CoordMsg::ReaderDied { reason } => {
                        for (stream_id, controller) in &mut controllers {
                            let actions = controller.on_transport_lost();
                            execute_actions(&coord, *stream_id, actions).await;
                        }
                        let _ = coord.events.send(ClientEvent::Disconnected { reason }).await;
                        break;
                    },
                }
            },
            _ = ticker.tick() => {
                let now = Instant::now();

                if now.duration_since(last_ping) >= PING_INTERVAL {
                    last_ping = now;
                    let _ = coord.control_out.send(ControlPayload::Ping).await;
                }
                if now.duration_since(last_pong) > PING_INTERVAL + PONG_TIMEOUT {
                    for (stream_id, controller) in &mut controllers {
                        let actions = controller.on_pong_timeout();
                        execute_actions(&coord, *stream_id, actions).await;
                    }
                }

                for (stream_id, controller) in &mut controllers {
                    let actions = controller.tick(now);
                    execute_actions(&coord, *stream_id, actions).await;
                }
                for pipeline in resize.values_mut() {
                    pipeline.tick(now);
                }
            },
        }
    }
    tracing::debug!("coordination task exiting");
}

fn controller_for<'a>(
    controllers: &'a mut HashMap<u16, StreamController<Instant>>,
    stream_id: u16,
    recovery_interval: Duration,
) -> &'a mut StreamController<Instant> {
    controllers
        .entry(stream_id)
        .or_insert_with(|| StreamController::new(stream_id, recovery_interval))
}

async fn handle_control_in(
    coord: &Coordination,
    controllers: &mut HashMap<u16, StreamController<Instant>>,
    resize: &mut HashMap<u16, ResizePipeline<Instant>>,
    last_pong: &mut Instant,
    payload: ControlPayload,
) -> std::ops::ControlFlow<()> {
    match payload {
        ControlPayload::Ping => {
            let _ = coord.control_out.send(ControlPayload::Pong).await;
        },
        ControlPayload::Pong => {
            *last_pong = Instant::now();
            for (stream_id, controller) in controllers.iter_mut() {
                let actions = controller.on_pong_ok();
                execute_actions(coord, *stream_id, actions).await;
            }
        },
        ControlPayload::ResizeAck(ack) => {
            if let Some(pipeline) = resize.get_mut(&ack.stream_id) {
                pipeline.on_ack(ack.dimension_token);
            }
        },
        ControlPayload::Goodbye(goodbye) => {
            let _ = coord
                .events
                .send(ClientEvent::Disconnected { reason: goodbye.reason })
                .await;
            return std::ops::ControlFlow::Break(());
        },
        ControlPayload::Hello(_) | ControlPayload::HelloResponse(_) => {
            tracing::warn!("handshake message after establishment, ignoring");
        },
        other => {
            let _ = coord.events.send(ClientEvent::Control(other)).await;
        },
    }
    std::ops::ControlFlow::Continue(())
}

async fn handle_command(
    coord: &Coordination,
    controllers: &mut HashMap<u16, StreamController<Instant>>,
    resize: &mut HashMap<u16, ResizePipeline<Instant>>,
    accumulators: &mut HashMap<u32, ProbeAccumulator>,
    command: ClientCommand,
) -> std::ops::ControlFlow<()> {
    match command {
        ClientCommand::SendControl(payload) => {
            if let ControlPayload::QualityTestRequest(request) = &payload {
                accumulators.insert(request.test_id, ProbeAccumulator::new(request.test_id));
            }
            let _ = coord.control_out.send(payload).await;
        },
        ClientCommand::DecoderFault { stream_id } => {
            let controller = controller_for(controllers, stream_id, coord.recovery_interval);
            let actions = controller.on_decoder_fault(Instant::now());
            execute_actions(coord, stream_id, actions).await;
        },
        ClientCommand::Layout { stream_id, layout } => {
            let pipeline = resize.entry(stream_id).or_insert_with(|| {
                ResizePipeline::new(stream_id, Duration::from_secs(3))
            });
            if let Some(request) = pipeline.on_layout(layout, Instant::now()) {
                let _ = coord.control_out.send(ControlPayload::ResizeRequest(request)).await;
            }
        },
        ClientCommand::EvaluateProbe { request } => {
            let accumulator = accumulators
                .remove(&request.test_id)
                .unwrap_or_else(|| ProbeAccumulator::new(request.test_id));
            let result = accumulator.evaluate(&request, None);
            let _ = coord
                .events
                .send(ClientEvent::Control(ControlPayload::QualityTestResult(result.clone())))
                .await;
            let _ = coord
                .control_out
                .send(ControlPayload::QualityTestResult(result))
                .await;
        },
        ClientCommand::Disconnect => {
            let _ = coord
                .control_out
                .send(ControlPayload::Goodbye(mirage_proto::payloads::session::Goodbye {
                    reason: "client disconnect".to_string(),
                }))
                .await;
            let _ = coord
                .events
                .send(ClientEvent::Disconnected { reason: "client disconnect".to_string() })
                .await;
            return std::ops::ControlFlow::Break(());
        },
    }
    std::ops::ControlFlow::Continue(())
}

/// Execute controller actions against the session's channels and shared
/// state.
async fn execute_actions(
    coord: &Coordination,
    stream_id: u16,
    actions: Vec<ControllerAction>,
) {
    for action in actions {
        match action {
            ControllerAction::ForwardToDecoder(frame) => {
                let _ = coord.events.send(ClientEvent::FrameAssembled(frame)).await;
            },
            ControllerAction::RequestKeyframe => {
                let _ = coord
                    .control_out
                    .send(ControlPayload::KeyframeRequest(KeyframeRequest { stream_id }))
                    .await;
            },
            ControllerAction::EnterKeyframeOnlyMode => {
                let _ = coord
                    .media_commands
                    .send(media::MediaCommand::EnterKeyframeOnlyMode { stream_id })
                    .await;
            },
            ControllerAction::BlockInput => {
                coord.blocked_streams.write().await.insert(stream_id);
                let _ = coord
                    .events
                    .send(ClientEvent::InputBlockChanged { stream_id, blocked: true })
                    .await;
            },
            ControllerAction::UnblockInput => {
                coord.blocked_streams.write().await.remove(&stream_id);
                let _ = coord
                    .events
                    .send(ClientEvent::InputBlockChanged { stream_id, blocked: false })
                    .await;
            },
            ControllerAction::PublishHealth(health) => {
                let _ = coord
                    .events
                    .send(ClientEvent::HealthChanged { stream_id, health })
                    .await;
            },
        }
    }
}
