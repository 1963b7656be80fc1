//! Host binary for loopback verification.
//!
//! Accepts clients, answers window-list requests with a canned entry, and
//! starts a synthetic-pattern stream for every connected session. Real
//! deployments embed the library and inject platform capture adapters.

use clap::Parser;
use mirage_core::send_budget::CaptureKind;
use mirage_crypto::DeviceIdentity;
use mirage_host::{
    HostConfig, HostEvent,
    synthetic::{PassthroughEncoder, SyntheticCapture},
};
use mirage_proto::{
    ControlPayload,
    payloads::stream::{WindowInfo, WindowList},
};

#[derive(Parser, Debug)]
#[command(name = "mirage-host", about = "Mirage streaming host")]
struct Args {
    /// Interface to bind.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// TCP control port.
    #[arg(long, default_value_t = mirage_proto::CONTROL_PORT)]
    control_port: u16,

    /// UDP data port.
    #[arg(long, default_value_t = mirage_proto::DATA_PORT)]
    data_port: u16,

    /// Host identifier advertised to clients.
    #[arg(long, default_value = "mirage-host")]
    host_id: String,

    /// Synthetic stream frame rate.
    #[arg(long, default_value_t = 60)]
    frame_rate: u32,
}

#[tokio::main]
async fn main() -> Result<(), mirage_host::HostError> {
    // MIRAGE_SIGNPOST=1 turns on trace-level instrumentation.
    let default_filter = if std::env::var("MIRAGE_SIGNPOST").is_ok_and(|v| v == "1") {
        "trace"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let args = Args::parse();
    let identity = DeviceIdentity::generate();
    tracing::info!(key_id = %identity.key_id(), "host identity");

    let config = HostConfig {
        bind_address: args.bind,
        control_port: args.control_port,
        data_port: args.data_port,
        host_id: args.host_id,
        ..HostConfig::default()
    };
    let encoder_config = config.encoder;
    let mut host = mirage_host::bind(identity, config).await?;

    loop {
        let Some(event) = host.events.recv().await else { break };
        match event {
            HostEvent::ClientConnected { session_id, device_id } => {
                tracing::info!(session_id, device = %device_id, "starting synthetic stream");
                let capture = Box::new(SyntheticCapture::new(
                    encoder_config.width,
                    encoder_config.height,
                    args.frame_rate,
                ));
                let encoder = Box::new(PassthroughEncoder::new());
                if let Err(err) = host
                    .start_stream(session_id, capture, encoder, CaptureKind::Display)
                    .await
                {
                    tracing::error!(%err, session_id, "stream start failed");
                }
            },
            HostEvent::WindowListRequested { session_id } => {
                let list = WindowList {
                    windows: vec![WindowInfo {
                        window_id: 1,
                        title: "Synthetic Pattern".to_string(),
                        app_name: "mirage-host".to_string(),
                        width: encoder_config.width,
                        height: encoder_config.height,
                    }],
                };
                let _ = host.send_control(session_id, ControlPayload::WindowList(list)).await;
            },
            HostEvent::ClientDisconnected { session_id, reason } => {
                tracing::info!(session_id, reason, "client disconnected");
            },
            HostEvent::Control { session_id, payload } => {
                tracing::debug!(session_id, ?payload, "control message");
            },
        }
    }
    Ok(())
}
