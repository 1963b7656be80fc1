//! Control channel I/O tasks.
//!
//! One reader and one writer task per connection. The writer drains two
//! queues with a bias toward input events (the dedicated low-latency
//! path) ahead of ordinary control traffic. The reader runs the envelope
//! decoder over raw reads and forwards decoded payloads to the
//! coordination task; transient read errors are tolerated inside the 20 s
//! grace window, framing errors and EOF are fatal.

use std::{collections::HashSet, sync::Arc, time::Instant};

use mirage_core::grace::{ErrorGraceWindow, GraceDecision};
use mirage_proto::{ControlPayload, EnvelopeDecoder, ProtocolError, payloads::input::InputEvent};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::{RwLock, mpsc},
};

use crate::CoordMsg;

/// Write a payload as a framed envelope.
async fn write_payload(
    writer: &mut OwnedWriteHalf,
    payload: ControlPayload,
) -> Result<(), crate::ClientError> {
    let envelope = payload.into_envelope()?;
    let mut wire = Vec::with_capacity(envelope.encoded_len());
    envelope.encode(&mut wire)?;
    writer.write_all(&wire).await?;
    Ok(())
}

/// Writer task: input events take priority over general control traffic,
/// and input for blocked streams is dropped at the door.
pub(crate) async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut control_rx: mpsc::Receiver<ControlPayload>,
    mut input_rx: mpsc::Receiver<InputEvent>,
    blocked_streams: Arc<RwLock<HashSet<u16>>>,
) {
    loop {
        let payload = tokio::select! {
            biased;
            input = input_rx.recv() => match input {
                Some(event) => {
                    if blocked_streams.read().await.contains(&event.stream_id) {
                        tracing::trace!(stream = event.stream_id, "input suppressed");
                        continue;
                    }
                    ControlPayload::InputEvent(event)
                },
                None => break,
            },
            control = control_rx.recv() => match control {
                Some(payload) => payload,
                None => break,
            },
        };

        if let Err(err) = write_payload(&mut writer, payload).await {
            tracing::warn!(%err, "control write failed");
            break;
        }
    }
}

/// Reader task: extract envelopes, decode payloads, forward to the
/// coordination task. Returns the disconnect reason.
pub(crate) async fn run_reader(
    mut reader: OwnedReadHalf,
    to_coord: mpsc::Sender<CoordMsg>,
) -> String {
    let mut decoder = EnvelopeDecoder::new();
    let mut grace: ErrorGraceWindow<Instant> = ErrorGraceWindow::default();
    let mut buf = vec![0u8; 16 * 1024];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return "peer closed control channel".to_string(),
            Ok(len) => {
                grace.on_success();
                decoder.extend(&buf[..len]);
                loop {
                    match decoder.next_envelope() {
                        Ok(None) => break,
                        Ok(Some(envelope)) => match ControlPayload::from_envelope(&envelope) {
                            Ok(payload) => {
                                if to_coord.send(CoordMsg::ControlIn(payload)).await.is_err() {
                                    return "coordination task gone".to_string();
                                }
                            },
                            Err(ProtocolError::UnknownType(raw)) => {
                                // Forward compatibility: newer hosts may speak
                                // types this build does not know.
                                tracing::debug!(message_type = raw, "skipping unknown control message");
                            },
                            Err(err) => {
                                tracing::warn!(%err, "undecodable control payload");
                            },
                        },
                        Err(err) => {
                            // Framing is unrecoverable: byte alignment is lost.
                            return format!("control framing error: {err}");
                        },
                    }
                }
            },
            Err(err) if is_transient(&err) => {
                match grace.on_transient_error(Instant::now()) {
                    GraceDecision::Tolerate => {
                        tracing::debug!(%err, "transient control read error");
                    },
                    GraceDecision::Disconnect => {
                        return format!("control errors exceeded grace window: {err}");
                    },
                }
            },
            Err(err) => return format!("control read failed: {err}"),
        }
    }
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::TimedOut
    )
}
