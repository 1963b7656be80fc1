//! Synthetic capture and encode for loopback verification.
//!
//! No platform capture or hardware codec exists in this crate; these
//! doubles let the binary and the integration tests drive the full
//! data plane (fragmentation, sealing, reassembly) with deterministic
//! payloads. The "encoder" emits a tagged pseudo-bitstream, not HEVC.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mirage_core::{
    config::EncoderConfig,
    traits::{
        CaptureError, CaptureSource, CapturedFrame, EncodeDirective, EncodeError, EncodedFrame,
        VideoEncoder,
    },
};
use mirage_proto::{ContentRect, payloads::stream::PixelFormat};

/// Capture source producing a moving test pattern at a fixed rate.
#[derive(Debug)]
pub struct SyntheticCapture {
    width: u32,
    height: u32,
    interval: Duration,
    counter: u64,
}

impl SyntheticCapture {
    /// Create a pattern source at the given geometry and frame rate.
    #[must_use]
    pub fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            width,
            height,
            interval: Duration::from_secs(1) / frame_rate.max(1),
            counter: 0,
        }
    }
}

#[async_trait]
impl CaptureSource for SyntheticCapture {
    async fn next_frame(&mut self) -> Result<CapturedFrame, CaptureError> {
        tokio::time::sleep(self.interval).await;
        self.counter += 1;

        // A small gradient buffer that changes every frame; enough for the
        // pipeline to chew on without simulating real pixel dimensions.
        let mut data = vec![0u8; 16 * 1024];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = ((i as u64 + self.counter) % 251) as u8;
        }

        Ok(CapturedFrame {
            width: self.width,
            height: self.height,
            pixel_format: PixelFormat::Bgra8,
            timestamp_ns: self.counter * self.interval.as_nanos() as u64,
            data: Bytes::from(data),
        })
    }

    async fn restart(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }
}

/// "Encoder" that frames the captured bytes as a pseudo-bitstream.
///
/// Keyframes carry the whole buffer; delta frames carry a prefix, which is
/// enough to exercise multi-fragment reassembly at both sizes.
#[derive(Debug)]
pub struct PassthroughEncoder {
    frames_since_keyframe: u64,
}

impl PassthroughEncoder {
    /// Create a passthrough encoder.
    #[must_use]
    pub fn new() -> Self {
        Self { frames_since_keyframe: 0 }
    }
}

impl Default for PassthroughEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoEncoder for PassthroughEncoder {
    async fn encode(
        &mut self,
        frame: CapturedFrame,
        directive: EncodeDirective,
    ) -> Result<EncodedFrame, EncodeError> {
        let is_keyframe = directive.force_keyframe;
        if is_keyframe {
            self.frames_since_keyframe = 0;
        } else {
            self.frames_since_keyframe += 1;
        }

        let bytes = if is_keyframe {
            frame.data.clone()
        } else {
            frame.data.slice(..frame.data.len().min(4 * 1024))
        };

        Ok(EncodedFrame {
            bytes,
            is_keyframe,
            timestamp_ns: frame.timestamp_ns,
            content_rect: ContentRect {
                x: 0.0,
                y: 0.0,
                width: frame.width as f32,
                height: frame.height as f32,
            },
        })
    }

    async fn reconfigure(&mut self, _config: &EncoderConfig) -> Result<(), EncodeError> {
        Ok(())
    }
}
