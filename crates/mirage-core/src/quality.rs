//! Bitrate → encoder quality mapping and adaptive fallback.
//!
//! VideoToolbox-class encoders take a 0..1 quality knob, not a bitrate, so
//! the host maps the configured bitrate through bits-per-pixel-per-second.
//! The interpolation table is tuned for HEVC screen content; the 0.80
//! ceiling exists because quality above it burns bitrate on imperceptible
//! gains and starves keyframes.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use mirage_proto::payloads::stream::QualityMode;

/// Hard ceiling for frame quality.
pub const FRAME_QUALITY_CEILING: f64 = 0.80;

/// Floor for any derived quality.
pub const QUALITY_FLOOR: f64 = 0.08;

/// Keyframe quality discount relative to frame quality.
const KEYFRAME_DISCOUNT: f64 = 0.85;

/// bpp → quality interpolation anchors, ascending.
const QUALITY_TABLE: [(f64, f64); 7] = [
    (0.015, 0.10),
    (0.03, 0.20),
    (0.05, 0.32),
    (0.08, 0.50),
    (0.12, 0.68),
    (0.18, 0.80),
    (0.25, 0.92),
];

/// Qualities derived from a bitrate at a given geometry and rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedQualities {
    /// Quality knob for P-frames, in `[QUALITY_FLOOR, FRAME_QUALITY_CEILING]`.
    pub frame_quality: f64,
    /// Quality knob for keyframes; always <= `frame_quality`.
    pub keyframe_quality: f64,
}

/// Map a bitrate to encoder qualities for the given geometry.
#[must_use]
pub fn derived_qualities(
    bitrate_bps: u64,
    width: u32,
    height: u32,
    frame_rate: u32,
) -> DerivedQualities {
    let pixels_per_second =
        f64::from(width).max(1.0) * f64::from(height).max(1.0) * f64::from(frame_rate).max(1.0);
    let bpp = bitrate_bps as f64 / pixels_per_second;

    let raw = interpolate(bpp);
    let frame_quality = raw.clamp(QUALITY_FLOOR, FRAME_QUALITY_CEILING);
    let keyframe_quality = (frame_quality * KEYFRAME_DISCOUNT).max(QUALITY_FLOOR);

    DerivedQualities { frame_quality, keyframe_quality }
}

fn interpolate(bpp: f64) -> f64 {
    let (first_bpp, first_q) = QUALITY_TABLE[0];
    if bpp <= first_bpp {
        return first_q;
    }
    for window in QUALITY_TABLE.windows(2) {
        let (low_bpp, low_q) = window[0];
        let (high_bpp, high_q) = window[1];
        if bpp <= high_bpp {
            let t = (bpp - low_bpp) / (high_bpp - low_bpp);
            return low_q + t * (high_q - low_q);
        }
    }
    QUALITY_TABLE[QUALITY_TABLE.len() - 1].1
}

/// Adaptive bitrate fallback for automatic mode.
///
/// On sustained degradation the bitrate steps down 15% per trigger with a
/// 15 s cooldown, floored at 8 Mbps: a gentle slope tried before any
/// disruptive reconfiguration. Custom mode never adjusts anything.
#[derive(Debug)]
pub struct AdaptiveBitrate<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    mode: QualityMode,
    current_bps: u64,
    floor_bps: u64,
    cooldown: Duration,
    last_reduction: Option<I>,
}

impl<I> AdaptiveBitrate<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Reduction factor per trigger (retains 85%).
    pub const RETAIN_PERCENT: u64 = 85;

    /// Default floor (8 Mbps).
    pub const DEFAULT_FLOOR_BPS: u64 = 8_000_000;

    /// Default cooldown between reductions.
    pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(15);

    /// Create a controller starting at `bitrate_bps`.
    #[must_use]
    pub fn new(mode: QualityMode, bitrate_bps: u64) -> Self {
        Self {
            mode,
            current_bps: bitrate_bps,
            floor_bps: Self::DEFAULT_FLOOR_BPS,
            cooldown: Self::DEFAULT_COOLDOWN,
            last_reduction: None,
        }
    }

    /// Current bitrate.
    #[must_use]
    pub fn current_bps(&self) -> u64 {
        self.current_bps
    }

    /// Handle a sustained-degradation trigger. Returns the new bitrate when
    /// a reduction applies; `None` in custom mode, under cooldown, or at
    /// the floor.
    pub fn on_degradation(&mut self, now: I) -> Option<u64> {
        if self.mode == QualityMode::Custom {
            return None;
        }
        if let Some(last) = self.last_reduction
            && now >= last
            && now - last < self.cooldown
        {
            return None;
        }
        if self.current_bps <= self.floor_bps {
            return None;
        }

        self.current_bps =
            (self.current_bps * Self::RETAIN_PERCENT / 100).max(self.floor_bps);
        self.last_reduction = Some(now);
        tracing::info!(bitrate = self.current_bps, "adaptive bitrate reduction");
        Some(self.current_bps)
    }

    /// Reset to a new client-requested bitrate (settings change).
    pub fn reset(&mut self, bitrate_bps: u64) {
        self.current_bps = bitrate_bps;
        self.last_reduction = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Ms = Duration;

    fn at(ms: u64) -> Ms {
        Duration::from_millis(ms)
    }

    #[test]
    fn quality_never_exceeds_ceiling() {
        // Absurd bitrate at 5K/60.
        let q = derived_qualities(1_000_000_000, 5120, 2880, 60);
        assert!(q.frame_quality <= FRAME_QUALITY_CEILING);
        assert!(q.keyframe_quality <= q.frame_quality);
    }

    #[test]
    fn quality_is_floored() {
        let q = derived_qualities(100_000, 5120, 2880, 120);
        assert!(q.frame_quality >= QUALITY_FLOOR);
        assert!(q.keyframe_quality >= QUALITY_FLOOR);
    }

    #[test]
    fn keyframe_quality_is_discounted_from_frame_quality() {
        let q = derived_qualities(40_000_000, 2560, 1440, 60);
        assert!((q.keyframe_quality - q.frame_quality * 0.85).abs() < 1e-9);
    }

    #[test]
    fn twenty_mbps_at_4k60_is_modest() {
        let q = derived_qualities(20_000_000, 3840, 2160, 60);
        assert!(q.frame_quality <= 0.30, "got {}", q.frame_quality);
        assert!(q.frame_quality > QUALITY_FLOOR);
    }

    #[test]
    fn quality_is_monotone_in_bitrate() {
        let mut previous = 0.0f64;
        for bitrate in (5u64..=400).map(|m| m * 1_000_000) {
            let q = derived_qualities(bitrate, 3840, 2160, 60);
            assert!(q.frame_quality >= previous, "non-monotone at {bitrate}");
            previous = q.frame_quality;
        }

        let low = derived_qualities(20_000_000, 3840, 2160, 60);
        let high = derived_qualities(400_000_000, 3840, 2160, 60);
        assert!(low.frame_quality < high.frame_quality);
    }

    #[test]
    fn table_anchors_map_exactly() {
        // 0.05 bpp at 1000x1000x1 needs bitrate 50_000.
        let q = derived_qualities(50_000, 1000, 1000, 1);
        assert!((q.frame_quality - 0.32).abs() < 1e-9);
    }

    #[test]
    fn adaptive_reduces_fifteen_percent_with_cooldown() {
        let mut adaptive: AdaptiveBitrate<Ms> =
            AdaptiveBitrate::new(QualityMode::Automatic, 100_000_000);

        assert_eq!(adaptive.on_degradation(at(0)), Some(85_000_000));
        // Cooldown blocks immediate repeats.
        assert_eq!(adaptive.on_degradation(at(5_000)), None);
        // After 15 s another step applies.
        assert_eq!(adaptive.on_degradation(at(15_500)), Some(72_250_000));
    }

    #[test]
    fn adaptive_respects_floor() {
        let mut adaptive: AdaptiveBitrate<Ms> =
            AdaptiveBitrate::new(QualityMode::Automatic, 9_000_000);
        assert_eq!(adaptive.on_degradation(at(0)), Some(8_000_000));
        assert_eq!(adaptive.on_degradation(at(20_000)), None, "at the floor");
    }

    #[test]
    fn custom_mode_never_adjusts() {
        let mut adaptive: AdaptiveBitrate<Ms> =
            AdaptiveBitrate::new(QualityMode::Custom, 100_000_000);
        assert_eq!(adaptive.on_degradation(at(0)), None);
        assert_eq!(adaptive.current_bps(), 100_000_000);
    }
}
