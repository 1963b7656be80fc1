//! Quality probe payloads.
//!
//! A probe is a short staged bandwidth test: the client requests it, the
//! host blasts fixed-size datagrams at each stage's target rate, and the
//! client reports per-stage reception. The evaluator (in core) derives the
//! max stable bitrate from the report.

use serde::{Deserialize, Serialize};

/// One stage of a staged bandwidth test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityStage {
    /// Stage identifier, unique within the test.
    pub id: u16,
    /// Stage duration in milliseconds.
    pub duration_ms: u32,
    /// Target send rate in bits per second.
    pub target_bitrate_bps: u64,
}

/// Client-initiated staged bandwidth test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityTestRequest {
    /// Test run identifier.
    pub test_id: u32,
    /// Stages in execution order.
    pub stages: Vec<QualityStage>,
    /// Datagram payload size in bytes (constant across stages).
    pub payload_size: u32,
    /// Also run the one-time codec benchmark.
    #[serde(default)]
    pub include_codec_benchmark: bool,
}

/// Per-stage reception tally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityStageResult {
    /// Stage identifier.
    pub stage_id: u16,
    /// Stage target rate in bits per second.
    pub target_bitrate_bps: u64,
    /// Bytes the accumulator received for this stage.
    pub received_bytes: u64,
    /// Observed throughput in bits per second.
    pub throughput_bps: u64,
    /// 1 - throughput/target, clamped to [0, 1].
    pub loss_fraction: f64,
}

/// One-time encode/decode timing at a fixed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecBenchmark {
    /// Benchmark frame width.
    pub width: u32,
    /// Benchmark frame height.
    pub height: u32,
    /// Mean encode time in milliseconds.
    pub encode_ms: f64,
    /// Mean decode time in milliseconds.
    pub decode_ms: f64,
}

/// Probe results from the client accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityTestResult {
    /// Test run identifier.
    pub test_id: u32,
    /// Per-stage tallies in execution order.
    pub stages: Vec<QualityStageResult>,
    /// Highest stage target meeting the stability bar, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_stable_bitrate_bps: Option<u64>,
    /// Codec benchmark, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_benchmark: Option<CodecBenchmark>,
}

#[cfg(test)]
mod tests {
    use crate::canonical::{canonical_json, from_json};

    use super::*;

    #[test]
    fn request_round_trip() {
        let request = QualityTestRequest {
            test_id: 11,
            stages: vec![
                QualityStage { id: 0, duration_ms: 1000, target_bitrate_bps: 20_000_000 },
                QualityStage { id: 1, duration_ms: 1000, target_bitrate_bps: 80_000_000 },
            ],
            payload_size: 1184,
            include_codec_benchmark: true,
        };
        let back: QualityTestRequest = from_json(&canonical_json(&request).unwrap()).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn result_omits_absent_fields() {
        let result = QualityTestResult {
            test_id: 11,
            stages: vec![],
            max_stable_bitrate_bps: None,
            codec_benchmark: None,
        };
        let text = String::from_utf8(canonical_json(&result).unwrap()).unwrap();
        assert!(!text.contains("maxStableBitrateBps"));
        assert!(!text.contains("codecBenchmark"));
    }
}
