//! Per-session transmuxing configuration.
//!
//! A [`TransmuxConfig`] is built once per playback session and handed by
//! reference to every component constructor. Components that adjust a
//! setting at runtime (the loader's stash size, for one) keep their own copy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Default stash size when none is configured.
pub const DEFAULT_STASH_INITIAL_SIZE: usize = 64 * 1024;

/// How byte ranges are expressed on outbound requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeekType {
    /// `Range: bytes=from-to` request header.
    #[default]
    Range,
    /// Query parameters named by `seek_param_start`/`seek_param_end`.
    Param,
    /// A caller-supplied seek handler.
    Custom,
}

/// AudioSpecificConfig flavour written into `esds`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AacSignalling {
    /// Signal HE-AAC (object type 5) with an explicit extension sampling index,
    /// falling back to LC for mono streams.
    #[default]
    HeAac,
    /// Always signal AAC-LC (object type 2).
    Lc,
}

/// Immutable transmuxing options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmuxConfig {
    /// Accumulate incoming chunks before handing them to the demuxer.
    pub enable_stash_buffer: bool,

    /// Initial stash size in bytes (64 KiB when unset).
    pub stash_initial_size: Option<usize>,

    /// Live sources get smaller stashes and never reconnect on early EOF.
    pub is_live: bool,

    /// Synthesize silent frames over large audio timestamp gaps.
    pub fix_audio_timestamp_gap: bool,

    /// Gap or overlap, in reference frame durations, that triggers silent
    /// frame insertion or frame dropping.
    pub max_audio_frames_drift: u32,

    /// Gaps at or below this many milliseconds between consecutive segments
    /// are treated as contiguous.
    pub zero_distance_tolerance_ms: i64,

    /// Insert one silent AAC frame before the first audio sample after a
    /// seek so audio starts with the video segment.
    pub fill_silent_after_seek: bool,

    /// Reserved for callers that re-seek to the exact target after the
    /// keyframe seek resolves.
    pub accurate_seek: bool,

    /// Byte range request strategy.
    pub seek_type: SeekType,

    /// Query parameter carrying the range start for [`SeekType::Param`].
    pub seek_param_start: String,

    /// Query parameter carrying the range end for [`SeekType::Param`].
    pub seek_param_end: String,

    /// Send `Range: bytes=0-` even for a request from the start.
    pub range_load_zero_start: bool,

    /// Reuse the redirected URL for subsequent range requests.
    pub reuse_redirected_url: bool,

    /// Value of the `Referrer-Policy` request header.
    pub referrer_policy: Option<String>,

    /// Additional outbound request headers.
    pub headers: BTreeMap<String, String>,

    /// Interval between statistics reports.
    pub statistics_info_report_interval_ms: u64,

    /// AudioSpecificConfig flavour.
    pub aac_signalling: AacSignalling,

    /// Timeout for establishing a connection.
    pub connect_timeout_ms: Option<u64>,
}

impl Default for TransmuxConfig {
    fn default() -> Self {
        Self {
            enable_stash_buffer: true,
            stash_initial_size: None,
            is_live: false,
            fix_audio_timestamp_gap: true,
            max_audio_frames_drift: 3,
            zero_distance_tolerance_ms: 3,
            fill_silent_after_seek: false,
            accurate_seek: false,
            seek_type: SeekType::Range,
            seek_param_start: "bstart".to_string(),
            seek_param_end: "bend".to_string(),
            range_load_zero_start: false,
            reuse_redirected_url: false,
            referrer_policy: None,
            headers: BTreeMap::new(),
            statistics_info_report_interval_ms: 600,
            aac_signalling: AacSignalling::HeAac,
            connect_timeout_ms: None,
        }
    }
}

impl TransmuxConfig {
    /// Stash size to start from, falling back to 64 KiB.
    pub fn stash_initial_size(&self) -> usize {
        self.stash_initial_size.unwrap_or(DEFAULT_STASH_INITIAL_SIZE)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.statistics_info_report_interval_ms == 0 {
            return Err(Error::config(
                "statistics_info_report_interval_ms must be positive",
            ));
        }
        if self.stash_initial_size == Some(0) {
            return Err(Error::config("stash_initial_size must be positive"));
        }
        if self.seek_type == SeekType::Param
            && (self.seek_param_start.is_empty() || self.seek_param_end.is_empty())
        {
            return Err(Error::config("seek parameter names cannot be empty"));
        }
        if self.seek_type == SeekType::Custom {
            tracing::warn!("seek_type = custom requires a seek handler supplied in code");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransmuxConfig::default();
        assert!(config.enable_stash_buffer);
        assert!(!config.is_live);
        assert_eq!(config.stash_initial_size(), 64 * 1024);
        assert_eq!(config.seek_param_start, "bstart");
        assert_eq!(config.statistics_info_report_interval_ms, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let json = r#"{"is_live": true, "seek_type": "param", "aac_signalling": "lc"}"#;
        let config: TransmuxConfig = serde_json::from_str(json).unwrap();
        assert!(config.is_live);
        assert_eq!(config.seek_type, SeekType::Param);
        assert_eq!(config.aac_signalling, AacSignalling::Lc);
        assert!(config.fix_audio_timestamp_gap);
        assert_eq!(config.max_audio_frames_drift, 3);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = TransmuxConfig {
            statistics_info_report_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_stash() {
        let config = TransmuxConfig {
            stash_initial_size: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
