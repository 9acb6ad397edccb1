//! Byte range request strategies.

use tsforged_common::{SeekType, TransmuxConfig};

use super::loader::LoaderRange;

/// URL and extra headers for one range request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeekConfig {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Expresses a byte range on an outbound request.
pub trait SeekHandler: Send + Sync {
    fn get_config(&self, url: &str, range: LoaderRange) -> SeekConfig;

    /// Strip whatever this handler added from a redirected URL.
    fn remove_url_parameters(&self, url: &str) -> String;
}

/// Handler for the configured seek type. `None` for [`SeekType::Custom`],
/// which needs a handler supplied in code.
pub fn from_config(config: &TransmuxConfig) -> Option<Box<dyn SeekHandler>> {
    match config.seek_type {
        SeekType::Range => Some(Box::new(RangeSeekHandler::new(
            config.range_load_zero_start,
        ))),
        SeekType::Param => Some(Box::new(ParamSeekHandler::new(
            &config.seek_param_start,
            &config.seek_param_end,
        ))),
        SeekType::Custom => None,
    }
}

/// `Range: bytes=from-to` request header.
#[derive(Debug, Clone, Default)]
pub struct RangeSeekHandler {
    zero_start: bool,
}

impl RangeSeekHandler {
    /// With `zero_start`, requests for the whole resource still carry `bytes=0-`.
    pub fn new(zero_start: bool) -> Self {
        Self { zero_start }
    }
}

impl SeekHandler for RangeSeekHandler {
    fn get_config(&self, url: &str, range: LoaderRange) -> SeekConfig {
        let mut headers = Vec::new();

        if !range.is_full() {
            let value = match range.to {
                Some(to) => format!("bytes={}-{}", range.from, to),
                None => format!("bytes={}-", range.from),
            };
            headers.push(("Range".to_string(), value));
        } else if self.zero_start {
            headers.push(("Range".to_string(), "bytes=0-".to_string()));
        }

        SeekConfig {
            url: url.to_string(),
            headers,
        }
    }

    fn remove_url_parameters(&self, url: &str) -> String {
        url.to_string()
    }
}

/// Range carried in query parameters, `?bstart=from&bend=to` by default.
#[derive(Debug, Clone)]
pub struct ParamSeekHandler {
    start_name: String,
    end_name: String,
}

impl ParamSeekHandler {
    pub fn new(start_name: &str, end_name: &str) -> Self {
        Self {
            start_name: start_name.to_string(),
            end_name: end_name.to_string(),
        }
    }
}

impl SeekHandler for ParamSeekHandler {
    fn get_config(&self, url: &str, range: LoaderRange) -> SeekConfig {
        let mut url = url.to_string();

        if !range.is_full() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&format!("{}={}", self.start_name, range.from));
            if let Some(to) = range.to {
                url.push_str(&format!("&{}={}", self.end_name, to));
            }
        }

        SeekConfig {
            url,
            headers: Vec::new(),
        }
    }

    fn remove_url_parameters(&self, url: &str) -> String {
        let Some((base, query)) = url.split_once('?') else {
            return url.to_string();
        };

        let kept: Vec<&str> = query
            .split('&')
            .filter(|pair| {
                let name = pair.split('=').next().unwrap_or_default();
                name != self.start_name && name != self.end_name
            })
            .collect();

        if kept.is_empty() || kept.iter().all(|p| p.is_empty()) {
            base.to_string()
        } else {
            format!("{}?{}", base, kept.join("&"))
        }
    }
}
