use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tsforged_common::TransmuxConfig;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub transmux: TransmuxConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Directory for segments when `--out-dir` is not given
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Write `media-info.json` next to the segments
    #[serde(default = "default_true")]
    pub write_media_info: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./out")
}

fn default_true() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            write_media_info: true,
        }
    }
}
