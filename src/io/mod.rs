//! Network and file input.
//!
//! - [`loader`]: the [`Loader`] trait, data sources and the loader error taxonomy
//! - [`fetch`]: HTTP(S) loader built on `reqwest`
//! - [`file`]: local file loader built on `tokio::fs`
//! - [`seek`]: range header and query parameter strategies
//! - [`controller`]: stash buffering, throughput pacing and reconnects

pub mod controller;
pub mod fetch;
pub mod file;
pub mod loader;
pub mod seek;
pub mod speed;

pub use controller::{ChunkConsumer, IoController, IoStatus};
pub use fetch::FetchLoader;
pub use file::FileLoader;
pub use loader::{DataSource, Loader, LoaderError, LoaderRange, LoaderResponse};
pub use seek::{ParamSeekHandler, RangeSeekHandler, SeekConfig, SeekHandler};
pub use speed::SpeedSampler;

use std::sync::Arc;
use tsforged_common::TransmuxConfig;

/// Whether `input` names an HTTP(S) resource rather than a local path.
pub fn is_remote(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Loader suited to `input`: HTTP for URLs, the file loader otherwise.
pub fn loader_for(input: &str, config: &TransmuxConfig) -> Result<Arc<dyn Loader>, LoaderError> {
    if !is_remote(input) {
        return Ok(Arc::new(FileLoader::new()));
    }
    let handler = seek::from_config(config).ok_or_else(|| {
        LoaderError::exception(-1, "seek_type = custom requires a seek handler")
    })?;
    Ok(Arc::new(FetchLoader::new(config, handler)?))
}
