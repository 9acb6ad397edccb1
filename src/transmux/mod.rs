//! Transmuxing sessions.
//!
//! [`TransmuxingController`] turns a [`MediaDataSource`] into a stream of
//! [`TransmuxEvent`]s; [`drain_into_sink`] feeds those events into a
//! [`MediaSink`] such as the [`FileSink`] used by the CLI.

pub mod controller;
pub mod error;
pub mod events;
pub mod sink;

pub use controller::{MediaDataSource, MediaSegmentSource, TransmuxHandle, TransmuxingController};
pub use error::{DemuxErrorKind, Result, TransmuxError};
pub use events::{
    drain_into_sink, DrainSummary, MediaSink, StatisticsInfo, TransmuxCommand, TransmuxEvent,
};
pub use sink::FileSink;
