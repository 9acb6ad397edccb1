//! # tsforged-probe
//!
//! MPEG transport stream demuxing with pure Rust codec parameter parsing.
//!
//! This crate turns a stream of transport packets into timed elementary
//! stream samples plus the decoder configuration needed to package them.
//!
//! ## Features
//!
//! - Packet size detection: 188-byte TS, 192-byte M2TS, 204-byte TS with
//!   Reed-Solomon parity
//! - PAT/PMT parsing with 33-bit timestamp unwrapping against the PCR
//! - Video: H.264 and H.265 parameter sets, `avcC`/`hvcC` generation
//! - Audio: AAC in ADTS or LOAS/LATM framing, MPEG-1/2 audio
//! - Timed metadata: KLV, SMPTE ST 2038, SCTE-35, generic private data
//!
//! ## Example
//!
//! ```no_run
//! use tsforged_common::{AudioTrack, MediaInfo, TrackMetadata, TransmuxConfig, VideoTrack};
//! use tsforged_probe::{probe, DemuxSink, TsDemuxer};
//!
//! struct Print;
//!
//! impl DemuxSink for Print {
//!     fn on_track_metadata(&mut self, metadata: TrackMetadata) {
//!         println!("track: {:?}", metadata.track_type());
//!     }
//!
//!     fn on_media_info(&mut self, info: &MediaInfo) {
//!         println!("mime: {:?}", info.mime_type);
//!     }
//!
//!     fn on_data_available(
//!         &mut self,
//!         audio: Option<&mut AudioTrack>,
//!         video: Option<&mut VideoTrack>,
//!     ) {
//!         let audio = audio.map(|t| t.take().samples.len()).unwrap_or(0);
//!         let video = video.map(|t| t.take().samples.len()).unwrap_or(0);
//!         println!("{audio} audio / {video} video samples");
//!     }
//! }
//!
//! let data = std::fs::read("capture.ts").unwrap();
//! let mut demuxer = TsDemuxer::new(probe(&data), &TransmuxConfig::default()).unwrap();
//! demuxer.parse_chunks(&data, 0, &mut Print).unwrap();
//! demuxer.flush(&mut Print);
//! ```

pub mod bitreader;
pub mod codec;
pub mod container;
pub mod error;
pub mod metadata;

pub use bitreader::BitReader;
pub use container::mpegts::{DemuxSink, StreamType, TsDemuxer};
pub use container::{detect_container, probe, Container, ProbeResult};
pub use error::{ProbeError, Result};
pub use metadata::TimedMetadata;
