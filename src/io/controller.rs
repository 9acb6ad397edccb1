//! Adaptive loading: stash buffering, pacing, pause/resume and reconnects.
//!
//! The [`IoController`] turns a loader response into a series of dispatches
//! to a [`ChunkConsumer`]. Incoming chunks are accumulated in a stash whose
//! target size follows the measured throughput; whatever the consumer leaves
//! unconsumed is kept and re-dispatched together with the next data.
//!
//! Requests are opened lazily by [`IoController::step`], so `seek`, `pause`
//! and `resume` never await. The open future is owned by the controller, so
//! dropping a `step` future mid-open does not restart the request. Aborting
//! drops the in-flight open or response, which guarantees no chunk from it
//! reaches the consumer afterwards.

use bytes::{Buf, Bytes, BytesMut};
use futures::future::BoxFuture;
use std::sync::Arc;
use tsforged_common::TransmuxConfig;

use super::loader::{DataSource, Loader, LoaderError, LoaderRange, LoaderResponse};
use super::speed::SpeedSampler;

/// Throughput ladder in KB/s.
const SPEED_NORMALIZE_LIST: [u32; 14] = [
    32, 64, 96, 128, 192, 256, 384, 512, 768, 1024, 1536, 2048, 3072, 4096,
];

/// Upper bound for the stash target, in KB.
const MAX_STASH_SIZE_KB: u32 = 8192;

type OpenFuture = BoxFuture<'static, Result<Box<dyn LoaderResponse>, LoaderError>>;

/// Receiver of dispatched data.
pub trait ChunkConsumer: Send {
    /// Handle `chunk`, which starts at absolute offset `byte_start`. Returns
    /// the number of bytes consumed; the rest is offered again later.
    fn on_data_arrival(&mut self, chunk: &[u8], byte_start: u64) -> usize;

    /// A reconnect reopened the source at a new position.
    fn on_seeked(&mut self) {}

    /// Data arrived again after an early-EOF reconnect.
    fn on_recovered_early_eof(&mut self) {}

    fn on_redirect(&mut self, redirected_url: &str) {
        let _ = redirected_url;
    }
}

/// Outcome of one [`IoController::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// No request in flight: never opened, paused, or finished.
    Idle,
    /// A request was opened or a chunk was handled.
    Buffering,
    /// The transfer finished and the stash was flushed.
    Complete,
}

/// Snap a rate to the ladder entry at or below it, or the lowest entry.
pub fn normalize_speed(kbps: f64) -> u32 {
    let index = SPEED_NORMALIZE_LIST.partition_point(|&s| f64::from(s) <= kbps);
    SPEED_NORMALIZE_LIST[index.saturating_sub(1)]
}

/// Stash target in bytes for a normalized rate.
pub fn stash_size_for(normalized: u32, is_live: bool) -> usize {
    let kb = if is_live {
        normalized / 8
    } else if normalized < 512 {
        normalized
    } else if normalized <= 1024 {
        normalized * 3 / 2
    } else {
        normalized * 2
    };
    kb.min(MAX_STASH_SIZE_KB) as usize * 1024
}

pub struct IoController {
    loader: Arc<dyn Loader>,
    source: DataSource,
    is_live: bool,

    enable_stash: bool,
    stash_initial_size: usize,
    stash_size: usize,
    stash: BytesMut,
    stash_byte_start: u64,

    total_length: Option<u64>,
    full_request: bool,
    current_range: LoaderRange,
    redirected_url: Option<String>,

    response: Option<Box<dyn LoaderResponse>>,
    pending_request: Option<LoaderRange>,
    opening: Option<OpenFuture>,
    received: u64,

    speed_sampler: SpeedSampler,
    speed_normalized: u32,

    early_eof_reconnecting: bool,
    paused: bool,
    resume_from: u64,
    complete: bool,
}

impl IoController {
    pub fn new(source: DataSource, config: &TransmuxConfig, loader: Arc<dyn Loader>) -> Self {
        let stash_initial_size = config.stash_initial_size();
        Self {
            loader,
            total_length: source.filesize,
            source,
            is_live: config.is_live,
            enable_stash: config.enable_stash_buffer,
            stash_initial_size,
            stash_size: stash_initial_size,
            stash: BytesMut::with_capacity(stash_initial_size),
            stash_byte_start: 0,
            full_request: false,
            current_range: LoaderRange::default(),
            redirected_url: None,
            response: None,
            pending_request: None,
            opening: None,
            received: 0,
            speed_sampler: SpeedSampler::new(),
            speed_normalized: 0,
            early_eof_reconnecting: false,
            paused: false,
            resume_from: 0,
            complete: false,
        }
    }

    /// Request data from `from`, or from the start.
    pub fn open(&mut self, from: Option<u64>) {
        let from = from.unwrap_or(0);
        self.current_range = LoaderRange::from(from);
        self.speed_sampler.reset();
        if from == 0 {
            self.full_request = true;
        }
        self.complete = false;
        self.pending_request = Some(self.current_range);
    }

    /// Tear down the in-flight request.
    pub fn abort(&mut self) {
        self.drop_request();
        if self.paused {
            self.paused = false;
            self.resume_from = 0;
        }
    }

    /// Stop loading and remember where to continue. Stashed bytes that were
    /// never dispatched are dropped and will be fetched again.
    pub fn pause(&mut self) {
        if !self.is_working() {
            return;
        }
        self.drop_request();

        if !self.stash.is_empty() {
            self.resume_from = self.stash_byte_start;
            self.current_range.to = self.stash_byte_start.checked_sub(1);
        } else {
            self.resume_from = self.next_position();
        }
        self.stash.clear();
        self.stash_byte_start = 0;
        self.paused = true;
        tracing::debug!(resume_from = self.resume_from, "Loader paused");
    }

    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            let from = std::mem::take(&mut self.resume_from);
            self.internal_seek(from);
        }
    }

    /// Reopen at `bytes`, discarding everything stashed.
    pub fn seek(&mut self, bytes: u64) {
        self.paused = false;
        self.stash.clear();
        self.stash_byte_start = 0;
        self.internal_seek(bytes);
    }

    fn drop_request(&mut self) {
        self.response = None;
        self.pending_request = None;
        self.opening = None;
    }

    fn internal_seek(&mut self, bytes: u64) {
        self.drop_request();
        self.current_range = LoaderRange::from(bytes);
        self.speed_sampler.reset();
        self.stash_size = self.stash_initial_size;
        self.complete = false;
        self.pending_request = Some(self.current_range);
    }

    pub fn is_working(&self) -> bool {
        (self.response.is_some() || self.pending_request.is_some() || self.opening.is_some())
            && !self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn current_url(&self) -> &str {
        &self.source.url
    }

    pub fn has_redirect(&self) -> bool {
        self.redirected_url.is_some() || self.source.redirected_url.is_some()
    }

    pub fn current_redirected_url(&self) -> Option<&str> {
        self.redirected_url
            .as_deref()
            .or(self.source.redirected_url.as_deref())
    }

    /// Throughput of the last second in KB/s.
    pub fn current_speed(&mut self) -> f64 {
        self.speed_sampler.last_second_kbps()
    }

    pub fn loader_type(&self) -> &'static str {
        self.loader.loader_type()
    }

    pub fn total_length(&self) -> Option<u64> {
        self.total_length
    }

    pub fn stash_size(&self) -> usize {
        self.stash_size
    }

    /// Bytes held in the stash.
    pub fn stash_used(&self) -> usize {
        self.stash.len()
    }

    fn next_position(&self) -> u64 {
        self.current_range
            .to
            .map_or(self.current_range.from, |to| to + 1)
    }

    /// Drive the transfer by one step: open a pending request or handle the
    /// next chunk. Cancel safe: a dropped step resumes the same open or read.
    pub async fn step(&mut self, consumer: &mut dyn ChunkConsumer) -> Result<IoStatus, LoaderError> {
        if self.paused {
            return Ok(IoStatus::Idle);
        }

        if let Some(range) = self.pending_request.take() {
            let loader = Arc::clone(&self.loader);
            let source = self.source.clone();
            self.opening = Some(Box::pin(async move { loader.open(&source, range).await }));
        }

        if let Some(opening) = self.opening.as_mut() {
            let opened = opening.await;
            self.opening = None;
            return match opened {
                Ok(response) => {
                    self.on_response(response.as_ref(), consumer);
                    self.response = Some(response);
                    self.received = 0;
                    Ok(IoStatus::Buffering)
                }
                Err(error) => self.on_loader_error(error, consumer),
            };
        }

        let Some(response) = self.response.as_mut() else {
            return Ok(IoStatus::Idle);
        };

        match response.next_chunk().await {
            Ok(Some(chunk)) => {
                let byte_start = self.current_range.from + self.received;
                self.received += chunk.len() as u64;
                self.on_chunk_arrival(chunk, byte_start, consumer);
                Ok(IoStatus::Buffering)
            }
            Ok(None) => {
                self.response = None;
                self.flush_stash_buffer(true, consumer);
                self.complete = true;
                Ok(IoStatus::Complete)
            }
            Err(error) => {
                self.response = None;
                self.on_loader_error(error, consumer)
            }
        }
    }

    fn on_response(&mut self, response: &dyn LoaderResponse, consumer: &mut dyn ChunkConsumer) {
        if let Some(url) = response.redirected_url() {
            tracing::debug!(redirected_url = %url, "Request redirected");
            self.redirected_url = Some(url.to_string());
            consumer.on_redirect(url);
        }
        if let Some(length) = response.content_length() {
            if self.full_request {
                self.total_length = Some(length);
                self.full_request = false;
            }
        }
    }

    fn dispatch(&mut self, chunk: &[u8], byte_start: u64, consumer: &mut dyn ChunkConsumer) -> usize {
        if !chunk.is_empty() {
            self.current_range.to = Some(byte_start + chunk.len() as u64 - 1);
        }
        consumer.on_data_arrival(chunk, byte_start).min(chunk.len())
    }

    /// Hand the whole stash to the consumer and keep what it leaves.
    fn dispatch_stash(&mut self, consumer: &mut dyn ChunkConsumer) {
        let buffer = self.stash.split().freeze();
        let consumed = self.dispatch(&buffer, self.stash_byte_start, consumer);
        self.stash_byte_start += consumed as u64;
        self.stash.extend_from_slice(&buffer[consumed..]);
    }

    fn adjust_stash_size(&mut self) {
        let kbps = self.speed_sampler.last_second_kbps();
        if kbps == 0.0 {
            return;
        }
        let normalized = normalize_speed(kbps);
        if normalized != self.speed_normalized {
            self.speed_normalized = normalized;
            self.stash_size = stash_size_for(normalized, self.is_live);
            self.stash.reserve(self.stash_size.saturating_sub(self.stash.len()));
            tracing::trace!(kbps, normalized, stash_size = self.stash_size, "Stash resized");
        }
    }

    fn on_chunk_arrival(&mut self, mut chunk: Bytes, byte_start: u64, consumer: &mut dyn ChunkConsumer) {
        if self.early_eof_reconnecting {
            self.early_eof_reconnecting = false;
            tracing::info!(byte_start, "Recovered from early EOF");
            consumer.on_recovered_early_eof();
        }

        self.speed_sampler.add_bytes(chunk.len() as u64);
        self.adjust_stash_size();

        if !self.enable_stash {
            if self.stash.is_empty() {
                let consumed = self.dispatch(&chunk, byte_start, consumer);
                if consumed < chunk.len() {
                    chunk.advance(consumed);
                    self.stash.extend_from_slice(&chunk);
                    self.stash_byte_start = byte_start + consumed as u64;
                }
            } else {
                self.stash.extend_from_slice(&chunk);
                self.dispatch_stash(consumer);
            }
            return;
        }

        if self.stash.is_empty() && self.stash_byte_start == 0 {
            // first chunk after open or seek
            self.stash_byte_start = byte_start;
        }

        if self.stash.len() + chunk.len() <= self.stash_size {
            self.stash.extend_from_slice(&chunk);
        } else if !self.stash.is_empty() {
            self.dispatch_stash(consumer);
            self.stash.extend_from_slice(&chunk);
        } else {
            // empty stash, oversized chunk: dispatch it directly
            let consumed = self.dispatch(&chunk, byte_start, consumer);
            if consumed < chunk.len() {
                chunk.advance(consumed);
                self.stash.extend_from_slice(&chunk);
                self.stash_byte_start = byte_start + consumed as u64;
            }
        }
    }

    /// Dispatch what is stashed. With `drop_unconsumed` the remainder is
    /// discarded; otherwise it stays stashed. Returns the dropped byte count.
    fn flush_stash_buffer(&mut self, drop_unconsumed: bool, consumer: &mut dyn ChunkConsumer) -> usize {
        if self.stash.is_empty() {
            return 0;
        }

        let buffer = self.stash.split().freeze();
        let consumed = self.dispatch(&buffer, self.stash_byte_start, consumer);
        let remain = buffer.len() - consumed;

        if remain > 0 && !drop_unconsumed {
            self.stash.extend_from_slice(&buffer[consumed..]);
            self.stash_byte_start += consumed as u64;
            return 0;
        }
        if remain > 0 {
            tracing::warn!(remain, "Unconsumed data remain when flushing stash, dropped");
        }
        self.stash_byte_start = 0;
        remain
    }

    fn on_loader_error(
        &mut self,
        error: LoaderError,
        consumer: &mut dyn ChunkConsumer,
    ) -> Result<IoStatus, LoaderError> {
        tracing::error!(code = error.code(), msg = error.message(), "Loader error");

        self.flush_stash_buffer(false, consumer);

        let error = if self.early_eof_reconnecting {
            // the reconnect itself failed
            self.early_eof_reconnecting = false;
            error.into_unrecoverable()
        } else {
            error
        };

        match error {
            LoaderError::EarlyEof { .. } if !self.is_live => {
                let Some(total) = self.total_length else {
                    return Err(error.into_unrecoverable());
                };
                let next_from = self.next_position();
                if next_from < total {
                    tracing::warn!(next_from, total, "Connection lost, trying reconnect...");
                    self.early_eof_reconnecting = true;
                    self.response = None;
                    self.current_range = LoaderRange::from(next_from);
                    self.speed_sampler.reset();
                    self.stash_size = self.stash_initial_size;
                    self.pending_request = Some(self.current_range);
                    consumer.on_seeked();
                    return Ok(IoStatus::Buffering);
                }
                // everything up to the known length already arrived
                self.flush_stash_buffer(true, consumer);
                self.complete = true;
                Ok(IoStatus::Complete)
            }
            LoaderError::EarlyEof { .. } => Err(error.into_unrecoverable()),
            other => Err(other),
        }
    }
}
