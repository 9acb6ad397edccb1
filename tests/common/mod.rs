//! Shared test harness for integration tests.
//!
//! Provides [`ScriptedLoader`], an in-memory [`Loader`] whose responses are
//! queued up front and whose opened ranges are recorded, plus builders for
//! small synthesized transport streams.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use tsforged::io::{ChunkConsumer, DataSource, Loader, LoaderError, LoaderRange, LoaderResponse};

/// One queued answer to [`Loader::open`].
pub enum Script {
    /// Open succeeds; the body yields these items in order, then ends.
    Respond {
        content_length: Option<u64>,
        body: Vec<Result<Bytes, LoaderError>>,
    },
    /// Open fails.
    Fail(LoaderError),
}

impl Script {
    pub fn respond(content_length: Option<u64>, body: Vec<Result<Bytes, LoaderError>>) -> Self {
        Script::Respond {
            content_length,
            body,
        }
    }
}

#[derive(Default)]
pub struct ScriptedLoader {
    scripts: Mutex<VecDeque<Script>>,
    opens: Mutex<Vec<LoaderRange>>,
}

impl ScriptedLoader {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            opens: Mutex::new(Vec::new()),
        })
    }

    /// Ranges passed to `open`, in call order.
    pub fn opens(&self) -> Vec<LoaderRange> {
        self.opens.lock().clone()
    }
}

struct ScriptedResponse {
    content_length: Option<u64>,
    body: VecDeque<Result<Bytes, LoaderError>>,
}

#[async_trait]
impl LoaderResponse for ScriptedResponse {
    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn redirected_url(&self) -> Option<&str> {
        None
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, LoaderError> {
        match self.body.pop_front() {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Loader for ScriptedLoader {
    fn loader_type(&self) -> &'static str {
        "scripted-loader"
    }

    async fn open(
        &self,
        _source: &DataSource,
        range: LoaderRange,
    ) -> Result<Box<dyn LoaderResponse>, LoaderError> {
        self.opens.lock().push(range);
        match self.scripts.lock().pop_front() {
            Some(Script::Respond {
                content_length,
                body,
            }) => Ok(Box::new(ScriptedResponse {
                content_length,
                body: body.into(),
            })),
            Some(Script::Fail(error)) => Err(error),
            None => Err(LoaderError::exception(-1, "no scripted response left")),
        }
    }
}

/// Consumer that takes at most `limit` bytes per dispatch and records what it saw.
pub struct RecordingConsumer {
    pub limit: usize,
    pub dispatches: Vec<(u64, usize)>,
    pub consumed: u64,
    pub seeks: usize,
    pub recovered: usize,
}

impl RecordingConsumer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            dispatches: Vec::new(),
            consumed: 0,
            seeks: 0,
            recovered: 0,
        }
    }
}

impl ChunkConsumer for RecordingConsumer {
    fn on_data_arrival(&mut self, chunk: &[u8], byte_start: u64) -> usize {
        self.dispatches.push((byte_start, chunk.len()));
        let taken = chunk.len().min(self.limit);
        self.consumed += taken as u64;
        taken
    }

    fn on_seeked(&mut self) {
        self.seeks += 1;
    }

    fn on_recovered_early_eof(&mut self) {
        self.recovered += 1;
    }
}

pub const PMT_PID: u16 = 0x1000;
pub const AUDIO_PID: u16 = 0x101;

fn section(table_id: u8, id: u16, body: &[u8]) -> Vec<u8> {
    let section_length = 5 + body.len() + 4;
    let mut data = vec![
        table_id,
        0xb0 | (section_length >> 8) as u8,
        section_length as u8,
        (id >> 8) as u8,
        id as u8,
        0xc1,
        0x00,
        0x00,
    ];
    data.extend_from_slice(body);
    data.extend_from_slice(&[0, 0, 0, 0]);
    data
}

fn pat() -> Vec<u8> {
    section(0x00, 1, &[0x00, 0x01, 0xe0 | (PMT_PID >> 8) as u8, PMT_PID as u8])
}

/// PMT with a single ADTS AAC stream, which also carries the PCR.
fn pmt() -> Vec<u8> {
    let body = [
        0xe0 | (AUDIO_PID >> 8) as u8,
        AUDIO_PID as u8,
        0xf0,
        0x00,
        0x0f,
        0xe0 | (AUDIO_PID >> 8) as u8,
        AUDIO_PID as u8,
        0xf0,
        0x00,
    ];
    section(0x02, 1, &body)
}

fn pes(stream_id: u8, pts: u64, payload: &[u8]) -> Vec<u8> {
    let length = 3 + 5 + payload.len();
    let mut data = vec![
        0x00,
        0x00,
        0x01,
        stream_id,
        (length >> 8) as u8,
        length as u8,
        0x80,
        0x80,
        0x05,
        0x21 | (((pts >> 30) as u8 & 0x07) << 1),
        (pts >> 22) as u8,
        (((pts >> 15) as u8) << 1) | 1,
        (pts >> 7) as u8,
        ((pts as u8) << 1) | 1,
    ];
    data.extend_from_slice(payload);
    data
}

/// One packet per payload; payloads must fit in 183 bytes.
fn packet(pid: u16, payload: &[u8], is_section: bool) -> Vec<u8> {
    let mut body = Vec::new();
    if is_section {
        body.push(0x00);
    }
    body.extend_from_slice(payload);
    assert!(body.len() <= 183);

    let mut out = vec![0x47, 0x40 | (pid >> 8) as u8, pid as u8];
    if is_section {
        out.push(0x10);
        body.resize(184, 0xff);
    } else {
        let stuffing = 184 - body.len();
        out.push(0x30);
        out.push((stuffing - 1) as u8);
        if stuffing > 1 {
            out.push(0x00);
            out.extend(std::iter::repeat(0xff).take(stuffing - 2));
        }
    }
    out.extend(body);
    assert_eq!(out.len(), 188);
    out
}

fn adts_frame(payload: &[u8]) -> Vec<u8> {
    // LC, 44.1 kHz, stereo, no CRC
    let len = payload.len() + 7;
    let mut frame = vec![
        0xff,
        0xf1,
        0x50,
        0x80 | ((len >> 11) as u8 & 0x03),
        (len >> 3) as u8,
        ((len as u8 & 0x07) << 5) | 0x1f,
        0xfc,
    ];
    frame.extend_from_slice(payload);
    frame
}

/// Audio-only program with `frames` ADTS frames, one PES per frame.
pub fn adts_program(frames: u64) -> Vec<u8> {
    let mut ts = packet(0, &pat(), true);
    ts.extend(packet(PMT_PID, &pmt(), true));
    for i in 0..frames {
        let frame = adts_frame(&[i as u8; 32]);
        // 1024 samples at 44.1 kHz is 2089.8 ticks
        let pts = 180_000 + i * 2090;
        ts.extend(packet(AUDIO_PID, &pes(0xc0, pts, &frame), false));
    }
    ts
}
