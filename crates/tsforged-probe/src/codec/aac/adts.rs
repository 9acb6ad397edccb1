//! ADTS frame scanning

use bytes::Bytes;

use super::{sampling_frequency, AacFrame};

/// Scanner over the ADTS frames of one PES payload
pub struct AdtsParser<'a> {
    data: &'a [u8],
    current: usize,
    eof: bool,
    has_incomplete_data: bool,
}

impl<'a> AdtsParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let mut parser = Self {
            data,
            current: 0,
            eof: false,
            has_incomplete_data: false,
        };
        parser.current = parser.find_next_syncword(0);
        if parser.eof {
            tracing::error!("could not find ADTS syncword until payload end");
        }
        parser
    }

    fn find_next_syncword(&mut self, from: usize) -> usize {
        let data = self.data;
        let mut i = from;
        loop {
            if i + 7 >= data.len() {
                self.eof = true;
                return data.len();
            }
            // 12-bit 0xFFF syncword
            if data[i] == 0xff && data[i + 1] & 0xf0 == 0xf0 {
                return i;
            }
            i += 1;
        }
    }

    /// Next complete frame, or `None` at end of payload.
    pub fn next_frame(&mut self) -> Option<AacFrame> {
        let data = self.data;

        while !self.eof {
            let offset = self.current;

            // adts_fixed_header()
            let id = (data[offset + 1] & 0x08) >> 3;
            let layer = (data[offset + 1] & 0x06) >> 1;
            let protection_absent = data[offset + 1] & 0x01;
            let profile = (data[offset + 2] & 0xc0) >> 6;
            let sampling_freq_index = (data[offset + 2] & 0x3c) >> 2;
            let channel_config = ((data[offset + 2] & 0x01) << 2) | ((data[offset + 3] & 0xc0) >> 6);

            // adts_variable_header()
            let frame_length = (usize::from(data[offset + 3] & 0x03) << 11)
                | (usize::from(data[offset + 4]) << 3)
                | usize::from((data[offset + 5] & 0xe0) >> 5);

            if offset + frame_length > data.len() {
                // Partial frame at payload end
                self.eof = true;
                self.has_incomplete_data = true;
                break;
            }

            let header_length = if protection_absent == 1 { 7 } else { 9 };
            if frame_length <= header_length {
                tracing::warn!("ADTS frame length {} shorter than its header", frame_length);
                self.current = self.find_next_syncword(offset + 1);
                continue;
            }

            let payload_start = offset + header_length;
            let payload_end = offset + frame_length;
            self.current = self.find_next_syncword(payload_end);

            let Some(sampling_frequency) = sampling_frequency(sampling_freq_index) else {
                tracing::warn!("ADTS reserved sampling index {}", sampling_freq_index);
                continue;
            };
            if id > 1 || layer != 0 {
                continue;
            }

            return Some(AacFrame {
                audio_object_type: profile + 1,
                sampling_freq_index,
                sampling_frequency,
                channel_config,
                data: Bytes::copy_from_slice(&data[payload_start..payload_end]),
            });
        }

        None
    }

    pub fn has_incomplete_data(&self) -> bool {
        self.has_incomplete_data
    }

    /// Bytes of the trailing partial frame, to be prefixed to the next payload.
    pub fn incomplete_data(&self) -> Option<&'a [u8]> {
        if self.has_incomplete_data {
            Some(&self.data[self.current..])
        } else {
            None
        }
    }
}
