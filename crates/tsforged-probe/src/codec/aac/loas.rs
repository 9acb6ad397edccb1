//! LOAS/LATM (AudioSyncStream) frame scanning

use bytes::Bytes;

use super::{sampling_frequency, AacFrame};
use crate::bitreader::BitReader;
use crate::error::{ProbeError, Result};

/// Stream parameters carried by a StreamMuxConfig
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMuxConfig {
    pub audio_object_type: u8,
    pub sampling_freq_index: u8,
    pub sampling_frequency: u32,
    pub channel_config: u8,
    pub other_data_present: bool,
}

/// Scanner over the AudioMuxElements of one PES payload
pub struct LoasParser<'a> {
    data: &'a [u8],
    current: usize,
    eof: bool,
    has_incomplete_data: bool,
}

enum Element {
    Frame(StreamMuxConfig, Bytes),
    /// Config elided and no previous config known
    MissingConfig,
}

impl<'a> LoasParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let mut parser = Self {
            data,
            current: 0,
            eof: false,
            has_incomplete_data: false,
        };
        parser.current = parser.find_next_syncword(0);
        if parser.eof {
            tracing::error!("could not find LOAS syncword until payload end");
        }
        parser
    }

    fn find_next_syncword(&mut self, from: usize) -> usize {
        let data = self.data;
        let mut i = from;
        loop {
            if i + 1 >= data.len() {
                self.eof = true;
                return data.len();
            }
            // 11-bit 0x2B7 syncword
            if (u16::from(data[i]) << 3) | u16::from(data[i + 1] >> 5) == 0x2b7 {
                return i;
            }
            i += 1;
        }
    }

    /// Next complete frame. `previous` supplies the config for elements that
    /// set useSameStreamMux.
    pub fn next_frame(
        &mut self,
        previous: Option<&StreamMuxConfig>,
    ) -> Option<(AacFrame, StreamMuxConfig)> {
        let data = self.data;

        while !self.eof {
            let offset = self.current;
            if offset + 2 >= data.len() {
                self.eof = true;
                self.has_incomplete_data = true;
                break;
            }

            let mux_length = (usize::from(data[offset + 1] & 0x1f) << 8) | usize::from(data[offset + 2]);
            let element_end = offset + 3 + mux_length;
            if element_end > data.len() {
                // Partial element at payload end
                self.eof = true;
                self.has_incomplete_data = true;
                break;
            }

            let element = parse_audio_mux_element(&data[offset + 3..element_end], previous);
            self.current = self.find_next_syncword(element_end);

            match element {
                Ok(Element::Frame(config, payload)) => {
                    return Some((
                        AacFrame {
                            audio_object_type: config.audio_object_type,
                            sampling_freq_index: config.sampling_freq_index,
                            sampling_frequency: config.sampling_frequency,
                            channel_config: config.channel_config,
                            data: payload,
                        },
                        config,
                    ));
                }
                Ok(Element::MissingConfig) => {
                    tracing::warn!("LOAS StreamMuxConfig missing");
                }
                Err(e) => {
                    tracing::error!("unsupported or malformed AudioMuxElement: {}", e);
                    break;
                }
            }
        }

        None
    }

    pub fn has_incomplete_data(&self) -> bool {
        self.has_incomplete_data
    }

    /// Bytes of the trailing partial element, to be prefixed to the next payload.
    pub fn incomplete_data(&self) -> Option<&'a [u8]> {
        if self.has_incomplete_data {
            Some(&self.data[self.current..])
        } else {
            None
        }
    }
}

fn latm_value(reader: &mut BitReader) -> Result<u32> {
    let bytes_for_value = reader.read_bits(2)?;
    let mut value = 0u32;
    for _ in 0..=bytes_for_value {
        value = (value << 8) | u32::from(reader.read_byte()?);
    }
    Ok(value)
}

fn parse_audio_mux_element(element: &[u8], previous: Option<&StreamMuxConfig>) -> Result<Element> {
    let mut reader = BitReader::new(element);

    // useSameStreamMux
    let config = if reader.read_bool()? {
        match previous {
            Some(config) => *config,
            None => return Ok(Element::MissingConfig),
        }
    } else {
        parse_stream_mux_config(&mut reader)?
    };

    // PayloadLengthInfo, frameLengthType 0
    let mut length = 0usize;
    loop {
        let tmp = reader.read_byte()?;
        length += usize::from(tmp);
        if tmp != 0xff {
            break;
        }
    }

    let mut payload = Vec::with_capacity(length);
    for _ in 0..length {
        payload.push(reader.read_byte()?);
    }

    Ok(Element::Frame(config, Bytes::from(payload)))
}

fn parse_stream_mux_config(reader: &mut BitReader) -> Result<StreamMuxConfig> {
    let audio_mux_version = reader.read_bool()?;
    let audio_mux_version_a = audio_mux_version && reader.read_bool()?;
    if audio_mux_version_a {
        return Err(ProbeError::unsupported("audioMuxVersionA"));
    }
    if audio_mux_version {
        // taraBufferFullness
        latm_value(reader)?;
    }
    if !reader.read_bool()? {
        return Err(ProbeError::unsupported("allStreamsSameTimeFraming = 0"));
    }
    if reader.read_bits(6)? != 0 {
        return Err(ProbeError::unsupported("numSubFrames > 0"));
    }
    if reader.read_bits(4)? != 0 {
        return Err(ProbeError::unsupported("numProgram > 0"));
    }
    if reader.read_bits(3)? != 0 {
        return Err(ProbeError::unsupported("numLayer > 0"));
    }

    // AudioSpecificConfig, padded to ascLen bits for audioMuxVersion 1
    let mut fill_bits = if audio_mux_version {
        i64::from(latm_value(reader)?)
    } else {
        0
    };
    let audio_object_type = reader.read_bits(5)? as u8;
    let sampling_freq_index = reader.read_bits(4)? as u8;
    let channel_config = reader.read_bits(4)? as u8;
    // GASpecificConfig
    reader.read_bits(3)?;
    fill_bits -= 16;
    if fill_bits > 0 {
        reader.skip_bits(fill_bits as u64)?;
    }

    let frame_length_type = reader.read_bits(3)?;
    if frame_length_type != 0 {
        return Err(ProbeError::unsupported(format!(
            "frameLengthType = {frame_length_type}"
        )));
    }
    // latmBufferFullness
    reader.read_byte()?;

    let other_data_present = reader.read_bool()?;
    if other_data_present {
        if audio_mux_version {
            latm_value(reader)?;
        } else {
            loop {
                let escape = reader.read_bool()?;
                reader.read_byte()?;
                if !escape {
                    break;
                }
            }
        }
    }

    // crcCheckPresent
    if reader.read_bool()? {
        reader.read_byte()?;
    }

    let sampling_frequency = sampling_frequency(sampling_freq_index).ok_or_else(|| {
        ProbeError::malformed(format!("LATM sampling index {sampling_freq_index}"))
    })?;

    Ok(StreamMuxConfig {
        audio_object_type,
        sampling_freq_index,
        sampling_frequency,
        channel_config,
        other_data_present,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream_io::{BigEndian, BitWrite, BitWriter};

    /// AudioMuxElement with audioMuxVersion 0, LC 44.1 kHz stereo
    fn element(same_mux: bool, payload: &[u8]) -> Vec<u8> {
        let mut w = BitWriter::endian(Vec::new(), BigEndian);
        w.write_bit(same_mux).unwrap();
        if !same_mux {
            w.write_bit(false).unwrap(); // audioMuxVersion
            w.write_bit(true).unwrap(); // allStreamsSameTimeFraming
            w.write(6, 0u32).unwrap();
            w.write(4, 0u32).unwrap();
            w.write(3, 0u32).unwrap();
            w.write(5, 2u32).unwrap(); // AOT LC
            w.write(4, 4u32).unwrap(); // 44100
            w.write(4, 2u32).unwrap(); // stereo
            w.write(3, 0u32).unwrap();
            w.write(3, 0u32).unwrap(); // frameLengthType
            w.write(8, 0xffu32).unwrap();
            w.write_bit(false).unwrap(); // otherDataPresent
            w.write_bit(false).unwrap(); // crcCheckPresent
        }
        w.write(8, payload.len() as u32).unwrap();
        for &b in payload {
            w.write(8, u32::from(b)).unwrap();
        }
        w.byte_align().unwrap();
        let body = w.into_writer();

        let mut out = vec![0x56, 0xe0 | (body.len() >> 8) as u8, body.len() as u8];
        out.extend(body);
        out
    }

    #[test]
    fn test_config_then_same_stream_mux() {
        let mut data = element(false, &[1, 2, 3]);
        data.extend(element(true, &[4, 5]));

        let mut parser = LoasParser::new(&data);
        let (frame, config) = parser.next_frame(None).unwrap();
        assert_eq!(frame.audio_object_type, 2);
        assert_eq!(frame.sampling_frequency, 44100);
        assert_eq!(frame.channel_config, 2);
        assert_eq!(&frame.data[..], &[1, 2, 3]);

        let (frame, _) = parser.next_frame(Some(&config)).unwrap();
        assert_eq!(&frame.data[..], &[4, 5]);
        assert!(parser.next_frame(Some(&config)).is_none());
        assert!(!parser.has_incomplete_data());
    }

    #[test]
    fn test_same_stream_mux_without_config_is_skipped() {
        let mut data = element(true, &[9, 9]);
        data.extend(element(false, &[1]));

        let mut parser = LoasParser::new(&data);
        let (frame, _) = parser.next_frame(None).unwrap();
        assert_eq!(&frame.data[..], &[1]);
    }

    #[test]
    fn test_partial_element() {
        let full = element(false, &[1, 2, 3, 4, 5, 6]);
        let data = &full[..full.len() - 2];
        let mut parser = LoasParser::new(data);
        assert!(parser.next_frame(None).is_none());
        assert!(parser.has_incomplete_data());
        assert_eq!(parser.incomplete_data().unwrap().len(), data.len());
    }
}
