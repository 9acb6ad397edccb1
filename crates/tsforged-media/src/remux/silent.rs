//! Pre-encoded silent AAC frames used to fill audio timestamp gaps.

use bytes::Bytes;

const LC_MONO: &[u8] = &[0x00, 0xc8, 0x00, 0x80, 0x23, 0x80];
const LC_STEREO: &[u8] = &[0x21, 0x00, 0x49, 0x90, 0x02, 0x19, 0x00, 0x23, 0x80];
const LC_3CH: &[u8] = &[
    0x00, 0xc8, 0x00, 0x80, 0x20, 0x84, 0x01, 0x26, 0x40, 0x08, 0x64, 0x00, 0x8e,
];
const LC_4CH: &[u8] = &[
    0x00, 0xc8, 0x00, 0x80, 0x20, 0x84, 0x01, 0x26, 0x40, 0x08, 0x64, 0x00, 0x80, 0x2c, 0x80, 0x08,
    0x02, 0x38,
];
const LC_5CH: &[u8] = &[
    0x00, 0xc8, 0x00, 0x80, 0x20, 0x84, 0x01, 0x26, 0x40, 0x08, 0x64, 0x00, 0x82, 0x30, 0x04, 0x99,
    0x00, 0x21, 0x90, 0x02, 0x38,
];
const LC_6CH: &[u8] = &[
    0x00, 0xc8, 0x00, 0x80, 0x20, 0x84, 0x01, 0x26, 0x40, 0x08, 0x64, 0x00, 0x82, 0x30, 0x04, 0x99,
    0x00, 0x21, 0x90, 0x02, 0x00, 0xb2, 0x00, 0x20, 0x08, 0xe0,
];

// HE-AAC frames: SBR header followed by a run of 0x5a fill bits
const HE_MONO_HEAD: &[u8] = &[
    0x01, 0x40, 0x22, 0x80, 0xa3, 0x4e, 0xe6, 0x80, 0xba, 0x08, 0x00, 0x00, 0x00, 0x1c, 0x06, 0xf1,
    0xc1, 0x0a,
];
const HE_STEREO_HEAD: &[u8] = &[
    0x01, 0x40, 0x22, 0x80, 0xa3, 0x5e, 0xe6, 0x80, 0xba, 0x08, 0x00, 0x00, 0x00, 0x00, 0x95, 0x00,
    0x06, 0xf1, 0xa1, 0x0a,
];
const HE_FILL_LEN: usize = 44;

fn he_frame(head: &[u8]) -> Bytes {
    let mut frame = Vec::with_capacity(head.len() + HE_FILL_LEN + 1);
    frame.extend_from_slice(head);
    frame.resize(head.len() + HE_FILL_LEN, 0x5a);
    frame.push(0x5e);
    Bytes::from(frame)
}

/// Silent raw AAC frame for the object type found in the stream.
///
/// `original_codec` is the stream's own codec string; LC (`mp4a.40.2`) gets
/// an LC frame, anything else an HE-AAC frame. Returns `None` for channel
/// layouts without a known frame.
pub fn silent_frame(original_codec: &str, channel_count: u8) -> Option<Bytes> {
    if original_codec == "mp4a.40.2" {
        let frame = match channel_count {
            1 => LC_MONO,
            2 => LC_STEREO,
            3 => LC_3CH,
            4 => LC_4CH,
            5 => LC_5CH,
            6 => LC_6CH,
            _ => return None,
        };
        Some(Bytes::from_static(frame))
    } else {
        match channel_count {
            1 => Some(he_frame(HE_MONO_HEAD)),
            2 | 3 => Some(he_frame(HE_STEREO_HEAD)),
            _ => None,
        }
    }
}
