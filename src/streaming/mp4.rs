// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Fragmented MP4 framing for H.264 result streams
//!
//! The stream starts with a fixed initialization segment (`ftyp` + `moov`
//! declaring one 1920x1080 AVC track, timescale 90 kHz, with `mvex` so that
//! fragments may follow). Each record then becomes one `moof` + `mdat`
//! fragment holding a single sample.

use crate::swe::{DataBlock, DataValue};

/// Track timescale declared by the initialization segment
pub const TIMESCALE: u32 = 90_000;

/// Sample duration used when record times are unavailable (30 fps)
pub const DEFAULT_SAMPLE_DURATION: u32 = 3_000;

const TRACK_ID: u32 = 1;

/// tfhd flags: default-base-is-moof
const TFHD_FLAGS: u32 = 0x02_0000;

/// trun flags: data-offset, sample-duration and sample-size present
const TRUN_FLAGS: u32 = 0x00_0301;

const MOOF_SIZE: u32 = 96;
const MDAT_HEADER_SIZE: u32 = 8;

/// Initialization segment written before the first fragment
pub const MP4_HEADER: [u8; 773] = [
    0x00, 0x00, 0x00, 0x20, 0x66, 0x74, 0x79, 0x70, 0x69, 0x73, 0x6f, 0x6d, 0x00, 0x00, 0x02, 0x00,
    0x69, 0x73, 0x6f, 0x6d, 0x69, 0x73, 0x6f, 0x32, 0x61, 0x76, 0x63, 0x31, 0x6d, 0x70, 0x34, 0x31,
    0x00, 0x00, 0x02, 0xe5, 0x6d, 0x6f, 0x6f, 0x76, 0x00, 0x00, 0x00, 0x6c, 0x6d, 0x76, 0x68, 0x64,
    0x00, 0x00, 0x00, 0x00, 0xd0, 0xc3, 0x54, 0x92, 0xd0, 0xc3, 0x54, 0x92, 0x00, 0x00, 0x03, 0xe8,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x18, 0x69, 0x6f, 0x64, 0x73, 0x00, 0x00, 0x00, 0x00,
    0x10, 0x80, 0x80, 0x80, 0x07, 0x00, 0x4f, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x01, 0xd1,
    0x74, 0x72, 0x61, 0x6b, 0x00, 0x00, 0x00, 0x5c, 0x74, 0x6b, 0x68, 0x64, 0x00, 0x00, 0x00, 0x0f,
    0xd0, 0xc3, 0x54, 0x92, 0xd0, 0xc3, 0x54, 0x92, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
    0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x07, 0x80, 0x00, 0x00, 0x04, 0x38, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x6d, 0x6d, 0x64, 0x69, 0x61, 0x00, 0x00, 0x00, 0x20, 0x6d, 0x64, 0x68, 0x64,
    0x00, 0x00, 0x00, 0x00, 0xd0, 0xc3, 0x54, 0x92, 0xd0, 0xc3, 0x54, 0x92, 0x00, 0x01, 0x5f, 0x90,
    0xff, 0xff, 0xff, 0xff, 0x15, 0xc7, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2d, 0x68, 0x64, 0x6c, 0x72,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x76, 0x69, 0x64, 0x65, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x56, 0x69, 0x64, 0x65, 0x6f, 0x48, 0x61, 0x6e,
    0x64, 0x6c, 0x65, 0x72, 0x00, 0x00, 0x00, 0x01, 0x18, 0x6d, 0x69, 0x6e, 0x66, 0x00, 0x00, 0x00,
    0x14, 0x76, 0x6d, 0x68, 0x64, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x24, 0x64, 0x69, 0x6e, 0x66, 0x00, 0x00, 0x00, 0x1c, 0x64, 0x72, 0x65,
    0x66, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x0c, 0x75, 0x72, 0x6c,
    0x20, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0xd8, 0x73, 0x74, 0x62, 0x6c, 0x00, 0x00, 0x00,
    0x8c, 0x73, 0x74, 0x73, 0x64, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
    0x7c, 0x61, 0x76, 0x63, 0x31, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07, 0x80, 0x04,
    0x38, 0x00, 0x48, 0x00, 0x00, 0x00, 0x48, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x18, 0xff, 0xff, 0x00, 0x00, 0x00, 0x26, 0x61, 0x76, 0x63, 0x43, 0x01, 0x42, 0x80, 0x28, 0xff,
    0xe1, 0x00, 0x0f, 0x67, 0x42, 0x80, 0x28, 0xda, 0x01, 0xe0, 0x08, 0x9f, 0x96, 0x01, 0xb4, 0x28,
    0x4d, 0x40, 0x01, 0x00, 0x04, 0x68, 0xce, 0x06, 0xe2, 0x00, 0x00, 0x00, 0x10, 0x73, 0x74, 0x74,
    0x73, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x73, 0x74, 0x73,
    0x63, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x14, 0x73, 0x74, 0x73,
    0x7a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x10, 0x73, 0x74, 0x63, 0x6f, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x28, 0x6d, 0x76, 0x65, 0x78, 0x00, 0x00, 0x00, 0x20, 0x74, 0x72, 0x65, 0x78, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x60, 0x75, 0x64, 0x74, 0x61, 0x00, 0x00, 0x00,
    0x58, 0x6d, 0x65, 0x74, 0x61, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x21, 0x68, 0x64, 0x6c,
    0x72, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x6d, 0x64, 0x69, 0x72, 0x61, 0x70, 0x70,
    0x6c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2b, 0x69, 0x6c,
    0x73, 0x74, 0x00, 0x00, 0x00, 0x23, 0xa9, 0x74, 0x6f, 0x6f, 0x00, 0x00, 0x00, 0x1b, 0x64, 0x61,
    0x74, 0x61, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x4c, 0x61, 0x76, 0x66, 0x35, 0x34,
    0x2e, 0x32, 0x30, 0x2e, 0x34,
];

/// Builds one fragment per record
#[derive(Debug, Default)]
pub struct FragmentWriter {
    sequence: u32,
    first_time: Option<f64>,
    next_decode_time: u64,
}

impl FragmentWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `moof` + `mdat` fragment for `record` to `out`
    ///
    /// `time` is the record's sampling time in epoch seconds, when known.
    pub fn write_fragment(&mut self, record: &DataBlock, time: Option<f64>, out: &mut Vec<u8>) -> crate::Result<()> {
        let frame = record
            .values
            .iter()
            .find_map(|v| match v {
                DataValue::Bytes(b) => Some(b.as_slice()),
                _ => None,
            })
            .ok_or_else(|| crate::SosError::Encoding("Video record carries no frame block".into()))?;
        let sample = annex_b_to_length_prefixed(frame);
        let sample_size = u32::try_from(sample.len())
            .map_err(|_| crate::SosError::Encoding("Video frame exceeds 4 GiB".into()))?;

        let decode_time = match (time, self.first_time) {
            (Some(t), Some(t0)) if t >= t0 => ((t - t0) * f64::from(TIMESCALE)).round() as u64,
            (Some(t), None) => {
                self.first_time = Some(t);
                0
            }
            _ => self.next_decode_time,
        };
        self.sequence += 1;
        self.next_decode_time = decode_time + u64::from(DEFAULT_SAMPLE_DURATION);

        // moof
        put_box_header(out, MOOF_SIZE, b"moof");
        put_box_header(out, 16, b"mfhd");
        put_u32(out, 0);
        put_u32(out, self.sequence);
        put_box_header(out, MOOF_SIZE - 24, b"traf");
        put_box_header(out, 16, b"tfhd");
        put_u32(out, TFHD_FLAGS);
        put_u32(out, TRACK_ID);
        put_box_header(out, 20, b"tfdt");
        put_u32(out, 0x0100_0000);
        out.extend_from_slice(&decode_time.to_be_bytes());
        put_box_header(out, 28, b"trun");
        put_u32(out, TRUN_FLAGS);
        put_u32(out, 1);
        put_u32(out, MOOF_SIZE + MDAT_HEADER_SIZE);
        put_u32(out, DEFAULT_SAMPLE_DURATION);
        put_u32(out, sample_size);

        // mdat
        put_box_header(out, MDAT_HEADER_SIZE + sample_size, b"mdat");
        out.extend_from_slice(&sample);
        Ok(())
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_box_header(out: &mut Vec<u8>, size: u32, kind: &[u8; 4]) {
    put_u32(out, size);
    out.extend_from_slice(kind);
}

/// Convert Annex-B start-code delimited NAL units to 4-byte length prefixes
///
/// Input without a leading start code is assumed to be length-prefixed already.
pub fn annex_b_to_length_prefixed(frame: &[u8]) -> Vec<u8> {
    let starts = start_codes(frame);
    if starts.first().map(|&(pos, _)| pos) != Some(0) {
        return frame.to_vec();
    }
    let mut out = Vec::with_capacity(frame.len() + 4 * starts.len());
    for (i, &(pos, len)) in starts.iter().enumerate() {
        let begin = pos + len;
        let end = starts.get(i + 1).map(|&(next, _)| next).unwrap_or(frame.len());
        let nal = &frame[begin..end];
        if nal.is_empty() {
            continue;
        }
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}

/// Positions and lengths of 3- and 4-byte start codes
fn start_codes(data: &[u8]) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                found.push((i, 3));
                i += 3;
                continue;
            }
            if data[i + 2] == 0 && i + 4 <= data.len() && data[i + 3] == 1 {
                found.push((i, 4));
                i += 4;
                continue;
            }
        }
        i += 1;
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_at(buf: &[u8], offset: usize) -> (u32, &[u8]) {
        let size = u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]]);
        (size, &buf[offset + 4..offset + 8])
    }

    #[test]
    fn test_header_boxes() {
        let (ftyp, kind) = box_at(&MP4_HEADER, 0);
        assert_eq!(kind, b"ftyp");
        let (moov, kind) = box_at(&MP4_HEADER, ftyp as usize);
        assert_eq!(kind, b"moov");
        assert_eq!((ftyp + moov) as usize, MP4_HEADER.len());
    }

    #[test]
    fn test_annex_b_conversion() {
        let frame = [0, 0, 0, 1, 0x67, 0xAA, 0, 0, 1, 0x68, 0xBB, 0xCC];
        let out = annex_b_to_length_prefixed(&frame);
        assert_eq!(out, vec![0, 0, 0, 2, 0x67, 0xAA, 0, 0, 0, 3, 0x68, 0xBB, 0xCC]);
    }

    #[test]
    fn test_length_prefixed_passthrough() {
        let frame = [0, 0, 0, 2, 0x65, 0x01];
        assert_eq!(annex_b_to_length_prefixed(&frame), frame.to_vec());
    }

    #[test]
    fn test_fragment_layout() {
        let mut writer = FragmentWriter::new();
        let record = DataBlock::new(vec![
            DataValue::Time(10.0),
            DataValue::Bytes(vec![0, 0, 0, 1, 0x65, 0x88, 0x84]),
        ]);
        let mut out = Vec::new();
        writer.write_fragment(&record, Some(10.0), &mut out).unwrap();

        let (moof, kind) = box_at(&out, 0);
        assert_eq!(kind, b"moof");
        assert_eq!(moof, MOOF_SIZE);
        let (mdat, kind) = box_at(&out, moof as usize);
        assert_eq!(kind, b"mdat");
        assert_eq!(mdat as usize, 8 + 4 + 3);
        assert_eq!(out.len(), (moof + mdat) as usize);
        // data offset points at the sample
        let data_offset = (MOOF_SIZE + MDAT_HEADER_SIZE) as usize;
        assert_eq!(&out[data_offset..data_offset + 4], &[0, 0, 0, 3]);

        let mut second = Vec::new();
        writer.write_fragment(&record, Some(10.5), &mut second).unwrap();
        // tfdt base media decode time, half a second later
        let tfdt = 8 + 16 + 8 + 16 + 12;
        let decode = u64::from_be_bytes(second[tfdt..tfdt + 8].try_into().unwrap());
        assert_eq!(decode, 45_000);
    }

    #[test]
    fn test_record_without_frame() {
        let mut writer = FragmentWriter::new();
        let record = DataBlock::new(vec![DataValue::Time(0.0)]);
        assert!(writer.write_fragment(&record, None, &mut Vec::new()).is_err());
    }
}
