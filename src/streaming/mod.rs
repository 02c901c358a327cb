// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! GetResult streaming pipeline
//!
//! Pulls records from a provider and writes them to the response one at a
//! time, flushing after each record so clients see data as it is produced.
//! The pipeline keeps no state across requests.

pub mod mp4;

use serde::Serialize;
use std::io::Write;

use crate::error::{Result, SosError};
use crate::provider::DataProvider;
use crate::swe::{self, DataEncoding, H264_COMPRESSION};

/// Output of a streamed response
pub trait ResponseSink: Write {
    /// Must be called before the first byte is written
    fn set_content_type(&mut self, content_type: &str);
}

/// In-memory sink
#[derive(Debug, Default)]
pub struct BufferedResponse {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub flushes: usize,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Write for BufferedResponse {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

impl ResponseSink for BufferedResponse {
    fn set_content_type(&mut self, content_type: &str) {
        self.content_type = Some(content_type.to_string());
    }
}

/// Output framing of a result stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Records encoded back to back with the provider's encoding
    Generic,
    /// Fragmented MP4 carrying H.264 frames
    Mp4,
}

impl std::fmt::Display for Framing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Framing::Generic => write!(f, "generic"),
            Framing::Mp4 => write!(f, "mp4"),
        }
    }
}

/// MP4 framing applies when the first binary member is an H.264 block
pub fn select_framing(encoding: &DataEncoding) -> Framing {
    match encoding.first_block_compression() {
        Some(c) if c == H264_COMPRESSION => Framing::Mp4,
        _ => Framing::Generic,
    }
}

/// What a completed stream wrote
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub content_type: String,
    pub framing: Framing,
    pub records: usize,
}

/// Stream every record of `provider` to `sink`
///
/// Each record is written and flushed; one final flush follows the last
/// record. A write failure aborts the loop and drops the provider.
pub fn write_result_stream(
    mut provider: Box<dyn DataProvider>,
    sink: &mut dyn ResponseSink,
) -> Result<StreamSummary> {
    let structure = provider.result_structure()?;
    let encoding = provider.default_encoding()?;
    let framing = select_framing(&encoding);
    let content_type = match framing {
        Framing::Mp4 => "video/mp4",
        Framing::Generic => encoding.mime_type(),
    };
    sink.set_content_type(content_type);
    log::debug!("Streaming results with {} framing ({})", framing, content_type);

    let mut buf = Vec::new();
    let mut records = 0;
    match framing {
        Framing::Generic => {
            let mut writer = swe::create_writer(&structure, &encoding)?;
            while let Some(record) = provider.next_record()? {
                buf.clear();
                writer.write_record(&record, &mut buf)?;
                emit(sink, &buf)?;
                records += 1;
            }
        }
        Framing::Mp4 => {
            sink.write_all(&mp4::MP4_HEADER).map_err(SosError::Streaming)?;
            let mut fragments = mp4::FragmentWriter::new();
            while let Some(record) = provider.next_record()? {
                buf.clear();
                fragments.write_fragment(&record, record.time(&structure), &mut buf)?;
                emit(sink, &buf)?;
                records += 1;
            }
        }
    }
    sink.flush().map_err(SosError::Streaming)?;

    Ok(StreamSummary {
        content_type: content_type.to_string(),
        framing,
        records,
    })
}

fn emit(sink: &mut dyn ResponseSink, bytes: &[u8]) -> Result<()> {
    sink.write_all(bytes).map_err(SosError::Streaming)?;
    sink.flush().map_err(SosError::Streaming)
}
