// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Delimited text record codec

use std::io::{Read, Write};

use super::{leaf_kinds, value_mismatch, ComponentKind, DataBlock, DataComponent, DataValue};
use super::{RecordParser, RecordWriter};
use crate::error::{Result, SosError};
use crate::time::{datetime_to_epoch, epoch_to_datetime, parse_iso};

const READ_CHUNK: usize = 4096;

fn check_separators(token: &str, block: &str) -> Result<()> {
    if token.is_empty() || block.is_empty() {
        return Err(SosError::Encoding("Text encoding separators must not be empty".into()));
    }
    if token == block {
        return Err(SosError::Encoding("Token and block separators must differ".into()));
    }
    Ok(())
}

fn check_kinds(kinds: &[ComponentKind]) -> Result<()> {
    if kinds.iter().any(|k| *k == ComponentKind::Blob) {
        return Err(SosError::Encoding(
            "Binary blocks cannot be carried by a text encoding".into(),
        ));
    }
    Ok(())
}

/// Writes one line of separated tokens per record
pub struct TextWriter {
    kinds: Vec<ComponentKind>,
    token_separator: String,
    block_separator: String,
    decimal_separator: char,
}

impl TextWriter {
    pub fn new(
        structure: &DataComponent,
        token_separator: &str,
        block_separator: &str,
        decimal_separator: char,
    ) -> Result<Self> {
        check_separators(token_separator, block_separator)?;
        let kinds = leaf_kinds(structure);
        check_kinds(&kinds)?;
        Ok(Self {
            kinds,
            token_separator: token_separator.to_string(),
            block_separator: block_separator.to_string(),
            decimal_separator,
        })
    }

    fn format_decimal(&self, v: f64) -> String {
        let s = v.to_string();
        if self.decimal_separator == '.' {
            s
        } else {
            s.replace('.', &self.decimal_separator.to_string())
        }
    }

    fn format_value(&self, leaf: usize, kind: &ComponentKind, value: &DataValue) -> Result<String> {
        let token = match (kind, value) {
            (ComponentKind::Time, v) => match v.as_f64() {
                Some(t) => epoch_to_datetime(t).to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
                None => return Err(value_mismatch(leaf, kind, value)),
            },
            (ComponentKind::Quantity { .. }, v) => match v.as_f64() {
                Some(x) => self.format_decimal(x),
                None => return Err(value_mismatch(leaf, kind, value)),
            },
            (ComponentKind::Count, DataValue::Integer(n)) => n.to_string(),
            (ComponentKind::Boolean, DataValue::Boolean(b)) => b.to_string(),
            (ComponentKind::Text | ComponentKind::Category, DataValue::Text(s)) => s.clone(),
            _ => return Err(value_mismatch(leaf, kind, value)),
        };
        Ok(token)
    }
}

impl RecordWriter for TextWriter {
    fn write_record(&mut self, block: &DataBlock, out: &mut dyn Write) -> Result<()> {
        if block.values.len() != self.kinds.len() {
            return Err(SosError::Encoding(format!(
                "Record has {} values, structure expects {}",
                block.values.len(),
                self.kinds.len()
            )));
        }
        let mut line = String::new();
        for (i, (kind, value)) in self.kinds.iter().zip(&block.values).enumerate() {
            if i > 0 {
                line.push_str(&self.token_separator);
            }
            line.push_str(&self.format_value(i, kind, value)?);
        }
        line.push_str(&self.block_separator);
        out.write_all(line.as_bytes()).map_err(SosError::Streaming)
    }
}

/// Reads separated records from a byte stream
pub struct TextParser<'a> {
    kinds: Vec<ComponentKind>,
    token_separator: String,
    block_separator: String,
    decimal_separator: char,
    input: Option<Box<dyn Read + 'a>>,
    buffer: Vec<u8>,
    eof: bool,
}

impl<'a> TextParser<'a> {
    pub fn new(
        structure: &DataComponent,
        token_separator: &str,
        block_separator: &str,
        decimal_separator: char,
        input: Box<dyn Read + 'a>,
    ) -> Result<Self> {
        check_separators(token_separator, block_separator)?;
        let kinds = leaf_kinds(structure);
        check_kinds(&kinds)?;
        Ok(Self {
            kinds,
            token_separator: token_separator.to_string(),
            block_separator: block_separator.to_string(),
            decimal_separator,
            input: Some(input),
            buffer: Vec::new(),
            eof: false,
        })
    }

    fn take_block(&mut self) -> Result<Option<String>> {
        let sep = self.block_separator.as_bytes().to_vec();
        loop {
            if let Some(pos) = find(&self.buffer, &sep) {
                let rest = self.buffer.split_off(pos + sep.len());
                let mut block = std::mem::replace(&mut self.buffer, rest);
                block.truncate(pos);
                if block.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return utf8(block).map(Some);
            }
            if self.eof {
                if self.buffer.iter().all(u8::is_ascii_whitespace) {
                    self.buffer.clear();
                    return Ok(None);
                }
                let block = std::mem::take(&mut self.buffer);
                return utf8(block).map(Some);
            }
            let Some(input) = self.input.as_mut() else {
                return Ok(None);
            };
            let mut chunk = [0u8; READ_CHUNK];
            let n = input.read(&mut chunk)?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buffer.extend_from_slice(&chunk[..n]);
            }
        }
    }

    fn parse_token(&self, leaf: usize, kind: &ComponentKind, token: &str) -> Result<DataValue> {
        let token = token.trim();
        let invalid = || {
            SosError::Encoding(format!(
                "Invalid token '{}' for component #{} of type {:?}",
                token, leaf, kind
            ))
        };
        let value = match kind {
            ComponentKind::Time => DataValue::Time(datetime_to_epoch(parse_iso(token)?)),
            ComponentKind::Quantity { .. } => {
                let normalized = token.replace(self.decimal_separator, ".");
                DataValue::Double(normalized.parse().map_err(|_| invalid())?)
            }
            ComponentKind::Count => DataValue::Integer(token.parse().map_err(|_| invalid())?),
            ComponentKind::Boolean => match token {
                "true" | "1" => DataValue::Boolean(true),
                "false" | "0" => DataValue::Boolean(false),
                _ => return Err(invalid()),
            },
            ComponentKind::Text | ComponentKind::Category => DataValue::Text(token.to_string()),
            ComponentKind::Blob | ComponentKind::Record { .. } => return Err(invalid()),
        };
        Ok(value)
    }
}

impl RecordParser for TextParser<'_> {
    fn parse_next(&mut self) -> Result<Option<DataBlock>> {
        if self.input.is_none() {
            return Ok(None);
        }
        let Some(block) = self.take_block()? else {
            return Ok(None);
        };
        let tokens: Vec<&str> = block.split(self.token_separator.as_str()).collect();
        if tokens.len() != self.kinds.len() {
            return Err(SosError::Encoding(format!(
                "Record '{}' has {} tokens, structure expects {}",
                block.trim(),
                tokens.len(),
                self.kinds.len()
            )));
        }
        let values = self
            .kinds
            .iter()
            .zip(tokens)
            .enumerate()
            .map(|(i, (kind, token))| self.parse_token(i, kind, token))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(DataBlock::new(values)))
    }

    fn close(&mut self) {
        self.input = None;
        self.buffer.clear();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| SosError::Encoding(format!("Invalid UTF-8 in record: {}", e)))
}
