// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Binary record codec
//!
//! Each structure leaf is carried by the encoding member at the same position.
//! Scalars use fixed widths in the configured byte order; strings carry a
//! 2-byte length and blocks a 4-byte length unless the member declares a
//! fixed `byte_length`.

use std::io::{ErrorKind, Read, Write};

use super::{leaf_kinds, value_mismatch, BinaryDataType, BinaryMember, ByteOrder, ComponentKind};
use super::{DataBlock, DataComponent, DataValue, RecordParser, RecordWriter};
use crate::error::{Result, SosError};

#[derive(Debug, Clone)]
enum Slot {
    Scalar(BinaryDataType),
    Block(Option<u32>),
}

fn bind_members(structure: &DataComponent, members: &[BinaryMember]) -> Result<Vec<(ComponentKind, Slot)>> {
    let kinds = leaf_kinds(structure);
    if kinds.len() != members.len() {
        return Err(SosError::Encoding(format!(
            "Binary encoding has {} members, structure has {} components",
            members.len(),
            kinds.len()
        )));
    }
    kinds
        .into_iter()
        .zip(members)
        .map(|(kind, member)| {
            let slot = match member {
                BinaryMember::Component { data_type, .. } => {
                    if kind == ComponentKind::Blob {
                        return Err(SosError::Encoding(format!(
                            "Member {} must be a block",
                            member.reference()
                        )));
                    }
                    Slot::Scalar(*data_type)
                }
                BinaryMember::Block {
                    byte_length: Some(0),
                    ..
                } => {
                    return Err(SosError::Encoding(format!(
                        "Block {} cannot have a zero byte length",
                        member.reference()
                    )))
                }
                BinaryMember::Block { byte_length, .. } => Slot::Block(*byte_length),
            };
            Ok((kind, slot))
        })
        .collect()
}

macro_rules! put {
    ($buf:expr, $order:expr, $v:expr) => {
        match $order {
            ByteOrder::BigEndian => $buf.extend_from_slice(&$v.to_be_bytes()),
            ByteOrder::LittleEndian => $buf.extend_from_slice(&$v.to_le_bytes()),
        }
    };
}

macro_rules! get {
    ($ty:ty, $order:expr, $bytes:expr) => {{
        let mut raw = [0u8; std::mem::size_of::<$ty>()];
        raw.copy_from_slice(&$bytes);
        match $order {
            ByteOrder::BigEndian => <$ty>::from_be_bytes(raw),
            ByteOrder::LittleEndian => <$ty>::from_le_bytes(raw),
        }
    }};
}

/// Binary record writer
pub struct BinaryWriter {
    byte_order: ByteOrder,
    slots: Vec<(ComponentKind, Slot)>,
}

impl BinaryWriter {
    pub fn new(structure: &DataComponent, byte_order: ByteOrder, members: &[BinaryMember]) -> Result<Self> {
        Ok(Self {
            byte_order,
            slots: bind_members(structure, members)?,
        })
    }

    fn encode(&self, leaf: usize, kind: &ComponentKind, slot: &Slot, value: &DataValue, buf: &mut Vec<u8>) -> Result<()> {
        let order = self.byte_order;
        match (slot, value) {
            (Slot::Block(len), DataValue::Bytes(bytes)) => {
                match len {
                    Some(n) if bytes.len() != *n as usize => {
                        return Err(SosError::Encoding(format!(
                            "Block #{} is {} bytes, expected {}",
                            leaf,
                            bytes.len(),
                            n
                        )))
                    }
                    Some(_) => {}
                    None => {
                        let n = u32::try_from(bytes.len())
                            .map_err(|_| SosError::Encoding("Block exceeds 4 GiB".into()))?;
                        put!(buf, order, n);
                    }
                }
                buf.extend_from_slice(bytes);
            }
            (Slot::Scalar(BinaryDataType::Boolean), DataValue::Boolean(b)) => buf.push(u8::from(*b)),
            (Slot::Scalar(BinaryDataType::SignedInt), DataValue::Integer(n)) => {
                let n = i32::try_from(*n).map_err(|_| value_mismatch(leaf, kind, value))?;
                put!(buf, order, n);
            }
            (Slot::Scalar(BinaryDataType::SignedLong), DataValue::Integer(n)) => put!(buf, order, *n),
            (Slot::Scalar(BinaryDataType::Float), v) => match v.as_f64() {
                Some(x) => put!(buf, order, x as f32),
                None => return Err(value_mismatch(leaf, kind, value)),
            },
            (Slot::Scalar(BinaryDataType::Double), v) => match v.as_f64() {
                Some(x) => put!(buf, order, x),
                None => return Err(value_mismatch(leaf, kind, value)),
            },
            (Slot::Scalar(BinaryDataType::String), DataValue::Text(s)) => {
                let n = u16::try_from(s.len())
                    .map_err(|_| SosError::Encoding(format!("String #{} too long", leaf)))?;
                put!(buf, order, n);
                buf.extend_from_slice(s.as_bytes());
            }
            _ => return Err(value_mismatch(leaf, kind, value)),
        }
        Ok(())
    }
}

impl RecordWriter for BinaryWriter {
    fn write_record(&mut self, block: &DataBlock, out: &mut dyn Write) -> Result<()> {
        if block.values.len() != self.slots.len() {
            return Err(SosError::Encoding(format!(
                "Record has {} values, structure expects {}",
                block.values.len(),
                self.slots.len()
            )));
        }
        let mut buf = Vec::new();
        for (i, ((kind, slot), value)) in self.slots.iter().zip(&block.values).enumerate() {
            self.encode(i, kind, slot, value, &mut buf)?;
        }
        out.write_all(&buf).map_err(SosError::Streaming)
    }
}

/// Binary record parser
pub struct BinaryParser<'a> {
    byte_order: ByteOrder,
    slots: Vec<(ComponentKind, Slot)>,
    input: Option<Box<dyn Read + 'a>>,
    /// First byte of the next record, read to detect end of stream
    peeked: Option<u8>,
}

impl<'a> BinaryParser<'a> {
    pub fn new(
        structure: &DataComponent,
        byte_order: ByteOrder,
        members: &[BinaryMember],
        input: Box<dyn Read + 'a>,
    ) -> Result<Self> {
        Ok(Self {
            byte_order,
            slots: bind_members(structure, members)?,
            input: Some(input),
            peeked: None,
        })
    }

    /// Whether the input ended cleanly between two records
    fn at_end(&mut self) -> Result<bool> {
        if self.peeked.is_some() {
            return Ok(false);
        }
        let Some(input) = self.input.as_mut() else {
            return Ok(true);
        };
        let mut byte = [0u8; 1];
        loop {
            match input.read(&mut byte) {
                Ok(0) => return Ok(true),
                Ok(_) => {
                    self.peeked = Some(byte[0]);
                    return Ok(false);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read exactly `n` bytes; memory grows with the bytes actually received
    fn read_vec(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if n == 0 {
            return Ok(buf);
        }
        if let Some(byte) = self.peeked.take() {
            buf.push(byte);
        }
        if let Some(input) = self.input.as_mut() {
            input.by_ref().take((n - buf.len()) as u64).read_to_end(&mut buf)?;
        }
        if buf.len() == n {
            Ok(buf)
        } else {
            Err(SosError::Encoding("Truncated binary record".into()))
        }
    }

    fn decode(&mut self, leaf: usize) -> Result<DataValue> {
        let order = self.byte_order;
        let (kind, slot) = self.slots[leaf].clone();
        let width = match &slot {
            Slot::Scalar(BinaryDataType::Boolean) => 1,
            Slot::Scalar(BinaryDataType::SignedInt | BinaryDataType::Float) => 4,
            Slot::Scalar(BinaryDataType::SignedLong | BinaryDataType::Double) => 8,
            Slot::Scalar(BinaryDataType::String) => 2,
            Slot::Block(Some(n)) => *n as usize,
            Slot::Block(None) => 4,
        };
        let head = self.read_vec(width)?;
        let value = match slot {
            Slot::Scalar(BinaryDataType::Boolean) => DataValue::Boolean(head[0] != 0),
            Slot::Scalar(BinaryDataType::SignedInt) => DataValue::Integer(i64::from(get!(i32, order, head))),
            Slot::Scalar(BinaryDataType::SignedLong) => DataValue::Integer(get!(i64, order, head)),
            Slot::Scalar(BinaryDataType::Float) => numeric(&kind, f64::from(get!(f32, order, head))),
            Slot::Scalar(BinaryDataType::Double) => numeric(&kind, get!(f64, order, head)),
            Slot::Scalar(BinaryDataType::String) => {
                let n = get!(u16, order, head) as usize;
                let bytes = self.read_vec(n)?;
                DataValue::Text(
                    String::from_utf8(bytes).map_err(|e| SosError::Encoding(e.to_string()))?,
                )
            }
            Slot::Block(Some(_)) => DataValue::Bytes(head),
            Slot::Block(None) => {
                let n = get!(u32, order, head) as usize;
                DataValue::Bytes(self.read_vec(n)?)
            }
        };
        Ok(value)
    }
}

fn numeric(kind: &ComponentKind, x: f64) -> DataValue {
    match kind {
        ComponentKind::Time => DataValue::Time(x),
        ComponentKind::Count => DataValue::Integer(x as i64),
        _ => DataValue::Double(x),
    }
}

impl RecordParser for BinaryParser<'_> {
    fn parse_next(&mut self) -> Result<Option<DataBlock>> {
        if self.at_end()? {
            return Ok(None);
        }
        let mut values = Vec::with_capacity(self.slots.len());
        for leaf in 0..self.slots.len() {
            values.push(self.decode(leaf)?);
        }
        Ok(Some(DataBlock::new(values)))
    }

    fn close(&mut self) {
        self.input = None;
        self.peeked = None;
    }
}
