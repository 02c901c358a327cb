// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Record structures, encodings and record codecs (SWE Common subset)
//!
//! A result stream is described by a [`DataComponent`] tree (the record
//! structure) and a [`DataEncoding`]. Records travel as [`DataBlock`]s holding
//! the leaf values of the structure in depth-first order.
//!
//! # Examples
//!
//! ```
//! use soshub::swe::{self, DataBlock, DataComponent, DataEncoding, DataValue};
//!
//! let structure = DataComponent::record("weather", vec![
//!     DataComponent::time("time"),
//!     DataComponent::quantity("temp", "http://sensorml.com/ont/swe/property/AirTemperature", "Cel"),
//! ]);
//! let encoding = DataEncoding::text();
//! let mut writer = swe::create_writer(&structure, &encoding).unwrap();
//! let mut out = Vec::new();
//! writer
//!     .write_record(&DataBlock::new(vec![DataValue::Time(0.0), DataValue::Double(21.5)]), &mut out)
//!     .unwrap();
//! assert_eq!(String::from_utf8(out).unwrap(), "1970-01-01T00:00:00Z,21.5\n");
//! ```

pub mod binary;
pub mod text;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{Read, Write};

use crate::error::{Result, SosError};

/// Definition URI used for sampling time components
pub const SAMPLING_TIME_DEFINITION: &str = "http://www.opengis.net/def/property/OGC/0/SamplingTime";

/// Compression name that selects MP4 framing for GetResult
pub const H264_COMPRESSION: &str = "H264";

/// Kind of a data component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComponentKind {
    /// ISO 8601 time stamp, carried as Unix epoch seconds
    Time,
    /// Decimal measurement
    Quantity {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uom: Option<String>,
    },
    /// Integer count
    Count,
    Boolean,
    Text,
    Category,
    /// Opaque binary block (e.g. a compressed video frame)
    Blob,
    /// Ordered group of fields
    Record { fields: Vec<DataComponent> },
}

/// Node of a record structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataComponent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub kind: ComponentKind,
}

impl DataComponent {
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            name: name.into(),
            definition: None,
            label: None,
            kind,
        }
    }

    pub fn record(name: impl Into<String>, fields: Vec<DataComponent>) -> Self {
        Self::new(name, ComponentKind::Record { fields })
    }

    /// Sampling time component
    pub fn time(name: impl Into<String>) -> Self {
        Self::new(name, ComponentKind::Time).with_definition(SAMPLING_TIME_DEFINITION)
    }

    pub fn quantity(name: impl Into<String>, definition: &str, uom: &str) -> Self {
        Self::new(
            name,
            ComponentKind::Quantity {
                uom: Some(uom.to_string()),
            },
        )
        .with_definition(definition)
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Scalar leaves in depth-first order
    pub fn leaves(&self) -> Vec<&DataComponent> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a DataComponent>) {
        match &self.kind {
            ComponentKind::Record { fields } => {
                for field in fields {
                    field.collect_leaves(out);
                }
            }
            _ => out.push(self),
        }
    }

    /// Slash-separated paths of the scalar leaves, e.g. `/time`
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        match &self.kind {
            ComponentKind::Record { fields } => {
                for field in fields {
                    field.collect_paths("", &mut out);
                }
            }
            _ => out.push(format!("/{}", self.name)),
        }
        out
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        let path = format!("{}/{}", prefix, self.name);
        match &self.kind {
            ComponentKind::Record { fields } => {
                for field in fields {
                    field.collect_paths(&path, out);
                }
            }
            _ => out.push(path),
        }
    }

    /// Definitions of every component except the sampling time
    pub fn observable_definitions(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_definitions(&mut out);
        out
    }

    fn collect_definitions(&self, out: &mut BTreeSet<String>) {
        if let Some(def) = &self.definition {
            if self.kind != ComponentKind::Time {
                out.insert(def.clone());
            }
        }
        if let ComponentKind::Record { fields } = &self.kind {
            for field in fields {
                field.collect_definitions(out);
            }
        }
    }

    /// Index of the first time leaf
    pub fn time_index(&self) -> Option<usize> {
        self.leaves().iter().position(|c| c.kind == ComponentKind::Time)
    }
}

/// One leaf value of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Text(String),
    /// Unix epoch seconds
    Time(f64),
    Bytes(Vec<u8>),
}

impl DataValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Double(v) | DataValue::Time(v) => Some(*v),
            DataValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// Leaf values of one record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataBlock {
    pub values: Vec<DataValue>,
}

impl DataBlock {
    pub fn new(values: Vec<DataValue>) -> Self {
        Self { values }
    }

    /// Coerce loosely typed values (e.g. read from JSON) to the leaf kinds of
    /// `structure`; time leaves also accept ISO 8601 text
    pub fn conform_to(&mut self, structure: &DataComponent) {
        for (value, leaf) in self.values.iter_mut().zip(structure.leaves()) {
            let coerced = match (&leaf.kind, &*value) {
                (ComponentKind::Time, DataValue::Text(s)) => crate::time::parse_iso(s)
                    .ok()
                    .map(|t| DataValue::Time(crate::time::datetime_to_epoch(t))),
                (ComponentKind::Time, DataValue::Double(t)) => Some(DataValue::Time(*t)),
                (ComponentKind::Time, DataValue::Integer(t)) => Some(DataValue::Time(*t as f64)),
                (ComponentKind::Quantity { .. }, DataValue::Integer(n)) => {
                    Some(DataValue::Double(*n as f64))
                }
                _ => None,
            };
            if let Some(c) = coerced {
                *value = c;
            }
        }
    }

    /// Sampling time in epoch seconds, using the structure's first time leaf
    pub fn time(&self, structure: &DataComponent) -> Option<f64> {
        structure
            .time_index()
            .and_then(|i| self.values.get(i))
            .and_then(DataValue::as_f64)
    }
}

/// Byte order of binary encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

/// Scalar data type of a binary member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryDataType {
    Boolean,
    SignedInt,
    SignedLong,
    Float,
    Double,
    /// Two-byte length prefix followed by UTF-8 bytes
    String,
}

/// Member of a binary encoding, one per structure leaf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "member", rename_all = "snake_case")]
pub enum BinaryMember {
    Component {
        reference: String,
        data_type: BinaryDataType,
    },
    /// Length-prefixed block, possibly compressed with a named codec
    Block {
        reference: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        compression: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        byte_length: Option<u32>,
    },
}

impl BinaryMember {
    pub fn reference(&self) -> &str {
        match self {
            BinaryMember::Component { reference, .. } | BinaryMember::Block { reference, .. } => {
                reference
            }
        }
    }
}

/// Record encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataEncoding {
    Text {
        token_separator: String,
        block_separator: String,
        decimal_separator: char,
    },
    Binary {
        #[serde(default)]
        byte_order: ByteOrder,
        members: Vec<BinaryMember>,
    },
}

impl DataEncoding {
    /// Comma/newline text encoding
    pub fn text() -> Self {
        DataEncoding::Text {
            token_separator: ",".to_string(),
            block_separator: "\n".to_string(),
            decimal_separator: '.',
        }
    }

    /// Big-endian binary encoding with one member per leaf of `structure`
    pub fn binary_for(structure: &DataComponent) -> Self {
        let members = structure
            .leaves()
            .into_iter()
            .zip(structure.leaf_paths())
            .map(|(leaf, reference)| match leaf.kind {
                ComponentKind::Blob => BinaryMember::Block {
                    reference,
                    compression: None,
                    byte_length: None,
                },
                ComponentKind::Boolean => BinaryMember::Component {
                    reference,
                    data_type: BinaryDataType::Boolean,
                },
                ComponentKind::Count => BinaryMember::Component {
                    reference,
                    data_type: BinaryDataType::SignedLong,
                },
                ComponentKind::Text | ComponentKind::Category => BinaryMember::Component {
                    reference,
                    data_type: BinaryDataType::String,
                },
                _ => BinaryMember::Component {
                    reference,
                    data_type: BinaryDataType::Double,
                },
            })
            .collect();
        DataEncoding::Binary {
            byte_order: ByteOrder::BigEndian,
            members,
        }
    }

    /// MIME type of generic framing for this encoding
    pub fn mime_type(&self) -> &'static str {
        match self {
            DataEncoding::Text { .. } => "text/plain",
            DataEncoding::Binary { .. } => "application/octet-stream",
        }
    }

    /// Compression of the first member when it is a block
    pub fn first_block_compression(&self) -> Option<&str> {
        match self {
            DataEncoding::Binary { members, .. } => match members.first() {
                Some(BinaryMember::Block { compression, .. }) => compression.as_deref(),
                _ => None,
            },
            DataEncoding::Text { .. } => None,
        }
    }
}

/// Encoder of records bound to one record structure
pub trait RecordWriter: Send {
    fn write_record(&mut self, block: &DataBlock, out: &mut dyn Write) -> Result<()>;
}

/// Decoder of records bound to one record structure and input stream
pub trait RecordParser {
    /// Next record, or `None` once the input is exhausted
    fn parse_next(&mut self) -> Result<Option<DataBlock>>;

    /// Release the input; further calls return `None`
    fn close(&mut self);
}

/// Build a writer for `structure` in `encoding`
pub fn create_writer(
    structure: &DataComponent,
    encoding: &DataEncoding,
) -> Result<Box<dyn RecordWriter>> {
    match encoding {
        DataEncoding::Text {
            token_separator,
            block_separator,
            decimal_separator,
        } => Ok(Box::new(text::TextWriter::new(
            structure,
            token_separator,
            block_separator,
            *decimal_separator,
        )?)),
        DataEncoding::Binary {
            byte_order,
            members,
        } => Ok(Box::new(binary::BinaryWriter::new(
            structure, *byte_order, members,
        )?)),
    }
}

/// Build a parser for `structure` in `encoding` reading from `input`
pub fn create_parser<'a>(
    structure: &DataComponent,
    encoding: &DataEncoding,
    input: Box<dyn Read + 'a>,
) -> Result<Box<dyn RecordParser + 'a>> {
    match encoding {
        DataEncoding::Text {
            token_separator,
            block_separator,
            decimal_separator,
        } => Ok(Box::new(text::TextParser::new(
            structure,
            token_separator,
            block_separator,
            *decimal_separator,
            input,
        )?)),
        DataEncoding::Binary {
            byte_order,
            members,
        } => Ok(Box::new(binary::BinaryParser::new(
            structure,
            *byte_order,
            members,
            input,
        )?)),
    }
}

pub(crate) fn leaf_kinds(structure: &DataComponent) -> Vec<ComponentKind> {
    structure.leaves().into_iter().map(|c| c.kind.clone()).collect()
}

pub(crate) fn value_mismatch(leaf: usize, kind: &ComponentKind, value: &DataValue) -> SosError {
    SosError::Encoding(format!(
        "Value {:?} does not match component #{} of type {:?}",
        value, leaf, kind
    ))
}
