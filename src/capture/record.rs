//! Record layout, samples, and the fixed-arity line parser.
//!
//! One record is a tab-separated line: an integer timestamp followed by one
//! floating-point value per declared channel, e.g.
//! `1043\t12.5\t13.0\t11.8\t12.2\t-3.1\t4.7\t182.0`.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the leading timestamp column in persisted logs.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// One declared sensor channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    #[serde(default)]
    pub unit: String,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
        }
    }
}

/// Ordered channel declaration for a deployment. Fixes the record arity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecordLayout {
    pub channels: Vec<ChannelSpec>,
}

impl Default for RecordLayout {
    /// Four photovoltage channels followed by IMU orientation.
    fn default() -> Self {
        Self {
            channels: vec![
                ChannelSpec::new("pv0", "mV"),
                ChannelSpec::new("pv1", "mV"),
                ChannelSpec::new("pv2", "mV"),
                ChannelSpec::new("pv3", "mV"),
                ChannelSpec::new("roll", "deg"),
                ChannelSpec::new("pitch", "deg"),
                ChannelSpec::new("yaw", "deg"),
            ],
        }
    }
}

impl RecordLayout {
    /// Number of channel values per record.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of tab-separated fields per record, timestamp included.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.channels.len() + 1
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    /// Column names in persisted order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(TIMESTAMP_COLUMN).chain(self.channels.iter().map(|c| c.name.as_str()))
    }
}

/// One accepted record.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: u64,
    pub values: Vec<f64>,
}

impl Sample {
    pub fn new(timestamp: u64, values: Vec<f64>) -> Self {
        Self { timestamp, values }
    }
}

/// Why a decoded line was rejected. Always skip-and-continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRecord {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("field {index} ({column}) is not numeric: {raw:?}")]
    InvalidField {
        index: usize,
        column: String,
        raw: String,
    },
}

/// Parses decoded lines against a fixed [`RecordLayout`].
#[derive(Debug, Clone)]
pub struct LineParser {
    layout: RecordLayout,
}

impl LineParser {
    pub fn new(layout: RecordLayout) -> Self {
        Self { layout }
    }

    /// Parse one line. Arity is checked before any conversion.
    pub fn parse(&self, line: &str) -> Result<Sample, MalformedRecord> {
        let expected = self.layout.field_count();
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != expected {
            return Err(MalformedRecord::FieldCount {
                expected,
                found: fields.len(),
            });
        }

        let timestamp = fields[0]
            .trim()
            .parse::<u64>()
            .map_err(|_| MalformedRecord::InvalidField {
                index: 0,
                column: TIMESTAMP_COLUMN.to_string(),
                raw: fields[0].to_string(),
            })?;

        let mut values = Vec::with_capacity(expected - 1);
        for (offset, (raw, channel)) in fields[1..].iter().zip(&self.layout.channels).enumerate() {
            let value = raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| MalformedRecord::InvalidField {
                    index: offset + 1,
                    column: channel.name.clone(),
                    raw: (*raw).to_string(),
                })?;
            values.push(value);
        }

        Ok(Sample { timestamp, values })
    }
}
