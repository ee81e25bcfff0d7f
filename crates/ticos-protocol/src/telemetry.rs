use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Telemetry values stamped with an explicit sample time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedValues {
    /// Sample time in epoch milliseconds.
    pub ts: i64,
    pub values: Map<String, Value>,
}

impl TimestampedValues {
    pub fn new(ts: i64, values: Map<String, Value>) -> Self {
        Self { ts, values }
    }

    /// Stamp `values` with the given instant.
    pub fn at(time: DateTime<Utc>, values: Map<String, Value>) -> Self {
        Self::new(time.timestamp_millis(), values)
    }

    /// Stamp `values` with the current time.
    pub fn now(values: Map<String, Value>) -> Self {
        Self::at(Utc::now(), values)
    }
}

/// A telemetry upload.
///
/// Serializes to one of the three shapes the platform accepts:
/// a bare key/value object (server-assigned timestamp), a
/// `{"ts", "values"}` object, or an array of the latter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Telemetry {
    Timestamped(TimestampedValues),
    Batch(Vec<TimestampedValues>),
    Values(Map<String, Value>),
}

impl Telemetry {
    /// Entries for a gateway upload, which always carries a JSON array
    /// per device.
    pub fn into_entries(self) -> Vec<Value> {
        match self {
            Telemetry::Values(values) => vec![Value::Object(values)],
            Telemetry::Timestamped(entry) => vec![entry_value(entry)],
            Telemetry::Batch(entries) => entries.into_iter().map(entry_value).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Telemetry::Values(values) => values.is_empty(),
            Telemetry::Timestamped(entry) => entry.values.is_empty(),
            Telemetry::Batch(entries) => entries.iter().all(|e| e.values.is_empty()),
        }
    }
}

fn entry_value(entry: TimestampedValues) -> Value {
    let mut object = Map::new();
    object.insert("ts".into(), Value::from(entry.ts));
    object.insert("values".into(), Value::Object(entry.values));
    Value::Object(object)
}

impl From<Map<String, Value>> for Telemetry {
    fn from(values: Map<String, Value>) -> Self {
        Telemetry::Values(values)
    }
}

impl From<TimestampedValues> for Telemetry {
    fn from(entry: TimestampedValues) -> Self {
        Telemetry::Timestamped(entry)
    }
}

impl From<Vec<TimestampedValues>> for Telemetry {
    fn from(entries: Vec<TimestampedValues>) -> Self {
        Telemetry::Batch(entries)
    }
}
