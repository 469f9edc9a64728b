use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// A single cell value: text or an integer.
///
/// Serializes untagged, so integers travel as JSON numbers and text as JSON
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Integer(i64),
    Text(String),
}

impl CellValue {
    /// The blank cell written for headers the record does not mention.
    pub fn empty() -> Self {
        CellValue::Text(String::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.is_empty())
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Integer(n) => write!(f, "{n}"),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_owned())
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Integer(n)
    }
}

impl From<u32> for CellValue {
    fn from(n: u32) -> Self {
        CellValue::Integer(n.into())
    }
}

impl From<u8> for CellValue {
    fn from(n: u8) -> Self {
        CellValue::Integer(n.into())
    }
}

/// The flat key/value data produced by one form submission.
///
/// Values are taken as-is: trimming, joining multi-selects and the like are
/// done by whoever builds the record. Once built the record is read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionRecord {
    fields: BTreeMap<String, CellValue>,
}

impl SubmissionRecord {
    pub fn builder() -> RecordBuilder {
        RecordBuilder::default()
    }

    pub fn get(&self, key: &str) -> Option<&CellValue> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for SubmissionRecord
where
    K: Into<String>,
    V: Into<CellValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Collects fields before freezing them into a [`SubmissionRecord`].
/// A key set twice keeps the last value.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    fields: BTreeMap<String, CellValue>,
}

impl RecordBuilder {
    pub fn field(mut self, key: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> SubmissionRecord {
        SubmissionRecord {
            fields: self.fields,
        }
    }
}
