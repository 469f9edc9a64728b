use crate::{
    headers::HeaderList,
    record::{CellValue, SubmissionRecord},
};
use serde::Serialize;

/// One value per header, ready to be appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OutputRow(Vec<CellValue>);

impl OutputRow {
    pub fn cells(&self) -> &[CellValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_cells(self) -> Vec<CellValue> {
        self.0
    }
}

impl FromIterator<CellValue> for OutputRow {
    fn from_iter<T: IntoIterator<Item = CellValue>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Lay `record` out in header order. A header the record does not mention
/// yields an empty cell; values are copied verbatim.
pub fn assemble_row(headers: &HeaderList, record: &SubmissionRecord) -> OutputRow {
    headers
        .iter()
        .map(|h| record.get(h).cloned().unwrap_or_else(CellValue::empty))
        .collect()
}

/// Record keys that have no column in the worksheet and are therefore dropped.
pub fn unmatched_keys<'r>(headers: &HeaderList, record: &'r SubmissionRecord) -> Vec<&'r str> {
    record.keys().filter(|k| !headers.contains(k)).collect()
}
