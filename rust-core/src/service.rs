use crate::{error::SheetError, row::OutputRow};
use regex::Regex;
use std::sync::LazyLock;

/// How the backing service should treat the values of an appended row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueInputMode {
    /// Values are parsed as if typed by a user: numeric, date-like and
    /// formula text gets its natural type.
    #[default]
    UserEntered,
    /// Every text value is stored literally.
    Raw,
}

impl ValueInputMode {
    pub fn as_api_str(self) -> &'static str {
        match self {
            ValueInputMode::UserEntered => "USER_ENTERED",
            ValueInputMode::Raw => "RAW",
        }
    }
}

/// What the service reports back about a successful append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendReceipt {
    /// A1 range that received the new row, e.g. `Responses!A12:Q12`.
    pub updated_range: Option<String>,
}

static RANGE_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:!|^)\$?[A-Za-z]+\$?(\d+)(?::|$)").expect("static regex")
});

impl AppendReceipt {
    /// 1-based row number of the appended row, if the range names one.
    pub fn row_number(&self) -> Option<u32> {
        let range = self.updated_range.as_deref()?;
        RANGE_ROW
            .captures(range)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

/// A single worksheet inside a spreadsheet, reachable through some remote or
/// local store.
///
/// Implementations must make `append_row` all-or-nothing: on error no row
/// may have been added.
pub trait SheetService {
    /// Values of row 1, in column order. Trailing blank cells are dropped.
    fn header_row(&self) -> Result<Vec<String>, SheetError>;

    /// Append `row` after the last populated row of the worksheet.
    fn append_row(&self, row: &OutputRow, mode: ValueInputMode)
    -> Result<AppendReceipt, SheetError>;
}

impl<S: SheetService + ?Sized> SheetService for Box<S> {
    fn header_row(&self) -> Result<Vec<String>, SheetError> {
        (**self).header_row()
    }

    fn append_row(
        &self,
        row: &OutputRow,
        mode: ValueInputMode,
    ) -> Result<AppendReceipt, SheetError> {
        (**self).append_row(row, mode)
    }
}

impl<S: SheetService + ?Sized> SheetService for &S {
    fn header_row(&self) -> Result<Vec<String>, SheetError> {
        (**self).header_row()
    }

    fn append_row(
        &self,
        row: &OutputRow,
        mode: ValueInputMode,
    ) -> Result<AppendReceipt, SheetError> {
        (**self).append_row(row, mode)
    }
}
