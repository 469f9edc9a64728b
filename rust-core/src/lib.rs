//! Append survey responses to a shared worksheet, one row per submission,
//! laid out by the worksheet's own header row.
//!
//! ```no_run
//! use survey_core::{AppConfig, SubmissionRecord, Submitter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load("survey-append.toml")?;
//! let submitter = Submitter::new(config.connect()?);
//! let record: SubmissionRecord = [("respondent_id", "R-17"), ("role_multi", "Chair;Member")]
//!     .into_iter()
//!     .collect();
//! submitter.submit(record)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod google;
pub mod headers;
pub mod questionnaire;
pub mod record;
pub mod row;
pub mod service;
pub mod submit;
pub mod xlsx;
mod test;

pub use config::{AppConfig, Backend, DynSheetService};
pub use error::{ConfigurationError, SheetError, SubmitError};
pub use google::{AccessToken, GoogleSheetsClient, GoogleSheetsSettings, SpreadsheetRef};
pub use headers::{HeaderList, HeaderResolver};
pub use questionnaire::QuestionnaireResponse;
pub use record::{CellValue, SubmissionRecord};
pub use row::{OutputRow, assemble_row};
pub use service::{AppendReceipt, SheetService, ValueInputMode};
pub use submit::{Notice, NoticeKind, SubmissionState, Submitter};
pub use xlsx::XlsxWorkbook;
