use crate::{
    error::SubmitError,
    headers::HeaderResolver,
    record::SubmissionRecord,
    row::{assemble_row, unmatched_keys},
    service::{AppendReceipt, SheetService, ValueInputMode},
};

/// Turns submission records into appended worksheet rows.
pub struct Submitter<S> {
    service: S,
}

impl<S: SheetService> Submitter<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Resolve the header row, lay the record out in that order and append
    /// it as a single new row.
    ///
    /// Exactly one append call is made on success and none when the header
    /// row is empty. Every fault comes back as a [`SubmitError`]; nothing is
    /// retried.
    #[tracing::instrument(name = "submit", skip_all, fields(fields = record.len()))]
    pub fn submit(&self, record: SubmissionRecord) -> Result<AppendReceipt, SubmitError> {
        let headers = HeaderResolver::new(&self.service).resolve()?;

        let ignored = unmatched_keys(&headers, &record);
        if !ignored.is_empty() {
            tracing::warn!(?ignored, "record keys without a matching header column");
        }

        let row = assemble_row(&headers, &record);
        drop(record);

        let receipt = self
            .service
            .append_row(&row, ValueInputMode::UserEntered)?;
        tracing::info!(
            columns = headers.len(),
            updated_range = receipt.updated_range.as_deref().unwrap_or("-"),
            "row appended"
        );
        Ok(receipt)
    }

    /// Like [`Submitter::submit`], but folds the result into the terminal
    /// state and the notice shown to the respondent.
    pub fn submit_with_notice(&self, record: SubmissionRecord) -> (SubmissionState, Notice) {
        let result = self.submit(record);
        if let Err(e) = &result {
            tracing::error!(error = %e, configuration = e.is_configuration(), "submission failed");
        }
        (SubmissionState::from(&result), Notice::from_result(&result))
    }
}

/// Lifecycle of one submission. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionState {
    #[default]
    Idle,
    Completed,
    Failed,
}

impl<T> From<&Result<T, SubmitError>> for SubmissionState {
    fn from(result: &Result<T, SubmitError>) -> Self {
        match result {
            Ok(_) => SubmissionState::Completed,
            Err(_) => SubmissionState::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Failure,
}

/// User-facing message for a finished submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    /// Checklist shown under a failure.
    pub hint: Option<&'static str>,
}

const SAVED: &str = "Saved. Your response was added to the worksheet.";
const CHECKLIST: &str = "Check that (1) the spreadsheet is shared with the service account \
     and (2) header row 1 exists and is correct.";

impl Notice {
    pub fn from_result<T>(result: &Result<T, SubmitError>) -> Self {
        match result {
            Ok(_) => Notice {
                kind: NoticeKind::Success,
                message: SAVED.to_string(),
                hint: None,
            },
            Err(e) => Notice {
                kind: NoticeKind::Failure,
                message: format!("Could not save to the worksheet: {}", e.message()),
                hint: Some(CHECKLIST),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == NoticeKind::Success
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)?;
        if let Some(hint) = self.hint {
            write!(f, "\n{hint}")?;
        }
        Ok(())
    }
}
