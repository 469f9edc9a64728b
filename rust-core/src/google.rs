//! Google Sheets API v4 backend.
//!
//! Authentication is a pre-provisioned OAuth bearer token; minting one from a
//! service-account key happens outside this crate.

use crate::{
    error::{ConfigurationError, SheetError},
    row::OutputRow,
    service::{AppendReceipt, SheetService, ValueInputMode},
};
use reqwest::{
    Url,
    blocking::{Client, RequestBuilder, Response},
};
use serde::Deserialize;
use std::{
    fmt,
    sync::{Mutex, PoisonError},
    time::Duration,
};

pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
pub const DEFAULT_DRIVE_API_BASE: &str = "https://www.googleapis.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

/// How the spreadsheet is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpreadsheetRef {
    /// Stable id from the spreadsheet URL.
    Id(String),
    /// Human-readable title, looked up through the Drive API.
    Name(String),
}

impl fmt::Display for SpreadsheetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpreadsheetRef::Id(id) => write!(f, "id {id}"),
            SpreadsheetRef::Name(name) => write!(f, "\"{name}\""),
        }
    }
}

/// OAuth bearer token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

#[derive(Debug, Clone)]
pub struct GoogleSheetsSettings {
    pub spreadsheet: SpreadsheetRef,
    pub worksheet: String,
    pub access_token: AccessToken,
    pub sheets_api_base: String,
    pub drive_api_base: String,
    /// Upper bound for each HTTP call, connect included.
    pub timeout: Duration,
}

impl GoogleSheetsSettings {
    pub fn new(spreadsheet: SpreadsheetRef, worksheet: impl Into<String>, token: AccessToken) -> Self {
        Self {
            spreadsheet,
            worksheet: worksheet.into(),
            access_token: token,
            sheets_api_base: DEFAULT_SHEETS_API_BASE.to_string(),
            drive_api_base: DEFAULT_DRIVE_API_BASE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct GoogleSheetsClient {
    http: Client,
    sheets_base: Url,
    drive_base: Url,
    spreadsheet: SpreadsheetRef,
    worksheet: String,
    token: AccessToken,
    timeout: Duration,
    /// Name -> id lookup result, kept for the life of the process.
    resolved_id: Mutex<Option<String>>,
}

impl GoogleSheetsClient {
    pub fn new(settings: GoogleSheetsSettings) -> Result<Self, ConfigurationError> {
        let parse_base = |raw: &str| -> Result<Url, ConfigurationError> {
            let url = Url::parse(raw)
                .map_err(|e| ConfigurationError::Invalid(format!("api base `{raw}`: {e}")))?;
            if url.cannot_be_a_base() {
                return Err(ConfigurationError::Invalid(format!(
                    "api base `{raw}` cannot carry a path"
                )));
            }
            Ok(url)
        };
        if settings.worksheet.is_empty() {
            return Err(ConfigurationError::Invalid("worksheet name is empty".into()));
        }

        let http = Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout)
            .build()
            .map_err(|e| ConfigurationError::Invalid(format!("http client: {e}")))?;

        Ok(Self {
            http,
            sheets_base: parse_base(&settings.sheets_api_base)?,
            drive_base: parse_base(&settings.drive_api_base)?,
            spreadsheet: settings.spreadsheet,
            worksheet: settings.worksheet,
            token: settings.access_token,
            timeout: settings.timeout,
            resolved_id: Mutex::new(None),
        })
    }

    pub fn worksheet(&self) -> &str {
        &self.worksheet
    }

    fn spreadsheet_id(&self) -> Result<String, SheetError> {
        let name = match &self.spreadsheet {
            SpreadsheetRef::Id(id) => return Ok(id.clone()),
            SpreadsheetRef::Name(name) => name,
        };
        let mut cached = self.resolved_id.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }
        let id = self.lookup_by_name(name)?;
        tracing::info!(spreadsheet = %name, %id, "spreadsheet resolved by name");
        *cached = Some(id.clone());
        Ok(id)
    }

    fn lookup_by_name(&self, name: &str) -> Result<String, SheetError> {
        #[derive(Deserialize)]
        struct FileList {
            #[serde(default)]
            files: Vec<DriveFile>,
        }
        #[derive(Deserialize)]
        struct DriveFile {
            id: String,
        }

        let mut url = self.drive_base.clone();
        extend_path(&mut url, ["drive", "v3", "files"]);
        let query = format!(
            "name = '{}' and mimeType = '{SPREADSHEET_MIME}' and trashed = false",
            name.replace('\\', "\\\\").replace('\'', "\\'")
        );
        url.query_pairs_mut()
            .append_pair("q", &query)
            .append_pair("fields", "files(id,name)")
            .append_pair("pageSize", "10")
            .append_pair("supportsAllDrives", "true")
            .append_pair("includeItemsFromAllDrives", "true");

        let list: FileList = self.send(self.http.get(url))?.json().map_err(|e| self.body_error(e))?;
        list.files
            .into_iter()
            .next()
            .map(|f| f.id)
            .ok_or_else(|| ConfigurationError::SpreadsheetNotFound(name.to_string()).into())
    }

    fn values_url(&self, id: &str, range: &str) -> Url {
        let mut url = self.sheets_base.clone();
        extend_path(&mut url, ["v4", "spreadsheets", id, "values", range]);
        url
    }

    fn send(&self, req: RequestBuilder) -> Result<Response, SheetError> {
        let resp = req
            .bearer_auth(self.token.secret())
            .send()
            .map_err(|e| self.transport_error(e))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().unwrap_or_default();
        Err(classify_status(
            status.as_u16(),
            &body,
            &self.spreadsheet,
            &self.worksheet,
        ))
    }

    fn transport_error(&self, err: reqwest::Error) -> SheetError {
        if err.is_timeout() {
            SheetError::Timeout(self.timeout)
        } else {
            SheetError::Transport(error_chain(&err))
        }
    }

    fn body_error(&self, err: reqwest::Error) -> SheetError {
        if err.is_timeout() {
            SheetError::Timeout(self.timeout)
        } else {
            SheetError::Malformed(error_chain(&err))
        }
    }
}

impl SheetService for GoogleSheetsClient {
    fn header_row(&self) -> Result<Vec<String>, SheetError> {
        #[derive(Deserialize)]
        struct ValueRange {
            #[serde(default)]
            values: Vec<Vec<serde_json::Value>>,
        }

        let id = self.spreadsheet_id()?;
        let mut url = self.values_url(&id, &format!("{}!1:1", a1_sheet(&self.worksheet)));
        url.query_pairs_mut().append_pair("majorDimension", "ROWS");
        tracing::debug!(%url, "reading header row");

        let range: ValueRange = self.send(self.http.get(url))?.json().map_err(|e| self.body_error(e))?;
        let headers = range
            .values
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect();
        Ok(headers)
    }

    fn append_row(
        &self,
        row: &OutputRow,
        mode: ValueInputMode,
    ) -> Result<AppendReceipt, SheetError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct AppendResponse {
            updates: Option<Updates>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Updates {
            updated_range: Option<String>,
        }

        let id = self.spreadsheet_id()?;
        let mut url = self.values_url(&id, &format!("{}!A1:append", a1_sheet(&self.worksheet)));
        url.query_pairs_mut()
            .append_pair("valueInputOption", mode.as_api_str())
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = serde_json::json!({
            "majorDimension": "ROWS",
            "values": [row],
        });
        tracing::debug!(%url, cells = row.len(), "appending row");

        let resp: AppendResponse = self
            .send(self.http.post(url).json(&body))?
            .json()
            .map_err(|e| self.body_error(e))?;
        Ok(AppendReceipt {
            updated_range: resp.updates.and_then(|u| u.updated_range),
        })
    }
}

fn extend_path<'a>(url: &mut Url, segments: impl IntoIterator<Item = &'a str>) {
    // bases are checked in `GoogleSheetsClient::new`
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
}

/// Sheet name as the leading part of an A1 range.
fn a1_sheet(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}

/// Map a non-success response to the error taxonomy: "not found" and
/// "not shared" need an operator, the rest is a plain service fault.
fn classify_status(
    status: u16,
    body: &str,
    spreadsheet: &SpreadsheetRef,
    worksheet: &str,
) -> SheetError {
    #[derive(Deserialize)]
    struct Envelope {
        error: ApiError,
    }
    #[derive(Deserialize)]
    struct ApiError {
        #[serde(default)]
        message: String,
    }

    let message = serde_json::from_str::<Envelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status {
        404 => ConfigurationError::SpreadsheetNotFound(spreadsheet.to_string()).into(),
        403 => ConfigurationError::AccessDenied(format!(
            "spreadsheet {spreadsheet} is not shared with this credential ({message})"
        ))
        .into(),
        400 if message.contains("Unable to parse range") => {
            ConfigurationError::WorksheetNotFound(worksheet.to_string()).into()
        }
        _ => SheetError::Status { status, message },
    }
}
