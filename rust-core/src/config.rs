//! Deployment configuration, read once at process start.
//!
//! ```toml
//! backend = "google"            # or "xlsx"
//!
//! [sheet]
//! spreadsheet_name = "Questionnaire"   # or spreadsheet_id = "1AbC..."
//! worksheet_name = "Responses"
//!
//! [google]
//! access_token_env = "GOOGLE_OAUTH_ACCESS_TOKEN"
//! timeout_secs = 30
//!
//! [xlsx]
//! path = "responses.xlsx"
//! ```

use crate::{
    error::ConfigurationError,
    google::{
        AccessToken, DEFAULT_DRIVE_API_BASE, DEFAULT_SHEETS_API_BASE, DEFAULT_TIMEOUT,
        GoogleSheetsClient, GoogleSheetsSettings, SpreadsheetRef,
    },
    service::SheetService,
    xlsx::XlsxWorkbook,
};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// A service handle that can be shared across threads.
pub type DynSheetService = Box<dyn SheetService + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Google,
    Xlsx,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: Backend,
    pub sheet: SheetSection,
    #[serde(default)]
    pub google: GoogleSection,
    pub xlsx: Option<XlsxSection>,
    /// Directory of the config file; relative workbook paths hang off it.
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SheetSection {
    pub spreadsheet_id: Option<String>,
    pub spreadsheet_name: Option<String>,
    pub worksheet_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GoogleSection {
    /// Inline token. Prefer `access_token_env` outside of local testing.
    pub access_token: Option<String>,
    pub access_token_env: Option<String>,
    pub timeout_secs: Option<u64>,
    pub sheets_api_base: Option<String>,
    pub drive_api_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct XlsxSection {
    pub path: PathBuf,
}

impl AppConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigurationError> {
        let config: AppConfig =
            toml::from_str(raw).map_err(|e| ConfigurationError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Invalid(format!("read {}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&raw)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        tracing::debug!(path = %path.display(), backend = ?config.backend, "configuration loaded");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.sheet.worksheet_name.trim().is_empty() {
            return Err(ConfigurationError::Invalid("sheet.worksheet_name is empty".into()));
        }
        match self.backend {
            Backend::Google => {
                self.spreadsheet_ref()?;
                if self.google.timeout_secs == Some(0) {
                    return Err(ConfigurationError::Invalid(
                        "google.timeout_secs must be positive".into(),
                    ));
                }
            }
            Backend::Xlsx if self.xlsx.is_none() => {
                return Err(ConfigurationError::Invalid(
                    "backend = \"xlsx\" needs an [xlsx] section".into(),
                ));
            }
            Backend::Xlsx => {}
        }
        Ok(())
    }

    /// The id wins when both an id and a name are configured.
    pub fn spreadsheet_ref(&self) -> Result<SpreadsheetRef, ConfigurationError> {
        let non_empty = |s: &Option<String>| s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned);
        match (non_empty(&self.sheet.spreadsheet_id), non_empty(&self.sheet.spreadsheet_name)) {
            (Some(id), _) => Ok(SpreadsheetRef::Id(id)),
            (None, Some(name)) => Ok(SpreadsheetRef::Name(name)),
            (None, None) => Err(ConfigurationError::Invalid(
                "set sheet.spreadsheet_id or sheet.spreadsheet_name".into(),
            )),
        }
    }

    /// Build the Google settings, reading the token through `env`.
    pub fn google_settings_with<F>(&self, env: F) -> Result<GoogleSheetsSettings, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let g = &self.google;
        let token = match &g.access_token {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => {
                let var = g.access_token_env.as_deref().unwrap_or(DEFAULT_TOKEN_ENV);
                env(var)
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        ConfigurationError::Invalid(format!("no access token: set {var}"))
                    })?
            }
        };

        Ok(GoogleSheetsSettings {
            spreadsheet: self.spreadsheet_ref()?,
            worksheet: self.sheet.worksheet_name.clone(),
            access_token: AccessToken::new(token),
            sheets_api_base: g
                .sheets_api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_SHEETS_API_BASE.to_string()),
            drive_api_base: g
                .drive_api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_DRIVE_API_BASE.to_string()),
            timeout: g
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
        })
    }

    pub fn xlsx_path(&self) -> Option<PathBuf> {
        let path = &self.xlsx.as_ref()?.path;
        Some(match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.clone(),
        })
    }

    /// Open the configured backend.
    pub fn connect(&self) -> Result<DynSheetService, ConfigurationError> {
        match self.backend {
            Backend::Google => {
                let settings = self.google_settings_with(|var| std::env::var(var).ok())?;
                tracing::info!(
                    spreadsheet = %settings.spreadsheet,
                    worksheet = %settings.worksheet,
                    timeout = ?settings.timeout,
                    "using google sheets backend"
                );
                Ok(Box::new(GoogleSheetsClient::new(settings)?))
            }
            Backend::Xlsx => {
                let path = self
                    .xlsx_path()
                    .ok_or_else(|| ConfigurationError::Invalid("missing [xlsx] section".into()))?;
                tracing::info!(
                    path = %path.display(),
                    worksheet = %self.sheet.worksheet_name,
                    "using xlsx workbook backend"
                );
                Ok(Box::new(XlsxWorkbook::new(path, self.sheet.worksheet_name.clone())))
            }
        }
    }
}
