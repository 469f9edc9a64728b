use anyhow::{Context, Result};
use std::{io::Read, process::ExitCode};
use survey_core::{AppConfig, Notice, QuestionnaireResponse, SubmitError, Submitter};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "SURVEY_APPEND_CONFIG";
const DEFAULT_CONFIG: &str = "survey-append.toml";

/// Reads one questionnaire response (JSON) from stdin and appends it to the
/// configured worksheet. Config path: first argument, `$SURVEY_APPEND_CONFIG`,
/// or `survey-append.toml`.
fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = AppConfig::load(&config_path)?;

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("read response from stdin")?;
    let response: QuestionnaireResponse =
        serde_json::from_str(&input).context("parse questionnaire response")?;
    let record = response.into_record(chrono::Local::now().naive_local());

    let notice = match config.connect() {
        Ok(service) => Submitter::new(service).submit_with_notice(record).1,
        Err(e) => {
            tracing::error!(error = %e, "could not open the worksheet");
            Notice::from_result::<()>(&Err(SubmitError::from(e)))
        }
    };

    println!("{notice}");
    Ok(if notice.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
