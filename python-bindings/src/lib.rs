use pyo3::create_exception;
use pyo3::exceptions::{PyException, PyTypeError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict};

use std::path::PathBuf;
use survey_core::{
    AppConfig, CellValue, DynSheetService, HeaderResolver, SubmissionRecord, SubmitError,
    Submitter,
};

create_exception!(survey_sheet_py, ConfigurationError, PyException);
create_exception!(survey_sheet_py, SubmitFailed, PyException);

fn to_py_err(err: SubmitError) -> PyErr {
    if err.is_configuration() {
        ConfigurationError::new_err(err.message())
    } else {
        SubmitFailed::new_err(err.message())
    }
}

/// Values must be `str` or `int`; anything else is a caller bug.
fn record_from_dict(record: &Bound<'_, PyDict>) -> PyResult<SubmissionRecord> {
    let mut builder = SubmissionRecord::builder();
    for (key, value) in record.iter() {
        let key: String = key.extract()?;
        // bool is an int subclass and would extract as 0/1
        let cell = if value.is_instance_of::<PyBool>() {
            return Err(type_error(&key, &value));
        } else if let Ok(n) = value.extract::<i64>() {
            CellValue::Integer(n)
        } else if let Ok(s) = value.extract::<String>() {
            CellValue::Text(s)
        } else {
            return Err(type_error(&key, &value));
        };
        builder = builder.field(key, cell);
    }
    Ok(builder.build())
}

fn type_error(key: &str, value: &Bound<'_, PyAny>) -> PyErr {
    let type_name = value
        .get_type()
        .name()
        .map(|n| n.to_string())
        .unwrap_or_else(|_| "?".to_string());
    PyTypeError::new_err(format!("field `{key}` must be str or int, got {type_name}"))
}

#[pyclass]
struct SurveySheet {
    submitter: Submitter<DynSheetService>,
}

#[pymethods]
impl SurveySheet {
    #[new]
    #[pyo3(signature = (config_path))]
    fn new(config_path: PathBuf) -> PyResult<Self> {
        let service = AppConfig::load(&config_path)
            .and_then(|c| c.connect())
            .map_err(|e| ConfigurationError::new_err(e.to_string()))?;
        Ok(SurveySheet {
            submitter: Submitter::new(service),
        })
    }

    /// Current header row of the worksheet.
    fn headers(&self, py: Python<'_>) -> PyResult<Vec<String>> {
        let service = self.submitter.service();
        py.allow_threads(|| HeaderResolver::new(service).resolve())
            .map(|h| h.as_slice().to_vec())
            .map_err(|e| to_py_err(e.into()))
    }

    /// Append one record; returns the updated range when the service reports it.
    fn submit(&self, py: Python<'_>, record: &Bound<'_, PyDict>) -> PyResult<Option<String>> {
        let record = record_from_dict(record)?;
        py.allow_threads(|| self.submitter.submit(record))
            .map(|receipt| receipt.updated_range)
            .map_err(to_py_err)
    }

    /// Append one record and return `(ok, message)` for display instead of raising.
    fn submit_with_notice(
        &self,
        py: Python<'_>,
        record: &Bound<'_, PyDict>,
    ) -> PyResult<(bool, String)> {
        let record = record_from_dict(record)?;
        let (_, notice) = py.allow_threads(|| self.submitter.submit_with_notice(record));
        Ok((notice.is_success(), notice.to_string()))
    }
}

#[pymodule]
fn survey_sheet_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<SurveySheet>()?;
    m.add("ConfigurationError", m.py().get_type::<ConfigurationError>())?;
    m.add("SubmitError", m.py().get_type::<SubmitFailed>())?;
    Ok(())
}
