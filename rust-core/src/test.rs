#![cfg(test)]
//! End-to-end submissions against an in-memory sheet and a real workbook file.

use crate::{
    AppendReceipt, CellValue, ConfigurationError, NoticeKind, OutputRow, SheetError,
    SheetService, SubmissionRecord, SubmissionState, SubmitError, Submitter, ValueInputMode,
    XlsxWorkbook,
};
use ::zip as zip_crate;
use anyhow::Result;
use std::{
    cell::{Cell, RefCell},
    fs::{self, File},
    io::{Read, Write},
    path::Path,
};

/// Worksheet kept in memory. Appends either land whole or not at all.
#[derive(Default)]
struct FakeSheet {
    headers: RefCell<Vec<String>>,
    rows: RefCell<Vec<Vec<CellValue>>>,
    append_fault: RefCell<Option<String>>,
    header_reads: Cell<usize>,
    append_calls: Cell<usize>,
    modes: RefCell<Vec<ValueInputMode>>,
}

impl FakeSheet {
    fn with_headers(headers: &[&str]) -> Self {
        let sheet = Self::default();
        sheet.set_headers(headers);
        sheet
    }

    fn set_headers(&self, headers: &[&str]) {
        *self.headers.borrow_mut() = headers.iter().map(|h| h.to_string()).collect();
    }

    fn fail_appends_with(&self, message: &str) {
        *self.append_fault.borrow_mut() = Some(message.to_string());
    }
}

impl SheetService for FakeSheet {
    fn header_row(&self) -> Result<Vec<String>, SheetError> {
        self.header_reads.set(self.header_reads.get() + 1);
        Ok(self.headers.borrow().clone())
    }

    fn append_row(
        &self,
        row: &OutputRow,
        mode: ValueInputMode,
    ) -> Result<AppendReceipt, SheetError> {
        self.append_calls.set(self.append_calls.get() + 1);
        self.modes.borrow_mut().push(mode);
        if let Some(msg) = self.append_fault.borrow().clone() {
            return Err(SheetError::Transport(msg));
        }
        let mut rows = self.rows.borrow_mut();
        rows.push(row.cells().to_vec());
        Ok(AppendReceipt {
            updated_range: Some(format!("Responses!A{0}:C{0}", rows.len() + 1)),
        })
    }
}

fn scenario_a_record() -> SubmissionRecord {
    SubmissionRecord::builder()
        .field("timestamp", "2024-01-01T00:00:00")
        .field("role_multi", "Chair;Member")
        .field("q1", 3i64)
        .build()
}

#[test]
fn scenario_a_appends_one_row_in_header_order() {
    let sheet = FakeSheet::with_headers(&["timestamp", "role_multi", "q1"]);
    let submitter = Submitter::new(&sheet);

    let receipt = submitter.submit(scenario_a_record()).unwrap();

    assert_eq!(receipt.row_number(), Some(2));
    assert_eq!(
        *sheet.rows.borrow(),
        vec![vec![
            CellValue::from("2024-01-01T00:00:00"),
            CellValue::from("Chair;Member"),
            CellValue::Integer(3),
        ]]
    );
    assert_eq!(*sheet.modes.borrow(), [ValueInputMode::UserEntered]);
}

#[test]
fn scenario_b_missing_fields_do_not_fail() {
    let sheet = FakeSheet::with_headers(&["a", "b", "c"]);
    let record: SubmissionRecord = [("a", "x")].into_iter().collect();

    Submitter::new(&sheet).submit(record).unwrap();

    assert_eq!(
        *sheet.rows.borrow(),
        vec![vec![CellValue::from("x"), CellValue::empty(), CellValue::empty()]]
    );
}

#[test]
fn scenario_c_empty_header_row_makes_no_append_call() {
    let sheet = FakeSheet::default();

    let err = Submitter::new(&sheet).submit(scenario_a_record()).unwrap_err();

    assert!(matches!(
        err,
        SubmitError::Configuration(ConfigurationError::EmptyHeaderRow)
    ));
    assert_eq!(sheet.append_calls.get(), 0);
    assert!(sheet.rows.borrow().is_empty());
}

#[test]
fn scenario_d_transport_fault_leaves_no_row() {
    let sheet = FakeSheet::with_headers(&["timestamp", "role_multi", "q1"]);
    sheet.fail_appends_with("connection reset by peer");
    let submitter = Submitter::new(&sheet);

    let err = submitter.submit(scenario_a_record()).unwrap_err();

    match &err {
        SubmitError::Failed { message, source } => {
            assert!(message.contains("connection reset by peer"));
            assert!(matches!(source, SheetError::Transport(_)));
        }
        other => panic!("expected a submit failure, got {other:?}"),
    }
    assert_eq!(sheet.append_calls.get(), 1);
    // a later read sees nothing new
    assert!(sheet.rows.borrow().is_empty());
}

#[test]
fn header_row_is_read_again_for_every_submission() {
    let sheet = FakeSheet::with_headers(&["a", "b"]);
    let submitter = Submitter::new(&sheet);
    let record = || -> SubmissionRecord { [("a", "1"), ("b", "2")].into_iter().collect() };

    submitter.submit(record()).unwrap();
    sheet.set_headers(&["b", "new", "a"]);
    submitter.submit(record()).unwrap();

    assert_eq!(sheet.header_reads.get(), 2);
    assert_eq!(
        sheet.rows.borrow()[1],
        [CellValue::from("2"), CellValue::empty(), CellValue::from("1")]
    );
}

#[test]
fn notice_reflects_the_outcome() {
    let sheet = FakeSheet::with_headers(&["a"]);
    let submitter = Submitter::new(&sheet);

    let (state, notice) = submitter.submit_with_notice([("a", "x")].into_iter().collect());
    assert_eq!(state, SubmissionState::Completed);
    assert!(notice.is_success());
    assert!(notice.hint.is_none());

    sheet.fail_appends_with("quota exceeded");
    let (state, notice) = submitter.submit_with_notice([("a", "y")].into_iter().collect());
    assert_eq!(state, SubmissionState::Failed);
    assert_eq!(notice.kind, NoticeKind::Failure);
    assert!(notice.message.contains("quota exceeded"));
    assert!(notice.to_string().contains("header row 1"));
    assert_eq!(sheet.rows.borrow().len(), 1);
}

// ── workbook on disk ─────────────────────────────────────────────

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

fn write_workbook(path: &Path, sheet_name: &str, sheet_data: &str, shared: &[&str]) -> Result<()> {
    let mut zout = zip_crate::ZipWriter::new(File::create(path)?);
    let opt: zip_crate::write::FileOptions<'_, ()> = zip_crate::write::FileOptions::default()
        .compression_method(zip_crate::CompressionMethod::Deflated);

    zout.start_file("[Content_Types].xml", opt)?;
    zout.write_all(
        br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/></Types>"#,
    )?;

    zout.start_file("xl/workbook.xml", opt)?;
    write!(
        zout,
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="{MAIN_NS}" xmlns:r="{REL_NS}"><sheets><sheet name="Notes" sheetId="1" r:id="rId2"/><sheet name="{sheet_name}" sheetId="2" r:id="rId1"/></sheets></workbook>"#
    )?;

    zout.start_file("xl/_rels/workbook.xml.rels", opt)?;
    write!(
        zout,
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{REL_NS}/worksheet" Target="worksheets/sheet2.xml"/><Relationship Id="rId2" Type="{REL_NS}/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#
    )?;

    zout.start_file("xl/worksheets/sheet1.xml", opt)?;
    write!(zout, r#"<worksheet xmlns="{MAIN_NS}"><sheetData/></worksheet>"#)?;

    zout.start_file("xl/worksheets/sheet2.xml", opt)?;
    write!(
        zout,
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="{MAIN_NS}"><sheetData>{sheet_data}</sheetData></worksheet>"#
    )?;

    if !shared.is_empty() {
        zout.start_file("xl/sharedStrings.xml", opt)?;
        write!(zout, r#"<sst xmlns="{MAIN_NS}" count="{0}" uniqueCount="{0}">"#, shared.len())?;
        for s in shared {
            write!(zout, "<si><t>{s}</t></si>")?;
        }
        zout.write_all(b"</sst>")?;
    }
    zout.finish()?;
    Ok(())
}

fn read_part(path: &Path, name: &str) -> Result<String> {
    let mut zip = zip_crate::ZipArchive::new(File::open(path)?)?;
    let mut part = zip.by_name(name)?;
    let mut out = String::new();
    part.read_to_string(&mut out)?;
    Ok(out)
}

const HEADER_ROW: &str = r#"<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1" t="s"><v>2</v></c></row>"#;
const FIRST_ANSWER: &str = r#"<row r="2"><c r="A2" t="inlineStr"><is><t>2023-12-31T23:00:00</t></is></c></row>"#;

#[test]
fn workbook_submission_appends_after_last_row() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("responses.xlsx");
    write_workbook(
        &path,
        "Responses",
        &format!("{HEADER_ROW}{FIRST_ANSWER}"),
        &["timestamp", "role_multi", "q1"],
    )?;
    let workbook = XlsxWorkbook::new(&path, "Responses");
    assert_eq!(workbook.header_row()?, ["timestamp", "role_multi", "q1"]);

    let receipt = Submitter::new(&workbook).submit(scenario_a_record())?;
    assert_eq!(receipt.updated_range.as_deref(), Some("Responses!A3:C3"));
    assert_eq!(receipt.row_number(), Some(3));

    let sheet = read_part(&path, "xl/worksheets/sheet2.xml")?;
    assert!(sheet.contains(r#"<c r="A3" t="inlineStr"><is><t>2024-01-01T00:00:00</t></is></c>"#));
    assert!(sheet.contains(r#"<c r="B3" t="inlineStr"><is><t>Chair;Member</t></is></c>"#));
    assert!(sheet.contains(r#"<c r="C3"><v>3</v></c>"#));
    assert!(sheet.find(r#"<row r="2">"#) < sheet.find(r#"<row r="3">"#));

    // the other tab is copied as-is
    assert!(read_part(&path, "xl/worksheets/sheet1.xml")?.contains("<sheetData/>"));
    Ok(())
}

#[test]
fn workbook_empty_header_row_is_left_untouched() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("responses.xlsx");
    write_workbook(&path, "Responses", "", &[])?;
    let before = fs::read(&path)?;

    let err = Submitter::new(XlsxWorkbook::new(&path, "Responses"))
        .submit(scenario_a_record())
        .unwrap_err();

    assert!(matches!(
        err,
        SubmitError::Configuration(ConfigurationError::EmptyHeaderRow)
    ));
    assert_eq!(fs::read(&path)?, before);
    Ok(())
}

#[test]
fn workbook_unknown_tab_and_missing_file_are_configuration_errors() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("responses.xlsx");
    write_workbook(&path, "Responses", HEADER_ROW, &["a", "b", "c"])?;

    let err = Submitter::new(XlsxWorkbook::new(&path, "Sheet9"))
        .submit(scenario_a_record())
        .unwrap_err();
    assert!(matches!(
        err,
        SubmitError::Configuration(ConfigurationError::WorksheetNotFound(ref n)) if n == "Sheet9"
    ));

    let err = Submitter::new(XlsxWorkbook::new(dir.path().join("nope.xlsx"), "Responses"))
        .submit(scenario_a_record())
        .unwrap_err();
    assert!(matches!(
        err,
        SubmitError::Configuration(ConfigurationError::SpreadsheetNotFound(_))
    ));
    Ok(())
}

#[test]
fn workbook_failed_append_keeps_the_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("broken.xlsx");
    // worksheet part without <sheetData>
    let mut zout = zip_crate::ZipWriter::new(File::create(&path)?);
    let opt: zip_crate::write::FileOptions<'_, ()> = zip_crate::write::FileOptions::default();
    zout.start_file("xl/workbook.xml", opt)?;
    zout.write_all(br#"<workbook><sheets><sheet name="Responses" sheetId="1"/></sheets></workbook>"#)?;
    zout.start_file("xl/worksheets/sheet1.xml", opt)?;
    zout.write_all(b"<worksheet></worksheet>")?;
    zout.finish()?;
    let before = fs::read(&path)?;

    let row: OutputRow = [CellValue::from("x")].into_iter().collect();
    let err = XlsxWorkbook::new(&path, "Responses")
        .append_row(&row, ValueInputMode::UserEntered)
        .unwrap_err();

    assert!(matches!(err, SheetError::Workbook(_)));
    assert_eq!(fs::read(&path)?, before);
    let leftovers: Vec<String> = fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp workbook left behind: {leftovers:?}");
    Ok(())
}

#[test]
fn workbook_concurrent_submissions_all_land() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("responses.xlsx");
    write_workbook(&path, "Responses", HEADER_ROW, &["timestamp", "role_multi", "q1"])?;
    let shared = XlsxWorkbook::new(&path, "Responses");

    std::thread::scope(|s| {
        for t in 0i64..4 {
            let shared = &shared;
            let path = &path;
            s.spawn(move || {
                // even threads share one handle, odd ones open their own
                let own = XlsxWorkbook::new(path, "Responses");
                let workbook = if t % 2 == 0 { shared } else { &own };
                for i in 0..5 {
                    let record: SubmissionRecord =
                        [("q1", CellValue::Integer(t * 10 + i))].into_iter().collect();
                    Submitter::new(workbook).submit(record).expect("submit");
                }
            });
        }
    });

    let sheet = read_part(&path, "xl/worksheets/sheet2.xml")?;
    assert_eq!(sheet.matches("<row ").count(), 1 + 20);
    for n in 2..=21 {
        assert!(sheet.contains(&format!(r#"<row r="{n}">"#)), "row {n} missing");
    }
    Ok(())
}

#[cfg(unix)]
#[test]
fn workbook_append_keeps_file_permissions() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("responses.xlsx");
    write_workbook(&path, "Responses", HEADER_ROW, &["timestamp", "role_multi", "q1"])?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o664))?;

    Submitter::new(XlsxWorkbook::new(&path, "Responses")).submit(scenario_a_record())?;

    assert_eq!(fs::metadata(&path)?.permissions().mode() & 0o777, 0o664);
    Ok(())
}

#[test]
fn workbook_wide_rows_use_multi_letter_columns() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("wide.xlsx");
    let names: Vec<String> = (0..28).map(|i| format!("h{i}")).collect();
    let header_cells: String = names
        .iter()
        .enumerate()
        .map(|(i, n)| {
            let col = if i < 26 {
                ((b'A' + i as u8) as char).to_string()
            } else {
                format!("A{}", (b'A' + (i - 26) as u8) as char)
            };
            format!(r#"<c r="{col}1" t="inlineStr"><is><t>{n}</t></is></c>"#)
        })
        .collect();
    write_workbook(&path, "Responses", &format!(r#"<row r="1">{header_cells}</row>"#), &[])?;

    let record: SubmissionRecord = [("h27", "last")].into_iter().collect();
    let receipt = Submitter::new(XlsxWorkbook::new(&path, "Responses")).submit(record)?;

    assert_eq!(receipt.updated_range.as_deref(), Some("Responses!A2:AB2"));
    let sheet = read_part(&path, "xl/worksheets/sheet2.xml")?;
    assert!(sheet.contains(r#"<c r="AB2" t="inlineStr"><is><t>last</t></is></c>"#));
    Ok(())
}
