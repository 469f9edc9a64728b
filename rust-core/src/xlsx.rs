//! A local `.xlsx` workbook used as the shared worksheet.
//!
//! Every call re-opens the archive, so edits made by someone else between two
//! submissions (a renamed header, rows added in Excel) are always seen.
//! Appends rewrite the archive into a temp file next to the original and
//! atomically persist it; a failure before the rename leaves the workbook as
//! it was. The whole read-modify-persist runs under an exclusive lock on
//! `<workbook>.lock`, so appends from other threads or processes queue up
//! instead of overwriting each other.

use crate::{
    error::{ConfigurationError, SheetError},
    record::CellValue,
    row::OutputRow,
    service::{AppendReceipt, SheetService, ValueInputMode},
};
use ::zip as zip_crate;
use anyhow::{Context, Result, anyhow};
use quick_xml::{
    Reader, Writer,
    escape::resolve_predefined_entity,
    events::{BytesRef, BytesStart, BytesText, Event},
};
use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};
use tempfile::NamedTempFile;

type Archive = zip_crate::ZipArchive<File>;

/// One worksheet (tab) of a workbook on disk.
#[derive(Debug, Clone)]
pub struct XlsxWorkbook {
    path: PathBuf,
    sheet_name: String,
    /// Shared by clones; the lock file covers other handles and processes.
    append_lock: Arc<Mutex<()>>,
}

/// Sheet part as read from the archive.
struct SheetPart {
    /// e.g. `xl/worksheets/sheet1.xml`
    path: String,
    xml: Vec<u8>,
}

impl XlsxWorkbook {
    pub fn new<P: AsRef<Path>>(path: P, sheet_name: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sheet_name: sheet_name.into(),
            append_lock: Arc::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    fn not_found(&self) -> anyhow::Error {
        ConfigurationError::SpreadsheetNotFound(self.path.display().to_string()).into()
    }

    /// `responses.xlsx` -> `responses.xlsx.lock`
    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn open_lock_file(&self) -> Result<fd_lock::RwLock<File>> {
        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("open lock file {}", path.display()))?;
        Ok(fd_lock::RwLock::new(file))
    }

    fn open_archive(&self) -> Result<Archive> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(self.not_found()),
            Err(e) => return Err(e).with_context(|| format!("open {}", self.path.display())),
        };
        zip_crate::ZipArchive::new(file)
            .with_context(|| format!("{} is not an xlsx archive", self.path.display()))
    }

    /// Finds the part that holds `self.sheet_name` and reads it.
    fn read_sheet(&self, zip: &mut Archive) -> Result<SheetPart> {
        let workbook_xml =
            read_entry(zip, "xl/workbook.xml")?.context("xl/workbook.xml not found")?;
        let rels_xml = read_entry(zip, "xl/_rels/workbook.xml.rels")?;

        let sheets = sheet_entries(&workbook_xml)?;
        let position = sheets
            .iter()
            .position(|(name, _)| name == &self.sheet_name)
            .ok_or_else(|| ConfigurationError::WorksheetNotFound(self.sheet_name.clone()))?;

        // по r:id через rels, иначе по порядку листов
        let target = sheets[position]
            .1
            .as_deref()
            .zip(rels_xml.as_deref())
            .map(|(rid, rels)| relationship_target(rels, rid))
            .transpose()?
            .flatten();
        let path = match target {
            Some(t) if t.starts_with('/') => t.trim_start_matches('/').to_string(),
            Some(t) => format!("xl/{t}"),
            None => format!("xl/worksheets/sheet{}.xml", position + 1),
        };

        let xml = read_entry(zip, &path)?.with_context(|| format!("{path} not found"))?;
        Ok(SheetPart { path, xml })
    }

    fn read_header_row(&self) -> Result<Vec<String>> {
        let mut zip = self.open_archive()?;
        let sheet = self.read_sheet(&mut zip)?;
        let shared = match read_entry(&mut zip, "xl/sharedStrings.xml")? {
            Some(xml) => shared_strings(&xml)?,
            None => Vec::new(),
        };
        first_row_values(&sheet.xml, &shared)
    }

    fn append(&self, row: &OutputRow, mode: ValueInputMode) -> Result<AppendReceipt> {
        // no lock file for a workbook that is not there
        if !self.path.try_exists()? {
            return Err(self.not_found());
        }
        let _local = self
            .append_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut lock_file = self.open_lock_file()?;
        let _exclusive = lock_file
            .write()
            .with_context(|| format!("lock {}", self.path.display()))?;

        let permissions = fs::metadata(&self.path)
            .with_context(|| format!("stat {}", self.path.display()))?
            .permissions();
        let mut zip = self.open_archive()?;
        let SheetPart { path, mut xml } = self.read_sheet(&mut zip)?;

        let row_num = calc_last_row(&xml)? + 1;
        let row_xml = row_xml(row_num, row.cells(), mode)?;
        splice_row(&mut xml, row_xml)?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir).context("create temp workbook")?;
        {
            let mut zout = zip_crate::ZipWriter::new(tmp.as_file_mut());
            let opt: zip_crate::write::FileOptions<'_, ()> =
                zip_crate::write::FileOptions::default()
                    .compression_method(zip_crate::CompressionMethod::Deflated)
                    .compression_level(Some(1));

            for i in 0..zip.len() {
                let file = zip.by_index_raw(i)?;
                if file.name() == path {
                    let name = file.name().to_owned();
                    drop(file);
                    zout.start_file(name, opt)?;
                    zout.write_all(&xml)?;
                } else {
                    zout.raw_copy_file(file)?;
                }
            }
            zout.finish()?;
        }
        // NamedTempFile is created 0600; keep the workbook's own mode
        tmp.as_file()
            .set_permissions(permissions)
            .context("copy workbook permissions")?;
        tmp.persist(&self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;

        let last_col = col_idx_to_letters(row.len().saturating_sub(1));
        Ok(AppendReceipt {
            updated_range: Some(format!(
                "{}!A{row_num}:{last_col}{row_num}",
                quote_sheet_name(&self.sheet_name)
            )),
        })
    }
}

impl SheetService for XlsxWorkbook {
    fn header_row(&self) -> Result<Vec<String>, SheetError> {
        self.read_header_row().map_err(into_sheet_error)
    }

    fn append_row(
        &self,
        row: &OutputRow,
        mode: ValueInputMode,
    ) -> Result<AppendReceipt, SheetError> {
        self.append(row, mode).map_err(into_sheet_error)
    }
}

fn into_sheet_error(err: anyhow::Error) -> SheetError {
    match err.downcast::<ConfigurationError>() {
        Ok(c) => SheetError::Configuration(c),
        Err(e) => SheetError::Workbook(e),
    }
}

fn read_entry(zip: &mut Archive, name: &str) -> Result<Option<Vec<u8>>> {
    let mut entry = match zip.by_name(name) {
        Ok(e) => e,
        Err(zip_crate::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read {name}")),
    };
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut buf)?;
    Ok(Some(buf))
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .find_map(|a| (a.key.as_ref() == key).then(|| String::from_utf8_lossy(&a.value).into_owned()))
}

/// `(name, r:id)` of every `<sheet>` in workbook.xml.
fn sheet_entries(workbook_xml: &[u8]) -> Result<Vec<(String, Option<String>)>> {
    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(true);

    let mut sheets = Vec::new();
    loop {
        match reader.read_event().context("parse workbook.xml")? {
            Event::Empty(ref e) | Event::Start(ref e) if e.local_name().as_ref() == b"sheet" => {
                if let Some(name) = attr(e, b"name") {
                    sheets.push((unescape_attr(&name), attr(e, b"r:id")));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheets)
}

fn relationship_target(rels_xml: &[u8], rid: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_reader(rels_xml);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event().context("parse workbook.xml.rels")? {
            Event::Empty(ref e) | Event::Start(ref e)
                if e.local_name().as_ref() == b"Relationship"
                    && attr(e, b"Id").as_deref() == Some(rid) =>
            {
                return Ok(attr(e, b"Target"));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn unescape_attr(raw: &str) -> String {
    quick_xml::escape::unescape(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_owned())
}

fn push_ref(out: &mut String, r: &BytesRef<'_>) -> Result<()> {
    if let Some(ch) = r.resolve_char_ref()? {
        out.push(ch);
    } else {
        let name = r.decode()?;
        let resolved = resolve_predefined_entity(&name)
            .ok_or_else(|| anyhow!("unknown entity &{name};"))?;
        out.push_str(resolved);
    }
    Ok(())
}

/// Contents of xl/sharedStrings.xml, one entry per `<si>`. Rich-text runs are
/// concatenated; phonetic hints are skipped.
fn shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    let mut out = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event().context("parse sharedStrings.xml")? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => out.push(String::new()),
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => out.extend(current.take()),
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Text(t) if in_t && !in_phonetic => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&t.decode()?);
                }
            }
            Event::GeneralRef(r) if in_t && !in_phonetic => {
                if let Some(s) = current.as_mut() {
                    push_ref(s, &r)?;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

/// Cell values of row 1, gaps filled with empty strings, trailing blanks cut.
fn first_row_values(sheet_xml: &[u8], shared: &[String]) -> Result<Vec<String>> {
    struct OpenCell {
        col: usize,
        kind: Option<String>,
        text: String,
    }

    let mut reader = Reader::from_reader(sheet_xml);
    let mut row_seq = 0u32;
    let mut in_first_row = false;
    let mut next_col = 0usize;
    let mut cell: Option<OpenCell> = None;
    let mut capture = false;
    let mut cells: Vec<(usize, String)> = Vec::new();

    loop {
        match reader.read_event().context("parse worksheet")? {
            Event::Start(ref e) if e.local_name().as_ref() == b"row" => {
                row_seq = attr(e, b"r")
                    .and_then(|r| r.parse().ok())
                    .unwrap_or(row_seq + 1);
                if row_seq > 1 {
                    break;
                }
                in_first_row = true;
            }
            // <row r="1"/> or a later row: either way row 1 has no cells
            Event::Empty(ref e) if e.local_name().as_ref() == b"row" => break,
            Event::End(ref e) if e.local_name().as_ref() == b"row" => {
                if in_first_row {
                    break;
                }
            }
            Event::Start(ref e) if in_first_row && e.local_name().as_ref() == b"c" => {
                let col = attr(e, b"r")
                    .map(|r| letters_to_col_idx(&r))
                    .unwrap_or(next_col);
                next_col = col + 1;
                cell = Some(OpenCell {
                    col,
                    kind: attr(e, b"t"),
                    text: String::new(),
                });
            }
            Event::Empty(ref e) if in_first_row && e.local_name().as_ref() == b"c" => {
                next_col = attr(e, b"r")
                    .map(|r| letters_to_col_idx(&r))
                    .unwrap_or(next_col)
                    + 1;
            }
            Event::Start(ref e)
                if cell.is_some() && matches!(e.local_name().as_ref(), b"v" | b"t") =>
            {
                capture = true;
            }
            Event::End(ref e) if matches!(e.local_name().as_ref(), b"v" | b"t") => {
                capture = false;
            }
            Event::Text(t) if capture => {
                if let Some(c) = cell.as_mut() {
                    c.text.push_str(&t.decode()?);
                }
            }
            Event::GeneralRef(r) if capture => {
                if let Some(c) = cell.as_mut() {
                    push_ref(&mut c.text, &r)?;
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == b"c" => {
                if let Some(c) = cell.take() {
                    let value = match c.kind.as_deref() {
                        Some("s") => {
                            let idx: usize = c
                                .text
                                .trim()
                                .parse()
                                .with_context(|| format!("bad shared string index `{}`", c.text))?;
                            shared
                                .get(idx)
                                .cloned()
                                .with_context(|| format!("shared string {idx} out of range"))?
                        }
                        Some("b") => match c.text.trim() {
                            "1" => "TRUE".to_string(),
                            _ => "FALSE".to_string(),
                        },
                        _ => c.text,
                    };
                    cells.push((c.col, value));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let width = cells.iter().map(|(c, _)| c + 1).max().unwrap_or(0);
    let mut values = vec![String::new(); width];
    for (col, value) in cells {
        values[col] = value;
    }
    while values.last().is_some_and(|v| v.is_empty()) {
        values.pop();
    }
    Ok(values)
}

// маленький хелпер
fn calc_last_row(sheet_xml: &[u8]) -> Result<u32> {
    let mut rdr = Reader::from_reader(sheet_xml);
    rdr.config_mut().trim_text(true);

    let mut last_row = 0u32;
    let mut seq = 0u32;
    loop {
        match rdr.read_event().context("parse worksheet")? {
            Event::Empty(ref e) | Event::Start(ref e) if e.local_name().as_ref() == b"row" => {
                seq = attr(e, b"r").and_then(|r| r.parse().ok()).unwrap_or(seq + 1);
                last_row = last_row.max(seq);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(last_row)
}

/// `<row r="N">` with one `<c>` per non-empty value.
fn row_xml(row_num: u32, cells: &[CellValue], mode: ValueInputMode) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    writer
        .create_element("row")
        .with_attribute(("r", row_num.to_string().as_str()))
        .write_inner_content(|w| {
            for (col_idx, val) in cells.iter().enumerate() {
                if val.is_empty() {
                    continue;
                }
                let coord = format!("{}{}", col_idx_to_letters(col_idx), row_num);
                let c_elem = w.create_element("c").with_attribute(("r", coord.as_str()));
                match cell_kind(val, mode) {
                    CellKind::Number(n) => {
                        c_elem.write_inner_content(|w2| {
                            w2.create_element("v").write_text_content(BytesText::new(&n))?;
                            Ok(())
                        })?;
                    }
                    CellKind::Formula(f) => {
                        c_elem.write_inner_content(|w2| {
                            w2.create_element("f").write_text_content(BytesText::new(f))?;
                            Ok(())
                        })?;
                    }
                    CellKind::Text(s) => {
                        c_elem
                            .with_attribute(("t", "inlineStr"))
                            .write_inner_content(|w2| {
                                w2.create_element("is").write_inner_content(|w3| {
                                    let mut t = w3.create_element("t");
                                    if s.starts_with(char::is_whitespace)
                                        || s.ends_with(char::is_whitespace)
                                    {
                                        t = t.with_attribute(("xml:space", "preserve"));
                                    }
                                    t.write_text_content(BytesText::new(s))?;
                                    Ok(())
                                })?;
                                Ok(())
                            })?;
                    }
                }
            }
            Ok(())
        })?;
    Ok(writer.into_inner())
}

enum CellKind<'a> {
    Number(String),
    Formula(&'a str),
    Text(&'a str),
}

fn cell_kind(val: &CellValue, mode: ValueInputMode) -> CellKind<'_> {
    match (val, mode) {
        (CellValue::Integer(n), _) => CellKind::Number(n.to_string()),
        (CellValue::Text(s), ValueInputMode::Raw) => CellKind::Text(s),
        (CellValue::Text(s), ValueInputMode::UserEntered) => {
            if let Some(formula) = s.strip_prefix('=') {
                CellKind::Formula(formula)
            } else if s.trim() == s.as_str() && s.parse::<f64>().is_ok_and(f64::is_finite) {
                CellKind::Number(s.clone())
            } else {
                CellKind::Text(s)
            }
        }
    }
}

/// Insert the row right before `</sheetData>`.
fn splice_row(sheet_xml: &mut Vec<u8>, row_xml: Vec<u8>) -> Result<()> {
    if let Some(pos) = memchr::memmem::rfind(sheet_xml, b"</sheetData>") {
        sheet_xml.splice(pos..pos, row_xml);
        return Ok(());
    }
    // пустой лист: <sheetData/>
    let pos = memchr::memmem::find(sheet_xml, b"<sheetData/>")
        .context("<sheetData> not found in worksheet")?;
    let mut replacement = b"<sheetData>".to_vec();
    replacement.extend_from_slice(&row_xml);
    replacement.extend_from_slice(b"</sheetData>");
    sheet_xml.splice(pos..pos + b"<sheetData/>".len(), replacement);
    Ok(())
}

// 0 -> "A", 26 -> "AA"
fn col_idx_to_letters(mut idx: usize) -> String {
    let mut s = String::new();
    loop {
        let rem = idx % 26;
        s.insert(0, (b'A' + rem as u8) as char);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    s
}

// "C7" -> 2
fn letters_to_col_idx(coord: &str) -> usize {
    coord
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .fold(0usize, |acc, b| acc * 26 + (b.to_ascii_uppercase() - b'A' + 1) as usize)
        .saturating_sub(1)
}

fn quote_sheet_name(name: &str) -> String {
    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}
