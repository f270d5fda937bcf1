use crate::XlsxEditor;
use crate::read_part::parse_shared_strings;
use ::zip as zip_crate;
use anyhow::{Context, Result, bail};
use quick_xml::{Reader, escape::escape, escape::unescape, events::Event};
use std::{
    fs::File,
    io::{Cursor, Read, Write},
    path::Path,
};
use tempfile::NamedTempFile;
use tracing::debug;

const WORKBOOK_PATH: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PATH: &str = "xl/_rels/workbook.xml.rels";
const STYLES_PATH: &str = "xl/styles.xml";
const SHARED_STRINGS_PATH: &str = "xl/sharedStrings.xml";

/* ========================== ПУСТОЙ ШАБЛОН КНИГИ ============================ */

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="1"><font><sz val="11"/><name val="Calibri"/><family val="2"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles></styleSheet>"#;

const EMPTY_SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheetData></sheetData></worksheet>"#;

fn workbook_xml(sheet_name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><bookViews><workbookView activeTab="0"/></bookViews><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        escape(sheet_name)
    )
}

fn validate_sheet_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().count() > 31 {
        bail!("Sheet name must be 1..=31 characters: `{name}`");
    }
    if let Some(c) = name.chars().find(|c| "[]:*?/\\".contains(*c)) {
        bail!("Sheet name `{name}` contains forbidden character `{c}`");
    }
    Ok(())
}

/* ========================== ОТКРЫТИЕ / СОЗДАНИЕ ============================ */

/// (name, r:id) of every `<sheet>` in workbook order plus the active tab index.
fn workbook_sheets(workbook_xml: &[u8]) -> Result<(Vec<(String, String)>, usize)> {
    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(true);
    let mut sheets = Vec::new();
    let mut active = 0usize;

    loop {
        match reader.read_event()? {
            Event::Empty(ref e) | Event::Start(ref e) => match e.local_name().as_ref() {
                b"sheet" => {
                    let mut name = None;
                    let mut rid = None;
                    for a in e.attributes().with_checks(false).flatten() {
                        let v = String::from_utf8_lossy(&a.value).into_owned();
                        if a.key.as_ref() == b"name" {
                            name = Some(unescape(&v)?.into_owned());
                        } else if a.key.local_name().as_ref() == b"id" && a.key.prefix().is_some() {
                            rid = Some(v);
                        }
                    }
                    sheets.push((
                        name.context("<sheet> without name in workbook.xml")?,
                        rid.context("<sheet> without r:id in workbook.xml")?,
                    ));
                }
                b"workbookView" => {
                    if let Some(tab) = e.attributes().with_checks(false).flatten().find_map(|a| {
                        (a.key.as_ref() == b"activeTab")
                            .then(|| String::from_utf8_lossy(&a.value).into_owned())
                    }) {
                        active = tab.parse().unwrap_or(0);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok((sheets, active))
}

/// Resolves `r:id` to the part path of the worksheet through workbook.xml.rels.
fn sheet_part_path(rels_xml: &[u8], rid: &str) -> Result<String> {
    let mut reader = Reader::from_reader(rels_xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Empty(ref e) | Event::Start(ref e)
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut id = None;
                let mut target = None;
                for a in e.attributes().with_checks(false).flatten() {
                    let v = String::from_utf8_lossy(&a.value).into_owned();
                    match a.key.as_ref() {
                        b"Id" => id = Some(v),
                        b"Target" => target = Some(v),
                        _ => {}
                    }
                }
                if let (Some(id), Some(t)) = (id, target) {
                    if id == rid {
                        return Ok(match t.strip_prefix('/') {
                            Some(abs) => abs.to_owned(),
                            None => format!("xl/{t}"),
                        });
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    bail!("Relationship `{rid}` not found in {WORKBOOK_RELS_PATH}")
}

fn read_parts<P: AsRef<Path>>(src: P) -> Result<Vec<(String, Vec<u8>)>> {
    let src = src.as_ref();
    let file = File::open(src).with_context(|| format!("cannot open {}", src.display()))?;
    let mut zip = zip_crate::ZipArchive::new(file)
        .with_context(|| format!("{} is not a valid xlsx package", src.display()))?;

    let mut parts = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let mut f = zip.by_index(i)?;
        if f.is_dir() {
            continue;
        }
        let name = f.name().to_owned();
        let mut buf = Vec::with_capacity(f.size() as usize);
        f.read_to_end(&mut buf)?;
        parts.push((name, buf));
    }
    Ok(parts)
}

fn part<'a>(parts: &'a [(String, Vec<u8>)], name: &str) -> Option<&'a [u8]> {
    parts
        .iter()
        .find(|(p, _)| p == name)
        .map(|(_, c)| c.as_slice())
}

impl XlsxEditor {
    /// Opens a workbook and selects its active sheet (the first one if no view says otherwise).
    pub fn open<P: AsRef<Path>>(src: P) -> Result<Self> {
        let parts = read_parts(&src)?;
        let wb = part(&parts, WORKBOOK_PATH).context("xl/workbook.xml not found")?;
        let (sheets, active) = workbook_sheets(wb)?;
        let (name, _) = sheets
            .get(active)
            .or_else(|| sheets.first())
            .context("workbook has no sheets")?;
        let name = name.clone();
        Self::from_parts(parts, &name)
    }

    /// Opens a workbook and prepares the sheet called `sheet_name` for editing.
    pub fn open_sheet<P: AsRef<Path>>(src: P, sheet_name: &str) -> Result<Self> {
        let parts = read_parts(&src)?;
        Self::from_parts(parts, sheet_name)
    }

    /// A fresh single-sheet workbook held in memory only.
    pub fn new_workbook(sheet_name: &str) -> Result<Self> {
        validate_sheet_name(sheet_name)?;
        let parts = vec![
            ("[Content_Types].xml".to_owned(), CONTENT_TYPES.as_bytes().to_vec()),
            ("_rels/.rels".to_owned(), ROOT_RELS.as_bytes().to_vec()),
            (WORKBOOK_PATH.to_owned(), workbook_xml(sheet_name).into_bytes()),
            (WORKBOOK_RELS_PATH.to_owned(), WORKBOOK_RELS.as_bytes().to_vec()),
            (STYLES_PATH.to_owned(), STYLES.as_bytes().to_vec()),
            ("xl/worksheets/sheet1.xml".to_owned(), EMPTY_SHEET.as_bytes().to_vec()),
        ];
        Self::from_parts(parts, sheet_name)
    }

    fn from_parts(parts: Vec<(String, Vec<u8>)>, sheet_name: &str) -> Result<Self> {
        let wb = part(&parts, WORKBOOK_PATH).context("xl/workbook.xml not found")?;
        let rels = part(&parts, WORKBOOK_RELS_PATH).context("xl/_rels/workbook.xml.rels not found")?;

        let (sheets, _) = workbook_sheets(wb)?;
        let (_, rid) = sheets
            .iter()
            .find(|(n, _)| n == sheet_name)
            .with_context(|| format!("Sheet '{sheet_name}' not found"))?;
        let sheet_path = sheet_part_path(rels, rid)?;

        let sheet_xml = part(&parts, &sheet_path)
            .with_context(|| format!("{sheet_path} not found"))?
            .to_vec();
        let styles_xml = part(&parts, STYLES_PATH)
            .context("styles.xml not found")?
            .to_vec();
        let shared_strings = match part(&parts, SHARED_STRINGS_PATH) {
            Some(xml) => parse_shared_strings(xml)?,
            None => Vec::new(),
        };
        debug!(sheet = sheet_name, path = %sheet_path, parts = parts.len(), "workbook loaded");

        Ok(Self {
            parts,
            sheet_name: sheet_name.to_owned(),
            sheet_path,
            sheet_xml,
            styles_xml,
            shared_strings,
        })
    }

    /* ========================== СОХРАНЕНИЕ ================================== */

    /// Serializes the whole package: untouched parts as loaded, the edited sheet and
    /// styles.xml with their current content.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut zout = zip_crate::ZipWriter::new(Cursor::new(Vec::new()));
        let opt: zip_crate::write::FileOptions<'_, ()> = zip_crate::write::FileOptions::default()
            .compression_method(zip_crate::CompressionMethod::Deflated)
            .compression_level(Some(1));

        for (name, content) in &self.parts {
            let data: &[u8] = if *name == self.sheet_path {
                &self.sheet_xml
            } else if name == STYLES_PATH {
                &self.styles_xml
            } else {
                content
            };
            zout.start_file(name.as_str(), opt)?;
            zout.write_all(data)?;
        }
        Ok(zout.finish()?.into_inner())
    }

    /// Saves the workbook to `dst`, replacing any existing file atomically.
    pub fn save<P: AsRef<Path>>(&self, dst: P) -> Result<()> {
        let bytes = self.to_bytes()?;
        write_atomic(dst, &bytes)
    }
}

/// Writes `bytes` to a temporary file next to `dst`, then renames it over `dst`.
pub fn write_atomic<P: AsRef<Path>>(dst: P, bytes: &[u8]) -> Result<()> {
    let dst = dst.as_ref();
    let dir = match dst.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("cannot create temporary file in {}", dir.display()))?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    // NamedTempFile создаётся с 0600, отчёт должен читаться как обычный файл
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o644))?;
    }
    tmp.persist(dst)
        .with_context(|| format!("cannot write {}", dst.display()))?;
    debug!(path = %dst.display(), size = bytes.len(), "workbook written");
    Ok(())
}

/// Sheet names in workbook order.
pub fn scan<P: AsRef<Path>>(src: P) -> Result<Vec<String>> {
    let mut zip = zip_crate::ZipArchive::new(File::open(src)?)?;
    let mut wb = zip
        .by_name(WORKBOOK_PATH)
        .context("workbook.xml not found")?;

    let mut wb_xml = Vec::with_capacity(wb.size() as usize);
    wb.read_to_end(&mut wb_xml)?;

    let (sheets, _) = workbook_sheets(&wb_xml)?;
    Ok(sheets.into_iter().map(|(name, _)| name).collect())
}
