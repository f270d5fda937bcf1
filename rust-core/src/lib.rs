//! rust-core: ядро редактора xlsx.
//! Книга целиком держится в памяти (все части пакета), редактируется один лист.

mod files_part;
mod read_part;
pub mod style;
mod test;

pub use files_part::{scan, write_atomic};
pub use style::{AlignSpec, BorderSpec, CellStyle, FillSpec, FontSpec, HorizAlignment, VertAlignment};

use anyhow::{Context, Result, bail};
use quick_xml::{Writer, events::BytesText};
use read_part::{CellSpan, cell_spans, row_spans};

/// `XlsxEditor` provides functionality to open or create, modify, and save XLSX files.
/// Every part of the package is loaded into memory; one worksheet is selected for editing.
pub struct XlsxEditor {
    parts: Vec<(String, Vec<u8>)>, // все части пакета в порядке архива
    sheet_name: String,
    sheet_path: String,
    sheet_xml: Vec<u8>,
    styles_xml: Vec<u8>,
    shared_strings: Vec<String>,
}

/// Value written into a cell.
///
/// Text is always stored as an inline string, even when it looks like a number.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_owned())
    }
}
impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}
impl From<&String> for CellValue {
    fn from(s: &String) -> Self {
        CellValue::Text(s.clone())
    }
}
impl From<u32> for CellValue {
    fn from(n: u32) -> Self {
        CellValue::Number(n.into())
    }
}
impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl XlsxEditor {
    /// Name of the sheet being edited.
    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    /// Sets the value of a specific cell in the sheet.
    ///
    /// An existing cell is replaced (its style index is kept); a missing row is created
    /// in sorted position so that `<row>` elements stay ordered by `r`.
    ///
    /// # Arguments
    /// * `coord` - The cell coordinate (e.g., "A1", "H14").
    /// * `value` - Text or number to store.
    pub fn set_cell<V: Into<CellValue>>(&mut self, coord: &str, value: V) -> Result<()> {
        let (col, row_num) = split_coord(coord)?;
        let coord = format!("{}{}", col_letter(col), row_num);
        let value = value.into();
        check_value(&coord, &value)?;

        match self.locate_cell(row_num, col)? {
            CellSlot::Existing(cell) => {
                let style = cell.attr(b"s");
                let xml = cell_xml(&coord, &value, style.as_deref())?;
                self.sheet_xml.splice(cell.start..cell.end, xml);
            }
            CellSlot::Missing(pos) => {
                let xml = cell_xml(&coord, &value, None)?;
                self.sheet_xml.splice(pos..pos, xml);
            }
        }
        Ok(())
    }

    /// Sets the style index (`s` attribute) of a cell, creating an empty cell if needed.
    pub(crate) fn apply_style_to_cell(&mut self, coord: &str, style: u32) -> Result<()> {
        let (col, row_num) = split_coord(coord)?;
        let coord = format!("{}{}", col_letter(col), row_num);

        match self.locate_cell(row_num, col)? {
            CellSlot::Existing(cell) => {
                let mut attrs: Vec<(Vec<u8>, Vec<u8>)> = cell
                    .attrs
                    .iter()
                    .filter(|(k, _)| k.as_slice() != b"s")
                    .cloned()
                    .collect();
                attrs.push((b"s".to_vec(), style.to_string().into_bytes()));

                let mut tag = b"<c".to_vec();
                for (k, v) in &attrs {
                    tag.push(b' ');
                    tag.extend_from_slice(k);
                    tag.extend_from_slice(b"=\"");
                    tag.extend_from_slice(v);
                    tag.push(b'"');
                }
                tag.extend_from_slice(if cell.self_closing { b"/>" } else { b">" });
                self.sheet_xml.splice(cell.start..cell.open_end, tag);
            }
            CellSlot::Missing(pos) => {
                let new_cell = format!(r#"<c r="{coord}" s="{style}"/>"#);
                self.sheet_xml.splice(pos..pos, new_cell.into_bytes());
            }
        }
        Ok(())
    }

    /// Style index of a cell, `None` when the cell or its `s` attribute is absent.
    pub fn cell_style_id(&self, coord: &str) -> Result<Option<u32>> {
        let (col, row_num) = split_coord(coord)?;
        let rows = row_spans(&self.sheet_xml)?;
        let Some(row) = rows.iter().find(|r| r.num == row_num) else {
            return Ok(None);
        };
        let cells = cell_spans(&self.sheet_xml, row)?;
        let Some(cell) = cells.iter().find(|c| c.col == col) else {
            return Ok(None);
        };
        match cell.attr(b"s") {
            Some(s) => Ok(Some(s.parse().with_context(|| format!("bad style index `{s}` in {coord}"))?)),
            None => Ok(None),
        }
    }

    /// Finds the cell at (`row_num`, `col`), making sure its row exists with an explicit
    /// closing tag. A missing cell yields the byte offset where it must be inserted.
    fn locate_cell(&mut self, row_num: u32, col: u32) -> Result<CellSlot> {
        let row = self.ensure_row(row_num)?;
        let cells = cell_spans(&self.sheet_xml, &row)?;
        if let Some(cell) = cells.iter().find(|c| c.col == col) {
            return Ok(CellSlot::Existing(cell.clone()));
        }
        let pos = cells
            .iter()
            .find(|c| c.col > col)
            .map_or(row.inner_end, |c| c.start);
        Ok(CellSlot::Missing(pos))
    }

    fn ensure_row(&mut self, row_num: u32) -> Result<read_part::RowSpan> {
        self.expand_empty_sheet_data()?;

        let rows = row_spans(&self.sheet_xml)?;
        if let Some(row) = rows.iter().find(|r| r.num == row_num) {
            if !row.self_closing {
                return Ok(row.clone());
            }
            // <row r="N" .../> → <row r="N" ...></row>
            let tag = &self.sheet_xml[row.start..row.open_end];
            let body = tag
                .strip_suffix(b"/>")
                .context("malformed self-closing <row>")?
                .trim_ascii_end();
            let mut expanded = body.to_vec();
            expanded.extend_from_slice(b"></row>");
            self.sheet_xml.splice(row.start..row.open_end, expanded);
        } else {
            // Ряды должны идти по возрастанию r, иначе Excel ругается на «восстановленные записи».
            let pos = match rows.iter().find(|r| r.num > row_num) {
                Some(r) => r.start,
                None => memchr::memmem::rfind(&self.sheet_xml, b"</sheetData>")
                    .context("</sheetData> tag not found")?,
            };
            let new_row = format!(r#"<row r="{row_num}"></row>"#);
            self.sheet_xml.splice(pos..pos, new_row.into_bytes());
        }

        row_spans(&self.sheet_xml)?
            .into_iter()
            .find(|r| r.num == row_num)
            .with_context(|| format!("row {row_num} vanished after insertion"))
    }

    fn expand_empty_sheet_data(&mut self) -> Result<()> {
        let (start, gt) = start_tag(&self.sheet_xml, "sheetData")
            .context("<sheetData> not found on the current sheet")?;
        // <sheetData/> и <sheetData /> → <sheetData></sheetData>
        if self.sheet_xml[gt - 1] == b'/' {
            let mut tag = self.sheet_xml[start..gt - 1].trim_ascii_end().to_vec();
            tag.extend_from_slice(b"></sheetData>");
            self.sheet_xml.splice(start..gt + 1, tag);
        }
        Ok(())
    }
}

enum CellSlot {
    Existing(CellSpan),
    Missing(usize),
}

/// XML 1.0 `Char`: TAB, LF, CR and everything from U+0020 except U+FFFE/U+FFFF.
fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
}

fn check_value(coord: &str, value: &CellValue) -> Result<()> {
    match value {
        CellValue::Text(text) => {
            if let Some(bad) = text.chars().find(|&c| !is_xml_char(c)) {
                bail!(
                    "cannot store character U+{:04X} in {coord}: not allowed in XML",
                    bad as u32
                );
            }
        }
        CellValue::Number(n) => {
            if !n.is_finite() {
                bail!("cannot store non-finite number {n} in {coord}");
            }
        }
    }
    Ok(())
}

fn cell_xml(coord: &str, value: &CellValue, style: Option<&str>) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    let mut c_elem = writer.create_element("c").with_attribute(("r", coord));
    if let Some(s) = style {
        c_elem = c_elem.with_attribute(("s", s));
    }
    match value {
        CellValue::Text(text) => {
            c_elem
                .with_attribute(("t", "inlineStr"))
                .write_inner_content(|w| {
                    w.create_element("is").write_inner_content(|w2| {
                        let t = w2.create_element("t");
                        let t = if text.trim() != text.as_str() {
                            t.with_attribute(("xml:space", "preserve"))
                        } else {
                            t
                        };
                        t.write_text_content(BytesText::new(text))?;
                        Ok(())
                    })?;
                    Ok(())
                })?;
        }
        CellValue::Number(n) => {
            c_elem.write_inner_content(|w| {
                w.create_element("v")
                    .write_text_content(BytesText::new(&n.to_string()))?;
                Ok(())
            })?;
        }
    }
    Ok(writer.into_inner())
}

/* ========================== BYTE/STRING HELPERS =========================== */

/// Position of the start tag `<tag` (exact name) and of its closing '>'.
pub(crate) fn start_tag(xml: &[u8], tag: &str) -> Option<(usize, usize)> {
    let needle = format!("<{tag}");
    memchr::memmem::find_iter(xml, needle.as_bytes())
        .find(|&p| {
            matches!(
                xml.get(p + needle.len()).copied(),
                Some(b' ' | b'>' | b'/' | b'\t' | b'\r' | b'\n')
            )
        })
        .and_then(|p| memchr::memchr(b'>', &xml[p..]).map(|gt| (p, p + gt)))
}

/// 0-based column index to letters (0 → "A", 26 → "AA").
pub fn col_letter(mut n: u32) -> String {
    let mut s = String::new();
    loop {
        s.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    s
}

/// Column letters to 0-based index ("A" → 0, "AA" → 26).
pub fn col_index(s: &str) -> Result<u32> {
    if s.is_empty() || s.len() > 3 || !s.bytes().all(|b| b.is_ascii_alphabetic()) {
        bail!("invalid column `{s}`");
    }
    Ok(s.bytes()
        .fold(0u32, |acc, b| acc * 26 + (b.to_ascii_uppercase() - b'A' + 1) as u32)
        - 1)
}

/// "H14" → (7, 14): 0-based column, 1-based row.
pub fn split_coord(coord: &str) -> Result<(u32, u32)> {
    let p = coord
        .find(|c: char| c.is_ascii_digit())
        .with_context(|| format!("invalid cell coordinate `{coord}` – no digits found"))?;
    let col = col_index(&coord[..p])?;
    let row: u32 = coord[p..]
        .parse()
        .with_context(|| format!("invalid row number in cell coordinate `{coord}`"))?;
    if row == 0 {
        bail!("invalid cell coordinate `{coord}` – rows start at 1");
    }
    Ok((col, row))
}
