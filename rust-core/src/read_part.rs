//! Чтение листа: разметка рядов/ячеек по байтовым позициям и значения ячеек.

use crate::{XlsxEditor, split_coord};
use anyhow::{Context, Result, bail};
use quick_xml::{
    Reader,
    escape::unescape,
    events::{BytesStart, Event},
    name::QName,
};
use std::collections::BTreeSet;

/// Byte layout of one `<row>` inside the sheet XML.
#[derive(Debug, Clone)]
pub(crate) struct RowSpan {
    pub num: u32,
    pub start: usize,     // '<' of <row
    pub open_end: usize,  // after '>' of the start tag
    pub inner_end: usize, // '<' of </row> (== open_end for <row/>)
    pub self_closing: bool,
}

/// Byte layout of one `<c>` inside a row.
#[derive(Debug, Clone)]
pub(crate) struct CellSpan {
    pub col: u32, // 0-based
    pub start: usize,
    pub open_end: usize,
    pub inner_end: usize,
    pub end: usize,
    pub self_closing: bool,
    pub attrs: Vec<(Vec<u8>, Vec<u8>)>, // сырые (экранированные) значения
}

impl CellSpan {
    pub fn attr(&self, key: &[u8]) -> Option<String> {
        self.attrs
            .iter()
            .find(|(k, _)| k.as_slice() == key)
            .map(|(_, v)| String::from_utf8_lossy(v).into_owned())
    }
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes().with_checks(false).flatten().find_map(|a| {
        (a.key.as_ref() == key).then(|| String::from_utf8_lossy(&a.value).into_owned())
    })
}

/// All rows of the sheet in document order. Rows without `r` follow the previous one.
pub(crate) fn row_spans(xml: &[u8]) -> Result<Vec<RowSpan>> {
    let mut reader = Reader::from_reader(xml);
    let mut rows = Vec::new();
    let mut prev = 0u32;

    loop {
        let start = reader.buffer_position() as usize;
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"row" => {
                let num = row_number(&e, prev)?;
                let open_end = reader.buffer_position() as usize;
                let name = e.name().as_ref().to_vec();
                let span = reader.read_to_end(QName(&name))?;
                rows.push(RowSpan {
                    num,
                    start,
                    open_end,
                    inner_end: span.end as usize,
                    self_closing: false,
                });
                prev = num;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                let num = row_number(&e, prev)?;
                let end = reader.buffer_position() as usize;
                rows.push(RowSpan {
                    num,
                    start,
                    open_end: end,
                    inner_end: end,
                    self_closing: true,
                });
                prev = num;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rows)
}

fn row_number(e: &BytesStart<'_>, prev: u32) -> Result<u32> {
    match attr_value(e, b"r") {
        Some(r) => r.parse().with_context(|| format!("bad row number `{r}`")),
        None => Ok(prev + 1),
    }
}

/// Cells of one row with absolute byte positions.
pub(crate) fn cell_spans(xml: &[u8], row: &RowSpan) -> Result<Vec<CellSpan>> {
    if row.self_closing {
        return Ok(Vec::new());
    }
    let base = row.open_end;
    let mut reader = Reader::from_reader(&xml[row.open_end..row.inner_end]);
    let mut cells = Vec::new();
    let mut next_col = 0u32;

    loop {
        let start = base + reader.buffer_position() as usize;
        let (e, self_closing) = match reader.read_event()? {
            Event::Start(e) => (e, false),
            Event::Empty(e) => (e, true),
            Event::Eof => break,
            _ => continue,
        };
        let open_end = base + reader.buffer_position() as usize;
        let (inner_end, end) = if self_closing {
            (open_end, open_end)
        } else {
            let name = e.name().as_ref().to_vec();
            let span = reader.read_to_end(QName(&name))?;
            (base + span.end as usize, base + reader.buffer_position() as usize)
        };
        if e.local_name().as_ref() != b"c" {
            continue;
        }

        let col = match attr_value(&e, b"r") {
            Some(r) => split_coord(&r)?.0,
            None => next_col,
        };
        next_col = col + 1;
        let attrs = e
            .attributes()
            .with_checks(false)
            .flatten()
            .map(|a| (a.key.as_ref().to_vec(), a.value.to_vec()))
            .collect();
        cells.push(CellSpan {
            col,
            start,
            open_end,
            inner_end,
            end,
            self_closing,
            attrs,
        });
    }
    Ok(cells)
}

/// Concatenated `<t>` texts up to the closing tag of the current element,
/// skipping phonetic runs (`<rPh>`).
fn rich_text(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut out = String::new();
    let mut depth = 0usize;
    let mut phonetic = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                match e.local_name().as_ref() {
                    b"t" if phonetic == 0 => {
                        let name = e.name().as_ref().to_vec();
                        let raw = reader.read_text(QName(&name))?;
                        out.push_str(&unescape(&raw)?);
                        continue;
                    }
                    b"rPh" => phonetic += 1,
                    _ => {}
                }
                depth += 1;
            }
            Event::End(e) => {
                if depth == 0 {
                    break;
                }
                if e.local_name().as_ref() == b"rPh" {
                    phonetic -= 1;
                }
                depth -= 1;
            }
            Event::Eof => bail!("unexpected end of XML inside a string item"),
            _ => {}
        }
    }
    Ok(out)
}

/// Parses `xl/sharedStrings.xml` into the string table.
pub(crate) fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    let mut out = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"si" => out.push(rich_text(&mut reader)?),
            Event::Empty(e) if e.local_name().as_ref() == b"si" => out.push(String::new()),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

fn cell_content(xml: &[u8], cell: &CellSpan, shared: &[String]) -> Result<Option<String>> {
    if cell.self_closing {
        return Ok(None);
    }
    let mut reader = Reader::from_reader(&xml[cell.open_end..cell.inner_end]);
    let mut value = None::<String>;
    let mut inline = None::<String>;
    let mut formula = None::<String>;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                match e.local_name().as_ref() {
                    b"v" => value = Some(unescape(&reader.read_text(QName(&name))?)?.into_owned()),
                    b"f" => formula = Some(unescape(&reader.read_text(QName(&name))?)?.into_owned()),
                    b"is" => inline = Some(rich_text(&mut reader)?),
                    _ => {
                        reader.read_to_end(QName(&name))?;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(v) = value.filter(|v| !v.is_empty()) {
        if cell.attr(b"t").as_deref() == Some("s") {
            let idx: usize = v
                .trim()
                .parse()
                .with_context(|| format!("bad shared string index `{v}`"))?;
            let s = shared
                .get(idx)
                .with_context(|| format!("shared string #{idx} not found"))?;
            return Ok(Some(s.clone()));
        }
        return Ok(Some(v));
    }
    if inline.is_some() {
        return Ok(inline);
    }
    Ok(formula.map(|f| format!("={f}")))
}

impl XlsxEditor {
    /// Reads the value of a cell.
    ///
    /// Shared strings are resolved, inline strings concatenated, and a formula without
    /// a cached value is returned as `=formula`. `None` means the cell holds no value,
    /// even if it exists and carries a style.
    pub fn cell_value(&self, coord: &str) -> Result<Option<String>> {
        let (col, row_num) = split_coord(coord)?;
        let rows = row_spans(&self.sheet_xml)?;
        let Some(row) = rows.iter().find(|r| r.num == row_num) else {
            return Ok(None);
        };
        let cells = cell_spans(&self.sheet_xml, row)?;
        match cells.iter().find(|c| c.col == col) {
            Some(cell) => cell_content(&self.sheet_xml, cell, &self.shared_strings),
            None => Ok(None),
        }
    }

    /// First row at or after `from` whose cell in column `col_letters` holds no value.
    pub fn first_empty_row(&self, col_letters: &str, from: u32) -> Result<u32> {
        let col = crate::col_index(col_letters)?;
        let mut filled = BTreeSet::new();
        for row in row_spans(&self.sheet_xml)?.iter().filter(|r| r.num >= from) {
            let cells = cell_spans(&self.sheet_xml, row)?;
            if let Some(cell) = cells.iter().find(|c| c.col == col) {
                if cell_content(&self.sheet_xml, cell, &self.shared_strings)?.is_some() {
                    filled.insert(row.num);
                }
            }
        }

        let mut row = from.max(1);
        while filled.contains(&row) {
            row += 1;
        }
        Ok(row)
    }
}
