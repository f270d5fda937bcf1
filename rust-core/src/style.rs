//! style.rs – слой стилей (шрифт, заливка, граница, выравнивание) + нормализация <cols>
//!
//! Every record written to styles.xml is serialized in one canonical form and looked up
//! before insertion, so styling the same way twice reuses the existing font/fill/border/xf.

use anyhow::{Context, Result, bail};
use quick_xml::{Reader, escape::escape, events::Event, name::QName};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

use crate::{XlsxEditor, col_index, col_letter, split_coord, start_tag};

/* ========================== ALIGNMENT API ================================= */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HorizAlignment {
    Left,
    Center,
    Right,
}
impl fmt::Display for HorizAlignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HorizAlignment::Left => "left",
            HorizAlignment::Center => "center",
            HorizAlignment::Right => "right",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VertAlignment {
    Top,
    Center,
    Bottom,
}
impl fmt::Display for VertAlignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VertAlignment::Top => "top",
            VertAlignment::Center => "center",
            VertAlignment::Bottom => "bottom",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignSpec {
    pub horiz: Option<HorizAlignment>,
    pub vert: Option<VertAlignment>,
    pub wrap: bool,
}

impl AlignSpec {
    fn to_xml(&self) -> String {
        let mut s = String::from("<alignment");
        if let Some(h) = &self.horiz {
            s.push_str(&format!(r#" horizontal="{h}""#));
        }
        if let Some(v) = &self.vert {
            s.push_str(&format!(r#" vertical="{v}""#));
        }
        if self.wrap {
            s.push_str(r#" wrapText="1""#);
        }
        s.push_str("/>");
        s
    }
}

/* ========================== FONT / FILL / BORDER ========================== */

#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    pub name: String,
    pub size: f64,
    pub bold: bool,
    /// RGB or ARGB hex, e.g. "FFFFFF".
    pub color: Option<String>,
}

impl FontSpec {
    fn to_xml(&self) -> Result<String> {
        let mut xml = String::from("<font>");
        if self.bold {
            xml.push_str("<b/>");
        }
        xml.push_str(&format!(r#"<sz val="{}"/>"#, self.size));
        if let Some(c) = &self.color {
            xml.push_str(&format!(r#"<color rgb="{}"/>"#, argb(c)?));
        }
        xml.push_str(&format!(r#"<name val="{}"/>"#, escape(self.name.as_str())));
        xml.push_str("</font>");
        Ok(xml)
    }
}

/// Solid pattern fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillSpec {
    pub rgb: String,
}

impl FillSpec {
    fn to_xml(&self) -> Result<String> {
        let c = argb(&self.rgb)?;
        Ok(format!(
            r#"<fill><patternFill patternType="solid"><fgColor rgb="{c}"/><bgColor rgb="{c}"/></patternFill></fill>"#
        ))
    }
}

/// The same line on all four sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorderSpec {
    pub style: String,
    pub color: Option<String>,
}

impl BorderSpec {
    fn to_xml(&self) -> Result<String> {
        let color = match &self.color {
            Some(c) => Some(argb(c)?),
            None => None,
        };
        let mut xml = String::from("<border>");
        for side in ["left", "right", "top", "bottom"] {
            match &color {
                Some(c) => xml.push_str(&format!(
                    r#"<{side} style="{s}"><color rgb="{c}"/></{side}>"#,
                    s = self.style
                )),
                None => xml.push_str(&format!(r#"<{side} style="{s}"/>"#, s = self.style)),
            }
        }
        xml.push_str("<diagonal/></border>");
        Ok(xml)
    }
}

/// Style applied to a cell. `None` parts keep whatever the cell already had.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellStyle {
    pub font: Option<FontSpec>,
    pub fill: Option<FillSpec>,
    pub border: Option<BorderSpec>,
    pub align: Option<AlignSpec>,
}

fn argb(rgb: &str) -> Result<String> {
    let hex = rgb.trim_start_matches('#');
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        bail!("invalid color `{rgb}`");
    }
    match hex.len() {
        6 => Ok(format!("FF{}", hex.to_ascii_uppercase())),
        8 => Ok(hex.to_ascii_uppercase()),
        _ => bail!("invalid color `{rgb}`"),
    }
}

/* ========================== TARGET PARSER ================================= */

#[derive(Debug)]
enum Target {
    Cell(String),
    Rect { c0: u32, r0: u32, c1: u32, r1: u32 },
}

impl Target {
    fn cells(&self) -> Vec<String> {
        match self {
            Target::Cell(c) => vec![c.clone()],
            Target::Rect { c0, r0, c1, r1 } => {
                let mut out = Vec::new();
                for r in *r0..=*r1 {
                    for c in *c0..=*c1 {
                        out.push(format!("{}{}", col_letter(c), r));
                    }
                }
                out
            }
        }
    }
}

fn parse_target(s: &str) -> Result<Target> {
    let re_cell = Regex::new(r"^([A-Za-z]+)([0-9]+)$")?;
    let re_rect = Regex::new(r"^([A-Za-z]+[0-9]+):([A-Za-z]+[0-9]+)$")?;

    if re_cell.is_match(s) {
        return Ok(Target::Cell(s.to_ascii_uppercase()));
    }
    if let Some(caps) = re_rect.captures(s) {
        let (a0, b0) = split_coord(&caps[1])?;
        let (a1, b1) = split_coord(&caps[2])?;
        return Ok(Target::Rect {
            c0: a0.min(a1),
            r0: b0.min(b1),
            c1: a0.max(a1),
            r1: b0.max(b1),
        });
    }
    bail!("invalid range syntax: {s}");
}

/* ========================== PUBLIC API ==================================== */

impl XlsxEditor {
    /// Applies `style` to a cell ("A13") or a rectangle ("A14:H14").
    ///
    /// Parts left as `None` in `style` keep the cell's current font/fill/border/alignment;
    /// the number format is always kept.
    pub fn set_style(&mut self, range: &str, style: &CellStyle) -> Result<&mut Self> {
        let patch = StylePatch {
            font: style.font.as_ref().map(|f| self.ensure_font(f)).transpose()?,
            fill: style.fill.as_ref().map(|f| self.ensure_fill(f)).transpose()?,
            border: style.border.as_ref().map(|b| self.ensure_border(b)).transpose()?,
            align: style.align.as_ref().map(AlignSpec::to_xml),
        };
        for coord in parse_target(range)?.cells() {
            self.patch_one_cell(&coord, &patch)?;
        }
        Ok(self)
    }

    pub fn set_column_width(&mut self, col_letter: &str, width: f64) -> Result<&mut Self> {
        let col0 = col_index(col_letter)?;
        self.set_column_properties(col0, width)?;
        Ok(self)
    }
}

/* ========================== CORE PATCH ENGINE ============================= */

/// Resolved ids of the records to put into the cell's xf.
struct StylePatch {
    font: Option<u32>,
    fill: Option<u32>,
    border: Option<u32>,
    align: Option<String>,
}

/// Contents of one `<xf>` of `<cellXfs>`.
#[derive(Debug, Clone, Default, PartialEq)]
struct StyleParts {
    num_fmt: u32,
    font: u32,
    fill: u32,
    border: u32,
    xf_id: u32,
    align: Option<String>,      // сырой <alignment .../>
    protection: Option<String>, // сырой <protection .../>
}

impl StyleParts {
    fn to_xml(&self) -> String {
        let mut xf = format!(
            r#"<xf numFmtId="{}" fontId="{}" fillId="{}" borderId="{}" xfId="{}""#,
            self.num_fmt, self.font, self.fill, self.border, self.xf_id
        );
        if self.num_fmt != 0 {
            xf.push_str(r#" applyNumberFormat="1""#);
        }
        if self.font != 0 {
            xf.push_str(r#" applyFont="1""#);
        }
        if self.fill != 0 {
            xf.push_str(r#" applyFill="1""#);
        }
        if self.border != 0 {
            xf.push_str(r#" applyBorder="1""#);
        }
        if self.align.is_some() {
            xf.push_str(r#" applyAlignment="1""#);
        }
        if self.protection.is_some() {
            xf.push_str(r#" applyProtection="1""#);
        }
        if self.align.is_none() && self.protection.is_none() {
            xf.push_str("/>");
            return xf;
        }
        xf.push('>');
        if let Some(a) = &self.align {
            xf.push_str(a);
        }
        if let Some(p) = &self.protection {
            xf.push_str(p);
        }
        xf.push_str("</xf>");
        xf
    }
}

fn merge_style_parts(mut base: StyleParts, patch: &StylePatch) -> StyleParts {
    if let Some(f) = patch.font {
        base.font = f;
    }
    if let Some(f) = patch.fill {
        base.fill = f;
    }
    if let Some(b) = patch.border {
        base.border = b;
    }
    if patch.align.is_some() {
        base.align = patch.align.clone();
    }
    base
}

impl XlsxEditor {
    fn patch_one_cell(&mut self, coord: &str, patch: &StylePatch) -> Result<()> {
        let sid = self.cell_style_id(coord)?.unwrap_or(0);
        let old = self.read_style_parts(sid)?;
        let merged = merge_style_parts(old, patch);
        let new_sid = self.ensure_child("cellXfs", b"xf", &merged.to_xml())?;
        self.apply_style_to_cell(coord, new_sid)
    }

    fn read_style_parts(&mut self, style_id: u32) -> Result<StyleParts> {
        let (inner_start, inner_end) = block_inner(&mut self.styles_xml, "cellXfs")?;
        let inner = &self.styles_xml[inner_start..inner_end];
        let kids = child_ranges(inner, b"xf")?;
        let Some(&(s, e)) = kids.get(style_id as usize) else {
            return Ok(StyleParts::default());
        };
        let xf = &inner[s..e];

        let mut parts = StyleParts::default();
        let mut reader = Reader::from_reader(xf);
        let mut depth = 0usize;
        loop {
            let pos = reader.buffer_position() as usize;
            match reader.read_event()? {
                Event::Start(ref el) | Event::Empty(ref el) if depth == 0 => {
                    for a in el.attributes().with_checks(false).flatten() {
                        let parse = || -> Result<u32> {
                            let v = String::from_utf8_lossy(&a.value);
                            v.parse().with_context(|| format!("bad xf attribute value `{v}`"))
                        };
                        match a.key.as_ref() {
                            b"numFmtId" => parts.num_fmt = parse()?,
                            b"fontId" => parts.font = parse()?,
                            b"fillId" => parts.fill = parse()?,
                            b"borderId" => parts.border = parse()?,
                            b"xfId" => parts.xf_id = parse()?,
                            _ => {}
                        }
                    }
                    depth = 1;
                }
                Event::Start(el) => {
                    let name = el.name().as_ref().to_vec();
                    reader.read_to_end(QName(&name))?;
                    let raw = String::from_utf8_lossy(&xf[pos..reader.buffer_position() as usize]).into_owned();
                    match el.local_name().as_ref() {
                        b"alignment" => parts.align = Some(raw),
                        b"protection" => parts.protection = Some(raw),
                        _ => {}
                    }
                }
                Event::Empty(el) => {
                    let raw = String::from_utf8_lossy(&xf[pos..reader.buffer_position() as usize]).into_owned();
                    match el.local_name().as_ref() {
                        b"alignment" => parts.align = Some(raw),
                        b"protection" => parts.protection = Some(raw),
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(parts)
    }

    fn ensure_font(&mut self, font: &FontSpec) -> Result<u32> {
        let xml = font.to_xml()?;
        self.ensure_child("fonts", b"font", &xml)
    }

    fn ensure_fill(&mut self, fill: &FillSpec) -> Result<u32> {
        let xml = fill.to_xml()?;
        self.ensure_child("fills", b"fill", &xml)
    }

    fn ensure_border(&mut self, border: &BorderSpec) -> Result<u32> {
        let xml = border.to_xml()?;
        self.ensure_child("borders", b"border", &xml)
    }

    /// Index of `wanted` among the `child` elements of `<block>`, appending it (and
    /// updating `count`) when no identical record exists yet.
    fn ensure_child(&mut self, block: &str, child: &[u8], wanted: &str) -> Result<u32> {
        let (inner_start, inner_end) = block_inner(&mut self.styles_xml, block)?;
        let kids = child_ranges(&self.styles_xml[inner_start..inner_end], child)?;

        if let Some(idx) = kids.iter().position(|&(s, e)| {
            self.styles_xml[inner_start + s..inner_start + e].trim_ascii() == wanted.as_bytes()
        }) {
            return Ok(idx as u32);
        }

        self.styles_xml
            .splice(inner_end..inner_end, wanted.bytes());
        let count = kids.len() as u32 + 1;
        set_count(&mut self.styles_xml, block, count)?;
        Ok(count - 1)
    }
}

/* ========================== styles.xml HELPERS ============================ */

/// Byte range between `<tag ...>` and `</tag>`; a self-closing `<tag/>` is expanded first.
fn block_inner(xml: &mut Vec<u8>, tag: &str) -> Result<(usize, usize)> {
    let (_, gt) = start_tag(xml, tag).with_context(|| format!("styles.xml: <{tag}> not found"))?;
    if xml[gt - 1] == b'/' {
        let closing = format!("></{tag}>");
        xml.splice(gt - 1..gt + 1, closing.bytes());
        return Ok((gt, gt));
    }
    let inner_start = gt + 1;
    let close = format!("</{tag}>");
    let inner_end = memchr::memmem::find(&xml[inner_start..], close.as_bytes())
        .with_context(|| format!("styles.xml: </{tag}> not found"))?
        + inner_start;
    Ok((inner_start, inner_end))
}

/// Byte ranges (relative to `inner`) of the `child` elements directly inside `inner`.
fn child_ranges(inner: &[u8], child: &[u8]) -> Result<Vec<(usize, usize)>> {
    let mut reader = Reader::from_reader(inner);
    let mut out = Vec::new();
    loop {
        let pos = reader.buffer_position() as usize;
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                reader.read_to_end(QName(&name))?;
                if e.local_name().as_ref() == child {
                    out.push((pos, reader.buffer_position() as usize));
                }
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == child {
                    out.push((pos, reader.buffer_position() as usize));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

/// Sets `count="n"` on the start tag of `<tag>`, adding the attribute if missing.
fn set_count(xml: &mut Vec<u8>, tag: &str, n: u32) -> Result<()> {
    let (start, gt) = start_tag(xml, tag).with_context(|| format!("<{tag}> not found"))?;
    let value = n.to_string();
    if let Some(a) = memchr::memmem::find(&xml[start..gt], b" count=\"") {
        let v0 = start + a + " count=\"".len();
        let v1 = memchr::memchr(b'"', &xml[v0..gt])
            .context("closing quote not found")?
            + v0;
        xml.splice(v0..v1, value.bytes());
    } else {
        let at = start + 1 + tag.len();
        xml.splice(at..at, format!(r#" count="{value}""#).bytes());
    }
    Ok(())
}

/* ========================== НОРМАЛИЗАЦИЯ <cols> =========================== */

#[derive(Clone, Debug, Default, PartialEq)]
struct ColProp {
    width: Option<f64>,
    style: Option<u32>,
    best_fit: bool,
    custom_width: bool,
    hidden: bool,
}

impl XlsxEditor {
    /// Ширина столбца `col0` (0-based) + нормализация всего блока <cols>.
    fn set_column_properties(&mut self, col0: u32, width: f64) -> Result<()> {
        let (cols_start, cols_end) = self.ensure_cols_block()?;

        let mut cols_map = self.read_cols_map(cols_start, cols_end)?;
        let prop = cols_map.entry(col0 + 1).or_default(); // в map храним 1-based
        prop.width = Some(width);
        prop.custom_width = true;

        self.write_cols_map(cols_start, cols_end, &cols_map)
    }

    fn ensure_cols_block(&mut self) -> Result<(usize, usize)> {
        if let (Some(start), Some(end)) = (
            memchr::memmem::find(&self.sheet_xml, b"<cols>"),
            memchr::memmem::find(&self.sheet_xml, b"</cols>"),
        ) {
            return Ok((start, end + "</cols>".len()));
        }

        // <cols> по схеме стоит сразу перед <sheetData>
        let anchor = memchr::memmem::find(&self.sheet_xml, b"<sheetData")
            .context("<sheetData> not found on the current sheet")?;
        let block = b"<cols></cols>";
        self.sheet_xml.splice(anchor..anchor, block.iter().copied());
        Ok((anchor, anchor + block.len()))
    }

    fn read_cols_map(&self, cols_start: usize, cols_end: usize) -> Result<BTreeMap<u32, ColProp>> {
        let mut map: BTreeMap<u32, ColProp> = BTreeMap::new();
        let text = std::str::from_utf8(&self.sheet_xml[cols_start..cols_end])?;
        let re = Regex::new(r#"<col\b[^>]*/>"#)?;
        let attrs_re = Regex::new(r#"([a-zA-Z:]+)\s*=\s*"([^"]*)""#)?;
        let truthy = |v: Option<&String>| v.is_some_and(|v| v == "1" || v == "true");

        for m in re.find_iter(text) {
            let mut attrs = BTreeMap::new();
            for cap in attrs_re.captures_iter(m.as_str()) {
                attrs.insert(cap[1].to_string(), cap[2].to_string());
            }

            let min: u32 = attrs.get("min").map_or(Ok(1), |v| v.parse())?;
            let max: u32 = attrs.get("max").map_or(Ok(min), |v| v.parse())?;

            let prop = ColProp {
                width: attrs.get("width").and_then(|s| s.parse::<f64>().ok()),
                style: attrs.get("style").and_then(|s| s.parse::<u32>().ok()),
                best_fit: truthy(attrs.get("bestFit")),
                custom_width: truthy(attrs.get("customWidth")),
                hidden: truthy(attrs.get("hidden")),
            };
            for i in min..=max {
                map.insert(i, prop.clone());
            }
        }
        Ok(map)
    }

    fn write_cols_map(
        &mut self,
        cols_start: usize,
        cols_end: usize,
        map: &BTreeMap<u32, ColProp>,
    ) -> Result<()> {
        // Сжимаем одинаковые проперти в диапазоны
        let mut out = String::with_capacity(256);
        out.push_str("<cols>");

        let mut it = map.iter().peekable();
        while let Some((&i, prop)) = it.next() {
            let mut j = i;
            while let Some(&(&k, prop2)) = it.peek() {
                if k == j + 1 && prop == prop2 {
                    j = k;
                    it.next();
                } else {
                    break;
                }
            }
            out.push_str(&build_one_col_tag(i, j, prop));
        }

        out.push_str("</cols>");
        self.sheet_xml.splice(cols_start..cols_end, out.bytes());
        Ok(())
    }
}

fn build_one_col_tag(min: u32, max: u32, p: &ColProp) -> String {
    let mut s = format!(r#"<col min="{min}" max="{max}""#);
    if let Some(w) = p.width {
        s.push_str(&format!(r#" width="{w}""#));
        if p.custom_width {
            s.push_str(r#" customWidth="1""#);
        }
    }
    if let Some(st) = p.style {
        s.push_str(&format!(r#" style="{st}""#));
    }
    if p.best_fit {
        s.push_str(r#" bestFit="1""#);
    }
    if p.hidden {
        s.push_str(r#" hidden="1""#);
    }
    s.push_str("/>");
    s
}
