#![cfg(test)]

use crate::{
    AlignSpec, BorderSpec, CellStyle, FillSpec, FontSpec, HorizAlignment, VertAlignment,
    XlsxEditor, scan, split_coord, write_atomic,
};
use anyhow::Result;
use std::{
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};
use tempfile::TempDir;

const EXTERNAL_SHEET1: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><dimension ref="A13:H16"/><sheetFormatPr defaultRowHeight="15"/><sheetData>
<row r="13"><c r="A13" s="1" t="s"><v>0</v></c><c r="C13" s="1" t="s"><v>1</v></c></row>
<row r="14" spans="1:8"><c r="A14" t="s"><v>2</v></c><c r="H14"><v>2</v></c></row>
<row r="15"><c r="A15" s="1"/><c r="C15" t="inlineStr"><is><t>inline &amp; more</t></is></c></row>
<row r="16" spans="1:8"/>
</sheetData></worksheet>"#;

const EXTERNAL_SHEET2: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData /></worksheet>"#;

const EXTERNAL_WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><bookViews><workbookView activeTab="1"/></bookViews><sheets><sheet name="Other" sheetId="2" r:id="rId2"/><sheet name="総合売上" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const EXTERNAL_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="/xl/worksheets/sheet2.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/><Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/></Relationships>"#;

const EXTERNAL_STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="1"><font><name val="Calibri"/><sz val="11"/></font></fonts><fills count="2"><fill><patternFill/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="14" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/></cellXfs></styleSheet>"#;

const EXTERNAL_SST: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="3" uniqueCount="3"><si><t>予約日</t></si><si><t>予約者名</t></si><si><r><t>6月</t></r><r><t>1日</t></r><rPh sb="0" eb="1"><t>ロク</t></rPh></si></sst>"#;

/// A workbook as another tool would write it: shared strings, two sheets with the
/// report sheet active, self-closing rows and cells.
fn external_workbook(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("external.xlsx");
    let mut zout = zip::ZipWriter::new(File::create(&path)?);
    let opt: zip::write::FileOptions<'_, ()> = zip::write::FileOptions::default();
    for (name, xml) in [
        ("[Content_Types].xml", r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#),
        ("xl/workbook.xml", EXTERNAL_WORKBOOK),
        ("xl/_rels/workbook.xml.rels", EXTERNAL_RELS),
        ("xl/styles.xml", EXTERNAL_STYLES),
        ("xl/sharedStrings.xml", EXTERNAL_SST),
        ("xl/worksheets/sheet1.xml", EXTERNAL_SHEET1),
        ("xl/worksheets/sheet2.xml", EXTERNAL_SHEET2),
    ] {
        zout.start_file(name, opt)?;
        zout.write_all(xml.as_bytes())?;
    }
    zout.finish()?;
    Ok(path)
}

fn read_part(path: &Path, name: &str) -> Result<Vec<u8>> {
    let mut zip = zip::ZipArchive::new(File::open(path)?)?;
    let mut f = zip.by_name(name)?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

fn count(hay: &[u8], needle: &str) -> usize {
    memchr::memmem::find_iter(hay, needle.as_bytes()).count()
}

fn header_style() -> CellStyle {
    CellStyle {
        font: Some(FontSpec {
            name: "游ゴシック".into(),
            size: 11.0,
            bold: true,
            color: Some("FFFFFF".into()),
        }),
        fill: Some(FillSpec { rgb: "4472C4".into() }),
        border: Some(BorderSpec {
            style: "thin".into(),
            color: Some("000000".into()),
        }),
        align: Some(AlignSpec {
            horiz: Some(HorizAlignment::Center),
            vert: Some(VertAlignment::Center),
            wrap: false,
        }),
    }
}

#[test]
fn new_workbook_round_trips_through_disk() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("new.xlsx");

    let mut app = XlsxEditor::new_workbook("総合売上")?;
    app.set_cell("A13", "予約日")?;
    app.set_cell("H14", 3u32)?;
    app.save(&path)?;

    assert_eq!(scan(&path)?, vec!["総合売上".to_owned()]);
    let app = XlsxEditor::open(&path)?;
    assert_eq!(app.sheet_name(), "総合売上");
    assert_eq!(app.cell_value("A13")?.as_deref(), Some("予約日"));
    assert_eq!(app.cell_value("H14")?.as_deref(), Some("3"));
    assert_eq!(app.cell_value("A14")?, None);
    Ok(())
}

#[test]
fn numeric_looking_text_stays_text() -> Result<()> {
    let mut app = XlsxEditor::new_workbook("Sheet1")?;
    app.set_cell("C14", "0123")?;
    app.set_cell("E14", " padded ")?;
    assert_eq!(app.cell_value("C14")?.as_deref(), Some("0123"));
    assert_eq!(app.cell_value("E14")?.as_deref(), Some(" padded "));
    assert_eq!(count(&app.sheet_xml, r#"t="inlineStr""#), 2);
    assert_eq!(count(&app.sheet_xml, r#"xml:space="preserve""#), 1);
    Ok(())
}

#[test]
fn rows_and_cells_are_kept_sorted() -> Result<()> {
    let mut app = XlsxEditor::new_workbook("Sheet1")?;
    app.set_cell("A20", "late")?;
    app.set_cell("C14", "c")?;
    app.set_cell("A14", "a")?;
    app.set_cell("B14", "b")?;

    let xml = &app.sheet_xml;
    let pos = |s: &str| memchr::memmem::find(xml, s.as_bytes()).unwrap();
    assert!(pos(r#"<row r="14""#) < pos(r#"<row r="20""#));
    assert!(pos(r#"r="A14""#) < pos(r#"r="B14""#));
    assert!(pos(r#"r="B14""#) < pos(r#"r="C14""#));
    assert_eq!(count(xml, "<row "), 2);
    Ok(())
}

#[test]
fn overwriting_a_cell_replaces_it() -> Result<()> {
    let mut app = XlsxEditor::new_workbook("Sheet1")?;
    app.set_cell("A14", "first")?;
    app.set_cell("A14", "second")?;
    assert_eq!(app.cell_value("A14")?.as_deref(), Some("second"));
    assert_eq!(count(&app.sheet_xml, r#"r="A14""#), 1);
    Ok(())
}

#[test]
fn reads_workbook_written_elsewhere() -> Result<()> {
    let dir = TempDir::new()?;
    let path = external_workbook(dir.path())?;

    assert_eq!(scan(&path)?, vec!["Other".to_owned(), "総合売上".to_owned()]);
    let app = XlsxEditor::open(&path)?;
    assert_eq!(app.sheet_name(), "総合売上");
    assert_eq!(app.cell_value("A13")?.as_deref(), Some("予約日"));
    assert_eq!(app.cell_value("C13")?.as_deref(), Some("予約者名"));
    assert_eq!(app.cell_value("A14")?.as_deref(), Some("6月1日"));
    assert_eq!(app.cell_value("H14")?.as_deref(), Some("2"));
    assert_eq!(app.cell_value("C15")?.as_deref(), Some("inline & more"));
    assert_eq!(app.cell_value("A15")?, None);
    assert_eq!(app.cell_value("A16")?, None);
    assert_eq!(app.cell_value("Z99")?, None);
    assert_eq!(app.first_empty_row("A", 14)?, 15);

    let other = XlsxEditor::open_sheet(&path, "Other")?;
    assert_eq!(other.first_empty_row("A", 14)?, 14);
    assert!(XlsxEditor::open_sheet(&path, "Missing").is_err());
    Ok(())
}

#[test]
fn fills_styled_and_self_closing_slots() -> Result<()> {
    let dir = TempDir::new()?;
    let path = external_workbook(dir.path())?;
    let out = dir.path().join("out.xlsx");

    let mut app = XlsxEditor::open(&path)?;
    app.set_cell("A15", "6月2日")?;
    assert_eq!(app.cell_style_id("A15")?, Some(1));
    assert_eq!(app.first_empty_row("A", 14)?, 16);

    app.set_cell("A16", "6月3日")?;
    assert_eq!(app.first_empty_row("A", 14)?, 17);
    app.save(&out)?;

    let app = XlsxEditor::open(&out)?;
    assert_eq!(app.cell_value("A14")?.as_deref(), Some("6月1日"));
    assert_eq!(app.cell_value("A15")?.as_deref(), Some("6月2日"));
    assert_eq!(app.cell_value("A16")?.as_deref(), Some("6月3日"));
    assert_eq!(app.cell_value("C15")?.as_deref(), Some("inline & more"));
    assert_eq!(
        read_part(&out, "xl/worksheets/sheet2.xml")?,
        EXTERNAL_SHEET2.as_bytes()
    );
    assert_eq!(read_part(&out, "xl/sharedStrings.xml")?, EXTERNAL_SST.as_bytes());
    Ok(())
}

#[test]
fn writes_into_spaced_empty_sheet_data() -> Result<()> {
    let dir = TempDir::new()?;
    let path = external_workbook(dir.path())?;

    let mut other = XlsxEditor::open_sheet(&path, "Other")?;
    other.set_cell("B2", "x")?;
    other.set_cell("A1", 1u32)?;
    assert_eq!(count(&other.sheet_xml, "<sheetData></sheetData>"), 0);
    assert_eq!(count(&other.sheet_xml, "</sheetData>"), 1);
    assert_eq!(other.cell_value("B2")?.as_deref(), Some("x"));
    assert_eq!(other.cell_value("A1")?.as_deref(), Some("1"));

    let out = dir.path().join("other.xlsx");
    other.save(&out)?;
    let reopened = XlsxEditor::open_sheet(&out, "Other")?;
    assert_eq!(reopened.cell_value("B2")?.as_deref(), Some("x"));
    Ok(())
}

#[test]
fn rejects_characters_xml_cannot_hold() -> Result<()> {
    let mut app = XlsxEditor::new_workbook("Sheet1")?;
    let before = app.sheet_xml.clone();
    for bad in ["Ya\u{1}mada", "\u{0}", "tab\u{B}", "\u{1F}", "\u{FFFE}"] {
        let err = app.set_cell("C14", bad).unwrap_err();
        assert!(err.to_string().contains("not allowed in XML"), "{err}");
    }
    assert_eq!(app.sheet_xml, before);

    app.set_cell("C14", "tab\tnew\nline ok 🙂")?;
    assert_eq!(app.cell_value("C14")?.as_deref(), Some("tab\tnew\nline ok 🙂"));
    Ok(())
}

#[test]
fn alignment_options_are_written() -> Result<()> {
    let mut app = XlsxEditor::new_workbook("Sheet1")?;
    let cases = [
        (HorizAlignment::Right, VertAlignment::Top, true, r#"<alignment horizontal="right" vertical="top" wrapText="1"/>"#),
        (HorizAlignment::Left, VertAlignment::Bottom, false, r#"<alignment horizontal="left" vertical="bottom"/>"#),
    ];
    for (i, (horiz, vert, wrap, xml)) in cases.into_iter().enumerate() {
        let coord = format!("A{}", i + 1);
        app.set_style(
            &coord,
            &CellStyle {
                align: Some(AlignSpec {
                    horiz: Some(horiz),
                    vert: Some(vert),
                    wrap,
                }),
                ..Default::default()
            },
        )?;
        assert_eq!(count(&app.styles_xml, xml), 1);
        assert_eq!(app.cell_style_id(&coord)?, Some(i as u32 + 1));
    }
    Ok(())
}

#[test]
fn identical_styles_are_reused() -> Result<()> {
    let mut app = XlsxEditor::new_workbook("Sheet1")?;
    let style = header_style();
    app.set_style("A13:B13", &style)?;
    app.set_style("E13", &style)?;

    assert_eq!(count(&app.styles_xml, "<font>"), 2);
    assert_eq!(count(&app.styles_xml, "<fill>"), 3);
    assert_eq!(count(&app.styles_xml, "<border>"), 2);
    assert!(count(&app.styles_xml, r#"<fonts count="2">"#) == 1);
    assert!(count(&app.styles_xml, r#"<cellXfs count="2">"#) == 1);

    let sid = app.cell_style_id("A13")?;
    assert_eq!(sid, Some(1));
    assert_eq!(app.cell_style_id("B13")?, sid);
    assert_eq!(app.cell_style_id("E13")?, sid);
    assert_eq!(app.cell_style_id("C13")?, None);
    Ok(())
}

#[test]
fn styling_keeps_value_and_number_format() -> Result<()> {
    let dir = TempDir::new()?;
    let path = external_workbook(dir.path())?;

    let mut app = XlsxEditor::open(&path)?;
    app.set_style(
        "A13",
        &CellStyle {
            border: Some(BorderSpec {
                style: "thin".into(),
                color: None,
            }),
            ..Default::default()
        },
    )?;
    assert_eq!(app.cell_value("A13")?.as_deref(), Some("予約日"));
    assert_eq!(app.cell_style_id("A13")?, Some(2));
    assert_eq!(
        count(
            &app.styles_xml,
            r#"<xf numFmtId="14" fontId="0" fillId="0" borderId="1" xfId="0" applyNumberFormat="1" applyBorder="1"/>"#
        ),
        1
    );
    Ok(())
}

#[test]
fn column_widths_are_normalized() -> Result<()> {
    let mut app = XlsxEditor::new_workbook("Sheet1")?;
    app.set_column_width("A", 12.0)?;
    app.set_column_width("C", 15.0)?;
    app.set_column_width("B", 12.0)?;
    assert_eq!(
        count(
            &app.sheet_xml,
            r#"<cols><col min="1" max="2" width="12" customWidth="1"/><col min="3" max="3" width="15" customWidth="1"/></cols><sheetData>"#
        ),
        1
    );
    Ok(())
}

#[test]
fn write_atomic_replaces_target() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("report.xlsx");
    write_atomic(&path, b"old")?;
    write_atomic(&path, b"new")?;
    assert_eq!(std::fs::read(&path)?, b"new");
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
    Ok(())
}

#[test]
fn rejects_bad_input() {
    assert!(XlsxEditor::new_workbook("a/b").is_err());
    assert!(XlsxEditor::new_workbook("").is_err());
    assert!(split_coord("14").is_err());
    assert!(split_coord("A0").is_err());
    assert_eq!(split_coord("h14").unwrap(), (7, 14));

    let mut app = XlsxEditor::new_workbook("Sheet1").unwrap();
    assert!(app.set_cell("1A", "x").is_err());
    assert!(app.set_style("A1-B2", &CellStyle::default()).is_err());
    assert!(app.set_cell("A1", f64::NAN).is_err());
}
