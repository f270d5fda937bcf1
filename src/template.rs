//! Layout of the monthly report and the blank workbook it starts from.

use rust_core::{
    AlignSpec, BorderSpec, CellStyle, FillSpec, FontSpec, HorizAlignment, VertAlignment,
    XlsxEditor,
};
use tracing::info;

use crate::error::Result;

pub const SHEET_NAME: &str = "総合売上";
pub const HEADER_ROW: u32 = 13;
pub const FIRST_DATA_ROW: u32 = 14;

pub const DATE_COLUMN: &str = "A";
pub const CUSTOMER_COLUMN: &str = "C";
pub const STAFF_COLUMN: &str = "E";
pub const VISITS_COLUMN: &str = "H";

/// (column, header label, width)
pub const COLUMNS: [(&str, &str, f64); 4] = [
    (DATE_COLUMN, "予約日", 12.0),
    (CUSTOMER_COLUMN, "予約者名", 15.0),
    (STAFF_COLUMN, "担当者", 12.0),
    (VISITS_COLUMN, "来店回数", 10.0),
];

const FONT_NAME: &str = "游ゴシック";

fn thin_black_border() -> BorderSpec {
    BorderSpec {
        style: "thin".into(),
        color: Some("000000".into()),
    }
}

pub fn header_style() -> CellStyle {
    CellStyle {
        font: Some(FontSpec {
            name: FONT_NAME.into(),
            size: 11.0,
            bold: true,
            color: Some("FFFFFF".into()),
        }),
        fill: Some(FillSpec {
            rgb: "4472C4".into(),
        }),
        border: Some(thin_black_border()),
        align: Some(AlignSpec {
            horiz: Some(HorizAlignment::Center),
            vert: Some(VertAlignment::Center),
            wrap: false,
        }),
    }
}

pub fn data_style() -> CellStyle {
    CellStyle {
        font: Some(FontSpec {
            name: FONT_NAME.into(),
            size: 10.0,
            bold: false,
            color: None,
        }),
        fill: None,
        border: Some(thin_black_border()),
        align: Some(AlignSpec {
            horiz: Some(HorizAlignment::Left),
            vert: Some(VertAlignment::Center),
            wrap: false,
        }),
    }
}

/// Fresh report workbook with the header row; nothing is written to disk.
///
/// `year` and `month` only show up in the log, the template is the same for every month.
pub fn build_template(year: i32, month: u32) -> Result<XlsxEditor> {
    let mut book = XlsxEditor::new_workbook(SHEET_NAME)?;
    let header = header_style();

    for (col, label, width) in COLUMNS {
        book.set_column_width(col, width)?;
        let coord = format!("{col}{HEADER_ROW}");
        book.set_cell(&coord, label)?;
        book.set_style(&coord, &header)?;
    }
    info!(year, month, "new report template created");
    Ok(book)
}
