use std::path::{Path, PathBuf};

use chrono::Datelike;
use rust_core::{XlsxEditor, write_atomic};
use tracing::info;

use crate::{
    booking::{Booking, format_date, report_file_name},
    error::Result,
    paths::ReportPaths,
    template::{
        self, CUSTOMER_COLUMN, DATE_COLUMN, FIRST_DATA_ROW, STAFF_COLUMN, VISITS_COLUMN,
        build_template,
    },
};

/// What a successful update wrote and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSuccess {
    pub file_name: String,
    pub row: u32,
    pub file_path: PathBuf,
    pub output_path: PathBuf,
}

/// Appends `booking` to its monthly report under `root`, creating the report if needed,
/// and mirrors the result into the downloads directory.
pub fn update(root: &Path, booking: &serde_json::Value) -> Result<ReportSuccess> {
    let paths = ReportPaths::resolve(root)?;
    let booking = Booking::from_value(booking)?;
    let date = booking.parsed_date()?;

    let file_name = report_file_name(date.year(), date.month());
    let file_path = paths.primary.join(&file_name);
    let output_path = paths.secondary.join(&file_name);

    let (mut book, row) = if file_path.exists() {
        let book = XlsxEditor::open(&file_path)?;
        let row = book.first_empty_row(DATE_COLUMN, FIRST_DATA_ROW)?;
        info!(file = %file_path.display(), sheet = book.sheet_name(), row, "existing report opened");
        (book, row)
    } else {
        (build_template(date.year(), date.month())?, FIRST_DATA_ROW)
    };

    book.set_cell(&format!("{DATE_COLUMN}{row}"), format_date(&booking.date))?;
    book.set_cell(&format!("{CUSTOMER_COLUMN}{row}"), &booking.customer_name)?;
    book.set_cell(&format!("{STAFF_COLUMN}{row}"), &booking.staff_name)?;
    book.set_cell(&format!("{VISITS_COLUMN}{row}"), booking.visit_count)?;

    let style = template::data_style();
    for col in [DATE_COLUMN, CUSTOMER_COLUMN, STAFF_COLUMN, VISITS_COLUMN] {
        book.set_style(&format!("{col}{row}"), &style)?;
    }

    // Один раз сериализуем, пишем одинаковые байты в оба места
    let bytes = book.to_bytes()?;
    write_atomic(&file_path, &bytes)?;
    write_atomic(&output_path, &bytes)?;
    info!(file = %file_name, row, "booking appended");

    Ok(ReportSuccess {
        file_name,
        row,
        file_path,
        output_path,
    })
}
