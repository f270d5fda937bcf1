//! Booking record as it arrives on the command line, and the names derived from it.

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;

use crate::error::{ReportError, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One reservation. Every field is required.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Booking {
    pub date: String,
    pub customer_name: String,
    pub staff_name: String,
    pub visit_count: u32,
}

impl Booking {
    /// Strict reading of the object passed on the command line.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        Booking::deserialize(value).map_err(ReportError::InvalidBooking)
    }

    /// Calendar date of the booking; the report month is derived from it.
    pub fn parsed_date(&self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, DATE_FORMAT)
            .map_err(|e| ReportError::InvalidDate(format!("{} ({e})", self.date)))
    }
}

/// `2024-03-05` → `3月5日`. Anything that does not parse comes back unchanged.
pub fn format_date(date: &str) -> String {
    match NaiveDate::parse_from_str(date, DATE_FORMAT) {
        Ok(d) => format!("{}月{}日", d.month(), d.day()),
        Err(_) => date.to_owned(),
    }
}

/// File name of the monthly report, e.g. `2025年 06月売上.xlsx`.
pub fn report_file_name(year: i32, month: u32) -> String {
    format!("{year}年 {month:02}月売上.xlsx")
}
