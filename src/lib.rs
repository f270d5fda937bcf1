//! lib.rs: booking-xlsx-rs, дозапись бронирований в месячный отчёт xlsx.
//!
//! One call of [`run`] takes the booking JSON from the command line and produces the
//! [`Outcome`] to print. The spreadsheet work itself is done by `rust-core`.

pub mod booking;
pub mod error;
pub mod outcome;
pub mod paths;
pub mod report;
pub mod template;

use std::path::Path;

pub use booking::{Booking, format_date, report_file_name};
pub use error::ReportError;
pub use outcome::Outcome;
pub use paths::{ReportPaths, default_root};
pub use report::{ReportSuccess, update};
pub use template::build_template;

/// Full pipeline for one invocation: argument check, JSON parsing, report update.
pub fn run(root: &Path, booking_json: Option<&str>) -> Outcome {
    let Some(raw) = booking_json else {
        return Outcome::from(&ReportError::MissingArgument);
    };
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return Outcome::from(&ReportError::InvalidJson(e)),
    };
    Outcome::from(update(root, &value))
}
