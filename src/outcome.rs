use std::fmt;

use serde::Serialize;

use crate::{error::ReportError, report::ReportSuccess};

/// The single JSON object printed on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Success {
        success: bool,
        file_name: String,
        row: u32,
        file_path: String,
        output_path: String,
    },
    Failure {
        success: bool,
        error: String,
    },
}

impl Outcome {
    pub fn success(done: &ReportSuccess) -> Self {
        Outcome::Success {
            success: true,
            file_name: done.file_name.clone(),
            row: done.row,
            file_path: done.file_path.to_string_lossy().into_owned(),
            output_path: done.output_path.to_string_lossy().into_owned(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Outcome::Failure {
            success: false,
            error: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

impl From<&ReportError> for Outcome {
    fn from(err: &ReportError) -> Self {
        Outcome::failure(err.to_string())
    }
}

impl From<crate::error::Result<ReportSuccess>> for Outcome {
    fn from(res: crate::error::Result<ReportSuccess>) -> Self {
        match res {
            Ok(done) => Outcome::success(&done),
            Err(err) => Outcome::from(&err),
        }
    }
}

/// serde_json leaves non-ASCII as is, so Japanese text goes out verbatim.
impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}
