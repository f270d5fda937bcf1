use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("引数が不足しています")]
    MissingArgument,

    #[error("JSON解析エラー: {0}")]
    InvalidJson(serde_json::Error),

    #[error("予約データが不正です: {0}")]
    InvalidBooking(serde_json::Error),

    #[error("日付の形式が不正です: {0}")]
    InvalidDate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Workbook error: {0:#}")]
    Workbook(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ReportError>;
