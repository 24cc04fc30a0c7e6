#![forbid(unsafe_code)]

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarvestError>;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("network error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("API rejected {url} with code {code}: {message}")]
    Api {
        code: i64,
        message: String,
        url: String,
    },

    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("no aid found for video {short_code}")]
    AidNotFound { short_code: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("workbook error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

impl HarvestError {
    pub(crate) fn decode(url: &str, err: impl std::fmt::Display) -> Self {
        HarvestError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}
