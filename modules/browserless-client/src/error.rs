use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserlessError>;

#[derive(Debug, Error)]
pub enum BrowserlessError {
    /// Connection, timeout or body decoding failure.
    #[error("request to Browserless failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Browserless answered with a non-2xx status.
    #[error("Browserless returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Browserless rendered an empty page for {url}")]
    EmptyContent { url: String },
}
