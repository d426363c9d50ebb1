use std::path::PathBuf;

#[derive(Debug, Clone, thiserror::Error)]
pub enum MediaError {
    #[error("file not found: {0}")]
    FileMissing(PathBuf),
    #[error("unsupported format: {0}")]
    FormatUnsupported(String),
    #[error("decoder error: {0}")]
    DecoderError(String),
    #[error("reader is closed")]
    ReaderClosed,
}
