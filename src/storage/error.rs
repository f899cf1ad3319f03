use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// A request against the remote store failed.
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} response is missing {field}")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },

    #[error("unknown multipart upload {upload_id} for key {key}")]
    UnknownUpload { key: String, upload_id: String },

    #[error("part {part_number} of upload {upload_id} does not match the stored part")]
    PartMismatch { upload_id: String, part_number: i32 },

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("invalid bucket name is given: {0}")]
    InvalidBucketName(String),
}

impl StorageError {
    pub fn request(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Request {
            operation,
            message: err.to_string(),
        }
    }
}
