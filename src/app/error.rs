use serde::Serialize;
use std::fmt;

pub const ERR_CONNECTION: &str = "ERR_CONNECTION";
pub const ERR_NO_DEVICE: &str = "ERR_NO_DEVICE";
pub const ERR_COMMAND: &str = "ERR_COMMAND";
pub const ERR_DECODE: &str = "ERR_DECODE";
pub const ERR_UNPACK: &str = "ERR_UNPACK";
pub const ERR_UNSUPPORTED_TYPE: &str = "ERR_UNSUPPORTED_TYPE";
pub const ERR_MANIFEST: &str = "ERR_MANIFEST";
pub const ERR_QUEUE: &str = "ERR_QUEUE";
pub const ERR_VALIDATION: &str = "ERR_VALIDATION";
pub const ERR_SYSTEM: &str = "ERR_SYSTEM";

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    /// Retries exhausted while connecting to a network device.
    pub fn connection(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_CONNECTION, message, trace_id)
    }

    pub fn no_device(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_NO_DEVICE, message, trace_id)
    }

    /// An external tool exited unsuccessfully; the message carries its decoded stderr.
    pub fn command(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_COMMAND, message, trace_id)
    }

    pub fn decode(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_DECODE, message, trace_id)
    }

    pub fn unpack(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_UNPACK, message, trace_id)
    }

    pub fn unsupported_type(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_UNSUPPORTED_TYPE, message, trace_id)
    }

    pub fn manifest(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_MANIFEST, message, trace_id)
    }

    pub fn queue(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_QUEUE, message, trace_id)
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_VALIDATION, message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_SYSTEM, message, trace_id)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}
