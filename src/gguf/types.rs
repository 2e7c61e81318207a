use std::error::Error;
use std::fmt;
use serde::{Deserialize, Serialize};

/// GGUF metadata value types that can be stored in a GGUF file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GgufValue {
    /// String value type for text data
    String(String),
    /// Integer value type for whole numbers, stored as i64
    Int(i64),
    /// Float value type for decimal numbers, stored as f32
    Float(f32),
    /// Boolean value type for true/false values
    Bool(bool),
    /// Array value type; only a prefix is retained for large arrays,
    /// with the total element count alongside
    Array(Vec<GgufValue>, u64),
}

impl GgufValue {
    /// Attempts to convert the value to an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            GgufValue::Int(i) => Some(*i),
            GgufValue::Float(f) => Some(*f as i64),
            GgufValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Returns the value as a string slice if it is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            GgufValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for GgufValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GgufValue::String(s) => write!(f, "{}", s),
            GgufValue::Int(i) => write!(f, "{}", i),
            GgufValue::Float(fl) => write!(f, "{}", fl),
            GgufValue::Bool(b) => write!(f, "{}", b),
            GgufValue::Array(prefix, total) => {
                let rendered: Vec<String> = prefix.iter().map(|v| v.to_string()).collect();
                if rendered.len() as u64 == *total {
                    write!(f, "[{}]", rendered.join(", "))
                } else {
                    write!(f, "[{} ... out of {}]", rendered.join(", "), total)
                }
            }
        }
    }
}

/// Custom error types for GGUF operations
#[derive(Debug)]
pub enum GgufError {
    /// Wraps std::io::Error for file operations
    IoError(std::io::Error),
    /// Invalid format errors with a message
    InvalidFormat(String),
    /// Missing metadata key errors
    MetadataNotFound(String),
}

impl fmt::Display for GgufError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GgufError::IoError(e) => write!(f, "I/O error: {}", e),
            GgufError::InvalidFormat(msg) => write!(f, "Invalid GGUF format: {}", msg),
            GgufError::MetadataNotFound(key) => write!(f, "Metadata key not found: {}", key),
        }
    }
}

impl Error for GgufError {}

/// Allows automatic conversion from std::io::Error to GgufError
impl From<std::io::Error> for GgufError {
    fn from(err: std::io::Error) -> Self {
        GgufError::IoError(err)
    }
}
