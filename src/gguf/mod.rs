mod reader;
mod types;

// Re-export from types
pub use types::{GgufError, GgufValue};
// Re-export from reader
pub use reader::{is_gguf_file, parse_size_label, GgufMetadata};
