use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use byteorder::{LittleEndian, ReadBytesExt};
use tracing::debug;

use super::types::{GgufError, GgufValue};

/// The magic number that identifies GGUF files
const GGUF_MAGIC: u32 = 0x46554747; // "GGUF" in ASCII

/// Array elements retained per metadata entry. Tokenizer vocabularies run to
/// tens of thousands of strings; discovery only needs the header fields, so
/// the remainder is consumed and discarded to keep the stream aligned.
const ARRAY_PREFIX_LEN: usize = 8;

/// Metadata-only view of a GGUF file.
///
/// Reads the header and metadata key/value section and stops there; the
/// tensor table and weights are never touched. This is all discovery needs
/// to register a model and assign it a tier.
pub struct GgufMetadata {
    /// Path to the GGUF file
    pub path: PathBuf,
    /// GGUF format version from the header
    pub version: u32,
    /// Number of tensors reported by the header
    pub tensor_count: u64,
    /// Metadata key-value pairs
    pub metadata: BTreeMap<String, GgufValue>,
}

impl GgufMetadata {
    /// Parses the header and metadata section of a GGUF file.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, GgufError> {
        let path = path.as_ref();

        if !is_gguf_file(path) {
            return Err(GgufError::InvalidFormat("Invalid magic number".into()));
        }

        let mut file = File::open(path)?;

        // Skip past the magic number
        file.seek(SeekFrom::Start(4))?;

        let version = file.read_u32::<LittleEndian>()?;

        let tensor_count = if version >= 3 {
            file.read_u64::<LittleEndian>()?
        } else {
            file.read_u32::<LittleEndian>()? as u64
        };

        let metadata_count = if version >= 3 {
            file.read_u64::<LittleEndian>()?
        } else {
            file.read_u32::<LittleEndian>()? as u64
        };

        debug!(
            "Reading GGUF metadata: {} tensors, {} metadata entries",
            tensor_count, metadata_count
        );

        let mut metadata: BTreeMap<String, GgufValue> = BTreeMap::new();
        for _ in 0..metadata_count {
            let (key, value) = read_metadata_kv(&mut file, version)?;
            metadata.insert(key, value);
        }

        Ok(Self {
            path: path.to_path_buf(),
            version,
            tensor_count,
            metadata,
        })
    }

    /// Looks up a metadata value by key.
    pub fn get(&self, key: &str) -> Result<&GgufValue, GgufError> {
        self.metadata
            .get(key)
            .ok_or_else(|| GgufError::MetadataNotFound(key.to_string()))
    }

    /// Human-readable model name (`general.name`).
    pub fn name(&self) -> Option<&str> {
        self.metadata.get("general.name").and_then(|v| v.as_str())
    }

    /// Model architecture (`general.architecture`).
    pub fn architecture(&self) -> Option<&str> {
        self.metadata
            .get("general.architecture")
            .and_then(|v| v.as_str())
    }

    /// Size label such as "7B" or "0.6B" (`general.size_label`).
    pub fn size_label(&self) -> Option<&str> {
        self.metadata
            .get("general.size_label")
            .and_then(|v| v.as_str())
    }

    /// File type identifier from metadata (maps to the quantization format).
    pub fn file_type(&self) -> Option<i64> {
        self.metadata.get("general.file_type").and_then(|v| v.as_int())
    }

    /// Quantization format name derived from the file type.
    pub fn quantization_label(&self) -> &'static str {
        self.file_type().map_or("unknown", file_type_name)
    }

    /// Parameter count in billions, derived from the size label.
    pub fn parameter_billions(&self) -> Option<f64> {
        self.size_label().and_then(parse_size_label)
    }
}

/// Checks if a file at the given path is a GGUF format file by verifying its
/// magic number.
pub fn is_gguf_file<P: AsRef<Path>>(path: P) -> bool {
    if let Ok(mut file) = File::open(path) {
        if let Ok(magic) = file.read_u32::<LittleEndian>() {
            return magic == GGUF_MAGIC;
        }
    }
    false
}

/// Parses a size label like "7B", "13B", or "0.6B" into billions of
/// parameters. Labels carrying an "M" suffix (e.g. "335M") are converted.
pub fn parse_size_label(label: &str) -> Option<f64> {
    let trimmed = label.trim();
    if let Some(stripped) = trimmed.strip_suffix(['B', 'b']) {
        return stripped.trim().parse::<f64>().ok();
    }
    if let Some(stripped) = trimmed.strip_suffix(['M', 'm']) {
        return stripped.trim().parse::<f64>().ok().map(|m| m / 1000.0);
    }
    None
}

/// Maps a `general.file_type` id to the llama.cpp quantization name.
fn file_type_name(file_type: i64) -> &'static str {
    match file_type {
        0 => "F32",
        1 => "F16",
        2 => "Q4_0",
        3 => "Q4_1",
        7 => "Q8_0",
        8 => "Q5_0",
        9 => "Q5_1",
        10 => "Q2_K",
        11 => "Q3_K_S",
        12 => "Q3_K_M",
        13 => "Q3_K_L",
        14 => "Q4_K_S",
        15 => "Q4_K_M",
        16 => "Q5_K_S",
        17 => "Q5_K_M",
        18 => "Q6_K",
        25 => "IQ4_NL",
        28 => "IQ4_XS",
        30 => "BF16",
        _ => "unknown",
    }
}

fn read_metadata_kv(file: &mut File, version: u32) -> Result<(String, GgufValue), GgufError> {
    let key = read_string(file, version, false)?;

    let value_type = file.read_u32::<LittleEndian>()?;
    let value = read_value_by_type(file, value_type, version)?;

    Ok((key, value))
}

/// Read a string value from the file.
/// If skip_content is true, just read the length and skip the content.
fn read_string(file: &mut File, version: u32, skip_content: bool) -> Result<String, GgufError> {
    let str_len = if version >= 3 {
        file.read_u64::<LittleEndian>()?
    } else {
        file.read_u32::<LittleEndian>()? as u64
    };

    if skip_content {
        file.seek(SeekFrom::Current(str_len as i64))?;
        Ok(String::new())
    } else {
        let mut buffer = vec![0u8; str_len as usize];
        file.read_exact(&mut buffer)?;

        String::from_utf8(buffer)
            .map_err(|e| GgufError::InvalidFormat(format!("Invalid UTF-8 in string: {}", e)))
    }
}

/// Read a GGUF value of the specified type from the file
fn read_value_by_type(file: &mut File, value_type: u32, version: u32) -> Result<GgufValue, GgufError> {
    match value_type {
        0 => Ok(GgufValue::Int(file.read_u8()? as i64)),             // UINT8
        1 => Ok(GgufValue::Int(file.read_i8()? as i64)),             // INT8
        2 => Ok(GgufValue::Int(file.read_u16::<LittleEndian>()? as i64)), // UINT16
        3 => Ok(GgufValue::Int(file.read_i16::<LittleEndian>()? as i64)), // INT16
        4 => Ok(GgufValue::Int(file.read_u32::<LittleEndian>()? as i64)), // UINT32
        5 => Ok(GgufValue::Int(file.read_i32::<LittleEndian>()? as i64)), // INT32
        6 => Ok(GgufValue::Float(file.read_f32::<LittleEndian>()?)),  // FLOAT32
        7 => Ok(GgufValue::Bool(file.read_u8()? != 0)),               // BOOL
        8 => Ok(GgufValue::String(read_string(file, version, false)?)), // STRING
        9 => read_array(file, version),                               // ARRAY
        10 => Ok(GgufValue::Int(file.read_u64::<LittleEndian>()? as i64)), // UINT64
        11 => Ok(GgufValue::Int(file.read_i64::<LittleEndian>()?)),   // INT64
        12 => {
            // FLOAT64, stored as f32 since there is no dedicated f64 variant
            Ok(GgufValue::Float(file.read_f64::<LittleEndian>()? as f32))
        }
        _ => Err(GgufError::InvalidFormat(format!(
            "Unknown value type: {}", value_type
        ))),
    }
}

/// Read an array value, retaining only a short prefix. All elements are
/// consumed so the next metadata entry starts at the right offset.
fn read_array(file: &mut File, version: u32) -> Result<GgufValue, GgufError> {
    let element_type = file.read_u32::<LittleEndian>()?;
    let arr_len = if version >= 3 {
        file.read_u64::<LittleEndian>()?
    } else {
        file.read_u32::<LittleEndian>()? as u64
    };

    let mut prefix = Vec::with_capacity(ARRAY_PREFIX_LEN.min(arr_len as usize));
    for i in 0..arr_len {
        if (i as usize) < ARRAY_PREFIX_LEN {
            prefix.push(read_value_by_type(file, element_type, version)?);
        } else if element_type == 8 {
            // Skip string content without materializing it
            read_string(file, version, true)?;
        } else {
            read_value_by_type(file, element_type, version)?;
        }
    }

    Ok(GgufValue::Array(prefix, arr_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    // Builds a minimal v3 GGUF file with the given string metadata entries.
    fn write_test_gguf(path: &Path, entries: &[(&str, &str)]) {
        let mut buf: Vec<u8> = Vec::new();
        buf.write_u32::<LittleEndian>(GGUF_MAGIC).unwrap();
        buf.write_u32::<LittleEndian>(3).unwrap(); // version
        buf.write_u64::<LittleEndian>(42).unwrap(); // tensor count
        buf.write_u64::<LittleEndian>(entries.len() as u64).unwrap();

        for (key, value) in entries {
            buf.write_u64::<LittleEndian>(key.len() as u64).unwrap();
            buf.extend_from_slice(key.as_bytes());
            buf.write_u32::<LittleEndian>(8).unwrap(); // STRING
            buf.write_u64::<LittleEndian>(value.len() as u64).unwrap();
            buf.extend_from_slice(value.as_bytes());
        }

        let mut file = File::create(path).unwrap();
        file.write_all(&buf).unwrap();
    }

    #[test]
    fn reads_metadata_from_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.gguf");
        write_test_gguf(
            &path,
            &[
                ("general.name", "Test Model"),
                ("general.architecture", "llama"),
                ("general.size_label", "7B"),
            ],
        );

        let meta = GgufMetadata::read(&path).unwrap();
        assert_eq!(meta.version, 3);
        assert_eq!(meta.tensor_count, 42);
        assert_eq!(meta.name(), Some("Test Model"));
        assert_eq!(meta.architecture(), Some("llama"));
        assert_eq!(meta.parameter_billions(), Some(7.0));
    }

    #[test]
    fn rejects_file_without_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-model.bin");
        std::fs::write(&path, b"definitely not gguf").unwrap();

        assert!(!is_gguf_file(&path));
        assert!(matches!(
            GgufMetadata::read(&path),
            Err(GgufError::InvalidFormat(_))
        ));
    }

    #[test]
    fn missing_key_reports_metadata_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.gguf");
        write_test_gguf(&path, &[("general.name", "Test Model")]);

        let meta = GgufMetadata::read(&path).unwrap();
        assert!(matches!(
            meta.get("general.quantization_version"),
            Err(GgufError::MetadataNotFound(_))
        ));
    }

    #[test]
    fn size_labels_parse_to_billions() {
        assert_eq!(parse_size_label("7B"), Some(7.0));
        assert_eq!(parse_size_label("0.6B"), Some(0.6));
        assert_eq!(parse_size_label("335M"), Some(0.335));
        assert_eq!(parse_size_label("huge"), None);
    }
}
