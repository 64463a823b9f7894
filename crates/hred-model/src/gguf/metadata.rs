use std::collections::HashMap;
use std::io::{Read, Write};

use crate::error::{ModelError, Result};

/// A single GGUF metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum GgufMetadataValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    Array(Vec<GgufMetadataValue>),
}

impl GgufMetadataValue {
    /// Returns a human-readable name for the variant (used in error messages).
    fn type_name(&self) -> &'static str {
        match self {
            GgufMetadataValue::U8(_) => "U8",
            GgufMetadataValue::I8(_) => "I8",
            GgufMetadataValue::U16(_) => "U16",
            GgufMetadataValue::I16(_) => "I16",
            GgufMetadataValue::U32(_) => "U32",
            GgufMetadataValue::I32(_) => "I32",
            GgufMetadataValue::U64(_) => "U64",
            GgufMetadataValue::I64(_) => "I64",
            GgufMetadataValue::F32(_) => "F32",
            GgufMetadataValue::F64(_) => "F64",
            GgufMetadataValue::Bool(_) => "Bool",
            GgufMetadataValue::String(_) => "String",
            GgufMetadataValue::Array(_) => "Array",
        }
    }

    /// GGUF value type ID:
    ///   0=U8, 1=I8, 2=U16, 3=I16, 4=U32, 5=I32, 6=F32, 7=Bool,
    ///   8=String, 9=Array, 10=U64, 11=I64, 12=F64
    pub fn type_id(&self) -> u32 {
        match self {
            GgufMetadataValue::U8(_) => 0,
            GgufMetadataValue::I8(_) => 1,
            GgufMetadataValue::U16(_) => 2,
            GgufMetadataValue::I16(_) => 3,
            GgufMetadataValue::U32(_) => 4,
            GgufMetadataValue::I32(_) => 5,
            GgufMetadataValue::F32(_) => 6,
            GgufMetadataValue::Bool(_) => 7,
            GgufMetadataValue::String(_) => 8,
            GgufMetadataValue::Array(_) => 9,
            GgufMetadataValue::U64(_) => 10,
            GgufMetadataValue::I64(_) => 11,
            GgufMetadataValue::F64(_) => 12,
        }
    }

    /// Serialize the payload (without the leading type ID).
    pub fn write_to(&self, writer: &mut impl Write) -> Result<usize> {
        let n = match self {
            GgufMetadataValue::U8(v) => write_bytes(writer, &[*v])?,
            GgufMetadataValue::I8(v) => write_bytes(writer, &v.to_le_bytes())?,
            GgufMetadataValue::U16(v) => write_bytes(writer, &v.to_le_bytes())?,
            GgufMetadataValue::I16(v) => write_bytes(writer, &v.to_le_bytes())?,
            GgufMetadataValue::U32(v) => write_bytes(writer, &v.to_le_bytes())?,
            GgufMetadataValue::I32(v) => write_bytes(writer, &v.to_le_bytes())?,
            GgufMetadataValue::U64(v) => write_bytes(writer, &v.to_le_bytes())?,
            GgufMetadataValue::I64(v) => write_bytes(writer, &v.to_le_bytes())?,
            GgufMetadataValue::F32(v) => write_bytes(writer, &v.to_le_bytes())?,
            GgufMetadataValue::F64(v) => write_bytes(writer, &v.to_le_bytes())?,
            GgufMetadataValue::Bool(v) => write_bytes(writer, &[u8::from(*v)])?,
            GgufMetadataValue::String(s) => write_gguf_string(writer, s)?,
            GgufMetadataValue::Array(values) => {
                // Empty arrays are typed as strings; readers never look inside them.
                let elem_type = values.first().map_or(8, |v| v.type_id());
                if let Some(bad) = values.iter().find(|v| v.type_id() != elem_type) {
                    return Err(ModelError::Other(format!(
                        "heterogeneous GGUF array: {} among type {}",
                        bad.type_name(),
                        elem_type
                    )));
                }
                let mut n = write_bytes(writer, &elem_type.to_le_bytes())?;
                n += write_bytes(writer, &(values.len() as u64).to_le_bytes())?;
                for v in values {
                    n += v.write_to(writer)?;
                }
                n
            }
        };
        Ok(n)
    }
}

impl From<&str> for GgufMetadataValue {
    fn from(s: &str) -> Self {
        GgufMetadataValue::String(s.to_string())
    }
}

impl From<String> for GgufMetadataValue {
    fn from(s: String) -> Self {
        GgufMetadataValue::String(s)
    }
}

impl From<u32> for GgufMetadataValue {
    fn from(v: u32) -> Self {
        GgufMetadataValue::U32(v)
    }
}

impl From<u64> for GgufMetadataValue {
    fn from(v: u64) -> Self {
        GgufMetadataValue::U64(v)
    }
}

impl From<f32> for GgufMetadataValue {
    fn from(v: f32) -> Self {
        GgufMetadataValue::F32(v)
    }
}

impl From<bool> for GgufMetadataValue {
    fn from(v: bool) -> Self {
        GgufMetadataValue::Bool(v)
    }
}

/// Collection of GGUF metadata key-value pairs.
#[derive(Debug, Clone, Default)]
pub struct GgufMetadata {
    pub entries: HashMap<String, GgufMetadataValue>,
}

impl GgufMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<GgufMetadataValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn mismatch(key: &str, expected: &str, got: &GgufMetadataValue) -> ModelError {
        ModelError::TypeMismatch {
            key: key.to_string(),
            expected: expected.to_string(),
            got: got.type_name().to_string(),
        }
    }

    fn lookup(&self, key: &str) -> Result<&GgufMetadataValue> {
        self.entries
            .get(key)
            .ok_or_else(|| ModelError::MissingKey(key.to_string()))
    }

    /// Retrieve a string value by key.
    pub fn get_string(&self, key: &str) -> Result<&str> {
        match self.lookup(key)? {
            GgufMetadataValue::String(s) => Ok(s.as_str()),
            other => Err(Self::mismatch(key, "String", other)),
        }
    }

    /// Retrieve a u32 value by key.
    pub fn get_u32(&self, key: &str) -> Result<u32> {
        match self.lookup(key)? {
            GgufMetadataValue::U32(v) => Ok(*v),
            other => Err(Self::mismatch(key, "U32", other)),
        }
    }

    /// Retrieve a u64 value by key.
    pub fn get_u64(&self, key: &str) -> Result<u64> {
        match self.lookup(key)? {
            GgufMetadataValue::U64(v) => Ok(*v),
            other => Err(Self::mismatch(key, "U64", other)),
        }
    }

    /// Retrieve an f32 value by key.
    pub fn get_f32(&self, key: &str) -> Result<f32> {
        match self.lookup(key)? {
            GgufMetadataValue::F32(v) => Ok(*v),
            other => Err(Self::mismatch(key, "F32", other)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.lookup(key)? {
            GgufMetadataValue::Bool(v) => Ok(*v),
            other => Err(Self::mismatch(key, "Bool", other)),
        }
    }

    /// Retrieve a string array value by key.
    pub fn get_string_array(&self, key: &str) -> Result<Vec<String>> {
        match self.lookup(key)? {
            GgufMetadataValue::Array(arr) => {
                let mut result = Vec::with_capacity(arr.len());
                for (i, v) in arr.iter().enumerate() {
                    match v {
                        GgufMetadataValue::String(s) => result.push(s.clone()),
                        other => {
                            return Err(Self::mismatch(&format!("{}[{}]", key, i), "String", other))
                        }
                    }
                }
                Ok(result)
            }
            other => Err(Self::mismatch(key, "Array", other)),
        }
    }

    /// Parse `n_kv` key-value metadata entries from a reader.
    ///
    /// Each entry consists of:
    /// 1. A GGUF string key (u64 length + UTF-8 bytes).
    /// 2. A u32 value type ID.
    /// 3. The value payload, whose format depends on the type ID.
    pub fn parse_kv(reader: &mut impl Read, n_kv: u64) -> Result<GgufMetadata> {
        let mut entries = HashMap::new();
        for _ in 0..n_kv {
            let key = read_gguf_string(reader)?;
            let mut buf4 = [0u8; 4];
            reader.read_exact(&mut buf4)?;
            let type_id = u32::from_le_bytes(buf4);
            let value = read_value(reader, type_id)?;
            entries.insert(key, value);
        }
        Ok(GgufMetadata { entries })
    }
}

fn write_bytes(writer: &mut impl Write, bytes: &[u8]) -> Result<usize> {
    writer.write_all(bytes)?;
    Ok(bytes.len())
}

/// Write a GGUF string: u64 length followed by the UTF-8 bytes.
pub(crate) fn write_gguf_string(writer: &mut impl Write, s: &str) -> Result<usize> {
    writer.write_all(&(s.len() as u64).to_le_bytes())?;
    writer.write_all(s.as_bytes())?;
    Ok(8 + s.len())
}

/// Read a GGUF string: u64 length followed by that many UTF-8 bytes.
pub(crate) fn read_gguf_string(reader: &mut impl Read) -> Result<String> {
    let mut buf8 = [0u8; 8];
    reader.read_exact(&mut buf8)?;
    let len = u64::from_le_bytes(buf8) as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| ModelError::Other(format!("invalid UTF-8 in string: {}", e)))
}

/// Read a single GGUF metadata value given its type ID.
fn read_value(reader: &mut impl Read, type_id: u32) -> Result<GgufMetadataValue> {
    match type_id {
        0 => {
            let mut buf = [0u8; 1];
            reader.read_exact(&mut buf)?;
            Ok(GgufMetadataValue::U8(buf[0]))
        }
        1 => {
            let mut buf = [0u8; 1];
            reader.read_exact(&mut buf)?;
            Ok(GgufMetadataValue::I8(buf[0] as i8))
        }
        2 => {
            let mut buf = [0u8; 2];
            reader.read_exact(&mut buf)?;
            Ok(GgufMetadataValue::U16(u16::from_le_bytes(buf)))
        }
        3 => {
            let mut buf = [0u8; 2];
            reader.read_exact(&mut buf)?;
            Ok(GgufMetadataValue::I16(i16::from_le_bytes(buf)))
        }
        4 => {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf)?;
            Ok(GgufMetadataValue::U32(u32::from_le_bytes(buf)))
        }
        5 => {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf)?;
            Ok(GgufMetadataValue::I32(i32::from_le_bytes(buf)))
        }
        6 => {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf)?;
            Ok(GgufMetadataValue::F32(f32::from_le_bytes(buf)))
        }
        7 => {
            let mut buf = [0u8; 1];
            reader.read_exact(&mut buf)?;
            Ok(GgufMetadataValue::Bool(buf[0] != 0))
        }
        8 => Ok(GgufMetadataValue::String(read_gguf_string(reader)?)),
        9 => {
            // Array: u32 element_type, u64 count, then count values of element_type
            let mut buf4 = [0u8; 4];
            reader.read_exact(&mut buf4)?;
            let elem_type = u32::from_le_bytes(buf4);

            let mut buf8 = [0u8; 8];
            reader.read_exact(&mut buf8)?;
            let count = u64::from_le_bytes(buf8) as usize;

            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(read_value(reader, elem_type)?);
            }
            Ok(GgufMetadataValue::Array(values))
        }
        10 => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf)?;
            Ok(GgufMetadataValue::U64(u64::from_le_bytes(buf)))
        }
        11 => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf)?;
            Ok(GgufMetadataValue::I64(i64::from_le_bytes(buf)))
        }
        12 => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf)?;
            Ok(GgufMetadataValue::F64(f64::from_le_bytes(buf)))
        }
        other => Err(ModelError::UnsupportedGgufType(other)),
    }
}
