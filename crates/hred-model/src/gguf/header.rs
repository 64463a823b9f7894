use std::io::{Read, Write};

use crate::error::{ModelError, Result};

/// The four-byte magic number identifying a GGUF file: ASCII "GGUF".
pub const GGUF_MAGIC: [u8; 4] = [0x47, 0x47, 0x55, 0x46];

/// The only GGUF version read or written.
pub const GGUF_VERSION: u32 = 3;

/// Default alignment (in bytes) for tensor data within a GGUF file.
pub const GGUF_DEFAULT_ALIGNMENT: usize = 32;

/// Parsed GGUF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GgufHeader {
    pub version: u32,
    /// Number of tensors stored in the file.
    pub n_tensors: u64,
    /// Number of key-value metadata entries.
    pub n_kv: u64,
}

impl GgufHeader {
    /// Parse a GGUF header from the beginning of a reader.
    ///
    /// Reads and validates the 4-byte magic, then the version (u32 LE),
    /// tensor count (u64 LE) and KV count (u64 LE).
    pub fn parse(reader: &mut impl Read) -> Result<GgufHeader> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != GGUF_MAGIC {
            return Err(ModelError::InvalidMagic(magic));
        }

        let mut buf4 = [0u8; 4];
        reader.read_exact(&mut buf4)?;
        let version = u32::from_le_bytes(buf4);
        if version != GGUF_VERSION {
            return Err(ModelError::UnsupportedVersion(version));
        }

        let mut buf8 = [0u8; 8];
        reader.read_exact(&mut buf8)?;
        let n_tensors = u64::from_le_bytes(buf8);

        reader.read_exact(&mut buf8)?;
        let n_kv = u64::from_le_bytes(buf8);

        Ok(GgufHeader {
            version,
            n_tensors,
            n_kv,
        })
    }

    pub fn write_to(&self, writer: &mut impl Write) -> Result<usize> {
        writer.write_all(&GGUF_MAGIC)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.n_tensors.to_le_bytes())?;
        writer.write_all(&self.n_kv.to_le_bytes())?;
        Ok(24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = GgufHeader {
            version: GGUF_VERSION,
            n_tensors: 7,
            n_kv: 12,
        };
        let mut buf = Vec::new();
        assert_eq!(header.write_to(&mut buf).unwrap(), buf.len());
        let parsed = GgufHeader::parse(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_bad_magic() {
        let bytes = b"GGML\x03\x00\x00\x00";
        let err = GgufHeader::parse(&mut bytes.as_slice());
        assert!(matches!(err, Err(ModelError::InvalidMagic(_))));
    }

    #[test]
    fn test_wrong_version() {
        let mut buf = Vec::new();
        GgufHeader {
            version: 2,
            n_tensors: 0,
            n_kv: 0,
        }
        .write_to(&mut buf)
        .unwrap();
        let err = GgufHeader::parse(&mut buf.as_slice());
        assert!(matches!(err, Err(ModelError::UnsupportedVersion(2))));
    }
}
