use std::fmt;

/// Element types a tensor can be stored as on disk.
///
/// Computation always happens in f32; F16 exists so checkpoints can be
/// written at half size and widened on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point.
    F32,
    /// 16-bit floating point (IEEE 754 half-precision, via the `half` crate).
    F16,
}

impl DType {
    /// Returns the size in bytes of a single element.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
        }
    }

    /// Converts a GGUF type ID to a `DType`.
    ///
    /// Only the unquantized ids are accepted: 0 => F32, 1 => F16.
    pub fn from_gguf_type(id: u32) -> Option<DType> {
        match id {
            0 => Some(DType::F32),
            1 => Some(DType::F16),
            _ => None,
        }
    }

    /// Returns the GGUF type ID for this `DType`.
    pub fn to_gguf_type(&self) -> u32 {
        match self {
            DType::F32 => 0,
            DType::F16 => 1,
        }
    }

    /// Encode f32 values as little-endian bytes of this dtype.
    pub fn encode(&self, values: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(values.len() * self.size_in_bytes());
        match self {
            DType::F32 => {
                for v in values {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
            DType::F16 => {
                for v in values {
                    out.extend_from_slice(&half::f16::from_f32(*v).to_le_bytes());
                }
            }
        }
        out
    }

    /// Decode `numel` little-endian values of this dtype into f32.
    ///
    /// Returns `None` if `bytes` is too short.
    pub fn decode(&self, bytes: &[u8], numel: usize) -> Option<Vec<f32>> {
        if bytes.len() < numel * self.size_in_bytes() {
            return None;
        }
        let out = match self {
            DType::F32 => bytes
                .chunks_exact(4)
                .take(numel)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            DType::F16 => bytes
                .chunks_exact(2)
                .take(numel)
                .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
        };
        Some(out)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_in_bytes() {
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F16.size_in_bytes(), 2);
    }

    #[test]
    fn test_gguf_ids() {
        assert_eq!(DType::from_gguf_type(0), Some(DType::F32));
        assert_eq!(DType::from_gguf_type(1), Some(DType::F16));
        assert!(DType::from_gguf_type(2).is_none());
        assert_eq!(DType::F16.to_gguf_type(), 1);
    }

    #[test]
    fn test_f16_widening_is_close() {
        let values = [0.5f32, -1.25, 0.0801];
        let bytes = DType::F16.encode(&values);
        assert_eq!(bytes.len(), 6);
        let back = DType::F16.decode(&bytes, 3).unwrap();
        for (a, b) in values.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(DType::F32.decode(&[0u8; 7], 2).is_none());
    }
}
