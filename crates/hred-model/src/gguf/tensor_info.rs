use std::io::{Read, Write};

use hred_tensor::DType;

use crate::error::{ModelError, Result};

use super::metadata::{read_gguf_string, write_gguf_string};

/// Describes a single tensor stored within a GGUF file.
#[derive(Debug, Clone)]
pub struct GgufTensorInfo {
    /// Tensor name (e.g. "decoder/output_projection/weights").
    pub name: String,
    pub dims: Vec<u64>,
    pub dtype: DType,
    /// Byte offset of this tensor's data from the start of the tensor data section.
    pub offset: u64,
}

impl GgufTensorInfo {
    /// Total number of elements in this tensor.
    pub fn numel(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    /// Total byte size of this tensor's raw data in the file.
    pub fn data_size(&self) -> usize {
        self.numel() * self.dtype.size_in_bytes()
    }

    pub fn write_to(&self, writer: &mut impl Write) -> Result<usize> {
        let mut written = write_gguf_string(writer, &self.name)?;
        writer.write_all(&(self.dims.len() as u32).to_le_bytes())?;
        written += 4;
        for d in &self.dims {
            writer.write_all(&d.to_le_bytes())?;
            written += 8;
        }
        writer.write_all(&self.dtype.to_gguf_type().to_le_bytes())?;
        writer.write_all(&self.offset.to_le_bytes())?;
        Ok(written + 12)
    }
}

/// Parse `n_tensors` tensor info entries from a reader.
///
/// Each entry:
/// 1. GGUF string name
/// 2. u32 number of dimensions
/// 3. n_dims x u64 dimension sizes
/// 4. u32 GGUF type ID (mapped via `DType::from_gguf_type`)
/// 5. u64 byte offset within the tensor data section
pub fn parse_tensor_infos(reader: &mut impl Read, n_tensors: u64) -> Result<Vec<GgufTensorInfo>> {
    let mut infos = Vec::with_capacity(n_tensors as usize);
    for _ in 0..n_tensors {
        let name = read_gguf_string(reader)?;

        let mut buf4 = [0u8; 4];
        reader.read_exact(&mut buf4)?;
        let n_dims = u32::from_le_bytes(buf4);

        let mut dims = Vec::with_capacity(n_dims as usize);
        let mut buf8 = [0u8; 8];
        for _ in 0..n_dims {
            reader.read_exact(&mut buf8)?;
            dims.push(u64::from_le_bytes(buf8));
        }

        reader.read_exact(&mut buf4)?;
        let type_id = u32::from_le_bytes(buf4);
        let dtype =
            DType::from_gguf_type(type_id).ok_or(ModelError::UnsupportedGgufType(type_id))?;

        reader.read_exact(&mut buf8)?;
        let offset = u64::from_le_bytes(buf8);

        infos.push(GgufTensorInfo {
            name,
            dims,
            dtype,
            offset,
        });
    }
    Ok(infos)
}
