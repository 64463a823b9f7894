use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use hred_tensor::{DType, Tensor};

use super::header::{GgufHeader, GGUF_VERSION};
use super::metadata::{write_gguf_string, GgufMetadataValue};
use super::tensor_info::GgufTensorInfo;
use crate::error::Result;

struct PendingTensor {
    info: GgufTensorInfo,
    bytes: Vec<u8>,
}

/// Builds a GGUF v3 file: metadata in insertion order, then a tensor table,
/// then every tensor's data aligned to `GGUF_DEFAULT_ALIGNMENT`.
#[derive(Default)]
pub struct GgufWriter {
    metadata: Vec<(String, GgufMetadataValue)>,
    tensors: Vec<PendingTensor>,
    next_offset: usize,
}

impl GgufWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<GgufMetadataValue>) {
        self.metadata.push((key.into(), value.into()));
    }

    /// Queue `tensor` for writing, encoded as `dtype`.
    pub fn add_tensor(&mut self, name: &str, tensor: &Tensor, dtype: DType) {
        let bytes = dtype.encode(tensor.data_f32());
        let offset = super::align_up(self.next_offset);
        self.next_offset = offset + bytes.len();
        self.tensors.push(PendingTensor {
            info: GgufTensorInfo {
                name: name.to_string(),
                dims: tensor.shape().dims().iter().map(|&d| d as u64).collect(),
                dtype,
                offset: offset as u64,
            },
            bytes,
        });
    }

    pub fn n_tensors(&self) -> usize {
        self.tensors.len()
    }

    /// Serialize everything to `writer`, returning the number of bytes written.
    pub fn write_to(&self, writer: &mut impl Write) -> Result<usize> {
        let header = GgufHeader {
            version: GGUF_VERSION,
            n_tensors: self.tensors.len() as u64,
            n_kv: self.metadata.len() as u64,
        };
        let mut pos = header.write_to(writer)?;

        for (key, value) in &self.metadata {
            pos += write_gguf_string(writer, key)?;
            writer.write_all(&value.type_id().to_le_bytes())?;
            pos += 4;
            pos += value.write_to(writer)?;
        }
        for t in &self.tensors {
            pos += t.info.write_to(writer)?;
        }

        let data_start = super::align_up(pos);
        pos += pad(writer, data_start - pos)?;
        for t in &self.tensors {
            let target = data_start + t.info.offset as usize;
            pos += pad(writer, target - pos)?;
            writer.write_all(&t.bytes)?;
            pos += t.bytes.len();
        }
        writer.flush()?;
        Ok(pos)
    }

    /// Write to `path`, replacing any existing file.
    pub fn write(&self, path: &Path) -> Result<usize> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out)
    }
}

fn pad(writer: &mut impl Write, n: usize) -> Result<usize> {
    writer.write_all(&vec![0u8; n])?;
    Ok(n)
}
