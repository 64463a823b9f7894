use std::io::{BufReader, Seek};
use std::path::Path;

use memmap2::Mmap;

use hred_tensor::{Shape, Tensor};

use super::header::GgufHeader;
use super::metadata::GgufMetadata;
use super::tensor_info::{self, GgufTensorInfo};
use crate::error::{ModelError, Result};

/// A parsed GGUF file backed by a memory-mapped region.
///
/// After parsing the header, metadata, and tensor info table from the file,
/// the entire file is memory-mapped so that tensor data can be accessed
/// without additional reads.
pub struct GgufFile {
    pub header: GgufHeader,
    pub metadata: GgufMetadata,
    pub tensor_infos: Vec<GgufTensorInfo>,
    mmap: Mmap,
    /// Byte offset within the file where tensor data begins (aligned).
    data_offset: usize,
}

impl GgufFile {
    /// Open and parse a GGUF file from disk.
    pub fn open(path: &Path) -> Result<GgufFile> {
        let file = std::fs::File::open(path)?;
        let mut reader = BufReader::new(&file);

        let header = GgufHeader::parse(&mut reader)?;
        let metadata = GgufMetadata::parse_kv(&mut reader, header.n_kv)?;
        let tensor_infos = tensor_info::parse_tensor_infos(&mut reader, header.n_tensors)?;

        let data_offset = super::align_up(reader.stream_position()? as usize);

        // SAFETY: the file is opened read-only and checkpoints are not
        // rewritten in place while a session holds them open.
        let mmap = unsafe { Mmap::map(&file)? };

        Ok(GgufFile {
            header,
            metadata,
            tensor_infos,
            mmap,
            data_offset,
        })
    }

    pub fn tensor_names(&self) -> impl Iterator<Item = &str> {
        self.tensor_infos.iter().map(|t| t.name.as_str())
    }

    pub fn contains_tensor(&self, name: &str) -> bool {
        self.tensor_infos.iter().any(|t| t.name == name)
    }

    /// Raw byte slice for a tensor's data within the memory-mapped file.
    pub fn tensor_data(&self, info: &GgufTensorInfo) -> Result<&[u8]> {
        let start = self.data_offset + info.offset as usize;
        let end = start + info.data_size();
        self.mmap
            .get(start..end)
            .ok_or_else(|| ModelError::TruncatedTensor(info.name.clone()))
    }

    /// Load a tensor by name, widening F16 storage to f32.
    pub fn get_tensor(&self, name: &str) -> Result<Tensor> {
        let info = self
            .tensor_infos
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ModelError::TensorNotFound(name.to_string()))?;

        let raw = self.tensor_data(info)?;
        let data = info
            .dtype
            .decode(raw, info.numel())
            .ok_or_else(|| ModelError::TruncatedTensor(name.to_string()))?;
        let dims: Vec<usize> = info.dims.iter().map(|&d| d as usize).collect();

        Ok(Tensor::from_vec(data, Shape::new(dims))?)
    }
}
