use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::gguf::metadata::GgufMetadata;

/// How utterances are turned into fixed-width sentence vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SentType {
    Bow,
    Rnn,
    BiRnn,
}

impl SentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentType::Bow => "bow",
            SentType::Rnn => "rnn",
            SentType::BiRnn => "bi_rnn",
        }
    }
}

impl FromStr for SentType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bow" => Ok(SentType::Bow),
            "rnn" => Ok(SentType::Rnn),
            "bi_rnn" => Ok(SentType::BiRnn),
            other => Err(ModelError::UnknownSentType(other.to_string())),
        }
    }
}

/// Recurrent cell family used by every recurrent component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CellType {
    Gru,
    Lstm,
}

impl CellType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellType::Gru => "gru",
            CellType::Lstm => "lstm",
        }
    }
}

impl FromStr for CellType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gru" => Ok(CellType::Gru),
            "lstm" => Ok(CellType::Lstm),
            other => Err(ModelError::UnknownCellType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OptimizerKind {
    Adam,
    RmsProp,
    Sgd,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::Adam => "adam",
            OptimizerKind::RmsProp => "rmsprop",
            OptimizerKind::Sgd => "sgd",
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "adam" => Ok(OptimizerKind::Adam),
            "rmsprop" => Ok(OptimizerKind::RmsProp),
            "sgd" => Ok(OptimizerKind::Sgd),
            other => Err(ModelError::UnknownOptimizer(other.to_string())),
        }
    }
}

macro_rules! string_enum_conversions {
    ($($ty:ty),*) => {$(
        impl TryFrom<String> for $ty {
            type Error = ModelError;

            fn try_from(s: String) -> Result<Self> {
                s.parse()
            }
        }

        impl From<$ty> for String {
            fn from(v: $ty) -> String {
                v.as_str().to_string()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    )*};
}

string_enum_conversions!(SentType, CellType, OptimizerKind);

/// Token selection for the free-running decoder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum DecodeStrategy {
    /// Feed back the highest-scoring token.
    Greedy,
    /// Draw from the (tempered, truncated) distribution.
    Sample {
        temperature: f32,
        top_k: usize,
        top_p: f32,
    },
}

impl Default for DecodeStrategy {
    fn default() -> Self {
        DecodeStrategy::Greedy
    }
}

/// Hyperparameters of the HRED model and its training session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HredConfig {
    /// Longest utterance in tokens; also caps free-running decoding.
    pub max_utt_len: usize,
    pub cxt_cell_size: usize,
    pub sent_cell_size: usize,
    pub dec_cell_size: usize,
    pub embed_size: usize,
    pub sent_type: SentType,
    pub cell_type: CellType,
    pub num_layer: usize,
    /// Output keep probability for recurrent cells and input embeddings.
    pub keep_prob: f32,
    /// Word keep probability for decoder inputs during training.
    pub dec_keep_prob: f32,
    pub init_lr: f32,
    pub lr_decay: f32,
    pub op: OptimizerKind,
    /// Global-norm clip applied to the gradients of every step.
    pub grad_clip: Option<f32>,
    /// Parameters are drawn from uniform(-init_w, init_w).
    pub init_w: f32,
    pub seed: u64,
    /// Average instead of summing word embeddings in `bow` mode.
    pub bow_avg: bool,
    pub decode: DecodeStrategy,
}

impl Default for HredConfig {
    fn default() -> Self {
        HredConfig {
            max_utt_len: 40,
            cxt_cell_size: 600,
            sent_cell_size: 300,
            dec_cell_size: 400,
            embed_size: 200,
            sent_type: SentType::BiRnn,
            cell_type: CellType::Gru,
            num_layer: 1,
            keep_prob: 1.0,
            dec_keep_prob: 1.0,
            init_lr: 0.001,
            lr_decay: 0.6,
            op: OptimizerKind::Adam,
            grad_clip: Some(5.0),
            init_w: 0.08,
            seed: 0,
            bow_avg: false,
            decode: DecodeStrategy::Greedy,
        }
    }
}

impl HredConfig {
    /// Load a config file. `.toml` is parsed as TOML, anything else as JSON.
    /// Missing fields take their defaults.
    pub fn from_path(path: &Path) -> Result<HredConfig> {
        let text = std::fs::read_to_string(path)?;
        let config: HredConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text).map_err(|e| ModelError::Config(e.to_string()))?,
            _ => serde_json::from_str(&text).map_err(|e| ModelError::Config(e.to_string()))?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let widths = [
            ("max_utt_len", self.max_utt_len),
            ("cxt_cell_size", self.cxt_cell_size),
            ("sent_cell_size", self.sent_cell_size),
            ("dec_cell_size", self.dec_cell_size),
            ("embed_size", self.embed_size),
            ("num_layer", self.num_layer),
        ];
        if let Some((name, _)) = widths.iter().find(|(_, v)| *v == 0) {
            return Err(ModelError::Config(format!("{} must be positive", name)));
        }
        for (name, p) in [("keep_prob", self.keep_prob), ("dec_keep_prob", self.dec_keep_prob)] {
            if !(p > 0.0 && p <= 1.0) {
                return Err(ModelError::Config(format!(
                    "{} must be in (0, 1], got {}",
                    name, p
                )));
            }
        }
        if !(self.init_lr > 0.0) {
            return Err(ModelError::Config(format!(
                "init_lr must be positive, got {}",
                self.init_lr
            )));
        }
        if let Some(clip) = self.grad_clip {
            if !(clip > 0.0) {
                return Err(ModelError::Config(format!(
                    "grad_clip must be positive, got {}",
                    clip
                )));
            }
        }
        if let DecodeStrategy::Sample {
            temperature, top_p, ..
        } = self.decode
        {
            if !(temperature > 0.0) || !(top_p > 0.0 && top_p <= 1.0) {
                return Err(ModelError::Config(format!(
                    "invalid sampling parameters: temperature {}, top_p {}",
                    temperature, top_p
                )));
            }
        }
        Ok(())
    }

    /// Width of the flattened context vector fed to the decoder.
    pub fn context_width(&self) -> usize {
        self.cxt_cell_size * self.num_layer
    }

    /// Read the config stored in checkpoint metadata under `hred.*`.
    ///
    /// Keys written by [`HredConfig::write_metadata`]:
    /// - `hred.max_utt_len`, `hred.cxt_cell_size`, `hred.sent_cell_size`,
    ///   `hred.dec_cell_size`, `hred.embed_size`, `hred.num_layer` (u32)
    /// - `hred.sent_type`, `hred.cell_type`, `hred.op` (string)
    /// - `hred.keep_prob`, `hred.dec_keep_prob`, `hred.init_lr`,
    ///   `hred.lr_decay`, `hred.init_w` (f32)
    /// - `hred.grad_clip` (f32, absent when clipping is off)
    /// - `hred.seed` (u64), `hred.bow_avg` (bool)
    /// - `hred.decode.strategy` plus the sampling parameters
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<HredConfig> {
        let u = |key: &str| -> Result<usize> { Ok(metadata.get_u32(key)? as usize) };

        let decode = match metadata.get_string("hred.decode.strategy")? {
            "greedy" => DecodeStrategy::Greedy,
            "sample" => DecodeStrategy::Sample {
                temperature: metadata.get_f32("hred.decode.temperature")?,
                top_k: u("hred.decode.top_k")?,
                top_p: metadata.get_f32("hred.decode.top_p")?,
            },
            other => {
                return Err(ModelError::Config(format!(
                    "unknown decode strategy '{}'",
                    other
                )))
            }
        };
        let grad_clip = if metadata.contains_key("hred.grad_clip") {
            Some(metadata.get_f32("hred.grad_clip")?)
        } else {
            None
        };

        let config = HredConfig {
            max_utt_len: u("hred.max_utt_len")?,
            cxt_cell_size: u("hred.cxt_cell_size")?,
            sent_cell_size: u("hred.sent_cell_size")?,
            dec_cell_size: u("hred.dec_cell_size")?,
            embed_size: u("hred.embed_size")?,
            sent_type: metadata.get_string("hred.sent_type")?.parse()?,
            cell_type: metadata.get_string("hred.cell_type")?.parse()?,
            num_layer: u("hred.num_layer")?,
            keep_prob: metadata.get_f32("hred.keep_prob")?,
            dec_keep_prob: metadata.get_f32("hred.dec_keep_prob")?,
            init_lr: metadata.get_f32("hred.init_lr")?,
            lr_decay: metadata.get_f32("hred.lr_decay")?,
            op: metadata.get_string("hred.op")?.parse()?,
            grad_clip,
            init_w: metadata.get_f32("hred.init_w")?,
            seed: metadata.get_u64("hred.seed")?,
            bow_avg: metadata.get_bool("hred.bow_avg")?,
            decode,
        };
        config.validate()?;
        Ok(config)
    }

    /// Store every field under `hred.*` (see [`HredConfig::from_gguf`]).
    pub fn write_metadata(&self, metadata: &mut GgufMetadata) {
        let widths = [
            ("hred.max_utt_len", self.max_utt_len),
            ("hred.cxt_cell_size", self.cxt_cell_size),
            ("hred.sent_cell_size", self.sent_cell_size),
            ("hred.dec_cell_size", self.dec_cell_size),
            ("hred.embed_size", self.embed_size),
            ("hred.num_layer", self.num_layer),
        ];
        for (key, v) in widths {
            metadata.insert(key, v as u32);
        }
        metadata.insert("hred.sent_type", self.sent_type.as_str());
        metadata.insert("hred.cell_type", self.cell_type.as_str());
        metadata.insert("hred.op", self.op.as_str());
        metadata.insert("hred.keep_prob", self.keep_prob);
        metadata.insert("hred.dec_keep_prob", self.dec_keep_prob);
        metadata.insert("hred.init_lr", self.init_lr);
        metadata.insert("hred.lr_decay", self.lr_decay);
        metadata.insert("hred.init_w", self.init_w);
        if let Some(clip) = self.grad_clip {
            metadata.insert("hred.grad_clip", clip);
        }
        metadata.insert("hred.seed", self.seed);
        metadata.insert("hred.bow_avg", self.bow_avg);
        match self.decode {
            DecodeStrategy::Greedy => metadata.insert("hred.decode.strategy", "greedy"),
            DecodeStrategy::Sample {
                temperature,
                top_k,
                top_p,
            } => {
                metadata.insert("hred.decode.strategy", "sample");
                metadata.insert("hred.decode.temperature", temperature);
                metadata.insert("hred.decode.top_k", top_k as u32);
                metadata.insert("hred.decode.top_p", top_p);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_sent_type_fails() {
        let err = "cnn".parse::<SentType>().unwrap_err();
        assert!(matches!(err, ModelError::UnknownSentType(ref s) if s == "cnn"));
        assert!(err.to_string().contains("Must be one of [bow, rnn, bi_rnn]"));

        let json = r#"{"sent_type": "cnn"}"#;
        assert!(serde_json::from_str::<HredConfig>(json).is_err());
    }

    #[test]
    fn test_toml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hred.toml");
        std::fs::write(
            &path,
            "sent_type = \"rnn\"\ncell_type = \"lstm\"\nnum_layer = 2\n\n[decode]\nstrategy = \"sample\"\ntemperature = 0.7\ntop_k = 20\ntop_p = 0.9\n",
        )
        .unwrap();
        let cfg = HredConfig::from_path(&path).unwrap();
        assert_eq!(cfg.sent_type, SentType::Rnn);
        assert_eq!(cfg.cell_type, CellType::Lstm);
        assert_eq!(cfg.num_layer, 2);
        assert_eq!(cfg.max_utt_len, 40);
        assert_eq!(cfg.context_width(), 1200);
        assert_eq!(
            cfg.decode,
            DecodeStrategy::Sample {
                temperature: 0.7,
                top_k: 20,
                top_p: 0.9
            }
        );
    }

    #[test]
    fn test_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hred.json");
        std::fs::write(&path, r#"{"op": "rmsprop", "grad_clip": null, "bow_avg": true}"#).unwrap();
        let cfg = HredConfig::from_path(&path).unwrap();
        assert_eq!(cfg.op, OptimizerKind::RmsProp);
        assert_eq!(cfg.grad_clip, None);
        assert!(cfg.bow_avg);
    }

    #[test]
    fn test_validate() {
        assert!(HredConfig::default().validate().is_ok());
        let bad = HredConfig {
            keep_prob: 0.0,
            ..HredConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = HredConfig {
            num_layer: 0,
            ..HredConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_metadata_roundtrip() {
        let cfg = HredConfig {
            sent_type: SentType::Bow,
            grad_clip: None,
            seed: 99,
            decode: DecodeStrategy::Sample {
                temperature: 1.5,
                top_k: 0,
                top_p: 1.0,
            },
            ..HredConfig::default()
        };
        let mut md = GgufMetadata::new();
        cfg.write_metadata(&mut md);
        assert_eq!(HredConfig::from_gguf(&md).unwrap(), cfg);
    }
}
