use std::collections::HashMap;

use crate::error::{ModelError, Result};
use crate::gguf::metadata::{GgufMetadata, GgufMetadataValue};

/// Begin-of-utterance marker.
pub const GO_TOKEN: &str = "<s>";
/// End-of-utterance marker.
pub const EOS_TOKEN: &str = "</s>";
/// Id reserved for padding. Label id 0 is treated as "no token" by the loss.
pub const PAD_ID: u32 = 0;

const TOKENS_KEY: &str = "tokenizer.hred.tokens";

/// Read-only access to a corpus vocabulary.
///
/// The model only needs the id-to-string list and its inverse; anything that
/// can provide both (a corpus loader, a checkpoint) can drive it.
pub trait VocabSource {
    /// Token strings, indexed by id.
    fn vocab(&self) -> &[String];
    /// Token string to id.
    fn rev_vocab(&self) -> &HashMap<String, u32>;
}

/// Token vocabulary with the two boundary markers resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocab {
    /// Token strings, indexed by token ID.
    pub tokens: Vec<String>,
    /// Reverse mapping from token string to token ID.
    pub token_to_id: HashMap<String, u32>,
    pub go_id: u32,
    pub eos_id: u32,
}

impl Vocab {
    /// Build a vocabulary from a token list. Id 0 is the padding token, and
    /// `<s>` / `</s>` must both be present at nonzero ids.
    pub fn new(tokens: Vec<String>) -> Result<Vocab> {
        if tokens.is_empty() {
            return Err(ModelError::Vocab("empty vocabulary".to_string()));
        }
        let mut token_to_id = HashMap::with_capacity(tokens.len());
        for (id, tok) in tokens.iter().enumerate() {
            if token_to_id.insert(tok.clone(), id as u32).is_some() {
                return Err(ModelError::Vocab(format!("duplicate token '{}'", tok)));
            }
        }
        let lookup = |tok: &str| -> Result<u32> {
            match token_to_id.get(tok) {
                Some(&PAD_ID) => Err(ModelError::Vocab(format!(
                    "'{}' cannot use the padding id {}",
                    tok, PAD_ID
                ))),
                Some(&id) => Ok(id),
                None => Err(ModelError::Vocab(format!("missing '{}' token", tok))),
            }
        };
        let go_id = lookup(GO_TOKEN)?;
        let eos_id = lookup(EOS_TOKEN)?;

        Ok(Vocab {
            tokens,
            token_to_id,
            go_id,
            eos_id,
        })
    }

    /// Copy any vocabulary source into an owned `Vocab`.
    pub fn from_source(source: &dyn VocabSource) -> Result<Vocab> {
        Vocab::new(source.vocab().to_vec())
    }

    /// Build a vocabulary from checkpoint metadata (`tokenizer.hred.tokens`).
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<Vocab> {
        Vocab::new(metadata.get_string_array(TOKENS_KEY)?)
    }

    /// Store the token list under `tokenizer.hred.tokens`.
    pub fn to_metadata(&self) -> (&'static str, GgufMetadataValue) {
        let tokens = self
            .tokens
            .iter()
            .map(|t| GgufMetadataValue::String(t.clone()))
            .collect();
        (TOKENS_KEY, GgufMetadataValue::Array(tokens))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Token string for `id`, if in range.
    pub fn token(&self, id: u32) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }
}

impl VocabSource for Vocab {
    fn vocab(&self) -> &[String] {
        &self.tokens
    }

    fn rev_vocab(&self) -> &HashMap<String, u32> {
        &self.token_to_id
    }
}
