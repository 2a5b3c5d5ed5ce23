// ABOUTME: Defines the TextCodec trait and VocabCodec, a whitespace tokenizer
// ABOUTME: backed by a word-to-id vocabulary.

use std::collections::HashMap;

/// Converts prompt text to token ids and back.
pub trait TextCodec: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, anyhow::Error>;

    fn decode(&self, tokens: &[u32]) -> Result<String, anyhow::Error>;
}

/// Whitespace tokenizer over a fixed vocabulary.
///
/// Words missing from the vocabulary encode to the unknown token. Decoding
/// joins words with single spaces, so `decode(encode(s))` normalizes runs
/// of whitespace.
#[derive(Debug, Clone)]
pub struct VocabCodec {
    encoder: HashMap<String, u32>,
    decoder: HashMap<u32, String>,
    unk_id: u32,
}

impl VocabCodec {
    /// Build a codec from a vocabulary.
    ///
    /// `unk_token` must be present in `vocab`.
    pub fn new(vocab: HashMap<String, u32>, unk_token: &str) -> Result<Self, anyhow::Error> {
        let unk_id = *vocab
            .get(unk_token)
            .ok_or_else(|| anyhow::anyhow!("unknown token '{}' missing from vocabulary", unk_token))?;

        let decoder = vocab.iter().map(|(word, id)| (*id, word.clone())).collect();
        Ok(Self {
            encoder: vocab,
            decoder,
            unk_id,
        })
    }

    /// Build a codec from a JSON object mapping words to ids.
    pub fn from_json(json: &str, unk_token: &str) -> Result<Self, anyhow::Error> {
        let vocab: HashMap<String, u32> = serde_json::from_str(json)?;
        Self::new(vocab, unk_token)
    }

    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    pub fn vocab_size(&self) -> usize {
        self.encoder.len()
    }
}

impl TextCodec for VocabCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>, anyhow::Error> {
        Ok(text
            .split_whitespace()
            .map(|word| self.encoder.get(word).copied().unwrap_or(self.unk_id))
            .collect())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, anyhow::Error> {
        let words = tokens
            .iter()
            .map(|id| {
                self.decoder
                    .get(id)
                    .map(String::as_str)
                    .ok_or_else(|| anyhow::anyhow!("token id {} not in vocabulary", id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(words.join(" "))
    }
}
