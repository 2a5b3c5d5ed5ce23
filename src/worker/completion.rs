// ABOUTME: Prompt preparation and completion decoding for inference tasks.
// ABOUTME: Payloads and results carry token ids as a JSON array.

use serde::{Deserialize, Serialize};

use super::TextCodec;
use crate::error::EmrisError;

/// A decoded inference result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// The prompt the task was submitted with.
    pub prompt: String,
    /// Text decoded from the worker's output tokens.
    pub generated_text: String,
}

/// Encode a prompt into an inference task payload.
pub fn prepare_prompt(codec: &dyn TextCodec, prompt: &str) -> Result<Vec<u8>, EmrisError> {
    if prompt.trim().is_empty() {
        return Err(EmrisError::EmptyPrompt);
    }
    let tokens = codec.encode(prompt).map_err(EmrisError::Codec)?;
    Ok(serde_json::to_vec(&tokens)?)
}

/// Decode a worker's inference output.
pub fn decode_completion(
    codec: &dyn TextCodec,
    prompt: &str,
    result: &[u8],
) -> Result<Completion, EmrisError> {
    let tokens: Vec<u32> = serde_json::from_slice(result)?;
    let generated_text = codec.decode(&tokens).map_err(EmrisError::Codec)?;
    Ok(Completion {
        prompt: prompt.to_string(),
        generated_text,
    })
}
