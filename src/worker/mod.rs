// ABOUTME: Worker module - the opaque collaborators the task manager drives.
// ABOUTME: Defines the WorkerExecutor and TextCodec seams plus prompt helpers.

mod codec;
mod completion;
mod executor;

pub use codec::{TextCodec, VocabCodec};
pub use completion::{Completion, decode_completion, prepare_prompt};
pub use executor::WorkerExecutor;
