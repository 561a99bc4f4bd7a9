mod openai;
mod traits;
mod types;

pub use openai::OpenAiClient;
pub use traits::CompletionProvider;
pub use types::{CompletionReply, CompletionRequest, ModelError};
