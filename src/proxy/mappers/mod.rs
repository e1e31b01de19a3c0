pub mod models;
pub mod response;

pub use models::{AnthropicMessage, ContentBlock, Usage};
pub use response::convert_google_to_anthropic;
