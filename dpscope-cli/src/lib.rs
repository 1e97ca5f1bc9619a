//! dpscope CLI library: the chat loop and the OpenAI-compatible agent.

pub mod agent;
pub mod chat;

pub use agent::OpenAiCompatibleAgent;
pub use chat::{ChatLoop, print_session_state};
