//! Built-in embedding provider implementations.

pub mod ollama;
pub mod trigram;

pub use ollama::OllamaProvider;
pub use trigram::TrigramProvider;
