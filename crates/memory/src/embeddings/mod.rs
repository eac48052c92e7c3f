//! Embedding providers.
//!
//! The store only relies on a fixed output dimensionality; everything else
//! about the model is the provider's business.

pub mod config;
pub mod provider;
pub mod providers;

pub use config::EmbeddingConfig;
pub use provider::{create_provider, EmbeddingProvider};
