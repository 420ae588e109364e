pub mod chunking;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod gemini;
pub mod retriever;
pub mod session;
pub mod store;
pub mod study;
