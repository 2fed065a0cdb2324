//! Cross-encoder scoring of (query, document) pairs.
//!
//! [`Reranker`] wraps any [`Backbone`](crate::model::Backbone) together with its tokenizer
//! and returns one relevance score per document, in the order the documents were given.
//! Callers that want a ranking sort the scores themselves.

pub mod error;
pub mod reranker;


pub use error::ScoringError;
pub use reranker::Reranker;
