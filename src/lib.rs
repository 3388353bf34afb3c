//! Mail Digest: fetch, clean, summarize and store email.

pub mod cleaner;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod retry;
pub mod source;
pub mod store;
pub mod summarizer;
