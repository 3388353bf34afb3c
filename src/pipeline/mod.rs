//! Email summarization pipeline.
//!
//! Every run flows through:
//! 1. `MessageSource::fetch()`: collaborator I/O, retried with backoff
//! 2. `cleaner::clean()`: markup, quoted replies and signatures stripped
//! 3. `Summarizer::summarize()`: structured summary from the configured engine
//! 4. `SummaryStore::save()`: idempotent upsert keyed by message ID
//!
//! One message failing never stops the others.

pub mod orchestrator;
pub mod outcome;
pub mod types;

pub use orchestrator::{Pipeline, PipelineConfig};
pub use outcome::{ItemError, PreviewItem, ProcessingOutcome};
