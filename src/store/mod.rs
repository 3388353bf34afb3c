//! Persistence layer: JSON summary files plus a libSQL lookup index.

pub mod files;
pub mod index;
pub mod migrations;

pub use files::FileSummaryStore;
pub use index::{FeedbackStats, SummaryIndex};
