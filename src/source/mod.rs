//! Message sources. Each implements [`crate::pipeline::types::MessageSource`].

pub mod maildir;

pub use maildir::MaildirSource;
