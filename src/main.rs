use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use mail_digest::config::AppConfig;
use mail_digest::logging::init_logging;
use mail_digest::pipeline::types::{Feedback, Rating, SummaryStore};
use mail_digest::pipeline::{Pipeline, PipelineConfig, ProcessingOutcome};
use mail_digest::source::MaildirSource;
use mail_digest::store::FileSummaryStore;
use mail_digest::summarizer::create_summarizer;

#[derive(Parser)]
#[command(name = "mail-digest")]
#[command(about = "Summarize email into short structured digests")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.mail-digest/config.toml)
    #[arg(long, global = true, env = "MAIL_DIGEST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize messages selected by the fetch rules
    Run,

    /// Show what `run` would process, store nothing
    DryRun,

    /// Summarize a single message
    One {
        /// Message ID
        id: String,
    },

    /// Show stored summaries, newest first
    List {
        /// Maximum number of summaries to show
        limit: Option<usize>,
    },

    /// Rate a summary
    Feedback {
        /// Message ID
        id: String,

        /// 1 (useful) or -1 (not useful)
        #[arg(allow_negative_numbers = true, value_parser = parse_rating)]
        rating: i8,

        /// Optional comment
        comment: Vec<String>,
    },

    /// Delete one stored summary
    Delete {
        /// Message ID
        id: String,
    },

    /// Delete every stored summary
    DeleteAll,
}

fn parse_rating(value: &str) -> Result<i8, String> {
    let raw: i8 = value
        .trim_start_matches('+')
        .parse()
        .map_err(|_| format!("rating must be 1 or -1, got '{value}'"))?;
    Rating::try_from(raw).map(i8::from)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let _log_guard = init_logging(&config.logging)?;

    let store = Arc::new(
        FileSummaryStore::open(&config.storage.summaries_dir, config.storage.use_index)
            .await
            .context("opening summary store")?,
    );

    match cli.command {
        Commands::Run | Commands::DryRun => {
            let dry_run = matches!(cli.command, Commands::DryRun);
            let pipeline = build_pipeline(&config, store.clone())?;
            let cancel = pipeline.cancel_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Cancelling after the current message...");
                    cancel.store(true, Ordering::Relaxed);
                }
            });
            let outcome = pipeline.run(&config.fetch.rules(), dry_run).await?;
            print_outcome(&outcome);
        }
        Commands::One { id } => {
            let pipeline = build_pipeline(&config, store.clone())?;
            match pipeline.run_one(&id).await {
                Ok(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                Err(e) => {
                    eprintln!("{}", e.kind().user_message());
                    return Err(e.into());
                }
            }
        }
        Commands::List { limit } => {
            for summary in store.list(limit, 0).await? {
                println!(
                    "{}  {}  {}",
                    summary.received_at.format("%Y-%m-%d"),
                    summary.message_id,
                    summary.subject
                );
                println!("    {}", summary.summary);
                for action in &summary.actions {
                    println!("    - {action}");
                }
            }
        }
        Commands::Feedback { id, rating, comment } => {
            let comment = (!comment.is_empty()).then(|| comment.join(" "));
            store
                .save_feedback(&id, Feedback::new(&id, rating, comment)?)
                .await?;
            println!("Feedback saved for {id}");
        }
        Commands::Delete { id } => {
            if store.delete(&id).await? {
                println!("Deleted summary for {id}");
            } else {
                println!("No summary stored for {id}");
            }
        }
        Commands::DeleteAll => {
            let removed = store.delete_all().await?;
            println!("Deleted {removed} summaries");
        }
    }

    Ok(())
}

fn build_pipeline(config: &AppConfig, store: Arc<FileSummaryStore>) -> anyhow::Result<Pipeline> {
    let Some(maildir) = &config.source.maildir else {
        bail!("no mail source configured: set [source] maildir or MAIL_DIGEST_MAILDIR");
    };
    let source = Arc::new(MaildirSource::new(maildir));
    let summarizer = create_summarizer(&config.summarizer, config.retry.policy())?;
    Ok(Pipeline::new(
        source,
        summarizer,
        store,
        PipelineConfig::from_app(config),
    ))
}

fn print_outcome(outcome: &ProcessingOutcome) {
    let mode = if outcome.dry_run { "Dry run" } else { "Run" };
    println!(
        "{mode} {}: {} fetched, {} processed, {} failed{}",
        outcome.run_id,
        outcome.total_fetched,
        outcome.total_processed,
        outcome.total_failed,
        if outcome.cancelled {
            format!(", {} skipped (cancelled)", outcome.total_skipped)
        } else {
            String::new()
        }
    );
    for preview in &outcome.previews {
        println!(
            "  {}  {} ({} chars{})",
            preview.message_id,
            preview.subject,
            preview.cleaned_length,
            if preview.body_empty { ", empty" } else { "" }
        );
        if let Some(summary) = &preview.summary {
            println!("      {summary}");
        }
    }
    for line in outcome.user_report() {
        println!("  ! {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn feedback_takes_negative_rating_and_comment() {
        let cli = Cli::try_parse_from(["mail-digest", "feedback", "m1", "-1", "too", "long"]).unwrap();
        match cli.command {
            Commands::Feedback { id, rating, comment } => {
                assert_eq!(id, "m1");
                assert_eq!(rating, -1);
                assert_eq!(comment, vec!["too", "long"]);
            }
            _ => panic!("expected feedback command"),
        }
    }

    #[test]
    fn feedback_rejects_other_ratings() {
        assert!(Cli::try_parse_from(["mail-digest", "feedback", "m1", "0"]).is_err());
        assert!(Cli::try_parse_from(["mail-digest", "feedback", "m1", "5"]).is_err());
        assert!(Cli::try_parse_from(["mail-digest", "feedback", "m1", "+1"]).is_ok());
    }

    #[test]
    fn subcommands_and_global_config() {
        let cli = Cli::try_parse_from(["mail-digest", "dry-run", "--config", "/tmp/c.toml"]).unwrap();
        assert!(matches!(cli.command, Commands::DryRun));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));

        let cli = Cli::try_parse_from(["mail-digest", "list", "5"]).unwrap();
        assert!(matches!(cli.command, Commands::List { limit: Some(5) }));

        assert!(Cli::try_parse_from(["mail-digest", "frobnicate"]).is_err());
        assert!(Cli::try_parse_from(["mail-digest", "one"]).is_err());
    }
}
