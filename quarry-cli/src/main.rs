use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use quarry_core::{Analyst, CancellationToken, Settings};
use quarry_exec::SqliteExecutor;
use quarry_store::StoreRegistry;
use quarry_types::{KnowledgeKind, PlanMode};
use serde::Serialize;
use serde_json::json;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quarry", about = "Ask questions of a SQLite database in plain language")]
struct Cli {
    /// SQLite database the generated queries run against.
    #[arg(long, global = true, env = "QUARRY_DB", default_value = "./quarry.db")]
    db: PathBuf,
    /// Knowledge namespace; overrides QUARRY_NAMESPACE.
    #[arg(long, global = true)]
    namespace: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add one knowledge entry.
    Train {
        #[command(subcommand)]
        entry: TrainCommand,
    },
    /// Add the database's own CREATE statements as DDL knowledge.
    TrainSchema,
    /// Import a file of `question => sql` lines.
    ImportLegacy { file: PathBuf },
    List,
    Remove { id: String },
    /// Drop every entry of the namespace.
    Clear,
    Search {
        text: String,
        #[arg(long)]
        kind: Option<KnowledgeKind>,
        #[arg(short, default_value_t = 3)]
        k: usize,
    },
    Ask { question: String },
    /// Plan and run a multi-step report.
    Report {
        request: String,
        #[arg(long)]
        single_shot: bool,
    },
}

#[derive(Subcommand)]
enum TrainCommand {
    Ddl { text: String },
    Doc { text: String },
    Pair { question: String, sql: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env()?;
    if let Some(namespace) = cli.namespace {
        settings.namespace = namespace;
    }
    let registry = StoreRegistry::new(&settings.store_dir);

    match cli.command {
        Command::Train { entry } => {
            let index = quarry_core::open_index(&settings, &registry).await?;
            let id = match entry {
                TrainCommand::Ddl { text } => index.add_ddl(text).await?,
                TrainCommand::Doc { text } => index.add_documentation(text).await?,
                TrainCommand::Pair { question, sql } => {
                    index.add_question_sql(question, sql).await?
                }
            };
            print_json(&json!({ "id": id }))?;
        }
        Command::TrainSchema => {
            let index = quarry_core::open_index(&settings, &registry).await?;
            let executor = open_db(&cli.db).await?;
            let ids = quarry_core::train_from_schema(&index, &executor).await?;
            print_json(&json!({ "added": ids }))?;
        }
        Command::ImportLegacy { file } => {
            let index = quarry_core::open_index(&settings, &registry).await?;
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let ids = quarry_core::import_legacy(&index, text.lines()).await?;
            print_json(&json!({ "imported": ids }))?;
        }
        Command::List => {
            let index = quarry_core::open_index(&settings, &registry).await?;
            print_json(&index.get_all().await)?;
        }
        Command::Remove { id } => {
            let index = quarry_core::open_index(&settings, &registry).await?;
            let removed = index.remove(&id).await?;
            if !removed {
                warn!(%id, "no such knowledge entry");
            }
            print_json(&json!({ "id": id, "removed": removed }))?;
        }
        Command::Clear => {
            let index = quarry_core::open_index(&settings, &registry).await?;
            let cleared = index.clear().await?;
            print_json(&json!({ "namespace": index.namespace(), "cleared": cleared }))?;
        }
        Command::Search { text, kind, k } => {
            let index = quarry_core::open_index(&settings, &registry).await?;
            print_json(&index.search(&text, kind, k).await?)?;
        }
        Command::Ask { question } => {
            let analyst = connect(settings, &registry, &cli.db).await?;
            print_json(&analyst.ask(&question).await?)?;
        }
        Command::Report {
            request,
            single_shot,
        } => {
            let analyst = connect(settings, &registry, &cli.db).await?;
            let mode = if single_shot {
                PlanMode::SingleShot
            } else {
                PlanMode::Iterative
            };

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupted, stopping after the current round");
                    on_interrupt.cancel();
                }
            });

            let session = analyst.plan_report(&request, mode, &cancel).await;
            print_json(&session)?;
            if let Some(err) = session.error() {
                anyhow::bail!("report failed: {err}");
            }
        }
    }
    Ok(())
}

async fn open_db(path: &Path) -> anyhow::Result<SqliteExecutor> {
    SqliteExecutor::open(path)
        .await
        .with_context(|| format!("opening database {}", path.display()))
}

async fn connect(
    settings: Settings,
    registry: &StoreRegistry,
    db: &Path,
) -> anyhow::Result<Analyst> {
    let executor = open_db(db).await?;
    Ok(Analyst::connect(settings, registry, Arc::new(executor)).await?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_search_with_kind_filter() {
        let cli = Cli::try_parse_from([
            "quarry", "--namespace", "sales", "search", "revenue", "--kind", "pair", "-k", "5",
        ])
        .unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("sales"));
        match cli.command {
            Command::Search { text, kind, k } => {
                assert_eq!(text, "revenue");
                assert_eq!(kind, Some(KnowledgeKind::QuestionSql));
                assert_eq!(k, 5);
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(Cli::try_parse_from(["quarry", "search", "x", "--kind", "table"]).is_err());
    }

    #[test]
    fn parses_clear_for_namespace() {
        let cli = Cli::try_parse_from(["quarry", "clear", "--namespace", "scratch"]).unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("scratch"));
        assert!(matches!(cli.command, Command::Clear));
        assert!(Cli::try_parse_from(["quarry", "clear", "extra"]).is_err());
    }

    #[test]
    fn report_defaults_to_iterative() {
        let cli = Cli::try_parse_from(["quarry", "report", "Quarterly sales"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Report { single_shot: false, .. }
        ));
    }
}
