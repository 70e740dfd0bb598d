//! flowctl: operator interface to a docflow database.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use docflow::blueprint::Blueprint;
use docflow::config::Config;
use docflow::config::secrets::ExposeSecret;
use docflow::db::Db;
use docflow::model::{DocumentId, UserId};
use docflow::telemetry::{TelemetryConfig, init_telemetry};
use docflow::Flow;

#[derive(Parser)]
#[command(name = "flowctl", about = "Document workflow administration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// Install every blueprint in a directory
    Install {
        /// Directory containing blueprint TOML files
        #[arg(default_value = "blueprints")]
        dir: PathBuf,
    },
    /// Apply an action to a document
    Apply {
        /// Document ID
        document: i64,
        /// Acting user ID
        user: i64,
        /// Action name (e.g. APPROVE)
        action: String,
        /// Attempts before giving up on concurrent modification
        #[arg(long, default_value_t = 3)]
        attempts: u32,
    },
    /// Show a document's audit history
    History {
        /// Document ID
        document: i64,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List the actions a user may apply to a document now
    Actions {
        /// Document ID
        document: i64,
        /// User ID
        user: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig::for_service("flowctl", &config))?;

    let db = Db::connect_with(config.database_url.expose_secret(), &config.db_options()).await?;
    db.migrate().await?;
    let flow = Flow::new(Arc::new(db));

    match cli.command {
        Command::Migrate => {
            println!("Migrations applied.");
            Ok(())
        }
        Command::Install { dir } => cmd_install(&flow, dir).await,
        Command::Apply {
            document,
            user,
            action,
            attempts,
        } => cmd_apply(&flow, DocumentId(document), UserId(user), &action, attempts).await,
        Command::History { document, json } => cmd_history(&flow, DocumentId(document), json).await,
        Command::Actions { document, user } => {
            cmd_actions(&flow, DocumentId(document), UserId(user)).await
        }
    }
}

async fn cmd_install(flow: &Flow, dir: PathBuf) -> anyhow::Result<()> {
    let blueprints = Blueprint::load_from_dir(&dir)?;
    if blueprints.is_empty() {
        println!("No blueprints found in {}.", dir.display());
        return Ok(());
    }

    // All or nothing: one bad blueprint leaves the database untouched.
    let mut tx = flow.begin().await?;
    for blueprint in &blueprints {
        let installed = flow.install(Some(&mut tx), blueprint).await?;
        println!(
            "{:<20}  doctype {}  {} state(s)  {} transition(s)",
            blueprint.doctype.name,
            installed.doctype,
            installed.states.len(),
            blueprint.transitions.len()
        );
    }
    tx.commit().await?;

    println!("\n{} blueprint(s) installed", blueprints.len());
    Ok(())
}

async fn cmd_apply(
    flow: &Flow,
    document: DocumentId,
    user: UserId,
    action: &str,
    attempts: u32,
) -> anyhow::Result<()> {
    let action = flow.actions.exists(action).await?;
    let applied = flow
        .engine
        .apply_with_retry(document, user, action, attempts)
        .await?;
    let state = flow.docstates.get(applied.new_state).await?;

    println!(
        "Document {document} is now {} (audit {})",
        state.name, applied.audit.id
    );
    Ok(())
}

async fn cmd_history(flow: &Flow, document: DocumentId, json: bool) -> anyhow::Result<()> {
    let entries = flow.documents.history(document).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No transitions recorded.");
        return Ok(());
    }

    println!(
        "{:<6}  {:<16}  {:<6}  {:<20}  {:<20}  AT",
        "ID", "ACTION", "USER", "FROM", "TO"
    );
    println!("{}", "-".repeat(100));

    for entry in &entries {
        let action = flow.actions.get(entry.action_id).await?;
        let from = flow.docstates.get(entry.from_state_id).await?;
        let to = flow.docstates.get(entry.to_state_id).await?;
        println!(
            "{:<6}  {:<16}  {:<6}  {:<20}  {:<20}  {}",
            entry.id,
            action.name,
            entry.actor,
            from.name,
            to.name,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\n{} transition(s)", entries.len());
    Ok(())
}

async fn cmd_actions(flow: &Flow, document: DocumentId, user: UserId) -> anyhow::Result<()> {
    let available = flow.engine.available_actions(document, user).await?;
    if available.is_empty() {
        println!("No actions available.");
        return Ok(());
    }

    for t in &available {
        let action = flow.actions.get(t.action_id).await?;
        let to = flow.docstates.get(t.to_state_id).await?;
        println!("{:<16}  -> {}", action.name, to.name);
    }
    Ok(())
}
