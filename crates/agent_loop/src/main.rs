use std::io::{self, Write};
use std::process::ExitCode;

use agent_loop::logging::init_logging;
use agent_loop::models::{refresh_model_cache, MODEL_CACHE_MAX_AGE};
use agent_loop::providers::provider_for_settings;
use agent_loop::session::{Session, SessionError, TurnEvent, TurnOutcome};
use agent_loop::settings::Settings;
use agent_loop::tools::ToolSandbox;
use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};
use conversation_store::ConversationStore;
use serde_json::json;
use time::OffsetDateTime;

/// Runs agentic turns against the conversation in the current directory.
#[derive(Parser, Debug)]
#[command(name = "agent_loop", version)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["message", "resume", "discard_orphans", "prune", "models"])
))]
struct Cli {
    /// Message for the next turn; words are joined with spaces
    message: Vec<String>,

    /// Resume the newest orphaned request
    #[arg(long)]
    resume: bool,

    /// Delete every orphaned request
    #[arg(long)]
    discard_orphans: bool,

    /// Keep only the newest N complete turns
    #[arg(long, value_name = "N")]
    prune: Option<usize>,

    /// List the models the provider offers
    #[arg(long)]
    models: bool,

    /// Print results and errors as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Run(String),
    Resume,
    DiscardOrphans,
    Prune(usize),
    Models,
}

impl Cli {
    fn action(&self) -> Result<Command> {
        if self.resume {
            return Ok(Command::Resume);
        }
        if self.discard_orphans {
            return Ok(Command::DiscardOrphans);
        }
        if let Some(keep_last) = self.prune {
            return Ok(Command::Prune(keep_last));
        }
        if self.models {
            return Ok(Command::Models);
        }

        let message = self.message.join(" ");
        if message.trim().is_empty() {
            bail!("message must not be blank");
        }
        Ok(Command::Run(message))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let json_output = cli.json
        || std::env::var(agent_loop::settings::JSON_ENV_VAR)
            .map(|value| matches!(value.trim(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report_error(&error, json_output);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let command = cli.action()?;
    let settings = Settings::from_env()?;
    let json_output = cli.json || settings.json_output;
    let store = ConversationStore::open(&settings.conversation_dir).with_context(|| {
        format!(
            "failed to open conversation directory {}",
            settings.conversation_dir.display()
        )
    })?;

    match command {
        Command::Prune(keep_last) => {
            let report = store.prune(keep_last)?;
            println!("pruned {} turn(s), kept {}", report.pruned, report.kept);
            Ok(())
        }
        Command::Models => {
            let provider = provider_for_settings(&settings)?;
            let cache = refresh_model_cache(
                provider.as_ref(),
                &store,
                MODEL_CACHE_MAX_AGE,
                OffsetDateTime::now_utc(),
            )?;
            for model in cache.models {
                match model.display_name {
                    Some(name) => println!("{}\t{name}", model.id),
                    None => println!("{}", model.id),
                }
            }
            Ok(())
        }
        Command::Run(_) | Command::Resume | Command::DiscardOrphans => {
            let provider = provider_for_settings(&settings)?;
            let working_dir =
                std::env::current_dir().context("failed to resolve working directory")?;
            let sandbox = ToolSandbox::new(working_dir, settings.permissions)?
                .with_protected_path(store.dir());
            let mut session = Session::new(
                provider,
                store,
                Box::new(sandbox),
                settings.session_config(),
            )
            .with_observer(print_event);

            let outcome = match command {
                Command::Run(message) => session.run_turn(&message)?,
                Command::Resume => session.resume_orphan()?,
                _ => {
                    let removed = session.discard_orphans()?;
                    println!("discarded {removed} orphaned request(s)");
                    return Ok(());
                }
            };
            print_outcome(&outcome, json_output)
        }
    }
}

fn print_outcome(outcome: &TurnOutcome, json_output: bool) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if json_output {
        let payload = json!({
            "turn_id": outcome.turn_id.as_str(),
            "answer": outcome.answer,
            "iterations": outcome.iterations,
            "cost_usd": outcome.cost.dollars(),
        });
        writeln!(stdout, "{payload}")?;
    } else {
        writeln!(stdout, "{}", outcome.answer)?;
    }
    Ok(())
}

fn print_event(event: &TurnEvent) {
    match event {
        TurnEvent::ProviderCall { iteration, .. } => {
            eprintln!("[{iteration}] waiting for model");
        }
        TurnEvent::ToolStarted { name, input } => {
            eprintln!("  -> {name} {input}");
        }
        TurnEvent::ToolFinished {
            name,
            output,
            duration,
        } => {
            let status = match (output.ok, output.dry_run) {
                (true, true) => "dry-run",
                (true, false) => "ok",
                (false, _) => "error",
            };
            eprintln!("  <- {name} {status} ({} ms): {}", duration.as_millis(), output.summary());
            if let Some(diff) = &output.diff {
                eprintln!("{diff}");
            }
        }
    }
}

fn report_error(error: &anyhow::Error, json_output: bool) {
    if json_output {
        let raw = error
            .downcast_ref::<SessionError>()
            .and_then(SessionError::raw_payload)
            .cloned();
        let payload = raw.unwrap_or_else(|| json!({ "error": format!("{error:#}") }));
        println!("{payload}");
    }
    eprintln!("error: {error:#}");
}
