use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use pom_pilot::codegen::write_bundle;
use pom_pilot::config::{DEFAULT_API_URL, DEFAULT_MODEL};
use pom_pilot::{
    ActionType, AutomationStep, ModelConfig, Orchestrator, ProcessState, StepPatch, build_pipeline,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pom-pilot", version, about = "Natural-language test steps to Playwright POM code")]
struct Cli {
    /// Session file holding steps, URL and chat history.
    #[arg(long, global = true, env = "POM_PILOT_SESSION")]
    session: Option<PathBuf>,

    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, global = true, env = "POM_PILOT_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    #[arg(long, global = true, env = "POM_PILOT_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve one instruction into steps.
    Say {
        #[arg(required = true, num_args = 1..)]
        instruction: Vec<String>,
    },
    /// Read instructions from stdin, one per line.
    Chat,
    /// List the recorded steps.
    Steps,
    /// Append a placeholder step.
    AddStep,
    /// Edit a step by id (a unique prefix is enough).
    EditStep {
        id: String,
        #[arg(long, value_parser = parse_action)]
        action: Option<ActionType>,
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        selector: Option<String>,
        #[arg(long)]
        value: Option<String>,
        #[arg(long)]
        page: Option<String>,
    },
    /// Delete a step by id (a unique prefix is enough).
    DeleteStep { id: String },
    /// Generate the POM bundle and write it to disk.
    Generate {
        #[arg(long, default_value = "pom-out")]
        out: PathBuf,
    },
    /// Forget all steps and history.
    Reset,
}

fn parse_action(raw: &str) -> std::result::Result<ActionType, String> {
    match ActionType::from_loose(raw) {
        ActionType::Unknown if !raw.eq_ignore_ascii_case("unknown") => {
            Err(format!("unknown action '{raw}'"))
        }
        action => Ok(action),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pom_pilot=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let session_path = match cli.session.clone() {
        Some(path) => path,
        None => default_session_path()?,
    };

    let mut config = ModelConfig::from_env();
    if cli.api_key.is_some() {
        config = config.with_api_key(cli.api_key.clone());
    }
    config.api_url = cli.api_url.clone();
    config.model = cli.model.clone();
    if !config.is_configured() {
        tracing::warn!("no API key configured, only direct navigation will resolve");
    }
    let (orchestrator, generator) = build_pipeline(config);

    let mut state = ProcessState::load(&session_path)
        .with_context(|| format!("loading session {}", session_path.display()))?;

    match cli.command {
        Command::Say { instruction } => {
            let instruction = instruction.join(" ");
            say(&mut state, &orchestrator, &instruction).await;
        }
        Command::Chat => chat(&mut state, &orchestrator, &session_path).await?,
        Command::Steps => print_steps(&state.steps, &state.current_url),
        Command::AddStep => {
            let step = state.add_manual_step();
            println!("Added {}", describe(step));
        }
        Command::EditStep {
            id,
            action,
            target,
            selector,
            value,
            page,
        } => {
            let step_id = state
                .find_step(&id)
                .map(|s| s.id)
                .ok_or_else(|| anyhow!("no single step matches '{id}'"))?;
            let patch = StepPatch {
                action_type: action,
                target_element: target,
                simulated_selector: selector,
                value,
                page_context: page,
                ..Default::default()
            };
            state.update_step(step_id, patch);
            if let Some(step) = state.find_step(&id) {
                println!("Updated {}", describe(step));
            }
        }
        Command::DeleteStep { id } => {
            let step_id = state
                .find_step(&id)
                .map(|s| s.id)
                .ok_or_else(|| anyhow!("no single step matches '{id}'"))?;
            state.delete_step(step_id);
            println!("Deleted step {step_id}");
        }
        Command::Generate { out } => {
            let files = state.generate_code(&generator).await?;
            let written = write_bundle(&out, files)
                .with_context(|| format!("writing bundle to {}", out.display()))?;
            for path in written {
                println!("wrote {}", path.display());
            }
        }
        Command::Reset => {
            state = ProcessState::new();
            println!("Session cleared.");
        }
    }

    state
        .save(&session_path)
        .with_context(|| format!("saving session {}", session_path.display()))?;
    Ok(())
}

fn default_session_path() -> Result<PathBuf> {
    let base = dirs::data_local_dir().ok_or_else(|| anyhow!("no local data directory"))?;
    Ok(base.join("pom-pilot").join("session.json"))
}

async fn say(state: &mut ProcessState, orchestrator: &Orchestrator, instruction: &str) {
    match state.submit(orchestrator, instruction).await {
        Ok(steps) => {
            if let Some(message) = state.chat_history.last() {
                println!("{}", message.content);
            }
            for step in &steps {
                println!("  {}", describe(step));
            }
        }
        Err(_) => {
            if let Some(message) = state.chat_history.last() {
                eprintln!("{}", message.content);
            }
        }
    }
}

async fn chat(state: &mut ProcessState, orchestrator: &Orchestrator, session_path: &Path) -> Result<()> {
    println!("Current URL: {}. Type an instruction, or 'exit' to quit.", state.current_url);
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next() else { break };
        let line = line?;
        let instruction = line.trim();
        if instruction.is_empty() {
            continue;
        }
        if instruction.eq_ignore_ascii_case("exit") {
            break;
        }
        say(state, orchestrator, instruction).await;
        state.save(session_path)?;
    }
    Ok(())
}

fn describe(step: &AutomationStep) -> String {
    let id = step.id.to_string();
    let mut line = format!(
        "#{} [{}] {} {} ({}) {}",
        step.order,
        step.page_context,
        step.action_type,
        step.target_element,
        step.simulated_selector,
        &id[..8],
    );
    if let Some(value) = step.value.as_deref().filter(|v| !v.is_empty()) {
        line.push_str(&format!(" = {value:?}"));
    }
    line
}

fn print_steps(steps: &[AutomationStep], current_url: &str) {
    println!("Current URL: {current_url}");
    if steps.is_empty() {
        println!("No steps yet.");
        return;
    }
    for step in steps {
        println!("  {}", describe(step));
    }
}
