#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{Level as TraceLevel, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use creator_studio::SettingsStore;
use creator_studio::environment::{Backends, Environment};

#[derive(Parser)]
#[command(author, version, about = "Robot arm studio resource coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the saved camera and robot and run until interrupted.
    Run(RunArgs),
    /// Inspect or change the settings file.
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Args)]
struct SettingsPath {
    /// Settings file (defaults to the user config directory).
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl SettingsPath {
    fn resolve(self) -> PathBuf {
        self.settings.unwrap_or_else(SettingsStore::default_path)
    }
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    path: SettingsPath,
    /// Object catalog directory (defaults to the user data directory).
    #[arg(long)]
    objects_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Print the reconciled settings, or one category.
    Show {
        category: Option<String>,
        #[command(flatten)]
        path: SettingsPath,
    },
    /// Replace a category with a JSON value.
    Set {
        category: String,
        /// New value, as JSON (`"2"`, `true`, `{"wordWrap": true, ...}`).
        value: String,
        #[command(flatten)]
        path: SettingsPath,
    },
}

fn main() -> Result<()> {
    // Parse log level from environment variable
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Settings(SettingsCommand::Show { category, path }) => show_settings(path.resolve(), category),
        Commands::Settings(SettingsCommand::Set { category, value, path }) => {
            set_setting(path.resolve(), &category, &value)
        }
    }
}

fn run(args: RunArgs) -> Result<()> {
    let backends = Backends {
        objects_dir: args.objects_dir,
        ..Backends::default()
    };
    let mut env = Environment::with_backends(args.path.resolve(), backends);

    match env.object_manager_mut().load_objects() {
        Ok(count) => info!(count, "Object catalog ready"),
        Err(e) => warn!(error = %e, "Object catalog unavailable"),
    }
    info!(
        camera = ?env.video_stream().state(),
        robot = ?env.robot().state(),
        "Running, press Ctrl+C to exit"
    );

    let term = Arc::new(AtomicBool::new(false));
    register_shutdown_signals(&term)?;
    while !term.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    info!("Shutdown requested");
    let report = env.close();
    for step in &report.steps {
        match &step.error {
            None => info!(handle = step.handle, "Handle stopped"),
            Some(e) => error!(handle = step.handle, error = %e, "Handle did not stop cleanly"),
        }
    }
    info!(clean = report.is_clean(), handles = report.steps.len(), "Shutdown complete");
    Ok(())
}

#[cfg(unix)]
fn register_shutdown_signals(term: &Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};

    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(term))
            .with_context(|| format!("Failed to register handler for signal {signal}"))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn register_shutdown_signals(_term: &Arc<AtomicBool>) -> Result<()> {
    warn!("Signal handling unavailable on this platform, stop the process to exit");
    Ok(())
}

fn show_settings(path: PathBuf, category: Option<String>) -> Result<()> {
    let store = SettingsStore::open(path);
    let value = match category {
        Some(category) => store.category(&category)?,
        None => serde_json::Value::Object(store.document()),
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn set_setting(path: PathBuf, category: &str, raw: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(raw).with_context(|| format!("'{raw}' is not valid JSON"))?;
    let mut store = SettingsStore::open(path);
    if store.update(category, value)? {
        println!("persisted");
    } else {
        println!("unchanged");
    }
    Ok(())
}
