// src/main.rs - Rig host server, one-shot runner and operator panel
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sundial_rig::communication::{RigServer, TcpConnector};
use sundial_rig::config::{self, RigConfig};
use sundial_rig::dispatch::{DispatchResult, Dispatcher};
use sundial_rig::hardware::{self, ServoBounds};
use sundial_rig::motion::{ProgramCatalog, ProgramSettings};
use sundial_rig::panel::{ControlPanel, PanelAction, PanelFields};
use sundial_rig::scheduler::StdClock;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Parser, Debug)]
#[command(name = "sundial", about = "Stepper and servo rig controller", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "rig.toml")]
    config: PathBuf,

    /// Maximum log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept panel sessions and run operations on this host's GPIO
    Serve {
        /// Override `server.bind`
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one operation locally and print its output
    Run {
        operation: String,
        #[arg(long, default_value_t = 0.0)]
        scale: f64,
    },
    /// Send one operator action to a rig host
    Panel {
        #[arg(value_enum)]
        action: PanelAction,
        #[arg(long, default_value = "")]
        total_ics: String,
        #[arg(long, default_value = "")]
        gear_ratio: String,
        #[arg(long, default_value = "")]
        steps_per_rotation: String,
        #[arg(long)]
        host: String,
    },
    /// Interrupt whatever a rig host is running
    Stop {
        #[arg(long)]
        host: String,
    },
    /// List the operations this rig knows
    Programs,
}

fn load(path: &Path) -> Result<RigConfig, BoxError> {
    if !path.exists() {
        tracing::warn!("Config file '{}' not found, using defaults", path.display());
        return Ok(RigConfig::default());
    }
    tracing::info!("Loading configuration from: {}", path.display());
    let path = path.to_str().ok_or("config path is not valid UTF-8")?;
    Ok(config::load_config(path)?)
}

fn build_dispatcher(config: &RigConfig) -> Result<Arc<Dispatcher>, BoxError> {
    let backend = hardware::open_backend(config.rig.backend)?;
    let dispatcher = Dispatcher::from_config(config, backend, Arc::new(StdClock))?;
    Ok(Arc::new(dispatcher))
}

fn print_result(result: &DispatchResult) {
    if !result.stdout.is_empty() {
        println!("{}", result.stdout.trim_end());
    }
    if !result.stderr.is_empty() {
        eprintln!("{}", result.stderr.trim_end());
    }
}

async fn serve(config: &RigConfig, bind: Option<String>) -> Result<(), BoxError> {
    let dispatcher = build_dispatcher(config)?;
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let server = RigServer::bind(&bind, Arc::clone(&dispatcher)).await?;
    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await?;
    tokio::task::spawn_blocking(move || dispatcher.shutdown()).await?;
    Ok(())
}

async fn run_local(config: &RigConfig, operation: String, scale: f64) -> Result<bool, BoxError> {
    let dispatcher = build_dispatcher(config)?;
    let canceller = Arc::clone(&dispatcher);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let outcome = dispatcher.dispatch_blocking(operation, scale).await;
    interrupt.abort();
    let result = DispatchResult::from_outcome(outcome);
    print_result(&result);
    tokio::task::spawn_blocking(move || dispatcher.shutdown()).await?;
    Ok(result.success)
}

async fn panel(config: &RigConfig, action: PanelAction, fields: PanelFields) -> Result<bool, BoxError> {
    let mut panel = ControlPanel::new(Box::new(TcpConnector::from(&config.session)));
    // Connect opens its own session; every other action needs one first.
    if action != PanelAction::Connect {
        panel.open(&fields).await?;
    }
    let result = panel.invoke(action, &fields).await?;
    print_result(&result);
    panel.close().await;
    Ok(result.success)
}

async fn stop(config: &RigConfig, host: String) -> Result<(), BoxError> {
    let mut panel = ControlPanel::new(Box::new(TcpConnector::from(&config.session)));
    panel.open(&PanelFields { host, ..Default::default() }).await?;
    let stopped = panel.stop().await;
    panel.close().await;
    stopped?;
    println!("stop requested");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .init();

    let config = load(&cli.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", cli.config.display(), e);
        e
    })?;
    tracing::info!("Rig: {} (backend {:?})", config.rig.name, config.rig.backend);

    let success = match cli.command {
        Commands::Serve { bind } => {
            serve(&config, bind).await?;
            true
        }
        Commands::Run { operation, scale } => run_local(&config, operation, scale).await?,
        Commands::Panel {
            action,
            total_ics,
            gear_ratio,
            steps_per_rotation,
            host,
        } => {
            let fields = PanelFields {
                total_ics,
                gear_ratio,
                steps_per_rotation,
                host,
            };
            panel(&config, action, fields).await?
        }
        Commands::Stop { host } => {
            stop(&config, host).await?;
            true
        }
        Commands::Programs => {
            let catalog = ProgramCatalog::standard(&ProgramSettings::from(&config), ServoBounds::default())?;
            for program in catalog.programs() {
                println!(
                    "{:<18} {:>2} ops{}",
                    program.name(),
                    program.ops().len(),
                    if program.uses_scale() { "  (uses scale)" } else { "" }
                );
            }
            true
        }
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
