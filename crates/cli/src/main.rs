use clap::{Parser, Subcommand};
use lib::gateway::ShutdownReason;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "smart48bot")]
#[command(about = "Smart48 Telegram relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Write an example config (smart48bot.yaml.example) next to the config path.
    Init {
        /// Config file path (default: SMART48_CONFIG_PATH or ./smart48bot.yaml)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the relay: HTTP endpoints for controllers plus the Telegram bot (webhook or long polling).
    #[command(alias = "gateway")]
    Run {
        /// Config file path (default: SMART48_CONFIG_PATH or ./smart48bot.yaml)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config bot_port or 8443)
        #[arg(long, short)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("smart48bot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            init_logger("info", None);
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config, port }) => match run_relay(config, port).await {
            Ok(ShutdownReason::Signal) => {}
            Ok(ShutdownReason::RestartRequested) => {
                // Non-zero so the supervisor starts a fresh process.
                log::info!("exiting for restart");
                std::process::exit(1);
            }
            Err(e) => {
                log::error!("relay failed: {:#}", e);
                eprintln!("smart48bot: {:#}", e);
                std::process::exit(1);
            }
        },
        None => {
            println!("Run with --help for usage");
        }
    }
}

/// RUST_LOG wins over the configured level; a configured file gets the output in append mode.
fn init_logger(default_level: &str, file_name: Option<&PathBuf>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    if let Some(path) = file_name {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("cannot open log file {}: {}, logging to stderr", path.display(), e),
        }
    }
    builder.init();
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let written = lib::init::write_example_config(&path)?;
    println!(
        "wrote {}; fill it in and save it as {}",
        written.display(),
        path.display()
    );
    Ok(())
}

async fn run_relay(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<ShutdownReason> {
    let (mut config, path) = match lib::config::load_config(config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            init_logger("error", None);
            return Err(e);
        }
    };
    init_logger(&config.log.level, config.log.file_name.as_ref());
    if let Some(p) = port {
        config.bot_port = p;
    }
    log::info!(
        "starting relay on {}:{} (config {})",
        config.api_addr,
        config.bot_port,
        path.display()
    );
    lib::gateway::run_gateway(config).await
}
