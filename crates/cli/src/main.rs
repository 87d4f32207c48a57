use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use switchyard::channels::{run_console, serve_webchat, ConsoleChannel};
use switchyard::config::load_config;
use switchyard::Bot;

mod demo;

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Switchyard CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: SWITCHYARD_CONFIG_PATH or ~/.switchyard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Chat with the demonstration bot in this terminal. Type a shown number to press a button.
    Console {
        /// Config file path (default: SWITCHYARD_CONFIG_PATH or ~/.switchyard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Serve the demonstration bot over the webchat HTTP endpoint.
    Serve {
        /// Config file path (default: SWITCHYARD_CONFIG_PATH or ~/.switchyard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 8080)
        #[arg(long, short)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("switchyard {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Console { config }) => {
            if let Err(e) = run_console_bot(config).await {
                log::error!("console failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("serve failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(switchyard::config::default_config_path);
    let dir = switchyard::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_console_bot(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _path) = load_config(config_path)?;
    let bot = Bot::from_config(demo::router()?, &config).await?;
    let channel = Arc::new(ConsoleChannel::new(config.channels.console.user_or_default()));
    println!("{} on the console; /exit to leave.", bot.title());
    run_console(bot, channel, &config.channels.console.prompt).await
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, _path) = load_config(config_path)?;
    if let Some(p) = port {
        config.channels.webchat.port = p;
    }
    let bot = Bot::from_config(demo::router()?, &config).await?;
    log::info!(
        "starting webchat on {}:{}",
        config.channels.webchat.bind,
        config.channels.webchat.port
    );
    serve_webchat(bot, &config.channels.webchat).await
}
