pub mod config;
pub mod controller;
pub mod daemon;
pub mod interact;
pub mod mqtt;
pub mod protocol;

use crate::config::{SettingsProvider, TomlSettingsFile};
use crate::controller::supervisor::Supervisor;
use crate::mqtt::{BrokerConfig, PublishBridge, PublishTopics};
use crate::protocol::DEFAULT_DAEMON_PORT;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const USAGE: &str = "\
flic2mqtt                               # this message
flic2mqtt -interact host [port]         # run an interactive daemon console against host[:port]
flic2mqtt -mqtt [config.toml]           # run the MQTT gateway with settings from config.toml
";

#[derive(Debug, PartialEq, Eq)]
enum Mode {
    Usage,
    Interact { host: String, port: u16 },
    Gateway { config: Option<PathBuf> },
}

fn parse_args(args: &[String]) -> Result<Mode> {
    match args.first().map(String::as_str) {
        Some("-interact") => {
            let Some(host) = args.get(1) else {
                return Ok(Mode::Usage);
            };
            let port = match args.get(2) {
                Some(port) => port
                    .parse()
                    .map_err(|e| eyre!("Invalid daemon port '{}': {}", port, e))?,
                None => DEFAULT_DAEMON_PORT,
            };
            Ok(Mode::Interact {
                host: host.clone(),
                port,
            })
        }
        Some("-mqtt") if args.len() <= 2 => Ok(Mode::Gateway {
            config: args.get(1).map(PathBuf::from),
        }),
        _ => Ok(Mode::Usage),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match parse_args(&args)? {
        Mode::Usage => {
            eprint!("{}", USAGE);
            Ok(())
        }
        Mode::Interact { host, port } => {
            setup()?;
            interact::run(&host, port).await?;
            Ok(())
        }
        Mode::Gateway { config } => {
            setup()?;
            run_gateway(config).await
        }
    }
}

async fn run_gateway(config: Option<PathBuf>) -> Result<()> {
    let provider = match config {
        Some(path) => TomlSettingsFile::new(path),
        None => TomlSettingsFile::default_location()?,
    };
    let settings = provider.load()?;

    let topics = PublishTopics::new(&settings.mqtt.topic_prefix, &settings.slot_table());
    let broker = BrokerConfig::from_settings(&settings.mqtt)?;
    info!(
        "MQTT mode, broker {}:{} as {}",
        broker.host, broker.port, broker.client_id
    );

    let mut bridge = PublishBridge::new(broker, topics);
    bridge.connect().await;

    Supervisor::new(settings, Box::new(bridge)).run().await?;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
