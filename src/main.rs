//! Binary entrypoint for the Meshsync BBS CLI.
//!
//! Commands:
//! - `start` - run the BBS with the JSON-lines radio bridge on stdin/stdout
//! - `init` - create a starter `config.toml` and the data directory
//! - `status` - print stored totals and configured peers
//!
//! Stdout carries bridge frames while `start` runs, so logs go to stderr
//! and the optional log files.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::time::Duration;

use meshsync_bbs::bbs::BbsServer;
use meshsync_bbs::config::Config;
use meshsync_bbs::mesh::bridge::{read_events, JsonLinesLink};
use meshsync_bbs::mesh::{MeshWriter, Outbox};
use meshsync_bbs::storage::Store;

#[derive(Parser)]
#[command(name = "meshsync-bbs")]
#[command(about = "A store-and-forward BBS for Meshtastic mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the BBS, exchanging JSON lines with a radio gateway on stdin/stdout
    Start,
    /// Initialize a new BBS configuration
    Init,
    /// Show BBS status and statistics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting Meshsync BBS v{}", env!("CARGO_PKG_VERSION"));
            run_bridge(config).await?;
        }
        Commands::Init => {
            init_logging(&None, cli.verbose);
            info!("Initializing new BBS configuration");
            Config::create_default(&cli.config).await?;
            let cfg = Config::default();
            tokio::fs::create_dir_all(&cfg.storage.data_dir).await?;
            info!("Configuration file created at {}", cli.config);
            info!("Data directory ready at {}", cfg.storage.data_dir);
        }
        Commands::Status => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            show_status(&config)?;
        }
    }

    Ok(())
}

async fn run_bridge(config: Config) -> Result<()> {
    let (outbox, outgoing) = Outbox::new(config.mesh.channel, config.mesh.max_payload);
    let pacing = Duration::from_millis(config.mesh.send_pacing_ms);
    let writer = MeshWriter::new(outgoing, JsonLinesLink::new(std::io::stdout()), pacing);
    let writer_task = tokio::spawn(writer.run());

    let (events_tx, events) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(async move {
        if let Err(e) = read_events(BufReader::new(tokio::io::stdin()), events_tx).await {
            log::error!("bridge input failed: {}", e);
        }
    });

    let server = BbsServer::new(config, outbox)?;
    info!("BBS server starting...");
    server.run(events).await?;

    // every Outbox clone is gone once the server is dropped; let queued replies drain
    reader_task.abort();
    let _ = writer_task.await;
    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    let path = std::path::Path::new(&config.storage.data_dir).join("bbs.sled");
    let store = Store::open(path)?;
    let counts = store.counts(&config.bbs.boards)?;
    println!("{}", config.bbs.name);
    println!("Bulletins: {}", counts.bulletins());
    for (board, n) in &counts.bulletins_by_board {
        println!("  {:<12} {}", board, n);
    }
    println!("Mail: {}", counts.mail);
    println!("Channels: {}", counts.channels);
    if config.sync.peers.is_empty() {
        println!("Peers: none (replication disabled)");
    } else {
        println!("Peers: {}", config.sync.peers.join(", "));
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity, else the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    if let Some(cfg) = config {
        let security_path = cfg.logging.security_file.clone();
        if let Some(ref file) = cfg.logging.file {
            if let Ok(f) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
            {
                let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));

                // Echo to the console only when someone is watching stderr
                let is_tty = atty::is(atty::Stream::Stderr);

                builder.format(move |fmt, record| {
                    let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                    let line = format!("{} [{}] {}", ts, record.level(), record.args());

                    if let Ok(mut guard) = write_mutex.lock() {
                        let _ = writeln!(guard, "{}", line);
                    }

                    if record.target() == "security" {
                        if let Some(ref sec_path) = security_path {
                            if let Ok(mut sf) = std::fs::OpenOptions::new()
                                .create(true)
                                .append(true)
                                .open(sec_path)
                            {
                                let _ = writeln!(sf, "{}", line);
                            }
                        }
                    }

                    if is_tty {
                        writeln!(fmt, "{}", line)
                    } else {
                        Ok(())
                    }
                });
            } else {
                builder.format(|fmt, record| {
                    writeln!(
                        fmt,
                        "{} [{}] {}",
                        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                        record.level(),
                        record.args()
                    )
                });
            }
        } else {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    builder.target(env_logger::Target::Stderr);
    let _ = builder.try_init();
}
