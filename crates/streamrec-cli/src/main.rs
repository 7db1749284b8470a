mod app;
mod schedules;
mod serve;
mod tick;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use schedules::ScheduleCommand;

#[derive(Parser)]
#[command(name = "streamrec", about = "Scheduled stream recording service")]
struct Cli {
    /// Config file (defaults to ~/.streamrec/config.json5)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler engine and the HTTP API
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Simulate recording instead of spawning the capture process
        #[arg(long)]
        dry_run: bool,
    },
    /// Run one scheduler tick now
    Tick {
        /// Show what a tick would do without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Gateway base URL (defaults to the configured host and port)
        #[arg(long)]
        url: Option<String>,

        /// Bearer token for authentication (defaults to the configured one)
        #[arg(long)]
        token: Option<String>,
    },
    /// Manage schedules
    Schedules {
        #[command(subcommand)]
        command: ScheduleCommand,
    },
    /// Show the next scheduled recording
    Next,
    /// Check system health
    Health,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = match &cli.config {
        Some(path) => streamrec_config::load_config_from(path)?,
        None => streamrec_config::load_config()?,
    };

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Serve { port, dry_run } => {
            rt.block_on(serve::run_serve(config, port, dry_run))?;
        }
        Commands::Tick {
            dry_run,
            url,
            token,
        } => {
            rt.block_on(tick::run_tick(&config, dry_run, url, token))?;
        }
        Commands::Schedules { command } => {
            rt.block_on(schedules::run_schedules(&config, command))?;
        }
        Commands::Next => {
            rt.block_on(schedules::run_next(&config))?;
        }
        Commands::Health => {
            println!("streamrec is healthy");
            println!("  gateway: {}:{}", config.gateway.host, config.gateway.port);
            println!("  tick interval: {}s", config.scheduler.tick_interval_secs);
            println!("  recorder: {}", config.recorder.program);
            let rules = rt.block_on(async {
                let store = app::open_store(&config)?;
                anyhow::Ok(store.list().await?.len())
            });
            match rules {
                Ok(count) => println!("  schedules: {count}"),
                Err(e) => println!("  schedules: unavailable ({e})"),
            }
        }
    }

    Ok(())
}
