use anyhow::Result;
use sessionwarden::cli::{Args, ConfigDiscovery, ExecutionMode, Maintenance};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_filter = if args.verbose {
        "sessionwarden=debug"
    } else {
        "sessionwarden=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match mode {
        ExecutionMode::ShowConfig => ConfigDiscovery::show_discovery_info(),
        ExecutionMode::Gc { max_lifetime_secs } => {
            let purged = open_store(&args)?
                .gc(max_lifetime_secs.map(Duration::from_secs))
                .await?;
            println!("Purged {} expired session records", purged);
        }
        ExecutionMode::List => {
            let ids = open_store(&args)?.list().await?;
            for id in &ids {
                println!("{}", id);
            }
            info!("{} session records", ids.len());
        }
        ExecutionMode::Inspect(id) => match open_store(&args)?.inspect(&id).await? {
            Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            None => {
                error!("Session {} not found", id);
                std::process::exit(2);
            }
        },
        ExecutionMode::Destroy(id) => {
            if open_store(&args)?.destroy(&id).await? {
                println!("Destroyed session {}", id);
            } else {
                println!("Session {} did not exist", id);
            }
        }
    }

    Ok(())
}

fn open_store(args: &Args) -> Result<Maintenance> {
    let config = ConfigDiscovery::load(args.config.as_deref())?;
    Maintenance::from_config(config)
}
