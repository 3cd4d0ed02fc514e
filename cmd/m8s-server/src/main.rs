use clap::Parser;
use pkg_controllers::{ControllerContext, ControllerRegistry, quota};
use pkg_state::client::ObjectStore;
use pkg_types::config::{ServerConfigFile, load_config_file};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "m8s-server", about = "m8s multi-tenant control plane server")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = "/etc/m8s/config.yaml")]
    config: String,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Reconcile worker pool size per controller
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: ServerConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| "/tmp/m8s-data".to_string());
    let workers = cli.workers.or(file_cfg.workers).unwrap_or(2);

    info!("Starting m8s-server");
    info!("  Data dir: {}", data_dir);
    info!("  Workers:  {}", workers);

    let store = ObjectStore::new(&data_dir).await?;
    let ctx = ControllerContext {
        store: store.clone(),
        workers,
    };

    // Controllers are registered here, explicitly, at bootstrap.
    let mut registry = ControllerRegistry::new();
    registry.register("resourcequota", quota::setup);
    let handles = registry.start_all(&ctx);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    for handle in handles {
        handle.abort();
    }
    store.close().await?;

    Ok(())
}
