use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use pkg_apiclient::{ApiService, HttpApi};
use pkg_controllers::hpa::HPAController;
use pkg_controllers::replicaset::ReplicaSetController;
use pkg_informer::Informer;
use pkg_types::config::{ManagerConfigFile, load_config_file};
use pkg_types::hpa::HorizontalPodAutoscaler;
use pkg_types::pod::Pod;
use pkg_types::replicaset::ReplicaSet;

#[derive(Parser, Debug)]
#[command(name = "kubelite-manager", about = "kubelite reconciliation controllers")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = "/etc/kubelite/config.yaml")]
    config: String,

    /// Base URL of the API server
    #[arg(long)]
    server: Option<String>,

    /// Autoscaler sweep interval in seconds
    #[arg(long)]
    sweep_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: ManagerConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let server = cli
        .server
        .or(file_cfg.server)
        .unwrap_or_else(|| "http://127.0.0.1:6443".to_string());
    let sweep_interval = cli
        .sweep_interval
        .or(file_cfg.sweep_interval_secs)
        .unwrap_or(15);

    info!("Starting kubelite-manager");
    info!("  Server:         {}", server);
    info!("  Sweep interval: {}s", sweep_interval);

    let api: Arc<dyn ApiService> = Arc::new(HttpApi::new(&server)?);

    let pod_informer = Arc::new(Informer::<Pod>::new(Arc::clone(&api)));
    let rs_informer = Arc::new(Informer::<ReplicaSet>::new(Arc::clone(&api)));
    let hpa_informer = Arc::new(Informer::<HorizontalPodAutoscaler>::new(Arc::clone(&api)));

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(
        Arc::clone(&pod_informer).run(stop_rx.clone()),
    ));
    tasks.push(tokio::spawn(Arc::clone(&rs_informer).run(stop_rx.clone())));
    tasks.push(tokio::spawn(
        Arc::clone(&hpa_informer).run(stop_rx.clone()),
    ));

    let rs_controller = Arc::new(ReplicaSetController::new(
        Arc::clone(&pod_informer),
        Arc::clone(&rs_informer),
    ));
    tasks.push(tokio::spawn(rs_controller.run(stop_rx.clone())));

    let hpa_controller = Arc::new(
        HPAController::new(hpa_informer, pod_informer, rs_informer)
            .with_sweep_interval(Duration::from_secs(sweep_interval)),
    );
    tasks.push(tokio::spawn(hpa_controller.run(stop_rx)));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping controllers");
    stop_tx.send(true).ok();
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}
