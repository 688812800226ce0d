//! Command line entry point.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use eyre::{Result, WrapErr};
use relayd_identity::{load_identity, load_network_secret};
use relayd_net_routing::RoutingHandle;
use relayd_node::{HostConfig, RelayHost};
use relayd_node_config::RelayConfig;
use relayd_observability::{LogArgs, init_logging, install_prometheus_exporter};
use relayd_relay_acl::Acl;
use relayd_tasks::TaskManager;
use tracing::{info, warn};

/// libp2p circuit relay daemon.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Identity key file path. Created if missing.
    #[arg(long, value_name = "PATH", default_value = "identity")]
    pub(crate) id: PathBuf,

    /// JSON (or `.toml`) configuration file. Defaults apply when omitted.
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,

    /// Multicodec-encoded v1 private swarm key.
    #[arg(long, value_name = "PATH")]
    pub(crate) swarmkey: Option<PathBuf>,

    #[command(flatten)]
    pub(crate) logs: LogArgs,
}

/// Parse arguments, start the relay and run until terminated.
pub(crate) async fn run() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(&cli.logs)?;
    info!(version = env!("CARGO_PKG_VERSION"), "starting relayd");

    let config = RelayConfig::load(cli.config.as_deref().unwrap_or(Path::new("")))
        .wrap_err("failed to load configuration")?;
    let keypair = load_identity(&cli.id).wrap_err("failed to load identity")?;

    let manager = TaskManager::current();
    manager.shutdown_on_os_signal();
    let executor = manager.executor();

    if let Err(error) = install_prometheus_exporter(config.daemon.prom_port) {
        warn!(%error, "metrics exporter unavailable, continuing without it");
    }

    let secret = config
        .security
        .on_secret_error
        .apply(load_network_secret(cli.swarmkey.as_deref()))
        .wrap_err("failed to load network secret")?;
    if let Some(secret) = &secret {
        println!("PSK detected, private identity: {}", secret.fingerprint);
    }

    let host_config = HostConfig {
        listen_addrs: config.network.listen_multiaddrs()?,
        address_policy: config.network.address_policy()?,
        connmgr: config.conn_mgr.to_conn_manager_config()?,
        resources: config.resources.to_resource_manager_config(),
        routing: config.routing.to_routing_config()?,
        network_secret: secret,
        ..Default::default()
    };

    let mut host = RelayHost::build(keypair, host_config).wrap_err("failed to build host")?;
    let routing = host.start_routing()?;
    executor.spawn(log_routing_state(routing));

    let acl = Arc::new(Acl::new(config.acl.to_acl_config()?, host.connection_view()));
    host.enable_relay(&config.relay_v2.to_relay_service(), acl)?;

    host.run(executor.on_shutdown_signal().clone()).await
}

async fn log_routing_state(handle: RoutingHandle) {
    let mut states = handle.subscribe();
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        info!(%state, "routing state changed");
    }
}
