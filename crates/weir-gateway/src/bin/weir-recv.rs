//! Egress (S2) gateway binary.
//!
//! # Usage
//!
//! ```bash
//! weir-recv --config /etc/weir/weir.yaml
//! ```

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use weir_core::metrics::GatewayMetrics;
use weir_gateway::{
    Config, SystemEnv,
    control::ControlHandle,
    egress,
    signals::shutdown_pair,
    supervisor::{ChildSpec, ExitReason, Supervisor, SupervisorConfig},
    watchdog::{NoThermalProbe, Watchdog, WatchdogConfig},
};

/// Drain deadline for in-flight workers and the spool flush at shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// One-way gateway, egress side
#[derive(Parser, Debug)]
#[command(name = "weir-recv")]
#[command(about = "Receive one-way UDP frames and persist them atomically")]
#[command(version)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(error) => {
            init_tracing("info");
            tracing::error!(%error, "invalid configuration");
            return ExitCode::FAILURE;
        },
    };
    init_tracing(args.log_level.as_deref().unwrap_or(&config.log_level));

    tracing::info!("weir egress starting");

    let env = SystemEnv::new();
    let metrics = GatewayMetrics::shared();
    let (handle, _shutdown) = shutdown_pair();
    let mut supervisor = Supervisor::new(
        env.clone(),
        SupervisorConfig::default(),
        std::sync::Arc::clone(&metrics),
        handle.clone(),
    );

    let started = match egress::start(
        &config,
        env.clone(),
        std::sync::Arc::clone(&metrics),
        &mut supervisor,
    )
    .await
    {
        Ok(started) => started,
        Err(error) => {
            tracing::error!(%error, "egress startup failed");
            return ExitCode::FAILURE;
        },
    };

    if let Some(path) = config.watchdog_path.clone() {
        let watchdog_config = WatchdogConfig {
            interval: Duration::from_millis(config.watchdog_interval_ms),
            max_temp_celsius: config.watchdog_max_temp_celsius,
        };
        let health = supervisor.health();
        let env_for_dog = env.clone();
        let shutdown = supervisor.shutdown_receiver();
        supervisor.add_child(ChildSpec {
            name: "watchdog",
            critical: false,
            start: Box::new(move || {
                let path = path.clone();
                let health = health.clone();
                let env = env_for_dog.clone();
                let shutdown = shutdown.clone();
                Box::pin(async move {
                    let dog =
                        Watchdog::open(&path, watchdog_config, health, Box::new(NoThermalProbe))?;
                    dog.run(env, shutdown).await
                })
            }),
        });
    }

    let control = ControlHandle::new(std::sync::Arc::clone(&metrics), supervisor.health())
        .with_link_flag(std::sync::Arc::clone(&started.link_dead));

    tracing::info!(udp = %started.udp_addr, "egress listening");

    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                handle.signal();
            }
        });
    }

    let reason = supervisor.run().await;

    // Listener already stopped with the supervisor; finish the ordered
    // shutdown by draining workers and syncing the spool.
    started.drain_and_flush(SHUTDOWN_DEADLINE).await;
    tracing::info!(status = ?control.status().metrics, "final counters");

    match reason {
        ExitReason::Graceful => {
            tracing::info!("egress stopped");
            ExitCode::SUCCESS
        },
        ExitReason::IntensityExhausted => {
            tracing::error!("egress terminated: restart intensity exhausted");
            ExitCode::from(2)
        },
    }
}
