//! Ingress (S1) gateway binary.
//!
//! # Usage
//!
//! ```bash
//! weir-send --config /etc/weir/weir.yaml
//! ```

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use weir_core::metrics::GatewayMetrics;
use weir_gateway::{
    Config, SystemEnv,
    control::ControlHandle,
    ingress,
    signals::shutdown_pair,
    supervisor::{ChildSpec, ExitReason, Supervisor, SupervisorConfig},
    watchdog::{NoThermalProbe, Watchdog, WatchdogConfig},
};

/// One-way gateway, ingress side
#[derive(Parser, Debug)]
#[command(name = "weir-send")]
#[command(about = "Accept TCP/UDP ingress and emit frames one-way over UDP")]
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

    tracing::info!("weir ingress starting");

    let env = SystemEnv::new();
    let metrics = GatewayMetrics::shared();
    let (handle, _shutdown) = shutdown_pair();
    let mut supervisor = Supervisor::new(
        env.clone(),
        SupervisorConfig::default(),
        std::sync::Arc::clone(&metrics),
        handle.clone(),
    );

    let started = match ingress::start(
        &config,
        env.clone(),
        std::sync::Arc::clone(&metrics),
        &mut supervisor,
    )
    .await
    {
        Ok(started) => started,
        Err(error) => {
            tracing::error!(%error, "ingress startup failed");
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
        .with_commands(started.commands.clone());

    tracing::info!(tcp = %started.tcp_addr, udp = ?started.udp_addr, "ingress listening");

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
    tracing::info!(status = ?control.status().metrics, "final counters");

    match reason {
        ExitReason::Graceful => {
            tracing::info!("ingress stopped");
            ExitCode::SUCCESS
        },
        ExitReason::IntensityExhausted => {
            tracing::error!("ingress terminated: restart intensity exhausted");
            ExitCode::from(2)
        },
    }
}
