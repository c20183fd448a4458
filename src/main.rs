//! drive-gateway entry point.
//!
//! Binds the streaming-socket listener, opens the drive link (serial or
//! simulated), and runs the gateway loop until Ctrl-C.

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use drive_gateway::config::GatewayConfig;
use drive_gateway::error::GatewayError;
use drive_gateway::link::{NoopHook, RegisterLink, RtuLink, SimulatedDrive};
use drive_gateway::service::{BroadcastLoop, DriveController};
use drive_gateway::ws::SessionRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = GatewayConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(addr = %config.listen_addr, simulate = config.simulate, "starting drive-gateway");

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .map_err(GatewayError::from)?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    if config.simulate {
        serve(listener, SimulatedDrive::new(), &config).await
    } else {
        let link = RtuLink::open(&config.rtu_settings(), NoopHook).map_err(GatewayError::from)?;
        serve(listener, link, &config).await
    }
}

async fn serve<L: RegisterLink>(
    listener: TcpListener,
    link: L,
    config: &GatewayConfig,
) -> anyhow::Result<()> {
    let controller = DriveController::new(link, config.drive_params)?;
    let registry = SessionRegistry::new(config.max_clients, config.session_settings);
    let mut gateway = BroadcastLoop::new(listener, controller, registry, config.loop_settings);

    gateway
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "cannot listen for Ctrl-C, running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await;

    tracing::info!("gateway stopped");
    Ok(())
}
