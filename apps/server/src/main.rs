use aoi_core::analyzers::Capabilities;
use aoi_core::config::ServerConfig;
use aoi_core::AoiCore;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

mod routes;

#[derive(Parser, Debug)]
#[command(name = "aoi-server", about = "Visual AOI inspection server")]
struct Args {
	/// Host to bind
	#[arg(long, env = "AOI_HOST", default_value = "0.0.0.0")]
	host: String,

	/// Port to bind
	#[arg(long, env = "AOI_PORT", default_value = "5000")]
	port: u16,

	/// Root of the shared folder tree
	#[arg(long, env = "AOI_SHARED_ROOT", default_value = "./shared")]
	shared_root: PathBuf,

	/// Base URL of the barcode-linking service (linking disabled when unset)
	#[arg(long, env = "AOI_LINK_URL")]
	link_url: Option<String>,

	/// Prefix under which clients mount the shared folder
	#[arg(long, env = "AOI_CLIENT_MOUNT")]
	client_mount: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "info,aoi_core=debug,aoi_server=debug".into()),
		)
		.init();

	let args = Args::parse();

	// Persisted knobs come from the shared root; CLI flags override them
	// for this run only
	let mut config = ServerConfig::load_or_create(&args.shared_root)?;
	if args.link_url.is_some() {
		config.link_base_url = args.link_url.clone();
	}
	if let Some(mount) = args.client_mount.clone() {
		config.client_mount = mount;
	}

	info!("Shared folder root: {:?}", config.shared_root);
	info!(
		"Barcode linking: {}",
		config.link_base_url.as_deref().unwrap_or("disabled")
	);

	// Inference engines are deployment-specific; without them the core runs
	// its deterministic simulation capabilities
	let core = Arc::new(AoiCore::new(config, Capabilities::simulated())?);
	let _sweeper = core.start_background_tasks();

	let app = routes::router(core)
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive());

	let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
	info!("Visual AOI server listening on http://{addr}");

	let listener = tokio::net::TcpListener::bind(addr).await?;
	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await?;

	Ok(())
}

/// Graceful shutdown on Ctrl+C / SIGTERM
async fn shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {
			info!("Received Ctrl+C, shutting down gracefully...");
		}
		() = terminate => {
			info!("Received SIGTERM, shutting down gracefully...");
		}
	}
}
