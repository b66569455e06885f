use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use violet::acme::AcmeChallenges;
use violet::certs::Certs;
use violet::config::StartupConfig;
use violet::domains::Domains;
use violet::error_pages::ErrorPages;
use violet::favicons::Favicons;
use violet::metrics::Metrics;
use violet::proxy::{HybridTransport, websocket};
use violet::router::Manager;
use violet::servers::api::auth::Verifier;
use violet::servers::{Conf, api, http, https};
use violet::{Compilable, MultiCompilable, database};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "violet", about = "Dynamic multi-tenant reverse proxy and redirector")]
struct Args {
	/// Path to the config file
	#[arg(short, long, value_name = "file")]
	conf: PathBuf,
}

fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let args = Args::parse();
	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.expect("failed to build runtime")
		.block_on(serve(args))
}

async fn serve(args: Args) -> anyhow::Result<()> {
	info!("[Violet] starting...");
	let config = StartupConfig::load(&args.conf)
		.with_context(|| format!("loading config file {}", args.conf.display()))?;

	// sibling files live next to the config
	let wd = args
		.conf
		.parent()
		.map(|p| p.to_path_buf())
		.unwrap_or_else(|| PathBuf::from("."));

	let cert_dir = wd.join("certs");
	let key_dir = wd.join("keys");
	if !config.self_signed {
		std::fs::create_dir_all(&cert_dir).context("creating certificate dir")?;
		std::fs::create_dir_all(&key_dir).context("creating certificate key dir")?;
	}
	if let Some(dir) = &config.error_page_path {
		std::fs::create_dir_all(dir).context("creating error page dir")?;
	}

	let verifier =
		Verifier::from_pem_file(&wd.join("signer.public.pem")).context("loading signer public key")?;
	let db = database::connect(&wd.join("violet.db.sqlite"))
		.await
		.context("opening database")?;

	// construction order matters: the router manager needs the hybrid
	// transport, which owns the websocket server
	let ws = websocket::Server::new();
	let transport = HybridTransport::new(ws.clone()).context("building outbound transport")?;
	let domains = Domains::new(db.clone());
	let acme = AcmeChallenges::new();
	let certs = Certs::new(cert_dir, key_dir, config.self_signed)
		.context("building certificate store")?;
	let favicons = Favicons::new(db.clone(), transport.clone());
	let error_pages = ErrorPages::new(config.error_page_path.clone());
	let router = Manager::new(db.clone(), transport);
	let metrics = Metrics::new();

	let compilables = MultiCompilable::new(vec![
		Arc::new(domains.clone()),
		Arc::new(certs.clone()),
		Arc::new(favicons.clone()),
		Arc::new(error_pages.clone()),
		Arc::new(router.clone()),
	]);
	compilables.compile();
	certs.start_refresh();

	let conf = Arc::new(Conf {
		rate_limit: config.rate_limit,
		https_port: config.https_port(),
		db,
		domains,
		acme,
		certs: certs.clone(),
		favicons,
		error_pages,
		router,
		metrics,
		verifier,
		compilables: compilables.clone(),
	});

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let mut servers = JoinSet::new();
	if let Some(listen) = config.listen.api.clone() {
		let conf = conf.clone();
		let shutdown = shutdown_rx.clone();
		servers.spawn(async move { ("API", api::run(conf, listen, shutdown).await) });
	}
	if let Some(listen) = config.listen.http.clone() {
		let conf = conf.clone();
		let shutdown = shutdown_rx.clone();
		servers.spawn(async move { ("HTTP", http::run(conf, listen, shutdown).await) });
	}
	if let Some(listen) = config.listen.https.clone() {
		let conf = conf.clone();
		let shutdown = shutdown_rx.clone();
		servers.spawn(async move { ("HTTPS", https::run(conf, listen, shutdown).await) });
	}

	wait_for_signals(&compilables).await;
	info!("[Violet] shutting down...");

	// stop the cert refresh timer and close websocket relays before the
	// listeners drain
	certs.stop();
	ws.shutdown();
	let _ = shutdown_tx.send(true);

	let drain = async {
		while let Some(res) = servers.join_next().await {
			match res {
				Ok((name, Ok(()))) => info!("[{name}] server stopped"),
				Ok((name, Err(err))) => error!("[{name}] server failed: {err}"),
				Err(err) => error!("server task failed: {err}"),
			}
		}
	};
	if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
		warn!("[Violet] shutdown grace period expired");
	}
	info!("[Violet] goodbye");
	Ok(())
}

/// Block until SIGINT/SIGTERM. SIGHUP triggers a reload of every
/// compilable component instead of exiting.
async fn wait_for_signals(compilables: &MultiCompilable) {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{SignalKind, signal};
		let mut term = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
		let mut hup = signal(SignalKind::hangup()).expect("installing SIGHUP handler");
		loop {
			tokio::select! {
				_ = tokio::signal::ctrl_c() => return,
				_ = term.recv() => return,
				_ = hup.recv() => {
					info!("[Violet] reload signal received");
					compilables.compile();
				}
			}
		}
	}
	#[cfg(not(unix))]
	{
		let _ = compilables;
		let _ = tokio::signal::ctrl_c().await;
	}
}
