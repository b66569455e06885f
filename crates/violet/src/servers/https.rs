use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use rustls::ServerConfig;
use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use super::Conf;
use crate::certs::Certs;
use crate::domains::Domains;
use crate::favicons::FaviconKind;
use crate::http::{
	Body, ClientAddr, HeaderValue, Request, Response, StatusCode, header, request_host, x_headers,
};
use crate::ratelimit::RateLimiter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
const HSTS: HeaderValue = HeaderValue::from_static("max-age=63072000; includeSubDomains");

/// Serve the public HTTPS endpoint: TLS termination with per-SNI
/// certificate selection, then the filter chain in front of the router.
pub async fn run(
	conf: Arc<Conf>,
	listen: String,
	mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
	let tls = Arc::new(tls_server_config(&conf)?);
	let acceptor = TlsAcceptor::from(tls);
	let limiter = Arc::new(RateLimiter::per_minute(conf.rate_limit));
	let listener = TcpListener::bind(&listen).await?;
	info!("[HTTPS] starting server on {listen}");

	let graceful = GracefulShutdown::new();
	loop {
		tokio::select! {
			accepted = listener.accept() => {
				let Ok((stream, peer)) = accepted else { continue };
				let conf = conf.clone();
				let acceptor = acceptor.clone();
				let limiter = limiter.clone();
				let watcher = graceful.watcher();
				tokio::spawn(async move {
					handle_connection(conf, limiter, acceptor, stream, peer, watcher).await;
				});
			}
			_ = shutdown.changed() => break,
		}
	}
	drop(listener);

	tokio::select! {
		_ = graceful.shutdown() => {}
		_ = tokio::time::sleep(SHUTDOWN_GRACE) => {
			warn!("[HTTPS] shutdown grace period expired");
		}
	}
	Ok(())
}

async fn handle_connection(
	conf: Arc<Conf>,
	limiter: Arc<RateLimiter>,
	acceptor: TlsAcceptor,
	stream: TcpStream,
	peer: SocketAddr,
	watcher: hyper_util::server::graceful::Watcher,
) {
	let tls = match acceptor.accept(stream).await {
		Ok(tls) => tls,
		Err(err) => {
			debug!("TLS handshake with {peer} failed: {err}");
			return;
		},
	};
	let service = service_fn(move |req: ::http::Request<Incoming>| {
		let conf = conf.clone();
		let limiter = limiter.clone();
		async move {
			let mut req = req.map(Body::new);
			req.extensions_mut().insert(ClientAddr(peer));
			Ok::<_, Infallible>(serve(conf, limiter, req).await)
		}
	});
	let builder = auto::Builder::new(TokioExecutor::new());
	let conn = builder
		.serve_connection_with_upgrades(TokioIo::new(tls), service)
		.into_owned();
	if let Err(err) = watcher.watch(conn).await {
		debug!("connection from {peer} ended: {err}");
	}
}

/// The full response chain for one request: HSTS applies to every
/// response, the rate limiter guards the rest, and the request counter
/// covers everything that got past it.
pub(crate) async fn serve(conf: Arc<Conf>, limiter: Arc<RateLimiter>, req: Request) -> Response {
	let mut resp = filter(conf, limiter, req).await;
	resp
		.headers_mut()
		.insert(header::STRICT_TRANSPORT_SECURITY, HSTS);
	resp
}

async fn filter(conf: Arc<Conf>, limiter: Arc<RateLimiter>, req: Request) -> Response {
	if let Some(ClientAddr(addr)) = req.extensions().get::<ClientAddr>()
		&& !limiter.try_acquire(addr.ip())
	{
		return conf.error_pages.response(StatusCode::TOO_MANY_REQUESTS);
	}
	let resp = inner(conf.clone(), req).await;
	conf.metrics.observe("https", resp.status().as_u16());
	resp
}

async fn inner(conf: Arc<Conf>, req: Request) -> Response {
	if req.headers().contains_key(x_headers::X_VIOLET_LOOP_DETECT) {
		return conf.error_pages.response(StatusCode::LOOP_DETECTED);
	}

	if let Some(kind) = FaviconKind::from_path(req.uri().path())
		&& !req.headers().contains_key(x_headers::X_VIOLET_RAW_FAVICON)
		&& let Some(host) = request_host(&req)
		&& let Some(image) = conf
			.favicons
			.get(crate::fqdn::domain_without_port(host), kind)
	{
		return ::http::Response::builder()
			.status(StatusCode::OK)
			.header(header::CONTENT_TYPE, kind.content_type())
			.body(Body::from(image))
			.expect("static response must build");
	}

	match conf.router.serve(req).await {
		Some(resp) => resp,
		None => no_route(),
	}
}

// the hard-coded no-match signal
fn no_route() -> Response {
	::http::Response::builder()
		.status(StatusCode::IM_A_TEAPOT)
		.header(x_headers::X_VIOLET_ERROR, "No route")
		.body(Body::from("No route"))
		.expect("static response must build")
}

/// SNI certificate selection: unknown hosts fail the handshake before any
/// HTTP is spoken.
struct SniResolver {
	domains: Domains,
	certs: Certs,
}

impl std::fmt::Debug for SniResolver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SniResolver").finish()
	}
}

impl ResolvesServerCert for SniResolver {
	fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
		let name = client_hello.server_name()?;
		if !self.domains.is_valid(name) {
			debug!("rejecting TLS handshake for unknown host {name}");
			return None;
		}
		self.certs.get_cert_for_domain(name)
	}
}

fn tls_server_config(conf: &Conf) -> anyhow::Result<ServerConfig> {
	let mut config = ServerConfig::builder_with_provider(Arc::new(provider()))
		.with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])?
		.with_no_client_auth()
		.with_cert_resolver(Arc::new(SniResolver {
			domains: conf.domains.clone(),
			certs: conf.certs.clone(),
		}));
	config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
	Ok(config)
}

fn provider() -> CryptoProvider {
	use rustls::crypto::ring;

	CryptoProvider {
		// AEAD-only suite list; no CBC, no RSA key exchange
		cipher_suites: vec![
			ring::cipher_suite::TLS13_AES_256_GCM_SHA384,
			ring::cipher_suite::TLS13_AES_128_GCM_SHA256,
			ring::cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
			ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
			ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
			ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
			ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
			ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
			ring::cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
		],
		..ring::default_provider()
	}
}

#[cfg(test)]
mod tests {
	use std::net::IpAddr;
	use std::time::Duration;

	use super::*;
	use crate::Compilable;
	use crate::database;
	use crate::flags::Flags;
	use crate::http::Method;
	use crate::servers::test_support;
	use crate::target::Redirect;

	fn request(url: &str, peer: u8) -> Request {
		let mut req = ::http::Request::builder()
			.method(Method::GET)
			.uri(url)
			.body(Body::empty())
			.unwrap();
		req
			.extensions_mut()
			.insert(ClientAddr(SocketAddr::new(IpAddr::from([10, 0, 0, peer]), 40000)));
		req
	}

	#[tokio::test]
	async fn unmatched_requests_get_a_teapot() {
		let conf = test_support::conf().await;
		let limiter = Arc::new(RateLimiter::per_minute(300));
		let resp = serve(conf, limiter, request("https://unknown.test/", 1)).await;
		assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
		assert_eq!(resp.headers().get(x_headers::X_VIOLET_ERROR).unwrap(), "No route");
		assert!(resp.headers().contains_key(header::STRICT_TRANSPORT_SECURITY));
	}

	#[tokio::test]
	async fn rate_limit_kicks_in_after_budget() {
		let conf = test_support::conf_with_rate_limit(5).await;
		let limiter = Arc::new(RateLimiter::per_minute(conf.rate_limit));
		for _ in 0..5 {
			let resp = serve(conf.clone(), limiter.clone(), request("https://unknown.test/", 2)).await;
			assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
		}
		let resp = serve(conf.clone(), limiter.clone(), request("https://unknown.test/", 2)).await;
		assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
		// other clients still have budget
		let resp = serve(conf, limiter, request("https://unknown.test/", 3)).await;
		assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
	}

	#[tokio::test]
	async fn loop_detection_short_circuits() {
		let conf = test_support::conf().await;
		let limiter = Arc::new(RateLimiter::per_minute(300));
		let mut req = request("https://unknown.test/", 4);
		req
			.headers_mut()
			.insert(x_headers::X_VIOLET_LOOP_DETECT, HeaderValue::from_static("1"));
		let resp = serve(conf, limiter, req).await;
		assert_eq!(resp.status(), StatusCode::LOOP_DETECTED);
	}

	#[tokio::test]
	async fn router_dispatch_serves_redirects() {
		let conf = test_support::conf().await;
		database::insert_redirect(&conf.db, &Redirect {
			src: "www.example.com/".to_string(),
			dst: "example.com".to_string(),
			flags: Flags::PRE,
			code: 302,
			active: true,
			..Default::default()
		})
		.await
		.unwrap();
		conf.router.compile();
		tokio::time::sleep(Duration::from_millis(50)).await;

		let limiter = Arc::new(RateLimiter::per_minute(300));
		let resp = serve(conf, limiter, request("https://www.example.com/x/", 5)).await;
		assert_eq!(resp.status(), StatusCode::FOUND);
		assert_eq!(
			resp.headers().get(header::LOCATION).unwrap(),
			"https://example.com/x/"
		);
	}
}
