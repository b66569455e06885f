use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::BodyExt;
use parking_lot::RwLock;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::http::{Body, HeaderValue, Request, header, x_headers};
use crate::proxy::HybridTransport;
use crate::rescheduler::Rescheduler;
use crate::{Compilable, database};

/// The formats a favicon can be served in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaviconKind {
	Svg,
	Png,
	Ico,
}

impl FaviconKind {
	pub fn from_path(path: &str) -> Option<FaviconKind> {
		match path {
			"/favicon.svg" => Some(FaviconKind::Svg),
			"/favicon.png" => Some(FaviconKind::Png),
			"/favicon.ico" => Some(FaviconKind::Ico),
			_ => None,
		}
	}

	pub fn content_type(self) -> &'static str {
		match self {
			FaviconKind::Svg => "image/svg+xml",
			FaviconKind::Png => "image/png",
			FaviconKind::Ico => "image/x-icon",
		}
	}
}

#[derive(Default)]
struct FaviconSet {
	svg: Option<Bytes>,
	png: Option<Bytes>,
	ico: Option<Bytes>,
}

/// Per-host favicon cache. Reload fetches the configured source URLs
/// through the hybrid transport and keeps the raw bytes; the HTTPS
/// frontend serves them on the `/favicon.*` short-circuit. Conversion
/// between formats is an external pipeline, so a format without a source
/// URL is simply absent.
#[derive(Clone)]
pub struct Favicons {
	inner: Arc<Inner>,
	resched: Rescheduler,
}

struct Inner {
	db: SqlitePool,
	transport: HybridTransport,
	map: RwLock<HashMap<String, FaviconSet>>,
}

impl Favicons {
	pub fn new(db: SqlitePool, transport: HybridTransport) -> Favicons {
		let inner = Arc::new(Inner {
			db,
			transport,
			map: RwLock::new(HashMap::new()),
		});
		let resched = {
			let inner = inner.clone();
			Rescheduler::new(move || {
				let inner = inner.clone();
				async move { Inner::rebuild(inner).await }
			})
		};
		Favicons { inner, resched }
	}

	pub fn get(&self, host: &str, kind: FaviconKind) -> Option<Bytes> {
		let map = self.inner.map.read();
		let set = map.get(host)?;
		match kind {
			FaviconKind::Svg => set.svg.clone(),
			FaviconKind::Png => set.png.clone(),
			FaviconKind::Ico => set.ico.clone(),
		}
	}
}

impl Inner {
	async fn rebuild(inner: Arc<Inner>) {
		let rows = match database::favicon_rows(&inner.db).await {
			Ok(rows) => rows,
			Err(err) => {
				warn!("favicon compile failed: {err}");
				return;
			},
		};
		let mut map = HashMap::new();
		for row in rows {
			let set = FaviconSet {
				svg: fetch_optional(&inner.transport, &row.host, row.svg.as_deref()).await,
				png: fetch_optional(&inner.transport, &row.host, row.png.as_deref()).await,
				ico: fetch_optional(&inner.transport, &row.host, row.ico.as_deref()).await,
			};
			map.insert(row.host, set);
		}
		debug!(hosts = map.len(), "compiled favicon cache");
		*inner.map.write() = map;
	}
}

async fn fetch_optional(transport: &HybridTransport, host: &str, url: Option<&str>) -> Option<Bytes> {
	let url = url?;
	if url.is_empty() {
		return None;
	}
	match fetch(transport, url).await {
		Ok(bytes) => Some(bytes),
		Err(err) => {
			warn!("fetching favicon {url} for {host}: {err}");
			None
		},
	}
}

async fn fetch(transport: &HybridTransport, url: &str) -> anyhow::Result<Bytes> {
	let req: Request = ::http::Request::builder()
		.uri(url)
		// keep our own favicon short-circuit from answering the fetch
		.header(x_headers::X_VIOLET_RAW_FAVICON, HeaderValue::from_static("1"))
		.header(header::ACCEPT, "image/*")
		.body(Body::empty())?;
	let resp = transport.secure_round_trip(req).await?;
	anyhow::ensure!(
		resp.status().is_success(),
		"unexpected status {}",
		resp.status()
	);
	Ok(resp.into_body().collect().await?.to_bytes())
}

impl Compilable for Favicons {
	fn compile(&self) {
		self.resched.run();
	}
}

#[cfg(test)]
mod tests {
	use std::convert::Infallible;
	use std::time::Duration;

	use http_body_util::Full;
	use hyper::service::service_fn;
	use hyper_util::rt::TokioIo;

	use super::*;
	use crate::proxy::websocket;

	async fn spawn_favicon_upstream() -> std::net::SocketAddr {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			loop {
				let Ok((stream, _)) = listener.accept().await else {
					return;
				};
				tokio::spawn(async move {
					let _ = hyper::server::conn::http1::Builder::new()
						.serve_connection(
							TokioIo::new(stream),
							service_fn(|req: ::http::Request<hyper::body::Incoming>| async move {
								assert!(req.headers().contains_key("x-violet-raw-favicon"));
								Ok::<_, Infallible>(::http::Response::new(Full::new(
									Bytes::from_static(b"png-bytes"),
								)))
							}),
						)
						.await;
				});
			}
		});
		addr
	}

	#[tokio::test]
	async fn fetches_and_caches_raw_bytes() {
		let addr = spawn_favicon_upstream().await;
		let pool = database::connect_memory().await.unwrap();
		sqlx::query("INSERT INTO favicons (host, png) VALUES (?, ?)")
			.bind("example.com")
			.bind(format!("http://{addr}/favicon.png"))
			.execute(&pool)
			.await
			.unwrap();

		let transport = HybridTransport::new(websocket::Server::new()).unwrap();
		let favicons = Favicons::new(pool, transport);
		favicons.compile();
		tokio::time::sleep(Duration::from_millis(100)).await;

		let png = favicons.get("example.com", FaviconKind::Png).unwrap();
		assert_eq!(png.as_ref(), b"png-bytes");
		assert!(favicons.get("example.com", FaviconKind::Ico).is_none());
		assert!(favicons.get("other.com", FaviconKind::Png).is_none());
	}

	#[test]
	fn kind_from_path() {
		assert_eq!(FaviconKind::from_path("/favicon.ico"), Some(FaviconKind::Ico));
		assert_eq!(FaviconKind::from_path("/favicon.png"), Some(FaviconKind::Png));
		assert_eq!(FaviconKind::from_path("/favicon.svg"), Some(FaviconKind::Svg));
		assert_eq!(FaviconKind::from_path("/favicon.gif"), None);
		assert_eq!(FaviconKind::from_path("/x/favicon.ico"), None);
	}
}
