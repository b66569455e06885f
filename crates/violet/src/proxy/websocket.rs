use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tracing::{debug, info};

use crate::http::{
	Body, HeaderValue, Method, Request, Response, StatusCode, Uri, header, violet_error,
};

/// Server side of the websocket relay path.
///
/// An accepted upgrade is answered directly on the inbound socket, then a
/// websocket client connection is dialled to the backend and frames are
/// relayed both ways until either side closes. Open relays are tracked so
/// shutdown can terminate them; a stop flag rejects new upgrades once
/// shutdown begins.
#[derive(Clone, Default)]
pub struct Server {
	inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
	stop: AtomicBool,
	next_id: AtomicU64,
	conns: Mutex<HashMap<u64, AbortHandle>>,
}

impl Server {
	pub fn new() -> Server {
		Server::default()
	}

	/// Whether the inbound request is a well-formed websocket upgrade.
	pub fn is_upgrade_request(req: &Request) -> bool {
		req.method() == Method::GET
			&& crate::http::connection_has_token(req.headers(), "upgrade")
			&& req
				.headers()
				.get(header::UPGRADE)
				.and_then(|v| v.to_str().ok())
				.map(|v| v.eq_ignore_ascii_case("websocket"))
				.unwrap_or(false)
			&& req.headers().contains_key(header::SEC_WEBSOCKET_KEY)
	}

	/// Take over the request: answer the handshake and spawn the relay
	/// toward `target` (a `ws://` or `wss://` URI).
	pub fn upgrade(&self, mut req: Request, target: Uri) -> Response {
		if self.inner.stop.load(Ordering::SeqCst) {
			return violet_error(StatusCode::SERVICE_UNAVAILABLE, "server is shutting down");
		}
		let Some(key) = req.headers().get(header::SEC_WEBSOCKET_KEY).cloned() else {
			return violet_error(StatusCode::BAD_REQUEST, "missing websocket key");
		};
		let Some(on_upgrade) = req.extensions_mut().remove::<OnUpgrade>() else {
			return violet_error(StatusCode::BAD_REQUEST, "connection is not upgradeable");
		};
		let accept = derive_accept_key(key.as_bytes());
		// only the origin crosses over; the backend decides what to allow
		let origin = req.headers().get(header::ORIGIN).cloned();

		info!(target = %target, "relaying websocket upgrade");
		let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
		let inner = self.inner.clone();
		{
			let mut conns = self.inner.conns.lock();
			let handle = tokio::spawn(async move {
				if let Err(err) = relay(on_upgrade, target, origin).await {
					debug!("websocket relay ended: {err}");
				}
				inner.conns.lock().remove(&id);
			});
			conns.insert(id, handle.abort_handle());
		}

		::http::Response::builder()
			.status(StatusCode::SWITCHING_PROTOCOLS)
			.header(header::CONNECTION, "Upgrade")
			.header(header::UPGRADE, "websocket")
			.header(header::SEC_WEBSOCKET_ACCEPT, accept)
			.body(Body::empty())
			.expect("static response must build")
	}

	/// Reject further upgrades and tear down every open relay.
	pub fn shutdown(&self) {
		self.inner.stop.store(true, Ordering::SeqCst);
		let mut conns = self.inner.conns.lock();
		for (_, handle) in conns.drain() {
			handle.abort();
		}
	}

	#[cfg(test)]
	pub(crate) fn open_connections(&self) -> usize {
		self.inner.conns.lock().len()
	}
}

async fn relay(on_upgrade: OnUpgrade, target: Uri, origin: Option<HeaderValue>) -> anyhow::Result<()> {
	let mut client_req = target.into_client_request()?;
	if let Some(origin) = origin {
		client_req.headers_mut().insert(header::ORIGIN, origin);
	}
	let (backend, _) = tokio_tungstenite::connect_async(client_req).await?;

	let upgraded = on_upgrade.await?;
	let inbound =
		WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;

	let (mut inbound_tx, mut inbound_rx) = inbound.split();
	let (mut backend_tx, mut backend_rx) = backend.split();

	let client_to_backend = async move {
		while let Some(msg) = inbound_rx.next().await {
			backend_tx.send(msg?).await?;
		}
		Ok::<_, anyhow::Error>(())
	};
	let backend_to_client = async move {
		while let Some(msg) = backend_rx.next().await {
			inbound_tx.send(msg?).await?;
		}
		Ok::<_, anyhow::Error>(())
	};

	// whichever direction finishes first drops the other, closing both
	tokio::select! {
		res = client_to_backend => res,
		res = backend_to_client => res,
	}
}
