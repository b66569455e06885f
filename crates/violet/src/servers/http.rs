use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use super::Conf;
use crate::fqdn;
use crate::http::{
	Body, Method, Request, Response, StatusCode, header, reason_phrase, request_host, violet_error,
};

/// Serve the plaintext HTTP endpoint: the ACME HTTP-01 responder plus an
/// unconditional permanent redirect to the HTTPS listener.
pub async fn run(
	conf: Arc<Conf>,
	listen: String,
	mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
	let listener = TcpListener::bind(&listen).await?;
	info!("[HTTP] starting server on {listen}");
	axum::serve(listener, router(conf))
		.with_graceful_shutdown(async move {
			let _ = shutdown.changed().await;
		})
		.await?;
	Ok(())
}

pub fn router(conf: Arc<Conf>) -> axum::Router {
	axum::Router::new()
		.route("/.well-known/acme-challenge/{key}", get(acme_challenge))
		.fallback(redirect_to_https)
		.with_state(conf)
}

async fn acme_challenge(
	State(conf): State<Arc<Conf>>,
	Path(key): Path<String>,
	req: Request,
) -> Response {
	let resp = match request_host(&req) {
		None => violet_error(StatusCode::BAD_REQUEST, "Invalid host"),
		Some(host) if !conf.domains.is_valid(host) => {
			violet_error(StatusCode::BAD_REQUEST, "Invalid host")
		},
		Some(host) => {
			let domain = fqdn::domain_without_port(host);
			match conf.acme.get(domain, &key) {
				Some(value) => ::http::Response::builder()
					.status(StatusCode::OK)
					.header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
					.body(Body::from(value))
					.expect("static response must build"),
				None => crate::http::status_response(StatusCode::NOT_FOUND),
			}
		},
	};
	conf.metrics.observe("http", resp.status().as_u16());
	resp
}

async fn redirect_to_https(State(conf): State<Arc<Conf>>, req: Request) -> Response {
	let resp = match request_host(&req) {
		None => violet_error(StatusCode::BAD_REQUEST, "Invalid host"),
		Some(host) => {
			let domain = fqdn::domain_without_port(host);
			let authority = if conf.https_port == 443 {
				domain.to_string()
			} else {
				format!("{domain}:{}", conf.https_port)
			};
			let path_and_query = req
				.uri()
				.path_and_query()
				.map(|pq| pq.as_str())
				.unwrap_or("/");
			let code = StatusCode::PERMANENT_REDIRECT;
			let body = if req.method() == Method::GET {
				Body::from(reason_phrase(code).to_string())
			} else {
				Body::empty()
			};
			::http::Response::builder()
				.status(code)
				.header(header::LOCATION, format!("https://{authority}{path_and_query}"))
				.body(body)
				.expect("static response must build")
		},
	};
	conf.metrics.observe("http", resp.status().as_u16());
	resp
}

#[cfg(test)]
mod tests {
	use tower::util::ServiceExt;

	use super::*;
	use crate::servers::test_support;

	fn get_req(path: &str, host: &str) -> Request {
		::http::Request::builder()
			.method(Method::GET)
			.uri(path)
			.header(header::HOST, host)
			.body(Body::empty())
			.unwrap()
	}

	#[tokio::test]
	async fn everything_redirects_to_https() {
		let conf = test_support::conf().await;
		let app = router(conf);
		let resp = app
			.oneshot(get_req("/some/page?q=1", "example.com"))
			.await
			.unwrap();
		assert_eq!(resp.status(), StatusCode::PERMANENT_REDIRECT);
		assert_eq!(
			resp.headers().get(header::LOCATION).unwrap(),
			"https://example.com/some/page?q=1"
		);
	}

	#[tokio::test]
	async fn non_default_https_port_is_inserted() {
		let conf = test_support::conf().await;
		let mut conf = Arc::unwrap_or_clone(conf);
		conf.https_port = 8443;
		let app = router(Arc::new(conf));
		let resp = app.oneshot(get_req("/", "example.com:80")).await.unwrap();
		assert_eq!(
			resp.headers().get(header::LOCATION).unwrap(),
			"https://example.com:8443/"
		);
	}

	#[tokio::test]
	async fn acme_challenge_round_trip() {
		let conf = test_support::conf().await;
		conf.domains.put_in_memory("example.com");
		conf.acme.put("example.com", "123", "123abc");

		let app = router(conf.clone());
		let resp = app
			.clone()
			.oneshot(get_req("/.well-known/acme-challenge/123", "example.com"))
			.await
			.unwrap();
		assert_eq!(resp.status(), StatusCode::OK);
		let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
		assert_eq!(body.as_ref(), b"123abc");

		// unknown key
		let resp = app
			.clone()
			.oneshot(get_req("/.well-known/acme-challenge/999", "example.com"))
			.await
			.unwrap();
		assert_eq!(resp.status(), StatusCode::NOT_FOUND);

		// deleted key
		conf.acme.delete("example.com", "123");
		let resp = app
			.oneshot(get_req("/.well-known/acme-challenge/123", "example.com"))
			.await
			.unwrap();
		assert_eq!(resp.status(), StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn acme_challenge_requires_known_host() {
		let conf = test_support::conf().await;
		conf.acme.put("example.com", "123", "123abc");

		let app = router(conf);
		let resp = app
			.oneshot(get_req("/.well-known/acme-challenge/123", "example.com"))
			.await
			.unwrap();
		assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
	}
}
