use std::convert::Infallible;
use std::net::SocketAddr;

use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;

use super::*;
use crate::http::{Body, header};
use crate::proxy::{HybridTransport, websocket};

/// Upstream that echoes the request line and every header back in the
/// response body, one per line.
async fn spawn_echo_upstream() -> SocketAddr {
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
							let mut body = format!(
								"{} {}\n",
								req.method(),
								req
									.uri()
									.path_and_query()
									.map(|pq| pq.as_str())
									.unwrap_or("/")
							);
							for (name, value) in req.headers() {
								body.push_str(&format!(
									"{}: {}\n",
									name,
									value.to_str().unwrap_or("<binary>")
								));
							}
							Ok::<_, Infallible>(
								::http::Response::new(Full::new(bytes::Bytes::from(body))),
							)
						}),
					)
					.await;
			});
		}
	});
	addr
}

fn transport() -> HybridTransport {
	HybridTransport::new(websocket::Server::new()).unwrap()
}

fn client_addr() -> SocketAddr {
	"93.184.215.14:40000".parse().unwrap()
}

fn inbound(method: Method, url: &str) -> Request {
	::http::Request::builder()
		.method(method)
		.uri(url)
		.body(Body::empty())
		.unwrap()
}

async fn body_string(resp: Response) -> String {
	let bytes = resp.into_body().collect().await.unwrap().to_bytes();
	String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn wildcard_service_forwards_host_and_addr() {
	let addr = spawn_echo_upstream().await;
	let transport = transport();
	let route = Route {
		src: "*.example.com".to_string(),
		dst: addr.to_string(),
		flags: Flags::ABS | Flags::FORWARD_HOST | Flags::FORWARD_ADDR,
		active: true,
		..Default::default()
	};
	let req = inbound(Method::GET, "https://test.example.com/");
	let resp = route
		.serve(req, "", RouteContext {
			transport: &transport,
			client_addr: Some(client_addr()),
		})
		.await;
	assert_eq!(resp.status(), StatusCode::OK);
	let body = body_string(resp).await;
	assert!(body.starts_with("GET /\n"), "{body}");
	assert!(body.contains("host: test.example.com\n"), "{body}");
	assert!(body.contains("x-forwarded-for: 93.184.215.14\n"), "{body}");
	assert!(body.contains("x-violet-loop-detect: 1\n"), "{body}");
}

#[tokio::test]
async fn prefix_route_strips_matched_path() {
	let addr = spawn_echo_upstream().await;
	let transport = transport();
	let route = Route {
		src: "example.com/hello".to_string(),
		dst: addr.to_string(),
		flags: Flags::PRE,
		active: true,
		..Default::default()
	};

	// /hello/world matched the /hello mount, leaving /world
	let req = inbound(Method::GET, "https://example.com/hello/world");
	let resp = route
		.serve(req, "/world", RouteContext {
			transport: &transport,
			client_addr: None,
		})
		.await;
	assert!(body_string(resp).await.starts_with("GET /world\n"));

	// an exact /hello match leaves nothing, which maps to /
	let req = inbound(Method::GET, "https://example.com/hello");
	let resp = route
		.serve(req, "", RouteContext {
			transport: &transport,
			client_addr: None,
		})
		.await;
	assert!(body_string(resp).await.starts_with("GET /\n"));
}

#[tokio::test]
async fn query_string_passes_through() {
	let addr = spawn_echo_upstream().await;
	let transport = transport();
	let route = Route {
		src: "example.com/hello".to_string(),
		dst: addr.to_string(),
		flags: Flags::PRE,
		active: true,
		..Default::default()
	};
	let req = inbound(Method::GET, "https://example.com/hello/world?a=1&b=2");
	let resp = route
		.serve(req, "/world", RouteContext {
			transport: &transport,
			client_addr: None,
		})
		.await;
	assert!(body_string(resp).await.starts_with("GET /world?a=1&b=2\n"));
}

#[tokio::test]
async fn hop_headers_are_scrubbed() {
	let addr = spawn_echo_upstream().await;
	let transport = transport();
	let route = Route {
		src: "example.com".to_string(),
		dst: addr.to_string(),
		flags: Flags::PRE,
		active: true,
		..Default::default()
	};
	let req = ::http::Request::builder()
		.method(Method::GET)
		.uri("https://example.com/")
		.header(header::CONNECTION, "x-custom-hop")
		.header("x-custom-hop", "secret")
		.header(header::PROXY_AUTHORIZATION, "Basic abc")
		.header("keep-alive", "timeout=5")
		.header(header::TE, "trailers, deflate")
		.header("x-kept", "yes")
		.body(Body::empty())
		.unwrap();
	let resp = route
		.serve(req, "/", RouteContext {
			transport: &transport,
			client_addr: None,
		})
		.await;
	let body = body_string(resp).await;
	assert!(!body.contains("x-custom-hop"), "{body}");
	assert!(!body.contains("proxy-authorization"), "{body}");
	assert!(!body.contains("keep-alive"), "{body}");
	// the trailers token survives as a bare TE header
	assert!(body.contains("te: trailers\n"), "{body}");
	assert!(body.contains("x-kept: yes\n"), "{body}");
}

#[tokio::test]
async fn route_headers_overlay_inbound_headers() {
	let addr = spawn_echo_upstream().await;
	let transport = transport();
	let mut headers = HeaderMap::new();
	headers.insert("x-other", HeaderValue::from_static("test value"));
	let route = Route {
		src: "example.com".to_string(),
		dst: addr.to_string(),
		flags: Flags::PRE,
		active: true,
		headers,
		..Default::default()
	};
	let req = inbound(Method::GET, "https://example.com/");
	let resp = route
		.serve(req, "/", RouteContext {
			transport: &transport,
			client_addr: None,
		})
		.await;
	assert!(body_string(resp).await.contains("x-other: test value\n"));
}

#[tokio::test]
async fn forward_addr_folds_existing_list() {
	let addr = spawn_echo_upstream().await;
	let transport = transport();
	let route = Route {
		src: "example.com".to_string(),
		dst: addr.to_string(),
		flags: Flags::PRE | Flags::FORWARD_ADDR,
		active: true,
		..Default::default()
	};
	let req = ::http::Request::builder()
		.method(Method::GET)
		.uri("https://example.com/")
		.header("x-forwarded-for", "10.0.0.1")
		.body(Body::empty())
		.unwrap();
	let resp = route
		.serve(req, "/", RouteContext {
			transport: &transport,
			client_addr: Some(client_addr()),
		})
		.await;
	assert!(
		body_string(resp)
			.await
			.contains("x-forwarded-for: 10.0.0.1, 93.184.215.14\n")
	);
}

#[tokio::test]
async fn cors_preflight_is_answered_without_forwarding() {
	let transport = transport();
	let route = Route {
		src: "example.com".to_string(),
		// unreachable on purpose: the preflight must not be proxied
		dst: "127.0.0.1:1".to_string(),
		flags: Flags::PRE | Flags::CORS,
		active: true,
		..Default::default()
	};
	let req = inbound(Method::OPTIONS, "https://example.com/test");
	let resp = route
		.serve(req, "/test", RouteContext {
			transport: &transport,
			client_addr: None,
		})
		.await;
	assert_eq!(resp.status(), StatusCode::OK);
	assert_eq!(
		resp
			.headers()
			.get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
			.unwrap(),
		"*"
	);
	assert_eq!(
		resp
			.headers()
			.get(header::ACCESS_CONTROL_ALLOW_HEADERS)
			.unwrap(),
		"Content-Type, Authorization"
	);
}

#[tokio::test]
async fn cors_headers_wrap_proxied_responses() {
	let addr = spawn_echo_upstream().await;
	let transport = transport();
	let route = Route {
		src: "example.com".to_string(),
		dst: addr.to_string(),
		flags: Flags::PRE | Flags::CORS,
		active: true,
		..Default::default()
	};
	let req = inbound(Method::GET, "https://example.com/");
	let resp = route
		.serve(req, "/", RouteContext {
			transport: &transport,
			client_addr: None,
		})
		.await;
	assert_eq!(
		resp
			.headers()
			.get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
			.unwrap(),
		"*"
	);
	assert_eq!(
		resp
			.headers()
			.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
			.unwrap(),
		"true"
	);
}

#[tokio::test]
async fn unreachable_backend_is_a_bad_gateway() {
	let transport = transport();
	let route = Route {
		src: "example.com".to_string(),
		dst: "127.0.0.1:1".to_string(),
		flags: Flags::PRE,
		active: true,
		..Default::default()
	};
	let req = inbound(Method::GET, "https://example.com/");
	let resp = route
		.serve(req, "/", RouteContext {
			transport: &transport,
			client_addr: None,
		})
		.await;
	assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
	assert_eq!(
		resp.headers().get(x_headers::X_VIOLET_ERROR).unwrap(),
		"error receiving internal round trip response"
	);
}

#[tokio::test]
async fn invalid_upgrade_token_is_rejected() {
	let transport = transport();
	let route = Route {
		src: "example.com".to_string(),
		dst: "127.0.0.1:1".to_string(),
		flags: Flags::PRE,
		active: true,
		..Default::default()
	};
	let req = ::http::Request::builder()
		.method(Method::GET)
		.uri("https://example.com/")
		.header(header::CONNECTION, "Upgrade")
		.header(header::UPGRADE, HeaderValue::from_bytes(b"web\x80socket").unwrap())
		.body(Body::empty())
		.unwrap();
	let resp = route
		.serve(req, "/", RouteContext {
			transport: &transport,
			client_addr: None,
		})
		.await;
	assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
