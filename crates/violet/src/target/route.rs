use std::net::SocketAddr;

use headers::HeaderMapExt;
use tracing::warn;

use super::{Route, effective_path};
use crate::flags::Flags;
use crate::fqdn;
use crate::http::{
	HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri,
	connection_has_token, header, request_host, violet_error, x_headers,
};
use crate::proxy::HybridTransport;
use crate::proxy::websocket;

/// Per-request inputs a route needs besides the request itself.
pub struct RouteContext<'a> {
	pub transport: &'a HybridTransport,
	pub client_addr: Option<SocketAddr>,
}

// Hop-by-hop headers, removed before the request is sent to the backend.
// Anything named by the inbound Connection header is scrubbed as well.
static HOP_HEADERS: [HeaderName; 9] = [
	header::CONNECTION,
	HeaderName::from_static("proxy-connection"),
	HeaderName::from_static("keep-alive"),
	header::PROXY_AUTHENTICATE,
	header::PROXY_AUTHORIZATION,
	header::TE,
	header::TRAILER,
	header::TRANSFER_ENCODING,
	header::UPGRADE,
];

impl Route {
	/// Forward the request to the backend. `remainder` is the request path
	/// left after the router trimmed the matched source prefix.
	pub async fn serve(&self, req: Request, remainder: &str, ctx: RouteContext<'_>) -> Response {
		let cors = self.flags.has(Flags::CORS);
		if cors && req.method() == Method::OPTIONS {
			return cors_preflight();
		}

		let (dst_host, dst_path) = fqdn::split_host_path(&self.dst);
		let path = effective_path(dst_path, remainder, self.flags.has(Flags::ABS));
		let path_and_query = match req.uri().query() {
			Some(query) => format!("{path}?{query}"),
			None => path,
		};

		if self.flags.has(Flags::WEBSOCKET) && websocket::Server::is_upgrade_request(&req) {
			let Ok(ws_uri) = format!("ws://{dst_host}{path_and_query}").parse::<Uri>() else {
				return violet_error(StatusCode::BAD_GATEWAY, "error generating new request");
			};
			let mut resp = ctx.transport.websocket().upgrade(req, ws_uri);
			if cors {
				add_cors_headers(resp.headers_mut());
			}
			return resp;
		}

		let scheme = if self.flags.has(Flags::SECURE_MODE) {
			"https"
		} else {
			"http"
		};
		let Ok(uri) = format!("{scheme}://{dst_host}{path_and_query}").parse::<Uri>() else {
			return violet_error(StatusCode::BAD_GATEWAY, "error generating new request");
		};

		let inbound_host = request_host(&req).map(|h| h.to_string());
		let (parts, body) = req.into_parts();

		let mut headers = parts.headers.clone();
		headers.remove(header::HOST);
		for (name, value) in &self.headers {
			headers.insert(name.clone(), value.clone());
		}

		// scrub connection-named headers first, then the fixed set
		for value in parts.headers.get_all(header::CONNECTION) {
			if let Ok(tokens) = value.to_str() {
				for token in tokens.split(',') {
					if let Ok(name) = HeaderName::try_from(token.trim()) {
						headers.remove(name);
					}
				}
			}
		}
		for name in &HOP_HEADERS {
			headers.remove(name);
		}

		let te_trailers = parts
			.headers
			.get(header::TE)
			.and_then(|v| v.to_str().ok())
			.map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("trailers")))
			.unwrap_or(false);
		if te_trailers {
			headers.typed_insert(headers::Te::trailers());
		}

		// re-emit protocol upgrades stripped by the scrub above
		if let Some(upgrade) = upgrade_type(&parts.headers) {
			if !upgrade.as_bytes().iter().all(|b| (0x20..0x7f).contains(b)) {
				return violet_error(StatusCode::BAD_REQUEST, "invalid upgrade token");
			}
			headers.typed_insert(headers::Connection::upgrade());
			headers.insert(header::UPGRADE, upgrade);
		}

		if self.flags.has(Flags::FORWARD_HOST)
			&& let Some(host) = &inbound_host
			&& let Ok(value) = HeaderValue::try_from(host.as_str())
		{
			headers.insert(header::HOST, value);
		}
		if self.flags.has(Flags::FORWARD_ADDR)
			&& let Some(addr) = ctx.client_addr
		{
			let prior: Vec<&str> = parts
				.headers
				.get_all(x_headers::X_FORWARDED_FOR)
				.iter()
				.filter_map(|v| v.to_str().ok())
				.collect();
			let forwarded = if prior.is_empty() {
				addr.ip().to_string()
			} else {
				format!("{}, {}", prior.join(", "), addr.ip())
			};
			if let Ok(value) = HeaderValue::try_from(forwarded) {
				headers.insert(x_headers::X_FORWARDED_FOR, value);
			}
		}
		headers.insert(x_headers::X_VIOLET_LOOP_DETECT, HeaderValue::from_static("1"));

		let outbound = ::http::Request::builder()
			.method(parts.method.clone())
			.uri(uri)
			.body(body);
		let mut outbound = match outbound {
			Ok(req) => req,
			Err(err) => {
				warn!("building outbound request for {}: {err}", self.dst);
				return violet_error(StatusCode::BAD_GATEWAY, "error generating new request");
			},
		};
		*outbound.headers_mut() = headers;

		let result = if self.flags.has(Flags::IGNORE_CERT) {
			ctx.transport.insecure_round_trip(outbound).await
		} else {
			ctx.transport.secure_round_trip(outbound).await
		};
		let mut resp = match result {
			Ok(resp) => resp,
			Err(err) => {
				warn!("round trip to {} failed: {err}", self.dst);
				return violet_error(
					StatusCode::BAD_GATEWAY,
					"error receiving internal round trip response",
				);
			},
		};
		if cors {
			add_cors_headers(resp.headers_mut());
		}
		resp
	}
}

fn upgrade_type(headers: &HeaderMap) -> Option<HeaderValue> {
	if connection_has_token(headers, "upgrade") {
		headers.get(header::UPGRADE).cloned()
	} else {
		None
	}
}

fn cors_preflight() -> Response {
	::http::Response::builder()
		.status(StatusCode::OK)
		.header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
		.header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true")
		.header(
			header::ACCESS_CONTROL_ALLOW_METHODS,
			"GET, HEAD, POST, PUT, PATCH, DELETE, OPTIONS",
		)
		.header(
			header::ACCESS_CONTROL_ALLOW_HEADERS,
			"Content-Type, Authorization",
		)
		.header(header::VARY, "Origin")
		.body(crate::http::Body::empty())
		.expect("static response must build")
}

fn add_cors_headers(headers: &mut HeaderMap) {
	headers.insert(
		header::ACCESS_CONTROL_ALLOW_ORIGIN,
		HeaderValue::from_static("*"),
	);
	headers.insert(
		header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
		HeaderValue::from_static("true"),
	);
	headers.insert(header::VARY, HeaderValue::from_static("Origin"));
}

#[cfg(test)]
#[path = "route_test.rs"]
mod tests;
