use std::net::SocketAddr;

pub type Body = axum_core::body::Body;
pub type Request = ::http::Request<Body>;
pub type Response = ::http::Response<Body>;

pub use ::http::uri::{Authority, Scheme};
pub use ::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header, uri};

pub mod x_headers {
	use http::HeaderName;

	pub const X_VIOLET_ERROR: HeaderName = HeaderName::from_static("x-violet-error");
	pub const X_VIOLET_LOOP_DETECT: HeaderName = HeaderName::from_static("x-violet-loop-detect");
	pub const X_VIOLET_RAW_FAVICON: HeaderName = HeaderName::from_static("x-violet-raw-favicon");
	pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
}

/// Peer address of the accepted connection, attached to every request as an
/// extension by the listener frontends.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub SocketAddr);

/// The inbound host, port included when the client sent one. HTTP/2 carries
/// it in the URI authority; HTTP/1 in the Host header.
pub fn request_host(req: &Request) -> Option<&str> {
	if let Some(authority) = req.uri().authority() {
		return Some(authority.as_str());
	}
	req
		.headers()
		.get(header::HOST)
		.and_then(|h| h.to_str().ok())
}

/// Whether any `Connection` header on the request lists the given token.
pub fn connection_has_token(headers: &HeaderMap, token: &str) -> bool {
	headers.get_all(header::CONNECTION).iter().any(|v| {
		v.to_str()
			.map(|s| s.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
			.unwrap_or(false)
	})
}

pub fn reason_phrase(code: StatusCode) -> &'static str {
	code.canonical_reason().unwrap_or("Unknown Error Code")
}

/// Plain `"<code> <reason>\n"` response, the generic error shape shared by
/// every data-plane surface.
pub fn status_response(code: StatusCode) -> Response {
	::http::Response::builder()
		.status(code)
		.header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
		.body(Body::from(format!(
			"{} {}\n",
			code.as_u16(),
			reason_phrase(code)
		)))
		.expect("static response must build")
}

/// Generic error response carrying the `X-Violet-Error` detail header used
/// on the data-plane listeners.
pub fn violet_error(code: StatusCode, message: &str) -> Response {
	let mut resp = status_response(code);
	if let Ok(value) = HeaderValue::try_from(message) {
		resp.headers_mut().insert(x_headers::X_VIOLET_ERROR, value);
	}
	resp
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_response_body() {
		let resp = status_response(StatusCode::IM_A_TEAPOT);
		assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
	}

	#[test]
	fn violet_error_sets_header() {
		let resp = violet_error(StatusCode::BAD_GATEWAY, "backend exploded");
		assert_eq!(
			resp.headers().get(x_headers::X_VIOLET_ERROR).unwrap(),
			"backend exploded"
		);
	}

	#[test]
	fn host_from_header() {
		let req = ::http::Request::builder()
			.uri("/hello")
			.header(header::HOST, "example.com:8080")
			.body(Body::empty())
			.unwrap();
		assert_eq!(request_host(&req), Some("example.com:8080"));
	}
}
