use super::{Redirect, effective_path};
use crate::flags::Flags;
use crate::fqdn;
use crate::http::{Body, Method, Request, Response, StatusCode, header, reason_phrase};

impl Redirect {
	/// Answer the request with the configured redirect. `remainder` is the
	/// request path left after the router trimmed the matched source
	/// prefix.
	pub fn serve(&self, req: &Request, remainder: &str) -> Response {
		let code = match self.code {
			0 => StatusCode::FOUND,
			c => StatusCode::from_u16(c).unwrap_or(StatusCode::FOUND),
		};
		let (dst_host, dst_path) = fqdn::split_host_path(&self.dst);
		let path = effective_path(dst_path, remainder, self.flags.has(Flags::ABS));
		let scheme = req.uri().scheme_str().unwrap_or("https");
		let location = format!("{scheme}://{dst_host}{path}");

		// only GET carries an explanatory body
		let body = if req.method() == Method::GET {
			Body::from(reason_phrase(code).to_string())
		} else {
			Body::empty()
		};
		::http::Response::builder()
			.status(code)
			.header(header::LOCATION, location)
			.body(body)
			.expect("static response must build")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::http::header;

	fn request(path: &str) -> Request {
		::http::Request::builder()
			.method(Method::GET)
			.uri(format!("https://www.example.com{path}"))
			.body(Body::empty())
			.unwrap()
	}

	fn location(resp: &Response) -> &str {
		resp.headers().get(header::LOCATION).unwrap().to_str().unwrap()
	}

	#[test]
	fn joins_remainder_and_preserves_trailing_slash() {
		let redirect = Redirect {
			src: "www.example.com/".to_string(),
			dst: "example.com".to_string(),
			flags: Flags::PRE,
			code: 302,
			active: true,
			..Default::default()
		};
		// matched key "/" trimmed off "/x/" leaves "x/"
		let resp = redirect.serve(&request("/x/"), "x/");
		assert_eq!(resp.status(), StatusCode::FOUND);
		assert_eq!(location(&resp), "https://example.com/x/");

		let resp = redirect.serve(&request("/x"), "x");
		assert_eq!(location(&resp), "https://example.com/x");
	}

	#[test]
	fn absolute_destination_ignores_remainder() {
		let redirect = Redirect {
			src: "www.example.com/".to_string(),
			dst: "example.com/world".to_string(),
			flags: Flags::PRE | Flags::ABS,
			code: 302,
			active: true,
			..Default::default()
		};
		let resp = redirect.serve(&request("/hello"), "hello");
		assert_eq!(location(&resp), "https://example.com/world");
	}

	#[test]
	fn zero_code_defaults_to_found() {
		let redirect = Redirect {
			src: "a.example.com".to_string(),
			dst: "b.example.com".to_string(),
			..Default::default()
		};
		let resp = redirect.serve(&request("/"), "");
		assert_eq!(resp.status(), StatusCode::FOUND);
		assert_eq!(location(&resp), "https://b.example.com/");
	}

	#[test]
	fn permanent_code_is_respected() {
		let redirect = Redirect {
			src: "a.example.com".to_string(),
			dst: "b.example.com".to_string(),
			code: 308,
			..Default::default()
		};
		let resp = redirect.serve(&request("/"), "");
		assert_eq!(resp.status(), StatusCode::PERMANENT_REDIRECT);
	}

	#[test]
	fn non_get_has_no_body() {
		let redirect = Redirect {
			src: "a.example.com".to_string(),
			dst: "b.example.com".to_string(),
			code: 302,
			..Default::default()
		};
		let req = ::http::Request::builder()
			.method(Method::POST)
			.uri("https://a.example.com/")
			.body(Body::empty())
			.unwrap();
		let resp = redirect.serve(&req, "");
		assert_eq!(resp.status(), StatusCode::FOUND);
	}
}
