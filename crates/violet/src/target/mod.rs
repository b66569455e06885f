mod redirect;
mod route;

use serde::{Deserialize, Serialize};

pub use route::RouteContext;

use crate::flags::Flags;
use crate::http::HeaderMap;
use crate::paths;

fn default_active() -> bool {
	true
}

/// A proxied route: requests matching `src` are forwarded to the backend
/// at `dst`, subject to the behaviour [`Flags`]. `headers` is a static
/// overlay applied to every outbound request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Route {
	pub src: String,
	pub dst: String,
	#[serde(default)]
	pub desc: String,
	#[serde(default)]
	pub flags: Flags,
	#[serde(default = "default_active")]
	pub active: bool,
	#[serde(skip)]
	pub headers: HeaderMap,
}

/// An HTTP redirect: requests matching `src` are answered with a
/// `code` redirect to `dst`. A zero code means 302.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Redirect {
	pub src: String,
	pub dst: String,
	#[serde(default)]
	pub desc: String,
	#[serde(default)]
	pub flags: Flags,
	#[serde(default)]
	pub code: u16,
	#[serde(default = "default_active")]
	pub active: bool,
}

/// Compose the outbound path from the destination path and the request
/// path remainder left after the router trimmed the matched prefix.
///
/// With ABS the destination path stands alone; otherwise the remainder is
/// appended, and a trailing slash on the remainder survives the join.
pub(crate) fn effective_path(dst_path: &str, remainder: &str, abs: bool) -> String {
	let mut p = if abs {
		paths::clean(dst_path)
	} else {
		paths::join(dst_path, remainder)
	};
	if !abs && remainder.ends_with('/') && !p.ends_with('/') {
		p.push('/');
	}
	if p.is_empty() || p == "." {
		p = "/".to_string();
	}
	p
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn effective_path_appends_remainder() {
		assert_eq!(effective_path("/", "/world", false), "/world");
		assert_eq!(effective_path("/", "", false), "/");
		assert_eq!(effective_path("/base", "/x", false), "/base/x");
	}

	#[test]
	fn effective_path_preserves_trailing_slash() {
		assert_eq!(effective_path("/", "x/", false), "/x/");
		assert_eq!(effective_path("/", "/x", false), "/x");
	}

	#[test]
	fn effective_path_abs_ignores_remainder() {
		assert_eq!(effective_path("/world", "/hello", true), "/world");
		assert_eq!(effective_path("/", "/hello", true), "/");
	}
}
