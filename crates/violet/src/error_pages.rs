use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::http::{Body, Response, StatusCode, header};
use crate::rescheduler::Rescheduler;
use crate::Compilable;

/// Registry of custom error pages. The configured directory is scanned for
/// files named `<code>.html`; codes without a custom page fall back to a
/// plain-text reason phrase.
#[derive(Clone)]
pub struct ErrorPages {
	inner: Arc<Inner>,
	resched: Rescheduler,
}

struct Inner {
	dir: Option<PathBuf>,
	pages: RwLock<HashMap<u16, Bytes>>,
}

impl ErrorPages {
	pub fn new(dir: Option<PathBuf>) -> ErrorPages {
		let inner = Arc::new(Inner {
			dir,
			pages: RwLock::new(HashMap::new()),
		});
		let resched = {
			let inner = inner.clone();
			Rescheduler::new(move || {
				let inner = inner.clone();
				async move { Inner::rebuild(inner).await }
			})
		};
		ErrorPages { inner, resched }
	}

	/// Build the error response for `code`: the custom page when one is
	/// loaded, otherwise `"<code> <reason>\n"`.
	pub fn response(&self, code: StatusCode) -> Response {
		let pages = self.inner.pages.read();
		if let Some(page) = pages.get(&code.as_u16()) {
			return ::http::Response::builder()
				.status(code)
				.header(header::CONTENT_TYPE, "text/html; charset=utf-8")
				.body(Body::from(page.clone()))
				.expect("static response must build");
		}
		crate::http::status_response(code)
	}
}

impl Inner {
	async fn rebuild(inner: Arc<Inner>) {
		let Some(dir) = &inner.dir else {
			return;
		};
		let mut pages = HashMap::new();
		let mut entries = match tokio::fs::read_dir(dir).await {
			Ok(entries) => entries,
			Err(err) => {
				warn!("error page compile failed: reading {}: {err}", dir.display());
				return;
			},
		};
		while let Ok(Some(entry)) = entries.next_entry().await {
			let name = entry.file_name();
			let Some(name) = name.to_str() else { continue };
			let Some(code) = name.strip_suffix(".html").and_then(|c| c.parse::<u16>().ok()) else {
				continue;
			};
			if !(100..600).contains(&code) {
				continue;
			}
			match tokio::fs::read(entry.path()).await {
				Ok(body) => {
					pages.insert(code, Bytes::from(body));
				},
				Err(err) => {
					warn!("error page compile failed: reading {name}: {err}");
					return;
				},
			}
		}
		debug!(pages = pages.len(), "compiled error pages");
		*inner.pages.write() = pages;
	}
}

impl Compilable for ErrorPages {
	fn compile(&self) {
		self.resched.run();
	}
}
