use std::sync::Arc;

use arc_swap::ArcSwap;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use super::{Found, Router};
use crate::fqdn;
use crate::http::{ClientAddr, Request, Response, request_host};
use crate::proxy::HybridTransport;
use crate::rescheduler::Rescheduler;
use crate::target::{Redirect, Route, RouteContext};
use crate::{Compilable, database};

/// Database-backed wrapper around [`Router`] that rebuilds the snapshot on
/// demand. The serving hot path clones the current snapshot pointer and
/// never blocks on a reload; `compile` builds the replacement off to the
/// side and installs it with one atomic swap.
#[derive(Clone)]
pub struct Manager {
	inner: Arc<Inner>,
	resched: Rescheduler,
}

struct Inner {
	db: SqlitePool,
	transport: HybridTransport,
	router: ArcSwap<Router>,
}

impl Manager {
	pub fn new(db: SqlitePool, transport: HybridTransport) -> Manager {
		let inner = Arc::new(Inner {
			db,
			transport,
			router: ArcSwap::from_pointee(Router::new()),
		});
		let resched = {
			let inner = inner.clone();
			Rescheduler::new(move || {
				let inner = inner.clone();
				async move { Inner::rebuild(inner).await }
			})
		};
		Manager { inner, resched }
	}

	/// The current routing snapshot. Requests already dispatched keep the
	/// snapshot they started with.
	pub fn snapshot(&self) -> Arc<Router> {
		self.inner.router.load_full()
	}

	/// Dispatch a request against the current snapshot. `None` means no
	/// route nor redirect matched.
	pub async fn serve(&self, req: Request) -> Option<Response> {
		let snapshot = self.snapshot();
		let host = request_host(&req)?.to_string();
		let path = match req.uri().path() {
			"" => "/".to_string(),
			p => p.to_string(),
		};
		match snapshot.find(&host, &path)? {
			Found::Redirect(redirect, remainder) => Some(redirect.serve(&req, &remainder)),
			Found::Route(route, remainder) => {
				let client_addr = req.extensions().get::<ClientAddr>().map(|c| c.0);
				let ctx = RouteContext {
					transport: &self.inner.transport,
					client_addr,
				};
				Some(route.serve(req, &remainder, ctx).await)
			},
		}
	}

	pub async fn get_routes(&self, owned_domains: &[String]) -> sqlx::Result<Vec<Route>> {
		let routes = database::all_routes(&self.inner.db).await?;
		Ok(
			routes
				.into_iter()
				.filter(|r| source_is_owned(&r.src, owned_domains))
				.collect(),
		)
	}

	pub async fn insert_route(&self, route: &Route) -> sqlx::Result<()> {
		database::insert_route(&self.inner.db, route).await
	}

	pub async fn delete_route(&self, source: &str) -> sqlx::Result<()> {
		database::delete_route(&self.inner.db, source).await
	}

	pub async fn get_redirects(&self, owned_domains: &[String]) -> sqlx::Result<Vec<Redirect>> {
		let redirects = database::all_redirects(&self.inner.db).await?;
		Ok(
			redirects
				.into_iter()
				.filter(|r| source_is_owned(&r.src, owned_domains))
				.collect(),
		)
	}

	pub async fn insert_redirect(&self, redirect: &Redirect) -> sqlx::Result<()> {
		database::insert_redirect(&self.inner.db, redirect).await
	}

	pub async fn delete_redirect(&self, source: &str) -> sqlx::Result<()> {
		database::delete_redirect(&self.inner.db, source).await
	}
}

fn source_is_owned(source: &str, owned_domains: &[String]) -> bool {
	let (host, _) = fqdn::split_host_path(source);
	fqdn::top_fqdn(host)
		.map(|top| owned_domains.iter().any(|d| d == top))
		.unwrap_or(false)
}

impl Inner {
	async fn rebuild(inner: Arc<Inner>) {
		let routes = match database::active_routes(&inner.db).await {
			Ok(routes) => routes,
			Err(err) => {
				warn!("router compile failed: loading routes: {err}");
				return;
			},
		};
		let redirects = match database::active_redirects(&inner.db).await {
			Ok(redirects) => redirects,
			Err(err) => {
				warn!("router compile failed: loading redirects: {err}");
				return;
			},
		};
		let mut router = Router::new();
		for route in routes {
			router.add_route(route);
		}
		for redirect in redirects {
			router.add_redirect(redirect);
		}
		debug!("compiled routing tables from database");
		inner.router.store(Arc::new(router));
	}
}

impl Compilable for Manager {
	fn compile(&self) {
		self.resched.run();
	}
}
