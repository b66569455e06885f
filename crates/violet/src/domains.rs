use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::rescheduler::Rescheduler;
use crate::{Compilable, database, fqdn};

/// The set of FQDNs this proxy is allowed to serve. Lookups walk the
/// parent labels so activating `example.com` also admits every
/// subdomain.
#[derive(Clone)]
pub struct Domains {
	inner: Arc<Inner>,
	resched: Rescheduler,
}

struct Inner {
	db: SqlitePool,
	set: RwLock<HashSet<String>>,
}

impl Domains {
	pub fn new(db: SqlitePool) -> Domains {
		let inner = Arc::new(Inner {
			db,
			set: RwLock::new(HashSet::new()),
		});
		let resched = {
			let inner = inner.clone();
			Rescheduler::new(move || {
				let inner = inner.clone();
				async move { Inner::rebuild(inner).await }
			})
		};
		Domains { inner, resched }
	}

	/// Whether the host (optionally `host:port`) or any parent domain of
	/// it is active.
	pub fn is_valid(&self, host: &str) -> bool {
		let domain = fqdn::domain_without_port(host);
		if domain.is_empty() {
			return false;
		}
		let set = self.inner.set.read();
		let labels: Vec<&str> = domain.split('.').collect();
		for i in 0..labels.len() {
			if set.contains(&labels[i..].join(".")) {
				return true;
			}
		}
		false
	}

	/// Upsert the domain row. The caller triggers `compile` to refresh the
	/// serving snapshot.
	pub async fn put(&self, domain: &str, active: bool) -> sqlx::Result<()> {
		database::upsert_domain(&self.inner.db, domain, active).await
	}

	#[cfg(test)]
	pub(crate) fn put_in_memory(&self, domain: &str) {
		self.inner.set.write().insert(domain.to_string());
	}
}

impl Inner {
	async fn rebuild(inner: Arc<Inner>) {
		match database::active_domains(&inner.db).await {
			Ok(set) => {
				debug!(domains = set.len(), "compiled domain whitelist");
				*inner.set.write() = set;
			},
			Err(err) => warn!("domain compile failed: {err}"),
		}
	}
}

impl Compilable for Domains {
	fn compile(&self) {
		self.resched.run();
	}
}
