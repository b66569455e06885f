pub mod api;
pub mod http;
pub mod https;

use sqlx::SqlitePool;

use crate::MultiCompilable;
use crate::acme::AcmeChallenges;
use crate::certs::Certs;
use crate::domains::Domains;
use crate::error_pages::ErrorPages;
use crate::favicons::Favicons;
use crate::metrics::Metrics;
use crate::router::Manager;

/// Shared configuration and state for the API, HTTP and HTTPS servers.
#[derive(Clone)]
pub struct Conf {
	/// Requests per client IP per minute on the HTTPS listener.
	pub rate_limit: u64,
	/// Public port of the HTTPS listener, for HTTP→HTTPS rewrites.
	pub https_port: u16,
	pub db: SqlitePool,
	pub domains: Domains,
	pub acme: AcmeChallenges,
	pub certs: Certs,
	pub favicons: Favicons,
	pub error_pages: ErrorPages,
	pub router: Manager,
	pub metrics: Metrics,
	pub verifier: api::auth::Verifier,
	pub compilables: MultiCompilable,
}
