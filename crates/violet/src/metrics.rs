use std::sync::Arc;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
	pub listener: &'static str,
	pub code: u64,
}

/// Request counters for the data-plane listeners, exported as Prometheus
/// text on the management API.
#[derive(Clone)]
pub struct Metrics {
	registry: Arc<Registry>,
	requests: Family<RequestLabels, Counter>,
}

impl Metrics {
	pub fn new() -> Metrics {
		let mut registry = Registry::with_prefix("violet");
		let requests = Family::<RequestLabels, Counter>::default();
		registry.register(
			"http_requests",
			"Requests served by listener and status code",
			requests.clone(),
		);
		Metrics {
			registry: Arc::new(registry),
			requests,
		}
	}

	pub fn observe(&self, listener: &'static str, code: u16) {
		self
			.requests
			.get_or_create(&RequestLabels {
				listener,
				code: code as u64,
			})
			.inc();
	}

	pub fn encode_text(&self) -> String {
		let mut out = String::new();
		// encoding into a string cannot fail
		let _ = encode(&mut out, &self.registry);
		out
	}
}

impl Default for Metrics {
	fn default() -> Self {
		Metrics::new()
	}
}
