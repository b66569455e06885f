use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// In-memory store for ACME HTTP-01 key authorisations, keyed by
/// `(domain, token)`. Values are written verbatim by the HTTP listener.
#[derive(Clone, Default)]
pub struct AcmeChallenges {
	inner: Arc<RwLock<HashMap<String, HashMap<String, String>>>>,
}

impl AcmeChallenges {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, domain: &str, key: &str) -> Option<String> {
		let map = self.inner.read();
		map.get(domain).and_then(|m| m.get(key)).cloned()
	}

	pub fn put(&self, domain: &str, key: &str, value: &str) {
		let mut map = self.inner.write();
		map
			.entry(domain.to_string())
			.or_default()
			.insert(key.to_string(), value.to_string());
	}

	pub fn delete(&self, domain: &str, key: &str) {
		let mut map = self.inner.write();
		if let Some(m) = map.get_mut(domain) {
			m.remove(key);
			if m.is_empty() {
				map.remove(domain);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn put_get_delete() {
		let acme = AcmeChallenges::new();
		assert_eq!(acme.get("example.com", "123"), None);

		acme.put("example.com", "123", "123abc");
		assert_eq!(acme.get("example.com", "123").as_deref(), Some("123abc"));
		assert_eq!(acme.get("example.com", "456"), None);
		assert_eq!(acme.get("other.com", "123"), None);

		acme.delete("example.com", "123");
		assert_eq!(acme.get("example.com", "123"), None);
	}

	#[test]
	fn put_overwrites() {
		let acme = AcmeChallenges::new();
		acme.put("example.com", "k", "a");
		acme.put("example.com", "k", "b");
		assert_eq!(acme.get("example.com", "k").as_deref(), Some("b"));
	}
}
