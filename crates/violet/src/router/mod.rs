mod manager;

pub use manager::Manager;

use std::collections::HashMap;

use crate::flags::Flags;
use crate::fqdn;
use crate::target::{Redirect, Route};
use crate::trie::Trie;

/// One immutable routing snapshot: per-host path tries for redirects and
/// routes. Snapshots are built off the hot path and installed atomically
/// by the [`Manager`].
#[derive(Default)]
pub struct Router {
	route: HashMap<String, Trie<Route>>,
	redirect: HashMap<String, Trie<Redirect>>,
}

/// A dispatch decision: the matched target plus the request path left
/// after trimming the matched source prefix.
pub enum Found<'a> {
	Route(&'a Route, String),
	Redirect(&'a Redirect, String),
}

impl Router {
	pub fn new() -> Router {
		Router::default()
	}

	pub fn add_route(&mut self, mut route: Route) {
		route.flags = route.flags.normalise_route();
		let (host, path) = fqdn::split_host_path(&route.src);
		let (host, path) = (host.to_ascii_lowercase(), path.to_string());
		self.route.entry(host).or_default().put(&path, route);
	}

	pub fn add_redirect(&mut self, mut redirect: Redirect) {
		redirect.flags = redirect.flags.normalise_redirect();
		let (host, path) = fqdn::split_host_path(&redirect.src);
		let (host, path) = (host.to_ascii_lowercase(), path.to_string());
		self.redirect.entry(host).or_default().put(&path, redirect);
	}

	/// Locate the best target for `(host, path)`: the literal host first,
	/// then the `*.parent` wildcard, trying the redirect table before the
	/// route table at each host key.
	pub fn find(&self, host: &str, path: &str) -> Option<Found<'_>> {
		let host = fqdn::domain_without_port(host).to_ascii_lowercase();
		if let Some(found) = self.find_host(&host, path) {
			return Some(found);
		}
		if let Some(wildcard) = fqdn::replace_subdomain_with_wildcard(&host) {
			return self.find_host(&wildcard, path);
		}
		None
	}

	fn find_host(&self, host: &str, path: &str) -> Option<Found<'_>> {
		if let Some(trie) = self.redirect.get(host)
			&& let Some((key, redirect)) = match_target(trie, path, |r| r.flags.has(Flags::PRE))
		{
			return Some(Found::Redirect(redirect, trim_prefix(path, key)));
		}
		if let Some(trie) = self.route.get(host)
			&& let Some((key, route)) = match_target(trie, path, |r| r.flags.has(Flags::PRE))
		{
			return Some(Found::Route(route, trim_prefix(path, key)));
		}
		None
	}
}

/// Longest prefix wins; a key without the prefix flag only matches the
/// path exactly.
fn match_target<'a, T>(
	trie: &'a Trie<T>,
	path: &str,
	is_prefix: impl Fn(&T) -> bool,
) -> Option<(&'a str, &'a T)> {
	let pairs = trie.get_all_key_values(path);
	for (key, value) in pairs.into_iter().rev() {
		if is_prefix(value) || key == path {
			return Some((key, value));
		}
	}
	None
}

fn trim_prefix(path: &str, key: &str) -> String {
	path.strip_prefix(key).unwrap_or(path).to_string()
}
