//! Host, port and FQDN helpers shared by the routers, the certificate
//! store and the management API.

/// Split a `host[/path]` source or destination string. A missing path is
/// treated as `/`.
pub fn split_host_path(s: &str) -> (&str, &str) {
	match s.find('/') {
		Some(idx) => (&s[..idx], &s[idx..]),
		None => (s, "/"),
	}
}

/// Split a `host[:port]` string, falling back to the given default port
/// when no port is present or it fails to parse.
pub fn split_domain_port(host: &str, default_port: u16) -> (&str, u16) {
	match host.rsplit_once(':') {
		Some((domain, port)) => (domain, port.parse().unwrap_or(default_port)),
		None => (host, default_port),
	}
}

/// Strip the `:port` suffix when one is present.
///
/// `example.com:443` => `example.com`
pub fn domain_without_port(host: &str) -> &str {
	match host.rfind(':') {
		Some(idx) => &host[..idx],
		None => host,
	}
}

/// Replace the first label with a wildcard. Returns `None` for hosts
/// without a dot.
///
/// `www.example.com` => `*.example.com`
pub fn replace_subdomain_with_wildcard(domain: &str) -> Option<String> {
	domain.find('.').map(|idx| format!("*{}", &domain[idx..]))
}

/// Strip the first label off the domain. Returns `None` for hosts without
/// a dot.
///
/// `www.example.com` => `example.com`
pub fn parent_domain(domain: &str) -> Option<&str> {
	domain.find('.').map(|idx| &domain[idx + 1..])
}

/// The top two labels of the domain, the grouping key for ownership
/// claims. Returns `None` when fewer than two labels are present.
///
/// `hello.world.example.com` => `example.com`
pub fn top_fqdn(domain: &str) -> Option<&str> {
	let mut labels = domain.rsplitn(3, '.');
	let tld = labels.next()?;
	let second = labels.next()?;
	if tld.is_empty() || second.is_empty() {
		return None;
	}
	let start = domain.len() - tld.len() - second.len() - 1;
	Some(&domain[start..])
}
