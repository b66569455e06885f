use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
use rustls::sign::CertifiedKey;
use rustls_pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::rescheduler::Rescheduler;
use crate::{Compilable, fqdn};

const REFRESH_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// Certificate store backing the SNI callback of the HTTPS listener.
///
/// Filesystem mode pairs every `<name>.cert.pem` in the cert directory
/// with `<name>.key.pem` from the key directory and indexes the leaf under
/// each of its DNS SANs. Self-signed mode holds an in-memory CA instead
/// and mints (and caches) a leaf per requested domain.
#[derive(Clone)]
pub struct Certs {
	inner: Arc<Inner>,
	resched: Option<Rescheduler>,
}

struct Inner {
	cert_dir: PathBuf,
	key_dir: PathBuf,
	self_signed: Option<SelfSigned>,
	map: RwLock<HashMap<String, Arc<CertifiedKey>>>,
	refresh: Mutex<Option<JoinHandle<()>>>,
}

struct SelfSigned {
	ca_cert: rcgen::Certificate,
	ca_key: KeyPair,
	serial: AtomicU64,
}

impl Certs {
	pub fn new(cert_dir: PathBuf, key_dir: PathBuf, self_signed: bool) -> anyhow::Result<Certs> {
		let self_signed = if self_signed {
			Some(SelfSigned::new().context("generating self-signed CA")?)
		} else {
			None
		};
		let filesystem = self_signed.is_none();
		let inner = Arc::new(Inner {
			cert_dir,
			key_dir,
			self_signed,
			map: RwLock::new(HashMap::new()),
			refresh: Mutex::new(None),
		});
		// the rescheduler never fires in self-signed mode
		let resched = filesystem.then(|| {
			let inner = inner.clone();
			Rescheduler::new(move || {
				let inner = inner.clone();
				async move { Inner::rebuild(inner).await }
			})
		});
		Ok(Certs { inner, resched })
	}

	/// Find a leaf for the SNI name: exact match, then a self-signed mint
	/// when enabled, then the `*.parent` wildcard entry.
	pub fn get_cert_for_domain(&self, domain: &str) -> Option<Arc<CertifiedKey>> {
		{
			let map = self.inner.map.read();
			if let Some(cert) = map.get(domain) {
				return Some(cert.clone());
			}
		}

		if let Some(ss) = &self.inner.self_signed {
			let mut map = self.inner.map.write();
			if let Some(cert) = map.get(domain) {
				return Some(cert.clone());
			}
			return match ss.mint(domain) {
				Ok(cert) => {
					let cert = Arc::new(cert);
					map.insert(domain.to_string(), cert.clone());
					Some(cert)
				},
				Err(err) => {
					warn!("minting self-signed leaf for {domain}: {err}");
					None
				},
			};
		}

		if let Some(wildcard) = fqdn::replace_subdomain_with_wildcard(domain) {
			let map = self.inner.map.read();
			if let Some(cert) = map.get(&wildcard) {
				return Some(cert.clone());
			}
		}
		None
	}

	/// Kick off the periodic recompile. Certificates renewed on disk are
	/// picked up without an explicit API call.
	pub fn start_refresh(&self) {
		if self.resched.is_none() {
			return;
		}
		let this = self.clone();
		let handle = tokio::spawn(async move {
			let mut interval = tokio::time::interval(REFRESH_INTERVAL);
			interval.tick().await;
			loop {
				interval.tick().await;
				this.compile();
			}
		});
		*self.inner.refresh.lock() = Some(handle);
	}

	pub fn stop(&self) {
		if let Some(handle) = self.inner.refresh.lock().take() {
			handle.abort();
		}
	}
}

impl Inner {
	async fn rebuild(inner: Arc<Inner>) {
		match Inner::load(&inner.cert_dir, &inner.key_dir).await {
			Ok(map) => {
				debug!(certs = map.len(), "compiled certificate lookup table");
				*inner.map.write() = map;
			},
			// keep serving the previous snapshot
			Err(err) => warn!("certificate compile failed: {err}"),
		}
	}

	async fn load(cert_dir: &Path, key_dir: &Path) -> anyhow::Result<HashMap<String, Arc<CertifiedKey>>> {
		let mut map = HashMap::new();
		let mut entries = tokio::fs::read_dir(cert_dir)
			.await
			.with_context(|| format!("reading cert dir {}", cert_dir.display()))?;
		while let Some(entry) = entries.next_entry().await? {
			if entry.file_type().await?.is_dir() {
				continue;
			}
			let name = entry.file_name();
			let Some(name) = name.to_str() else { continue };
			let Some(stem) = name.strip_suffix(".cert.pem") else {
				continue;
			};
			let key_path = key_dir.join(format!("{stem}.key.pem"));
			let key_pem = match tokio::fs::read(&key_path).await {
				Ok(data) => data,
				// a cert without its key is not servable yet; leave it out
				Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
				Err(err) => return Err(err).with_context(|| format!("reading {}", key_path.display())),
			};
			let cert_pem = tokio::fs::read(entry.path())
				.await
				.with_context(|| format!("reading {name}"))?;
			let (sans, cert) =
				load_certified(&cert_pem, &key_pem).with_context(|| format!("loading {name}"))?;
			for san in sans {
				map.insert(san, cert.clone());
			}
		}
		Ok(map)
	}
}

/// Parse a PEM cert chain + key pair and list the DNS SANs the leaf should
/// be indexed under.
fn load_certified(cert_pem: &[u8], key_pem: &[u8]) -> anyhow::Result<(Vec<String>, Arc<CertifiedKey>)> {
	let chain = rustls_pemfile::certs(&mut &cert_pem[..])
		.collect::<Result<Vec<_>, _>>()
		.context("parsing certificate pem")?;
	anyhow::ensure!(!chain.is_empty(), "no certificates in pem");
	let key = rustls_pemfile::private_key(&mut &key_pem[..])
		.context("parsing key pem")?
		.context("no private key in pem")?;
	let signing = rustls::crypto::ring::sign::any_supported_type(&key)
		.map_err(|err| anyhow::anyhow!("unsupported private key: {err}"))?;

	let (_, parsed) = x509_parser::parse_x509_certificate(chain[0].as_ref())
		.map_err(|err| anyhow::anyhow!("parsing leaf certificate: {err}"))?;
	let mut sans = Vec::new();
	if let Ok(Some(ext)) = parsed.subject_alternative_name() {
		for name in &ext.value.general_names {
			if let x509_parser::extensions::GeneralName::DNSName(dns) = name {
				sans.push(dns.to_string());
			}
		}
	}
	Ok((sans, Arc::new(CertifiedKey::new(chain, signing))))
}

impl SelfSigned {
	fn new() -> anyhow::Result<SelfSigned> {
		let ca_key = KeyPair::generate()?;
		let mut params = CertificateParams::default();
		params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
		let mut dn = DistinguishedName::new();
		dn.push(DnType::OrganizationName, "Violet");
		dn.push(DnType::CommonName, "violet development ca");
		params.distinguished_name = dn;
		let ca_cert = params.self_signed(&ca_key)?;
		Ok(SelfSigned {
			ca_cert,
			ca_key,
			serial: AtomicU64::new(0),
		})
	}

	fn mint(&self, domain: &str) -> anyhow::Result<CertifiedKey> {
		let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
		let key = KeyPair::generate()?;
		let mut params = CertificateParams::new(vec![domain.to_string()])?;
		let mut dn = DistinguishedName::new();
		dn.push(DnType::OrganizationName, domain);
		dn.push(DnType::CommonName, domain);
		params.distinguished_name = dn;
		params.serial_number = Some(rcgen::SerialNumber::from(serial));
		let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key)?;
		let key_der = PrivatePkcs8KeyDer::from(key.serialize_der());
		let signing = rustls::crypto::ring::sign::any_supported_type(&PrivateKeyDer::Pkcs8(key_der))
			.map_err(|err| anyhow::anyhow!("unsupported generated key: {err}"))?;
		Ok(CertifiedKey::new(vec![cert.der().clone()], signing))
	}
}

impl Compilable for Certs {
	fn compile(&self) {
		if let Some(resched) = &self.resched {
			resched.run();
		}
	}
}
