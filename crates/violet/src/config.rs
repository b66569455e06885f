use std::path::{Path, PathBuf};

use serde::Deserialize;

fn default_rate_limit() -> u64 {
	300
}

/// Startup configuration, loaded from a JSON file. The signer public key
/// (`signer.public.pem`) and the database (`violet.db.sqlite`) live next
/// to the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct StartupConfig {
	#[serde(default)]
	pub self_signed: bool,
	#[serde(default)]
	pub error_page_path: Option<PathBuf>,
	pub listen: Listen,
	/// External SVG converter used by the favicon pipeline.
	#[serde(default)]
	pub inkscape: Option<PathBuf>,
	/// Requests per client IP per minute on the HTTPS listener.
	#[serde(default = "default_rate_limit")]
	pub rate_limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Listen {
	#[serde(default)]
	pub api: Option<String>,
	#[serde(default)]
	pub http: Option<String>,
	#[serde(default)]
	pub https: Option<String>,
}

impl StartupConfig {
	pub fn load(path: &Path) -> anyhow::Result<StartupConfig> {
		let contents = std::fs::read_to_string(path)?;
		Ok(serde_json::from_str(&contents)?)
	}

	/// The public port of the HTTPS listener, used when the HTTP listener
	/// rewrites URLs toward HTTPS.
	pub fn https_port(&self) -> u16 {
		self
			.listen
			.https
			.as_deref()
			.and_then(|addr| addr.rsplit_once(':'))
			.and_then(|(_, port)| port.parse().ok())
			.unwrap_or(443)
	}
}
