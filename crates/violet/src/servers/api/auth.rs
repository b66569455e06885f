use std::path::Path;

use headers::HeaderMapExt;
use headers::authorization::{Authorization, Bearer};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

use super::ApiError;
use crate::http::HeaderMap;

const OWNS_PREFIX: &str = "domain:owns=";

/// Verifies management-API bearer tokens against the signer's public key.
#[derive(Clone)]
pub struct Verifier {
	key: DecodingKey,
	validation: Validation,
}

/// The claims a management token carries: standard registered claims plus
/// the permission list.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
	#[serde(default)]
	pub sub: Option<String>,
	#[serde(default)]
	pub perms: Vec<String>,
}

impl Verifier {
	pub fn from_rsa_pem(pem: &[u8]) -> Result<Verifier, jsonwebtoken::errors::Error> {
		let key = DecodingKey::from_rsa_pem(pem)?;
		let mut validation = Validation::new(Algorithm::RS256);
		validation.algorithms = vec![Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];
		validation.validate_aud = false;
		Ok(Verifier { key, validation })
	}

	pub fn from_pem_file(path: &Path) -> anyhow::Result<Verifier> {
		let pem = std::fs::read(path)?;
		Ok(Verifier::from_rsa_pem(&pem)?)
	}

	#[cfg(test)]
	pub(crate) fn new_hmac(secret: &[u8]) -> Verifier {
		let mut validation = Validation::new(Algorithm::HS256);
		validation.validate_aud = false;
		Verifier {
			key: DecodingKey::from_secret(secret),
			validation,
		}
	}

	pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
		decode::<Claims>(token, &self.key, &self.validation).map(|data| data.claims)
	}
}

impl Claims {
	pub fn has_perm(&self, perm: &str) -> bool {
		self.perms.iter().any(|p| p == perm)
	}

	/// The top-level domains this token may modify, from its
	/// `domain:owns=<fqdn>` entries.
	pub fn owned_domains(&self) -> Vec<String> {
		self
			.perms
			.iter()
			.filter_map(|p| p.strip_prefix(OWNS_PREFIX))
			.map(|d| d.to_string())
			.collect()
	}
}

fn bearer(headers: &HeaderMap) -> Option<Authorization<Bearer>> {
	headers.typed_get::<Authorization<Bearer>>()
}

/// Validate the bearer token and require one permission, the gate in
/// front of every management endpoint.
pub fn authorize(
	verifier: &Verifier,
	headers: &HeaderMap,
	perm: &str,
) -> Result<Claims, ApiError> {
	let Some(auth) = bearer(headers) else {
		return Err(ApiError::forbidden("Missing bearer token"));
	};
	let claims = verifier
		.verify(auth.token())
		.map_err(|_| ApiError::forbidden("Invalid token"))?;
	if !claims.has_perm(perm) {
		return Err(ApiError::forbidden("No permission"));
	}
	Ok(claims)
}

#[cfg(test)]
pub(crate) fn test_token(secret: &[u8], perms: &[&str]) -> String {
	let claims = serde_json::json!({
		"sub": "violet-test",
		"perms": perms,
		"exp": 4102444800i64,
	});
	jsonwebtoken::encode(
		&jsonwebtoken::Header::new(Algorithm::HS256),
		&claims,
		&jsonwebtoken::EncodingKey::from_secret(secret),
	)
	.unwrap()
}
