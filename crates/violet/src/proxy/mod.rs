pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use crate::http::{Body, Request, Response};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const KEEPALIVE: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const RESPONSE_HEADER_TIMEOUT: Duration = Duration::from_secs(10);

type HttpsClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
	#[error("upstream call failed: {0}")]
	Call(#[from] hyper_util::client::legacy::Error),
	#[error("timed out waiting for upstream response headers")]
	ResponseHeaders,
}

/// Outbound transports shared by every route: a verifying client, a
/// skip-verify client, and the websocket relay server. Both HTTP clients
/// are HTTP/2-capable and hold no idle connections, so a restarted backend
/// is observed on the next request instead of a stale keep-alive.
#[derive(Clone)]
pub struct HybridTransport {
	secure: HttpsClient,
	insecure: HttpsClient,
	ws: websocket::Server,
}

impl HybridTransport {
	pub fn new(ws: websocket::Server) -> anyhow::Result<HybridTransport> {
		Ok(HybridTransport {
			secure: build_client(secure_tls_config()?),
			insecure: build_client(insecure_tls_config()),
			ws,
		})
	}

	pub fn websocket(&self) -> &websocket::Server {
		&self.ws
	}

	/// Round trip with standard certificate verification.
	pub async fn secure_round_trip(&self, req: Request) -> Result<Response, TransportError> {
		round_trip(&self.secure, req).await
	}

	/// Round trip that accepts any upstream certificate.
	pub async fn insecure_round_trip(&self, req: Request) -> Result<Response, TransportError> {
		round_trip(&self.insecure, req).await
	}
}

async fn round_trip(client: &HttpsClient, req: Request) -> Result<Response, TransportError> {
	match tokio::time::timeout(RESPONSE_HEADER_TIMEOUT, client.request(req)).await {
		Ok(Ok(resp)) => Ok(resp.map(Body::new)),
		Ok(Err(err)) => Err(TransportError::Call(err)),
		Err(_) => Err(TransportError::ResponseHeaders),
	}
}

fn build_client(tls: rustls::ClientConfig) -> HttpsClient {
	let mut http = HttpConnector::new();
	http.enforce_http(false);
	http.set_connect_timeout(Some(CONNECT_TIMEOUT));
	http.set_keepalive(Some(KEEPALIVE));
	let connector = hyper_rustls::HttpsConnectorBuilder::new()
		.with_tls_config(tls)
		.https_or_http()
		.enable_http1()
		.enable_http2()
		.wrap_connector(http);
	Client::builder(TokioExecutor::new())
		.pool_max_idle_per_host(0)
		.pool_idle_timeout(IDLE_TIMEOUT)
		.pool_timer(TokioTimer::new())
		.timer(TokioTimer::new())
		.build(connector)
}

fn secure_tls_config() -> anyhow::Result<rustls::ClientConfig> {
	let mut roots = rustls::RootCertStore::empty();
	for cert in rustls_native_certs::load_native_certs().certs {
		// unusable platform certificates are not fatal
		let _ = roots.add(cert);
	}
	Ok(
		rustls::ClientConfig::builder()
			.with_root_certificates(roots)
			.with_no_client_auth(),
	)
}

fn insecure_tls_config() -> rustls::ClientConfig {
	rustls::ClientConfig::builder()
		.dangerous()
		.with_custom_certificate_verifier(Arc::new(insecure::NoVerifier))
		.with_no_client_auth()
}

mod insecure {
	use rustls::DigitallySignedStruct;
	use rustls::SignatureScheme;
	use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
	use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

	/// Accepts any server certificate. Only reachable through routes
	/// explicitly flagged to ignore upstream certificates.
	#[derive(Debug)]
	pub struct NoVerifier;

	impl ServerCertVerifier for NoVerifier {
		fn verify_server_cert(
			&self,
			_end_entity: &CertificateDer,
			_intermediates: &[CertificateDer],
			_server_name: &ServerName,
			_ocsp_response: &[u8],
			_now: UnixTime,
		) -> Result<ServerCertVerified, rustls::Error> {
			Ok(ServerCertVerified::assertion())
		}

		fn verify_tls12_signature(
			&self,
			_message: &[u8],
			_cert: &CertificateDer,
			_dss: &DigitallySignedStruct,
		) -> Result<HandshakeSignatureValid, rustls::Error> {
			Ok(HandshakeSignatureValid::assertion())
		}

		fn verify_tls13_signature(
			&self,
			_message: &[u8],
			_cert: &CertificateDer,
			_dss: &DigitallySignedStruct,
		) -> Result<HandshakeSignatureValid, rustls::Error> {
			Ok(HandshakeSignatureValid::assertion())
		}

		fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
			vec![
				SignatureScheme::RSA_PKCS1_SHA1,
				SignatureScheme::ECDSA_SHA1_Legacy,
				SignatureScheme::RSA_PKCS1_SHA256,
				SignatureScheme::ECDSA_NISTP256_SHA256,
				SignatureScheme::RSA_PKCS1_SHA384,
				SignatureScheme::ECDSA_NISTP384_SHA384,
				SignatureScheme::RSA_PKCS1_SHA512,
				SignatureScheme::ECDSA_NISTP521_SHA512,
				SignatureScheme::RSA_PSS_SHA256,
				SignatureScheme::RSA_PSS_SHA384,
				SignatureScheme::RSA_PSS_SHA512,
				SignatureScheme::ED25519,
				SignatureScheme::ED448,
			]
		}
	}
}
