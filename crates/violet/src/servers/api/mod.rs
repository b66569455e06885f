pub mod auth;

use std::net::IpAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use self::auth::{Claims, authorize};
use super::Conf;
use crate::Compilable;
use crate::fqdn;
use crate::http::{HeaderMap, Method, StatusCode, header};
use crate::target::{Redirect, Route};

/// JSON error envelope every management endpoint uses.
#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	message: String,
}

impl ApiError {
	fn new(status: StatusCode, message: impl Into<String>) -> ApiError {
		ApiError {
			status,
			message: message.into(),
		}
	}

	pub fn forbidden(message: impl Into<String>) -> ApiError {
		ApiError::new(StatusCode::FORBIDDEN, message)
	}

	pub fn bad_request(message: impl Into<String>) -> ApiError {
		ApiError::new(StatusCode::BAD_REQUEST, message)
	}

	pub fn internal(message: impl Into<String>) -> ApiError {
		ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, message)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		(
			self.status,
			Json(serde_json::json!({ "error": self.message })),
		)
			.into_response()
	}
}

type ApiResult = Result<Response, ApiError>;

/// Serve the management API.
pub async fn run(
	conf: Arc<Conf>,
	listen: String,
	mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
	let listener = TcpListener::bind(&listen).await?;
	info!("[API] starting server on {listen}");
	axum::serve(listener, router(conf))
		.with_graceful_shutdown(async move {
			let _ = shutdown.changed().await;
		})
		.await?;
	Ok(())
}

pub fn router(conf: Arc<Conf>) -> axum::Router {
	axum::Router::new()
		.route("/compile", post(compile))
		.route("/domain/{domain}", put(domain_manage).delete(domain_manage))
		.route(
			"/route",
			get(route_list).post(route_insert).delete(route_delete),
		)
		.route(
			"/redirect",
			get(redirect_list).post(redirect_insert).delete(redirect_delete),
		)
		.route("/acme-challenge/{domain}/{key}/{value}", put(acme_put))
		.route(
			"/acme-challenge/{domain}/{key}",
			axum::routing::delete(acme_delete),
		)
		.route("/metrics", get(metrics))
		.with_state(conf)
}

/// Reload every compilable component from persistent storage.
async fn compile(State(conf): State<Arc<Conf>>, headers: HeaderMap) -> ApiResult {
	authorize(&conf.verifier, &headers, "violet:compile")?;
	conf.compilables.compile();
	Ok(StatusCode::ACCEPTED.into_response())
}

/// PUT activates the domain, DELETE deactivates it.
async fn domain_manage(
	State(conf): State<Arc<Conf>>,
	Path(domain): Path<String>,
	method: Method,
	headers: HeaderMap,
) -> ApiResult {
	authorize(&conf.verifier, &headers, "violet:domains")?;
	conf
		.domains
		.put(&domain, method == Method::PUT)
		.await
		.map_err(|err| {
			warn!("updating domain {domain}: {err}");
			ApiError::internal("Failed to update domain")
		})?;
	conf.domains.compile();
	Ok(StatusCode::ACCEPTED.into_response())
}

async fn route_list(State(conf): State<Arc<Conf>>, headers: HeaderMap) -> ApiResult {
	let claims = authorize(&conf.verifier, &headers, "violet:route")?;
	let routes = conf
		.router
		.get_routes(&claims.owned_domains())
		.await
		.map_err(|err| {
			warn!("listing routes: {err}");
			ApiError::internal("Failed to get routes from database")
		})?;
	Ok((StatusCode::OK, Json(routes)).into_response())
}

async fn route_insert(
	State(conf): State<Arc<Conf>>,
	headers: HeaderMap,
	body: Result<Json<Route>, JsonRejection>,
) -> ApiResult {
	let claims = authorize(&conf.verifier, &headers, "violet:route")?;
	let Ok(Json(route)) = body else {
		return Err(ApiError::bad_request("Invalid request body"));
	};
	validate_source_ownership(&route.src, &claims)?;
	conf.router.insert_route(&route).await.map_err(|err| {
		warn!("inserting route {}: {err}", route.src);
		ApiError::internal("Failed to insert route into database")
	})?;
	conf.router.compile();
	Ok((StatusCode::OK, Json(route)).into_response())
}

async fn route_delete(
	State(conf): State<Arc<Conf>>,
	headers: HeaderMap,
	body: Result<Json<SourceOnly>, JsonRejection>,
) -> ApiResult {
	let claims = authorize(&conf.verifier, &headers, "violet:route")?;
	let Ok(Json(source)) = body else {
		return Err(ApiError::bad_request("Invalid request body"));
	};
	validate_source_ownership(&source.src, &claims)?;
	conf.router.delete_route(&source.src).await.map_err(|err| {
		warn!("deleting route {}: {err}", source.src);
		ApiError::internal("Failed to delete route from database")
	})?;
	conf.router.compile();
	Ok(StatusCode::OK.into_response())
}

async fn redirect_list(State(conf): State<Arc<Conf>>, headers: HeaderMap) -> ApiResult {
	let claims = authorize(&conf.verifier, &headers, "violet:redirect")?;
	let redirects = conf
		.router
		.get_redirects(&claims.owned_domains())
		.await
		.map_err(|err| {
			warn!("listing redirects: {err}");
			ApiError::internal("Failed to get redirects from database")
		})?;
	Ok((StatusCode::OK, Json(redirects)).into_response())
}

async fn redirect_insert(
	State(conf): State<Arc<Conf>>,
	headers: HeaderMap,
	body: Result<Json<Redirect>, JsonRejection>,
) -> ApiResult {
	let claims = authorize(&conf.verifier, &headers, "violet:redirect")?;
	let Ok(Json(redirect)) = body else {
		return Err(ApiError::bad_request("Invalid request body"));
	};
	validate_source_ownership(&redirect.src, &claims)?;
	if redirect.code != 0 && !(300..400).contains(&redirect.code) {
		return Err(ApiError::bad_request("Invalid redirect code"));
	}
	conf.router.insert_redirect(&redirect).await.map_err(|err| {
		warn!("inserting redirect {}: {err}", redirect.src);
		ApiError::internal("Failed to insert redirect into database")
	})?;
	conf.router.compile();
	Ok((StatusCode::OK, Json(redirect)).into_response())
}

async fn redirect_delete(
	State(conf): State<Arc<Conf>>,
	headers: HeaderMap,
	body: Result<Json<SourceOnly>, JsonRejection>,
) -> ApiResult {
	let claims = authorize(&conf.verifier, &headers, "violet:redirect")?;
	let Ok(Json(source)) = body else {
		return Err(ApiError::bad_request("Invalid request body"));
	};
	validate_source_ownership(&source.src, &claims)?;
	conf
		.router
		.delete_redirect(&source.src)
		.await
		.map_err(|err| {
			warn!("deleting redirect {}: {err}", source.src);
			ApiError::internal("Failed to delete redirect from database")
		})?;
	conf.router.compile();
	Ok(StatusCode::OK.into_response())
}

async fn acme_put(
	State(conf): State<Arc<Conf>>,
	Path((domain, key, value)): Path<(String, String, String)>,
	headers: HeaderMap,
) -> ApiResult {
	authorize(&conf.verifier, &headers, "violet:acme-challenge")?;
	if !conf.domains.is_valid(&domain) {
		return Err(ApiError::bad_request("Invalid ACME challenge domain"));
	}
	conf.acme.put(&domain, &key, &value);
	Ok(StatusCode::ACCEPTED.into_response())
}

async fn acme_delete(
	State(conf): State<Arc<Conf>>,
	Path((domain, key)): Path<(String, String)>,
	headers: HeaderMap,
) -> ApiResult {
	authorize(&conf.verifier, &headers, "violet:acme-challenge")?;
	if !conf.domains.is_valid(&domain) {
		return Err(ApiError::bad_request("Invalid ACME challenge domain"));
	}
	conf.acme.delete(&domain, &key);
	Ok(StatusCode::ACCEPTED.into_response())
}

async fn metrics(State(conf): State<Arc<Conf>>) -> Response {
	(
		StatusCode::OK,
		[(
			header::CONTENT_TYPE,
			"application/openmetrics-text; version=1.0.0; charset=utf-8",
		)],
		conf.metrics.encode_text(),
	)
		.into_response()
}

#[derive(Debug, Deserialize)]
struct SourceOnly {
	src: String,
}

/// A token may only touch sources under a `domain:owns` claim. Hosts that
/// carry a port, are IP literals or have fewer than two labels are never
/// valid sources.
fn validate_source_ownership(src: &str, claims: &Claims) -> Result<(), ApiError> {
	let (host, _) = fqdn::split_host_path(src);
	if host.contains(':') || host.parse::<IpAddr>().is_ok() {
		return Err(ApiError::bad_request("Invalid route source"));
	}
	let Some(top) = fqdn::top_fqdn(host) else {
		return Err(ApiError::bad_request("Invalid route source"));
	};
	if !claims.owned_domains().iter().any(|d| d == top) {
		return Err(ApiError::forbidden(
			"Token cannot modify the specified domain",
		));
	}
	Ok(())
}
