use std::collections::HashSet;
use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::flags::Flags;
use crate::target::{Redirect, Route};

/// Open (creating if missing) the SQLite database and apply the embedded
/// migrations. A failed migration is fatal: the server must not start
/// against an unknown schema.
pub async fn connect(path: &Path) -> anyhow::Result<SqlitePool> {
	let options = SqliteConnectOptions::new()
		.filename(path)
		.create_if_missing(true);
	let pool = SqlitePoolOptions::new().connect_with(options).await?;
	sqlx::migrate!("./migrations").run(&pool).await?;
	Ok(pool)
}

/// In-memory database for tests. Pinned to a single connection that never
/// expires: every pooled connection would otherwise get its own empty
/// in-memory database.
pub async fn connect_memory() -> anyhow::Result<SqlitePool> {
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.idle_timeout(None)
		.max_lifetime(None)
		.connect("sqlite::memory:")
		.await?;
	sqlx::migrate!("./migrations").run(&pool).await?;
	Ok(pool)
}

pub async fn active_domains(pool: &SqlitePool) -> sqlx::Result<HashSet<String>> {
	let rows = sqlx::query("SELECT domain FROM domains WHERE active = 1")
		.fetch_all(pool)
		.await?;
	Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
}

pub async fn upsert_domain(pool: &SqlitePool, domain: &str, active: bool) -> sqlx::Result<()> {
	sqlx::query(
		"INSERT INTO domains (domain, active) VALUES (?, ?) \
		 ON CONFLICT(domain) DO UPDATE SET active = excluded.active",
	)
	.bind(domain)
	.bind(active)
	.execute(pool)
	.await?;
	Ok(())
}

fn route_from_row(row: &sqlx::sqlite::SqliteRow) -> Route {
	Route {
		src: row.get("source"),
		dst: row.get("destination"),
		desc: row.get("description"),
		flags: Flags::from_bits(row.get::<i64, _>("flags") as u64),
		active: row.get("active"),
		headers: Default::default(),
	}
}

fn redirect_from_row(row: &sqlx::sqlite::SqliteRow) -> Redirect {
	Redirect {
		src: row.get("source"),
		dst: row.get("destination"),
		desc: row.get("description"),
		flags: Flags::from_bits(row.get::<i64, _>("flags") as u64),
		code: row.get::<i64, _>("code") as u16,
		active: row.get("active"),
	}
}

pub async fn active_routes(pool: &SqlitePool) -> sqlx::Result<Vec<Route>> {
	let rows = sqlx::query(
		"SELECT source, destination, description, flags, active FROM routes WHERE active = 1",
	)
	.fetch_all(pool)
	.await?;
	Ok(rows.iter().map(route_from_row).collect())
}

pub async fn all_routes(pool: &SqlitePool) -> sqlx::Result<Vec<Route>> {
	let rows = sqlx::query("SELECT source, destination, description, flags, active FROM routes")
		.fetch_all(pool)
		.await?;
	Ok(rows.iter().map(route_from_row).collect())
}

pub async fn insert_route(pool: &SqlitePool, route: &Route) -> sqlx::Result<()> {
	sqlx::query(
		"INSERT INTO routes (source, destination, description, flags, active) VALUES (?, ?, ?, ?, ?) \
		 ON CONFLICT(source) DO UPDATE SET destination = excluded.destination, \
		 description = excluded.description, flags = excluded.flags, active = excluded.active",
	)
	.bind(&route.src)
	.bind(&route.dst)
	.bind(&route.desc)
	.bind(route.flags.bits() as i64)
	.bind(route.active)
	.execute(pool)
	.await?;
	Ok(())
}

pub async fn delete_route(pool: &SqlitePool, source: &str) -> sqlx::Result<()> {
	sqlx::query("UPDATE routes SET active = 0 WHERE source = ?")
		.bind(source)
		.execute(pool)
		.await?;
	Ok(())
}

pub async fn active_redirects(pool: &SqlitePool) -> sqlx::Result<Vec<Redirect>> {
	let rows = sqlx::query(
		"SELECT source, destination, description, flags, code, active FROM redirects WHERE active = 1",
	)
	.fetch_all(pool)
	.await?;
	Ok(rows.iter().map(redirect_from_row).collect())
}

pub async fn all_redirects(pool: &SqlitePool) -> sqlx::Result<Vec<Redirect>> {
	let rows =
		sqlx::query("SELECT source, destination, description, flags, code, active FROM redirects")
			.fetch_all(pool)
			.await?;
	Ok(rows.iter().map(redirect_from_row).collect())
}

pub async fn insert_redirect(pool: &SqlitePool, redirect: &Redirect) -> sqlx::Result<()> {
	sqlx::query(
		"INSERT INTO redirects (source, destination, description, flags, code, active) \
		 VALUES (?, ?, ?, ?, ?, ?) \
		 ON CONFLICT(source) DO UPDATE SET destination = excluded.destination, \
		 description = excluded.description, flags = excluded.flags, code = excluded.code, \
		 active = excluded.active",
	)
	.bind(&redirect.src)
	.bind(&redirect.dst)
	.bind(&redirect.desc)
	.bind(redirect.flags.bits() as i64)
	.bind(redirect.code as i64)
	.bind(redirect.active)
	.execute(pool)
	.await?;
	Ok(())
}

pub async fn delete_redirect(pool: &SqlitePool, source: &str) -> sqlx::Result<()> {
	sqlx::query("UPDATE redirects SET active = 0 WHERE source = ?")
		.bind(source)
		.execute(pool)
		.await?;
	Ok(())
}

/// A favicon row: per-host source URLs for each image format.
#[derive(Debug, Clone)]
pub struct FaviconRow {
	pub host: String,
	pub svg: Option<String>,
	pub png: Option<String>,
	pub ico: Option<String>,
}

pub async fn favicon_rows(pool: &SqlitePool) -> sqlx::Result<Vec<FaviconRow>> {
	let rows = sqlx::query("SELECT host, svg, png, ico FROM favicons")
		.fetch_all(pool)
		.await?;
	Ok(
		rows
			.into_iter()
			.map(|r| FaviconRow {
				host: r.get("host"),
				svg: r.get("svg"),
				png: r.get("png"),
				ico: r.get("ico"),
			})
			.collect(),
	)
}
