use crate::models::{ListingRecord, StoreSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::types::Type;
use duckdb::{params, Connection, Row};
use std::path::Path;
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS listings_id_seq START 1;

CREATE TABLE IF NOT EXISTS listings (
    id              BIGINT   PRIMARY KEY DEFAULT nextval('listings_id_seq'),
    url             VARCHAR  NOT NULL UNIQUE,
    title           VARCHAR  NOT NULL,
    price_usd       BIGINT   NOT NULL CHECK (price_usd >= 0),
    odometer        BIGINT   NOT NULL CHECK (odometer >= 0),
    username        VARCHAR  NOT NULL,
    phone_number    BIGINT   NOT NULL,
    image_url       VARCHAR  NOT NULL,
    images_count    BIGINT   NOT NULL,
    -- 'Відсутній' when the page shows none
    car_number      VARCHAR  NOT NULL,
    car_vin         VARCHAR  NOT NULL,
    datetime_found  TIMESTAMPTZ NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS scrape_runs_id_seq START 1;

CREATE TABLE IF NOT EXISTS scrape_runs (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('scrape_runs_id_seq'),
    started_at          TIMESTAMPTZ NOT NULL,
    finished_at         TIMESTAMPTZ,
    status              VARCHAR NOT NULL DEFAULT 'running',
    pages               BIGINT DEFAULT 0,
    links               BIGINT DEFAULT 0,
    inserted            BIGINT DEFAULT 0,
    failed_listings     BIGINT DEFAULT 0,
    error_msg           VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMPTZ NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_listings_found ON listings (datetime_found);
CREATE INDEX IF NOT EXISTS idx_listings_price ON listings (price_usd);
"#;

const LISTING_COLUMNS: &str = "url, title, price_usd, odometer, username, phone_number, \
     image_url, images_count, car_number, car_vin, CAST(datetime_found AS VARCHAR)";

// ── Timestamps ────────────────────────────────────────────────────────────────

// TIMESTAMPTZ crosses the boundary as text so the session time zone never
// shifts the stored instant.
fn ts_param(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Parse DuckDB's TIMESTAMPTZ text form: "2026-10-19 09:15:02.123456+00".
fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f%#z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn ts_column(row: &Row<'_>, idx: usize) -> duckdb::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        parse_ts(&t).ok_or_else(|| {
            duckdb::Error::FromSqlConversionFailure(idx, Type::Text, format!("unparseable timestamp {:?}", t).into())
        })
    })
    .transpose()
}

fn listing_from_row(row: &Row<'_>) -> duckdb::Result<ListingRecord> {
    Ok(ListingRecord {
        url: row.get(0)?,
        title: row.get(1)?,
        price_usd: row.get(2)?,
        odometer: row.get(3)?,
        username: row.get(4)?,
        phone_number: row.get(5)?,
        image_url: row.get(6)?,
        images_count: row.get(7)?,
        car_number: row.get(8)?,
        car_vin: row.get(9)?,
        datetime_found: ts_column(row, 10)?
            .ok_or(duckdb::Error::InvalidColumnType(10, "datetime_found".into(), Type::Null))?,
    })
}

// ── Persistence gateway ───────────────────────────────────────────────────────

/// Key-unique listing store. Keyed by `url`; existing rows are never updated.
pub trait ListingStore {
    /// Insert every record whose `url` is not stored yet; returns how many were new.
    /// Duplicates are skipped silently.
    fn insert_if_absent(&self, records: &[ListingRecord]) -> Result<usize>;

    fn count_all(&self) -> Result<i64>;

    /// Newest first.
    fn page(&self, offset: usize, limit: usize) -> Result<Vec<ListingRecord>>;
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, CAST(? AS TIMESTAMPTZ))",
            params![ts_param(&Utc::now())],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    fn count_in(conn: &Connection) -> Result<i64> {
        let mut s = conn.prepare("SELECT COUNT(*) FROM listings")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    /// Every stored listing, newest first.
    pub fn all(&self) -> Result<Vec<ListingRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM listings ORDER BY id DESC", LISTING_COLUMNS))?;
        let rows = stmt
            .query_map([], listing_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn summary(&self) -> Result<StoreSummary> {
        let mut s = self.conn.prepare(
            r#"SELECT COUNT(*), MIN(price_usd), AVG(price_usd), MAX(price_usd),
                      CAST(MIN(datetime_found) AS VARCHAR), CAST(MAX(datetime_found) AS VARCHAR)
               FROM listings"#,
        )?;
        Ok(s.query_row([], |r| {
            Ok(StoreSummary {
                listings: r.get(0)?,
                min_price_usd: r.get(1)?,
                avg_price_usd: r.get(2)?,
                max_price_usd: r.get(3)?,
                first_found: ts_column(r, 4)?,
                last_found: ts_column(r, 5)?,
            })
        })?)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO scrape_runs (started_at, status) VALUES (CAST(? AS TIMESTAMPTZ), 'running') RETURNING id",
            params![ts_param(&Utc::now())],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(&self, run_id: i64, outcome: &RunOutcome<'_>) -> Result<()> {
        self.conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = CAST(? AS TIMESTAMPTZ), status = ?,
               pages = ?, links = ?, inserted = ?, failed_listings = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                ts_param(&Utc::now()),
                if outcome.error.is_none() { "success" } else { "error" },
                outcome.pages as i64,
                outcome.links as i64,
                outcome.inserted as i64,
                outcome.failed_listings as i64,
                outcome.error,
                run_id,
            ],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub fn run_status(&self, run_id: i64) -> Result<(String, i64)> {
        let mut s = self
            .conn
            .prepare("SELECT status, inserted FROM scrape_runs WHERE id = ?")?;
        Ok(s.query_row(params![run_id], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }
}

/// Totals written to the `scrape_runs` log when a run ends.
#[derive(Debug, Default)]
pub struct RunOutcome<'a> {
    pub pages: usize,
    pub links: usize,
    pub inserted: usize,
    pub failed_listings: usize,
    pub error: Option<&'a str>,
}

impl ListingStore for Repository {
    fn insert_if_absent(&self, records: &[ListingRecord]) -> Result<usize> {
        if records.is_empty() { return Ok(0); }

        let tx = self.conn.unchecked_transaction()?;

        let sql = r#"
            INSERT INTO listings
                (url, title, price_usd, odometer, username, phone_number,
                 image_url, images_count, car_number, car_vin, datetime_found)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMPTZ))
            ON CONFLICT (url) DO NOTHING
        "#;

        let mut inserted = 0;
        for r in records {
            // 0 when the url is already stored
            inserted += tx.execute(sql, params![
                r.url, r.title,
                r.price_usd, r.odometer,
                r.username, r.phone_number,
                r.image_url, r.images_count,
                r.car_number, r.car_vin,
                ts_param(&r.datetime_found),
            ]).with_context(|| format!("insert listing {}", r.url))?;
        }

        tx.commit()?;
        debug!("{} of {} listings were new", inserted, records.len());
        Ok(inserted)
    }

    fn count_all(&self) -> Result<i64> {
        Self::count_in(&self.conn)
    }

    fn page(&self, offset: usize, limit: usize) -> Result<Vec<ListingRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM listings ORDER BY id DESC LIMIT ? OFFSET ?",
            LISTING_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], listing_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
