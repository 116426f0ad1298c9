use crate::models::{MacroObservation, PriceBar};
use anyhow::{Context, Result, anyhow};
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS price_bars (
    ticker      VARCHAR  NOT NULL,
    date        DATE     NOT NULL,
    open        DOUBLE,
    high        DOUBLE,
    low         DOUBLE,
    close       DOUBLE,
    volume      DOUBLE,
    fetched_at  TIMESTAMP NOT NULL,
    PRIMARY KEY (ticker, date)
);

CREATE TABLE IF NOT EXISTS macro_observations (
    series_id   VARCHAR  NOT NULL,
    date        DATE     NOT NULL,
    value       DOUBLE   NOT NULL,
    fetched_at  TIMESTAMP NOT NULL,
    PRIMARY KEY (series_id, date)
);

-- One row per cached request key ("price:AAPL", "macro:DFF").
CREATE TABLE IF NOT EXISTS fetch_log (
    key         VARCHAR PRIMARY KEY,
    range_start DATE      NOT NULL,
    fetched_at  TIMESTAMP NOT NULL,
    rows        BIGINT    NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_bars_ticker  ON price_bars (ticker);
CREATE INDEX IF NOT EXISTS idx_macro_series ON macro_observations (series_id);
"#;

pub fn price_key(ticker: &str) -> String {
    format!("price:{}", ticker)
}

pub fn macro_key(series_id: &str) -> String {
    format!("macro:{}", series_id)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub tickers: i64,
    pub price_bars: i64,
    pub macro_series: i64,
    pub macro_observations: i64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub last_fetch: Option<NaiveDateTime>,
}

// ── Repository ────────────────────────────────────────────────────────────────

/// DuckDB fetch cache. The connection is not `Sync`, so it sits behind a
/// mutex and every call holds the lock for one statement or transaction.
pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("cache connection mutex poisoned"))
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.conn()?;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES).context("Index creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Price bars ────────────────────────────────────────────────────────────

    /// Upsert bars — idempotent, safe to re-run on same data.
    pub fn upsert_price_bars(&self, ticker: &str, bars: &[PriceBar]) -> Result<usize> {
        if bars.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().naive_utc();
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO price_bars (ticker, date, open, high, low, close, volume, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (ticker, date) DO UPDATE SET
                open       = excluded.open,
                high       = excluded.high,
                low        = excluded.low,
                close      = excluded.close,
                volume     = excluded.volume,
                fetched_at = excluded.fetched_at
        "#;

        for bar in bars {
            tx.execute(
                sql,
                params![ticker, bar.date, bar.open, bar.high, bar.low, bar.close, bar.volume, now],
            )
            .with_context(|| format!("insert bar {} {}", ticker, bar.date))?;
        }

        tx.commit()?;
        Ok(bars.len())
    }

    pub fn load_price_bars(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT date, open, high, low, close, volume FROM price_bars
               WHERE ticker = ? AND date >= ? AND date <= ?
               ORDER BY date"#,
        )?;
        let bars = stmt
            .query_map(params![ticker, start, end], |r| {
                Ok(PriceBar {
                    date: r.get(0)?,
                    open: r.get(1)?,
                    high: r.get(2)?,
                    low: r.get(3)?,
                    close: r.get(4)?,
                    volume: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("load cached bars for {}", ticker))?;
        Ok(bars)
    }

    // ── Macro observations ────────────────────────────────────────────────────

    pub fn upsert_macro_observations(
        &self,
        series_id: &str,
        observations: &[MacroObservation],
    ) -> Result<usize> {
        if observations.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().naive_utc();
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO macro_observations (series_id, date, value, fetched_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (series_id, date) DO UPDATE SET
                value      = excluded.value,
                fetched_at = excluded.fetched_at
        "#;

        for obs in observations {
            tx.execute(sql, params![series_id, obs.date, obs.value, now])
                .with_context(|| format!("insert macro {} {}", series_id, obs.date))?;
        }

        tx.commit()?;
        Ok(observations.len())
    }

    pub fn load_macro_observations(
        &self,
        series_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MacroObservation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT date, value FROM macro_observations
               WHERE series_id = ? AND date >= ? AND date <= ?
               ORDER BY date"#,
        )?;
        let obs = stmt
            .query_map(params![series_id, start, end], |r| {
                Ok(MacroObservation {
                    date: r.get(0)?,
                    value: r.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("load cached macro series {}", series_id))?;
        Ok(obs)
    }

    // ── Fetch log ─────────────────────────────────────────────────────────────

    pub fn record_fetch(&self, key: &str, range_start: NaiveDate, rows: usize) -> Result<()> {
        self.record_fetch_at(key, range_start, rows, Utc::now().naive_utc())
    }

    fn record_fetch_at(
        &self,
        key: &str,
        range_start: NaiveDate,
        rows: usize,
        fetched_at: NaiveDateTime,
    ) -> Result<()> {
        self.conn()?.execute(
            r#"INSERT INTO fetch_log (key, range_start, fetched_at, rows)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (key) DO UPDATE SET
                   range_start = excluded.range_start,
                   fetched_at  = excluded.fetched_at,
                   rows        = excluded.rows"#,
            params![key, range_start, fetched_at, rows as i64],
        )?;
        debug!("Recorded fetch {} ({} rows)", key, rows);
        Ok(())
    }

    /// A key is fresh when it was fetched within `ttl_hours` and the cached
    /// range reaches back at least to `start`.
    pub fn is_fresh(&self, key: &str, start: NaiveDate, ttl_hours: i64) -> Result<bool> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT range_start, fetched_at FROM fetch_log WHERE key = ?")?;
        let row: Option<(NaiveDate, NaiveDateTime)> = stmt
            .query_row(params![key], |r| Ok((r.get(0)?, r.get(1)?)))
            .ok();

        let Some((range_start, fetched_at)) = row else {
            return Ok(false);
        };
        let cutoff = Utc::now().naive_utc() - Duration::hours(ttl_hours);
        Ok(range_start <= start && fetched_at >= cutoff)
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.conn()?;

        let (tickers, price_bars, first_date, last_date) = conn.query_row(
            "SELECT COUNT(DISTINCT ticker), COUNT(*), MIN(date), MAX(date) FROM price_bars",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )?;
        let (macro_series, macro_observations) = conn.query_row(
            "SELECT COUNT(DISTINCT series_id), COUNT(*) FROM macro_observations",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let last_fetch = conn.query_row("SELECT MAX(fetched_at) FROM fetch_log", [], |r| r.get(0))?;

        Ok(CacheStats {
            tickers,
            price_bars,
            macro_series,
            macro_observations,
            first_date,
            last_date,
            last_fetch,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
