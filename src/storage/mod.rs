use crate::models::{DailySnapshot, Fuel, FuelPrices, LocalityLookup, Region};
use crate::scraper::parsers::normalize_key;
use crate::validation::validate;
use anyhow::{anyhow, Context, Result};
use chrono::{Days, NaiveDate, Utc};
use duckdb::{params, Connection, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS regions (
    code          VARCHAR PRIMARY KEY,
    display_name  VARCHAR NOT NULL,
    updated_at    TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS localities (
    region      VARCHAR NOT NULL,
    name        VARCHAR NOT NULL,
    updated_at  TIMESTAMP NOT NULL,
    PRIMARY KEY (region, name)
);

CREATE TABLE IF NOT EXISTS fuel_snapshots (
    region        VARCHAR NOT NULL,
    locality      VARCHAR NOT NULL,
    date          DATE    NOT NULL,
    -- Per litre
    petrol_price  DOUBLE,
    diesel_price  DOUBLE,
    -- Per 14.2 kg cylinder
    lpg_price     DOUBLE,
    -- Per kg
    cng_price     DOUBLE,
    scraped_at    TIMESTAMP NOT NULL,
    PRIMARY KEY (region, locality, date)
);

CREATE SEQUENCE IF NOT EXISTS scrape_run_ids START 1;

CREATE TABLE IF NOT EXISTS scrape_runs (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('scrape_run_ids'),
    kind                VARCHAR NOT NULL,
    started_at          TIMESTAMP NOT NULL,
    finished_at         TIMESTAMP,
    status              VARCHAR NOT NULL DEFAULT 'running',
    regions_processed   INTEGER DEFAULT 0,
    snapshots_upserted  INTEGER DEFAULT 0,
    error_count         INTEGER DEFAULT 0,
    error_msg           VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_snapshots_date   ON fuel_snapshots (date);
CREATE INDEX IF NOT EXISTS idx_snapshots_region ON fuel_snapshots (region);
"#;

const SNAPSHOT_COLUMNS: &str = "region, locality, date, petrol_price, diesel_price, lpg_price, cng_price";

/// Alternate spellings the source uses for the same locality, per region.
const LOCALITY_ALIASES: &[(&str, &str, &str)] = &[("AP", "kadapa", "cuddapah")];

fn alias_keys(region: &str, key: &str) -> Vec<String> {
    let mut keys = vec![key.to_string()];
    for (code, a, b) in LOCALITY_ALIASES {
        if !region.eq_ignore_ascii_case(code) {
            continue;
        }
        if key == *a {
            keys.push(b.to_string());
        } else if key == *b {
            keys.push(a.to_string());
        }
    }
    keys
}

// ── Store trait ───────────────────────────────────────────────────────────────

/// Keyed, idempotent persistence used by the pipeline.
pub trait SnapshotStore: Send + Sync {
    fn upsert_regions(&self, regions: &[Region]) -> Result<usize>;

    /// Insert or fully replace the snapshot for (region, locality, date).
    fn upsert_snapshot(&self, snapshot: &DailySnapshot) -> Result<()>;

    fn upsert_snapshots(&self, snapshots: &[DailySnapshot]) -> Result<usize>;

    fn replace_locality_roster(&self, region: &str, names: &[String]) -> Result<usize>;

    fn delete_snapshots(&self, region: &str, date: NaiveDate) -> Result<usize>;

    /// Most recent in-range price per normalized locality key, looking back
    /// `lookback_days` from `today` inclusive.
    fn last_known_valid_prices(
        &self,
        region: &str,
        fuel: Fuel,
        lookback_days: u32,
        today: NaiveDate,
    ) -> Result<BTreeMap<String, f64>>;
}

// ── Repository ────────────────────────────────────────────────────────────────

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
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("DuckDB connection lock poisoned"))
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

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub fn snapshot_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM fuel_snapshots", [], |r| r.get(0))?)
    }

    pub fn region_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM regions", [], |r| r.get(0))?)
    }

    pub fn locality_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM localities", [], |r| r.get(0))?)
    }

    pub fn date_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT MIN(date), MAX(date) FROM fuel_snapshots", [], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })?)
    }

    pub fn locality_roster(&self, region: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM localities WHERE region = ? ORDER BY name")?;
        let names = stmt
            .query_map(params![region], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub fn snapshots_for(&self, region: &str, date: NaiveDate) -> Result<Vec<DailySnapshot>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM fuel_snapshots WHERE region = ? AND date = ? ORDER BY locality"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![region, date], row_to_snapshot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Latest snapshot of every locality, optionally within one region.
    fn latest_snapshots(&self, region: Option<&str>) -> Result<Vec<DailySnapshot>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"SELECT {SNAPSHOT_COLUMNS} FROM fuel_snapshots
               QUALIFY row_number() OVER (PARTITION BY region, locality ORDER BY date DESC) = 1
               ORDER BY region, locality"#
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], row_to_snapshot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match region {
            Some(code) => rows
                .into_iter()
                .filter(|s| s.region.eq_ignore_ascii_case(code))
                .collect(),
            None => rows,
        })
    }

    /// Match a free-text locality name against the latest snapshots.
    ///
    /// Exact key matches (including regional aliases) win; otherwise a
    /// single partial match resolves and several are ambiguous.
    pub fn resolve_locality(&self, query: &str, region: Option<&str>) -> Result<LocalityLookup> {
        let key = normalize_key(query);
        if key.is_empty() {
            return Ok(LocalityLookup::NotFound);
        }
        let latest = self.latest_snapshots(region)?;

        let exact: Vec<DailySnapshot> = latest
            .iter()
            .filter(|s| alias_keys(&s.region, &key).contains(&normalize_key(&s.locality)))
            .cloned()
            .collect();
        let mut candidates: Vec<DailySnapshot> = if exact.is_empty() {
            latest
                .into_iter()
                .filter(|s| {
                    let name = normalize_key(&s.locality);
                    alias_keys(&s.region, &key).iter().any(|k| name.contains(k.as_str()))
                })
                .collect()
        } else {
            exact
        };

        debug!("lookup {:?}: {} candidate(s)", query, candidates.len());
        Ok(match candidates.len() {
            0 => LocalityLookup::NotFound,
            1 => LocalityLookup::Resolved {
                snapshot: candidates.remove(0),
            },
            _ => LocalityLookup::Ambiguous { candidates },
        })
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self, kind: &str) -> Result<i64> {
        let conn = self.conn()?;
        let id: i64 = conn.query_row(
            "INSERT INTO scrape_runs (kind, started_at, status) VALUES (?, ?, 'running') RETURNING id",
            params![kind, Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(
        &self,
        run_id: i64,
        regions: usize,
        upserts: usize,
        errors: usize,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               regions_processed = ?, snapshots_upserted = ?, error_count = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                regions as i64,
                upserts as i64,
                errors as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn last_run_status(&self) -> Result<Option<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT kind, status FROM scrape_runs ORDER BY id DESC LIMIT 1")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(r) => Ok(Some((r.get(0)?, r.get(1)?))),
            None => Ok(None),
        }
    }
}

fn row_to_snapshot(r: &Row<'_>) -> duckdb::Result<DailySnapshot> {
    Ok(DailySnapshot {
        region: r.get(0)?,
        locality: r.get(1)?,
        date: r.get(2)?,
        prices: FuelPrices {
            petrol: r.get(3)?,
            diesel: r.get(4)?,
            lpg: r.get(5)?,
            cng: r.get(6)?,
        },
    })
}

const UPSERT_SNAPSHOT: &str = r#"
    INSERT INTO fuel_snapshots
        (region, locality, date, petrol_price, diesel_price, lpg_price, cng_price, scraped_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (region, locality, date) DO UPDATE SET
        petrol_price = excluded.petrol_price,
        diesel_price = excluded.diesel_price,
        lpg_price    = excluded.lpg_price,
        cng_price    = excluded.cng_price,
        scraped_at   = excluded.scraped_at
"#;

fn execute_upsert(conn: &Connection, s: &DailySnapshot) -> Result<()> {
    conn.execute(
        UPSERT_SNAPSHOT,
        params![
            s.region,
            s.locality,
            s.date,
            s.prices.petrol,
            s.prices.diesel,
            s.prices.lpg,
            s.prices.cng,
            Utc::now().naive_utc(),
        ],
    )
    .with_context(|| format!("upsert snapshot {}/{} {}", s.region, s.locality, s.date))?;
    Ok(())
}

impl SnapshotStore for Repository {
    fn upsert_regions(&self, regions: &[Region]) -> Result<usize> {
        if regions.is_empty() {
            return Ok(0);
        }
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let now = Utc::now().naive_utc();
        for r in regions {
            tx.execute(
                r#"INSERT INTO regions (code, display_name, updated_at) VALUES (?, ?, ?)
                   ON CONFLICT (code) DO UPDATE SET
                       display_name = excluded.display_name,
                       updated_at   = excluded.updated_at"#,
                params![r.code, r.display_name, now],
            )
            .with_context(|| format!("upsert region {}", r.code))?;
        }
        tx.commit()?;
        Ok(regions.len())
    }

    fn upsert_snapshot(&self, snapshot: &DailySnapshot) -> Result<()> {
        let conn = self.conn()?;
        execute_upsert(&conn, snapshot)
    }

    /// Upsert snapshots. Idempotent; the latest payload wins.
    fn upsert_snapshots(&self, snapshots: &[DailySnapshot]) -> Result<usize> {
        if snapshots.is_empty() {
            return Ok(0);
        }
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        for s in snapshots {
            execute_upsert(&tx, s)?;
        }
        tx.commit()?;
        Ok(snapshots.len())
    }

    fn replace_locality_roster(&self, region: &str, names: &[String]) -> Result<usize> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM localities WHERE region = ?", params![region])
            .with_context(|| format!("clear roster {}", region))?;
        let now = Utc::now().naive_utc();
        for name in names {
            tx.execute(
                "INSERT OR IGNORE INTO localities (region, name, updated_at) VALUES (?, ?, ?)",
                params![region, name, now],
            )
            .with_context(|| format!("insert locality {}/{}", region, name))?;
        }
        tx.commit()?;
        Ok(names.len())
    }

    fn delete_snapshots(&self, region: &str, date: NaiveDate) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "DELETE FROM fuel_snapshots WHERE region = ? AND date = ?",
                params![region, date],
            )
            .with_context(|| format!("delete snapshots {} {}", region, date))?;
        Ok(n)
    }

    fn last_known_valid_prices(
        &self,
        region: &str,
        fuel: Fuel,
        lookback_days: u32,
        today: NaiveDate,
    ) -> Result<BTreeMap<String, f64>> {
        let since = today
            .checked_sub_days(Days::new(u64::from(lookback_days.max(2) - 1)))
            .unwrap_or(NaiveDate::MIN);
        let col = fuel.column();
        let sql = format!(
            r#"SELECT locality, {col} FROM fuel_snapshots
               WHERE region = ? AND {col} IS NOT NULL AND date >= ? AND date <= ?
               ORDER BY date DESC"#
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![region, since, today], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut map = BTreeMap::new();
        for (locality, price) in rows {
            let key = normalize_key(&locality);
            if key.is_empty() || map.contains_key(&key) {
                continue;
            }
            // Older rows may predate the range checks
            if let Some(price) = validate(fuel, Some(price)) {
                map.insert(key, price);
            }
        }
        debug!("{}: {} stored {} prices within {} days", region, map.len(), fuel, lookback_days);
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, d).unwrap()
    }

    fn snap(region: &str, locality: &str, date: NaiveDate, petrol: Option<f64>) -> DailySnapshot {
        DailySnapshot {
            region: region.into(),
            locality: locality.into(),
            date,
            prices: FuelPrices {
                petrol,
                ..FuelPrices::default()
            },
        }
    }

    #[test]
    fn test_migrations_are_repeatable() {
        let repo = repo();
        repo.run_migrations().unwrap();
        assert_eq!(repo.snapshot_count().unwrap(), 0);
    }

    #[test]
    fn test_upsert_is_idempotent_and_last_write_wins() {
        let repo = repo();
        let first = DailySnapshot {
            prices: FuelPrices {
                petrol: Some(105.0),
                diesel: Some(94.0),
                ..FuelPrices::default()
            },
            ..snap("KL", "Kochi", day(13), None)
        };
        repo.upsert_snapshot(&first).unwrap();
        repo.upsert_snapshot(&first).unwrap();
        assert_eq!(repo.snapshot_count().unwrap(), 1);

        // Full replace: diesel absent in the second payload stays absent.
        let second = snap("KL", "Kochi", day(13), Some(106.0));
        repo.upsert_snapshots(&[second.clone()]).unwrap();
        assert_eq!(repo.snapshots_for("KL", day(13)).unwrap(), vec![second]);
    }

    #[test]
    fn test_delete_snapshots_scoped_to_region_and_date() {
        let repo = repo();
        repo.upsert_snapshots(&[
            snap("KL", "Kochi", day(13), Some(105.0)),
            snap("KL", "Kochi", day(12), Some(104.0)),
            snap("GA", "Panaji", day(13), Some(96.0)),
        ])
        .unwrap();

        assert_eq!(repo.delete_snapshots("KL", day(13)).unwrap(), 1);
        assert_eq!(repo.snapshot_count().unwrap(), 2);
        assert!(repo.snapshots_for("KL", day(13)).unwrap().is_empty());
    }

    #[test]
    fn test_replace_locality_roster() {
        let repo = repo();
        repo.replace_locality_roster("KL", &["Kochi".into(), "Kollam".into()]).unwrap();
        repo.replace_locality_roster("KL", &["Kottayam".into()]).unwrap();
        assert_eq!(repo.locality_roster("KL").unwrap(), vec!["Kottayam".to_string()]);
    }

    #[test]
    fn test_last_known_valid_prices() {
        let repo = repo();
        repo.upsert_snapshots(&[
            snap("KL", "Kochi", day(10), Some(104.0)),
            snap("KL", "Kochi", day(12), Some(105.5)),
            // Out of range rows are skipped, the older valid one is used
            snap("KL", "Kollam", day(12), Some(5.0)),
            snap("KL", "Kollam", day(11), Some(106.2)),
            // Future rows are outside the window
            snap("KL", "Kannur", day(20), Some(107.0)),
            snap("GA", "Panaji", day(12), Some(96.0)),
        ])
        .unwrap();

        let map = repo
            .last_known_valid_prices("KL", Fuel::Petrol, 120, day(13))
            .unwrap();
        assert_eq!(map.get("kochi"), Some(&105.5));
        assert_eq!(map.get("kollam"), Some(&106.2));
        assert!(!map.contains_key("kannur"));
        assert!(!map.contains_key("panaji"));

        let short = repo
            .last_known_valid_prices("KL", Fuel::Petrol, 2, day(13))
            .unwrap();
        assert_eq!(short.get("kochi"), Some(&105.5));
        assert!(!short.contains_key("kollam"));
    }

    #[test]
    fn test_resolve_locality() {
        let repo = repo();
        repo.upsert_snapshots(&[
            snap("AP", "Cuddapah", day(13), Some(109.0)),
            snap("AP", "Guntur", day(12), Some(109.5)),
            snap("AP", "Guntur", day(13), Some(109.8)),
            snap("KL", "Kochi", day(13), Some(105.0)),
            snap("KL", "Kollam", day(13), Some(106.0)),
        ])
        .unwrap();

        match repo.resolve_locality("Kadapa", Some("AP")).unwrap() {
            LocalityLookup::Resolved { snapshot } => assert_eq!(snapshot.locality, "Cuddapah"),
            other => panic!("expected resolved, got {:?}", other),
        }
        match repo.resolve_locality("guntur", None).unwrap() {
            LocalityLookup::Resolved { snapshot } => {
                assert_eq!(snapshot.date, day(13));
                assert_eq!(snapshot.prices.petrol, Some(109.8));
            }
            other => panic!("expected resolved, got {:?}", other),
        }
        match repo.resolve_locality("ko", Some("KL")).unwrap() {
            LocalityLookup::Ambiguous { candidates } => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguous, got {:?}", other),
        }
        assert_eq!(
            repo.resolve_locality("Atlantis", None).unwrap(),
            LocalityLookup::NotFound
        );
    }

    #[test]
    fn test_scrape_run_log() {
        let repo = repo();
        let id = repo.begin_scrape_run("regions").unwrap();
        let next = repo.begin_scrape_run("seed").unwrap();
        assert!(next > id);
        repo.finish_scrape_run(next, 3, 42, 1, Some("1 errors")).unwrap();
        assert_eq!(
            repo.last_run_status().unwrap(),
            Some(("seed".to_string(), "error".to_string()))
        );
    }
}
