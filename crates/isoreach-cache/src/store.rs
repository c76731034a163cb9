//! SQLite implementation of IsochroneCache.

use crate::geometry;
use async_trait::async_trait;
use chrono::DateTime;
use isoreach_core::batch::{BatchRow, FetchedRow};
use isoreach_core::ports::IsochroneCache;
use isoreach_core::{CacheRecord, CityId, Error, RequestUid, Result, Source, TravelMode};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// SQLite implementation of IsochroneCache.
#[derive(Clone)]
pub struct SqliteIsochroneCache {
    pool: SqlitePool,
}

impl SqliteIsochroneCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch one full record by uid.
    pub async fn get(&self, uid: &RequestUid) -> Result<Option<CacheRecord>> {
        let row = sqlx::query(
            r#"SELECT uid, city_id, pid, pt_lat, pt_lon, tt_mnts, dep_dt, mode, source, geometry
               FROM isochrone WHERE uid = ?"#,
        )
        .bind(uid.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        row.map(|r| Self::row_to_record(&r)).transpose()
    }

    /// Number of cached records for a city.
    pub async fn count(&self, city_id: &CityId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM isochrone WHERE city_id = ?")
            .bind(city_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count as u64)
    }

    fn row_to_record(r: &sqlx::sqlite::SqliteRow) -> Result<CacheRecord> {
        let dep_dt: String = r.get("dep_dt");
        let departure = DateTime::parse_from_rfc3339(&dep_dt)
            .map_err(|e| Error::Database(format!("invalid dep_dt '{}': {}", dep_dt, e)))?;
        let mode: String = r.get("mode");
        let source: String = r.get("source");
        let wkt: String = r.get("geometry");

        Ok(CacheRecord {
            uid: RequestUid::from_stored(r.get::<String, _>("uid")),
            city_id: CityId::new(r.get::<String, _>("city_id")),
            pid: r.get::<i64, _>("pid") as usize,
            origin_lat: r.get("pt_lat"),
            origin_lon: r.get("pt_lon"),
            minutes: r.get::<i64, _>("tt_mnts") as u32,
            departure,
            mode: mode.parse::<TravelMode>()?,
            source: source.parse::<Source>()?,
            geometry: geometry::decode(&wkt)?,
        })
    }
}

#[async_trait]
impl IsochroneCache for SqliteIsochroneCache {
    async fn lookup(&self, city_id: &CityId, rows: Vec<BatchRow>) -> Result<Vec<FetchedRow>> {
        let stored = sqlx::query("SELECT uid, geometry FROM isochrone WHERE city_id = ?")
            .bind(city_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut by_uid: HashMap<String, String> = stored
            .iter()
            .map(|r| (r.get::<String, _>("uid"), r.get::<String, _>("geometry")))
            .collect();

        let mut fetched = Vec::with_capacity(rows.len());
        for row in rows {
            match by_uid.remove(row.uid.as_str()) {
                Some(wkt) => {
                    let geometry = geometry::decode(&wkt)?;
                    fetched.push(FetchedRow {
                        row,
                        cached: true,
                        geometry: Some(geometry),
                    });
                }
                None => fetched.push(FetchedRow::missing(row)),
            }
        }

        debug!(
            city = %city_id,
            rows = fetched.len(),
            cached = fetched.iter().filter(|r| r.cached).count(),
            "Cache lookup"
        );
        Ok(fetched)
    }

    async fn availability(&self, city_id: &CityId, rows: &[BatchRow]) -> Result<Vec<bool>> {
        let uids: HashSet<String> = sqlx::query_scalar("SELECT uid FROM isochrone WHERE city_id = ?")
            .bind(city_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .into_iter()
            .collect();

        Ok(rows.iter().map(|r| uids.contains(r.uid.as_str())).collect())
    }

    async fn insert(&self, record: &CacheRecord) -> Result<()> {
        let wkt = geometry::encode(&record.geometry)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let result = sqlx::query(
            r#"INSERT INTO isochrone (uid, city_id, pid, pt_lat, pt_lon, tt_mnts, dep_dt, mode, source, geometry)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.uid.as_str())
        .bind(record.city_id.as_str())
        .bind(record.pid as i64)
        .bind(record.origin_lat)
        .bind(record.origin_lon)
        .bind(record.minutes as i64)
        .bind(record.departure.to_rfc3339())
        .bind(record.mode.as_str())
        .bind(record.source.code())
        .bind(&wkt)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(Error::CacheConstraint {
                    uid: record.uid.to_string(),
                });
            }
            Err(e) => return Err(Error::Database(e.to_string())),
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        debug!(uid = %record.uid, empty = record.geometry.0.is_empty(), "Cached isochrone");
        Ok(())
    }
}
