//! Google Routes reference client and its on-disk memo.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use geo::Point;
use isoreach_core::ports::{ReferenceRouter, RouteSummary};
use isoreach_core::{CityId, Error, Period, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const ROUTES_ENDPOINT: &str = "https://routes.googleapis.com/directions/v2:computeRoutes";
const FIELD_MASK: &str = "routes.duration,routes.staticDuration,routes.distanceMeters";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Route {
    static_duration: Option<String>,
    duration: Option<String>,
    distance_meters: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RoutesResponse {
    #[serde(default)]
    routes: Vec<Route>,
}

/// Traffic-aware driving routes from the Google Routes API.
#[derive(Clone)]
pub struct GoogleRoutesClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GoogleRoutesClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: ROUTES_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

fn lat_lng(point: Point<f64>) -> serde_json::Value {
    json!({ "location": { "latLng": { "latitude": point.y(), "longitude": point.x() } } })
}

/// Request body for one driving route.
pub fn request_body(from: Point<f64>, to: Point<f64>, departure: DateTime<Utc>) -> serde_json::Value {
    json!({
        "origin": lat_lng(from),
        "destination": lat_lng(to),
        "travelMode": "DRIVE",
        "routingPreference": "TRAFFIC_AWARE",
        "departureTime": departure.to_rfc3339_opts(SecondsFormat::Secs, true),
        "computeAlternativeRoutes": false,
        "languageCode": "en-US",
        "units": "METRIC",
    })
}

/// Parse a protobuf duration such as `"123s"` into seconds.
pub fn parse_duration(value: &str) -> Result<f64> {
    value
        .strip_suffix('s')
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| Error::MalformedResponse(format!("duration '{}'", value)))
}

#[async_trait]
impl ReferenceRouter for GoogleRoutesClient {
    async fn route(
        &self,
        from: Point<f64>,
        to: Point<f64>,
        departure: DateTime<Utc>,
    ) -> Result<Option<RouteSummary>> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&request_body(from, to, departure))
            .send()
            .await
            .map_err(|e| Error::Network(format!("routes: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Reference route request rejected");
            return Ok(None);
        }

        let parsed: RoutesResponse = response
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(format!("routes: {}", e)))?;

        let Some(route) = parsed.routes.into_iter().next() else {
            return Ok(None);
        };
        let duration = route
            .static_duration
            .or(route.duration)
            .ok_or_else(|| Error::MalformedResponse("route without duration".to_string()))?;

        Ok(Some(RouteSummary {
            duration_s: parse_duration(&duration)?,
            distance_m: route.distance_meters.unwrap_or(0.0),
        }))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MemoEntry {
    route: Option<RouteSummary>,
}

/// Reference responses memoised per origin pair, period and departure time.
#[derive(Debug, Clone)]
pub struct ReferenceMemo {
    dir: PathBuf,
}

impl ReferenceMemo {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Memo directory inside an engine directory.
    pub fn in_engine_dir(engine_dir: &Path) -> Self {
        Self::new(engine_dir.join("calibrate-cache"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path<Tz: TimeZone>(
        &self,
        city_id: &CityId,
        pair: (usize, usize),
        period: Period,
        departure: &DateTime<Tz>,
    ) -> PathBuf
    where
        Tz::Offset: std::fmt::Display,
    {
        self.dir.join(format!(
            "{}-{}-{}-{}-{}.json",
            city_id,
            pair.0,
            pair.1,
            period.as_str(),
            departure.format("%H%M")
        ))
    }

    /// A memoised route. Missing, unreadable and route-less memos all read as `None`.
    pub async fn get(&self, path: &Path) -> Option<RouteSummary> {
        let bytes = tokio::fs::read(path).await.ok()?;
        match serde_json::from_slice::<MemoEntry>(&bytes) {
            Ok(entry) => entry.route,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Ignoring unreadable reference memo");
                None
            }
        }
    }

    pub async fn put(&self, path: &Path, route: Option<RouteSummary>) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(&MemoEntry { route })?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}
