//! HTTP client for the GraphHopper engine.

use crate::config::speed_rules;
use async_trait::async_trait;
use geo::{MultiPolygon, Point};
use isoreach_core::ports::{IsochroneQuery, RouteSummary, RoutingEngine};
use isoreach_core::projection::into_multipolygon;
use isoreach_core::{Error, FactorSet, Result, RetryPolicy};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};

/// Profile used for calibration routes; speeds come from the request's custom model.
pub const CALIBRATION_PROFILE: &str = "car_ctm";
pub const DISTANCE_INFLUENCE: u32 = 15;

#[derive(Debug, Deserialize)]
struct NearestResponse {
    coordinates: Option<Vec<f64>>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Polygons {
    Features(Vec<geojson::Feature>),
    Collection(geojson::FeatureCollection),
}

#[derive(Debug, Deserialize)]
struct IsochroneResponse {
    polygons: Option<Polygons>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoutePath {
    /// Milliseconds.
    time: f64,
    /// Metres.
    distance: f64,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    paths: Option<Vec<RoutePath>>,
    message: Option<String>,
}

/// Client for the engine's `/nearest`, `/isochrone` and `/route` endpoints.
#[derive(Clone)]
pub struct GraphHopperClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl GraphHopperClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::fixed(5, std::time::Duration::from_secs(1)),
        }
    }

    /// Retry policy for connection failures on `/nearest`.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_nearest(&self, point: Point<f64>) -> std::result::Result<NearestResponse, reqwest::Error> {
        self.client
            .get(format!("{}/nearest", self.base_url))
            .query(&[("point", lat_lon(point))])
            .send()
            .await?
            .json()
            .await
    }
}

/// `lat,lon` as the engine expects points.
fn lat_lon(point: Point<f64>) -> String {
    format!("{},{}", point.y(), point.x())
}

/// Query parameters of an isochrone request.
pub fn isochrone_params(query: &IsochroneQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("point", lat_lon(query.point)),
        ("time_limit", (query.minutes * 60).to_string()),
        ("profile", query.profile.to_string()),
    ];

    if let Some(departure) = query.departure {
        let access = query.access_profile.unwrap_or("foot");
        params.extend([
            ("pt.access_profile", access.to_string()),
            ("pt.egress_profile", access.to_string()),
            ("pt.profile", "true".to_string()),
            (
                "pt.earliest_departure_time",
                departure.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            ),
            ("pt.arrive_by", "false".to_string()),
            ("pt.limit_street_time", format!("PT{}M", query.minutes)),
            ("reverse_flow", "false".to_string()),
        ]);
    }
    params
}

/// JSON body of a calibration route request.
pub fn route_body(from: Point<f64>, to: Point<f64>, factors: &FactorSet) -> serde_json::Value {
    json!({
        "points": [[from.x(), from.y()], [to.x(), to.y()]],
        "profile": CALIBRATION_PROFILE,
        "points_encoded": false,
        "instructions": false,
        "elevation": false,
        "ch.disable": true,
        "custom_model": {
            "distance_influence": DISTANCE_INFLUENCE,
            "speed": speed_rules(factors),
        },
    })
}

#[async_trait]
impl RoutingEngine for GraphHopperClient {
    async fn nearest(&self, point: Point<f64>) -> Result<Point<f64>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.get_nearest(point).await {
                Ok(NearestResponse {
                    coordinates: Some(c),
                    ..
                }) if c.len() >= 2 => return Ok(Point::new(c[0], c[1])),
                Ok(response) => {
                    warn!(
                        point = %lat_lon(point),
                        message = response.message.as_deref().unwrap_or(""),
                        "Engine could not snap point, keeping it"
                    );
                    return Ok(point);
                }
                Err(e) if e.is_connect() && self.retry.has_attempts_after(attempt) => {
                    error!(attempt, error = %e, "Couldn't connect to the engine, retrying");
                    tokio::time::sleep(self.retry.delay_after(attempt)).await;
                }
                Err(e) => return Err(Error::Network(format!("nearest: {}", e))),
            }
        }
    }

    async fn isochrone(&self, query: &IsochroneQuery) -> Result<Option<Vec<MultiPolygon<f64>>>> {
        let response: IsochroneResponse = self
            .client
            .get(format!("{}/isochrone", self.base_url))
            .query(&isochrone_params(query))
            .send()
            .await
            .map_err(|e| Error::Network(format!("isochrone: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(format!("isochrone: {}", e)))?;

        let features = match response.polygons {
            Some(Polygons::Features(features)) => features,
            Some(Polygons::Collection(collection)) => collection.features,
            None => {
                warn!(
                    point = %lat_lon(query.point),
                    profile = query.profile,
                    message = response.message.as_deref().unwrap_or(""),
                    "Isochrone response without polygons"
                );
                return Ok(None);
            }
        };

        let mut polygons = Vec::with_capacity(features.len());
        for feature in features {
            let Some(geometry) = feature.geometry else {
                continue;
            };
            let geometry = geo::Geometry::<f64>::try_from(geometry.value)
                .map_err(|e| Error::MalformedResponse(format!("isochrone geometry: {}", e)))?;
            if let Some(mp) = into_multipolygon(geometry) {
                polygons.push(mp);
            }
        }
        debug!(profile = query.profile, minutes = query.minutes, features = polygons.len(), "Isochrone");
        Ok(Some(polygons))
    }

    async fn route(
        &self,
        from: Point<f64>,
        to: Point<f64>,
        factors: &FactorSet,
    ) -> Result<Option<RouteSummary>> {
        let response: RouteResponse = self
            .client
            .post(format!("{}/route", self.base_url))
            .json(&route_body(from, to, factors))
            .send()
            .await
            .map_err(|e| Error::Network(format!("route: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(format!("route: {}", e)))?;

        match response.paths.as_deref() {
            Some([path, ..]) => Ok(Some(RouteSummary {
                duration_s: (path.time / 1000.0).floor(),
                distance_m: path.distance,
            })),
            _ => {
                warn!(
                    from = %lat_lon(from),
                    to = %lat_lon(to),
                    message = response.message.as_deref().unwrap_or(""),
                    "Engine found no route"
                );
                Ok(None)
            }
        }
    }
}
