//! Bing Maps asynchronous isochrone client.

use async_trait::async_trait;
use geo::{LineString, MultiPolygon, Polygon};
use isoreach_core::ports::IsochroneApi;
use isoreach_core::{BatchRow, Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub const ISOCHRONES_ENDPOINT: &str = "https://dev.virtualearth.net/REST/v1/Routes/IsochronesAsync";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    resource_sets: Vec<ResourceSet>,
}

#[derive(Debug, Default, Deserialize)]
struct ResourceSet {
    #[serde(default)]
    resources: Vec<Resource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Resource {
    callback_url: Option<String>,
    result_url: Option<String>,
    polygons: Option<Vec<BingPolygon>>,
}

/// Rings of `[lat, lon]` pairs.
#[derive(Debug, Deserialize)]
struct BingPolygon {
    coordinates: Vec<Vec<[f64; 2]>>,
}

impl Envelope {
    /// The first resource, when there is exactly one resource set.
    fn into_resource(self) -> Option<Resource> {
        if self.resource_sets.len() != 1 {
            return None;
        }
        self.resource_sets.into_iter().next()?.resources.into_iter().next()
    }
}

#[derive(Clone)]
pub struct BingClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl BingClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: ISOCHRONES_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        self.client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Network(format!("bing: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(format!("bing: {}", e)))
    }
}

/// Query parameters of an isochrone submission, without the key.
pub fn submit_params(row: &BatchRow) -> Result<Vec<(&'static str, String)>> {
    let travel_mode = row.mode.external_mode().ok_or_else(|| {
        Error::InvalidRequest(format!("mode {} is not available from Bing", row.mode))
    })?;
    let optimise = if row.mode.is_driving() {
        "timeWithTraffic"
    } else {
        "time"
    };

    Ok(vec![
        ("waypoint", format!("{},{}", row.origin.y(), row.origin.x())),
        ("maxTime", row.minutes.to_string()),
        ("timeUnit", "minute".to_string()),
        ("distanceUnit", "kilometer".to_string()),
        ("optimise", optimise.to_string()),
        ("dateTime", row.departure.format("%d/%m/%Y %H:%M:%S").to_string()),
        ("travelMode", travel_mode.to_string()),
    ])
}

/// One polygon per ring, transposed from `[lat, lon]`.
fn to_multipolygon(polygons: Vec<BingPolygon>) -> MultiPolygon<f64> {
    let polygons = polygons
        .into_iter()
        .flat_map(|p| p.coordinates)
        .filter(|ring| ring.len() >= 3)
        .map(|ring| {
            let exterior: LineString<f64> = ring.into_iter().map(|[lat, lon]| (lon, lat)).collect();
            Polygon::new(exterior, vec![])
        })
        .collect();
    MultiPolygon::new(polygons)
}

#[async_trait]
impl IsochroneApi for BingClient {
    async fn submit(&self, row: &BatchRow) -> Result<Option<String>> {
        let mut query = submit_params(row)?;
        query.push(("key", self.api_key.clone()));
        debug!(uid = %row.uid, "Requesting Bing isochrone");

        let envelope: Envelope = match self.get(&self.endpoint, &query).await {
            Ok(envelope) => envelope,
            Err(Error::MalformedResponse(message)) => {
                warn!(uid = %row.uid, message = %message, "Bing rejected isochrone request");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        Ok(envelope.into_resource().and_then(|r| r.callback_url))
    }

    async fn poll(&self, callback_url: &str) -> Result<Option<String>> {
        let envelope: Envelope = self.get(callback_url, &[]).await?;
        Ok(envelope.into_resource().and_then(|r| r.result_url))
    }

    async fn fetch_result(&self, result_url: &str) -> Result<Option<MultiPolygon<f64>>> {
        let envelope: Envelope = self.get(result_url, &[]).await?;
        Ok(envelope
            .into_resource()
            .and_then(|r| r.polygons)
            .map(to_multipolygon))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use geo::Point;
    use isoreach_core::batch::expand_batch;
    use isoreach_core::{CityId, IsochroneSpec, Origin, Source, TravelMode};

    fn row(mode: TravelMode) -> BatchRow {
        let departure = NaiveDate::from_ymd_opt(2023, 8, 22)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        let specs = vec![IsochroneSpec::new(mode, vec![30], departure, Source::Bing)];
        let origins = Origin::enumerate([Point::new(18.07, 59.33)]);
        expand_batch(&CityId::new("2973"), &origins, &specs, chrono_tz::Europe::Stockholm)
            .unwrap()
            .remove(0)
    }

    #[test]
    fn test_submit_params_driving() {
        let params = submit_params(&row(TravelMode::DrivingPeak)).unwrap();
        let get = |k: &str| params.iter().find(|(key, _)| *key == k).unwrap().1.clone();
        assert_eq!(get("waypoint"), "59.33,18.07");
        assert_eq!(get("maxTime"), "30");
        assert_eq!(get("optimise"), "timeWithTraffic");
        assert_eq!(get("dateTime"), "22/08/2023 08:30:00");
        assert_eq!(get("travelMode"), "driving");
    }

    #[test]
    fn test_submit_params_walking_uses_time() {
        let params = submit_params(&row(TravelMode::Walking)).unwrap();
        assert!(params.contains(&("optimise", "time".to_string())));
    }

    #[test]
    fn test_result_rings_are_transposed() {
        let envelope: Envelope = serde_json::from_value(serde_json::json!({
            "resourceSets": [{
                "resources": [{
                    "polygons": [{
                        "coordinates": [[[59.0, 18.0], [59.0, 18.1], [59.1, 18.1], [59.0, 18.0]]]
                    }]
                }]
            }]
        }))
        .unwrap();
        let mp = to_multipolygon(envelope.into_resource().unwrap().polygons.unwrap());
        assert_eq!(mp.0.len(), 1);
        let first = mp.0[0].exterior().0[0];
        assert_eq!((first.x, first.y), (18.0, 59.0));
    }

    #[test]
    fn test_multiple_resource_sets_are_rejected() {
        let envelope: Envelope = serde_json::from_value(serde_json::json!({
            "resourceSets": [
                { "resources": [{ "callbackUrl": "http://a" }] },
                { "resources": [{ "callbackUrl": "http://b" }] }
            ]
        }))
        .unwrap();
        assert!(envelope.into_resource().is_none());
    }
}
