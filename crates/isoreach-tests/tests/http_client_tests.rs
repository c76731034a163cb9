//! HTTP clients against wiremock servers.

use chrono::{TimeZone, Utc};
use geo::Point;
use isoreach_calibrate::GoogleRoutesClient;
use isoreach_core::batch::expand_batch;
use isoreach_core::ports::{IsochroneApi, IsochroneQuery, ReferenceRouter, RoutingEngine};
use isoreach_core::{
    CityId, FactorSet, IsochroneSpec, Origin, RetryPolicy, Source, TimezoneFinder, TravelMode,
};
use isoreach_engine::GraphHopperClient;
use isoreach_fetch::{BingClient, FetchSettings, IsochroneFetcher};
use isoreach_tests::{CITY, CountingEngine, TestContext, departure};
use std::sync::Arc;
use std::time::Duration;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn square_feature() -> serde_json::Value {
    json!({
        "type": "Feature",
        "properties": { "bucket": 0 },
        "geometry": {
            "type": "Polygon",
            "coordinates": [[[18.0, 59.3], [18.1, 59.3], [18.1, 59.4], [18.0, 59.4], [18.0, 59.3]]]
        }
    })
}

fn walking_query() -> IsochroneQuery {
    IsochroneQuery {
        point: Point::new(18.05, 59.33),
        profile: "foot",
        minutes: 15,
        departure: None,
        access_profile: None,
    }
}

#[tokio::test]
async fn test_graphhopper_nearest() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/nearest"))
        .and(query_param("point", "59.33,18.05"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "Point",
            "coordinates": [18.051, 59.331],
            "distance": 12.5
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nearest"))
        .and(query_param("point", "0,0"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "Point 0,0 is out of bounds"
        })))
        .mount(&server)
        .await;

    let client = GraphHopperClient::new(&server.uri()).with_retry(RetryPolicy::immediate(1));
    let snapped = client.nearest(Point::new(18.05, 59.33)).await.unwrap();
    assert_eq!(snapped, Point::new(18.051, 59.331));

    let unsnapped = client.nearest(Point::new(0.0, 0.0)).await.unwrap();
    assert_eq!(unsnapped, Point::new(0.0, 0.0));
}

#[tokio::test]
async fn test_graphhopper_isochrone_shapes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/isochrone"))
        .and(query_param("profile", "foot"))
        .and(query_param("time_limit", "900"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "polygons": [square_feature()]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/isochrone"))
        .and(query_param("profile", "bike"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "polygons": { "type": "FeatureCollection", "features": [square_feature(), square_feature()] }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/isochrone"))
        .and(query_param("profile", "pt"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "No transit feed"
        })))
        .mount(&server)
        .await;

    let client = GraphHopperClient::new(&server.uri());
    let walking = client.isochrone(&walking_query()).await.unwrap().unwrap();
    assert_eq!(walking.len(), 1);
    assert_eq!(walking[0].0.len(), 1);

    let cycling = IsochroneQuery {
        profile: "bike",
        ..walking_query()
    };
    assert_eq!(client.isochrone(&cycling).await.unwrap().unwrap().len(), 2);

    let transit = IsochroneQuery {
        profile: "pt",
        departure: Some(Utc.with_ymd_and_hms(2023, 6, 13, 6, 30, 0).unwrap()),
        access_profile: Some("foot"),
        ..walking_query()
    };
    assert!(client.isochrone(&transit).await.unwrap().is_none());
}

#[tokio::test]
async fn test_graphhopper_route() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .and(body_partial_json(json!({ "profile": "car_ctm", "ch.disable": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "paths": [{ "time": 179_900, "distance": 2150.5 }]
        })))
        .mount(&server)
        .await;

    let client = GraphHopperClient::new(&server.uri());
    let route = client
        .route(Point::new(18.0, 59.3), Point::new(18.02, 59.31), &FactorSet::uniform(0.8))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(route.duration_s, 179.0);
    assert_eq!(route.whole_minutes(), 2.0);
    assert_eq!(route.distance_m, 2150.5);
}

#[tokio::test]
async fn test_graphhopper_route_without_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "Connection between locations not found"
        })))
        .mount(&server)
        .await;

    let client = GraphHopperClient::new(&server.uri());
    let route = client
        .route(Point::new(18.0, 59.3), Point::new(18.02, 59.31), &FactorSet::uniform(0.8))
        .await
        .unwrap();
    assert!(route.is_none());
}

#[tokio::test]
async fn test_bing_submit_poll_and_fetch() {
    let server = MockServer::start().await;
    let callback = format!("{}/callback/1", server.uri());
    let result = format!("{}/result/1", server.uri());

    Mock::given(method("GET"))
        .and(path("/isochrones"))
        .and(query_param("key", "bing-key"))
        .and(query_param("travelMode", "driving"))
        .and(query_param("optimise", "timeWithTraffic"))
        .and(query_param("dateTime", "13/06/2023 08:30:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceSets": [{ "resources": [{ "callbackUrl": callback }] }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/callback/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceSets": [{ "resources": [{ "isCompleted": true, "resultUrl": result }] }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/result/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceSets": [{ "resources": [{
                "polygons": [{ "coordinates": [[[59.3, 18.0], [59.3, 18.1], [59.4, 18.1], [59.3, 18.0]]] }]
            }] }]
        })))
        .mount(&server)
        .await;

    let specs = vec![IsochroneSpec::new(
        TravelMode::DrivingPeak,
        vec![25],
        departure(8, 30),
        Source::Bing,
    )];
    let rows = expand_batch(
        &CityId::new(CITY),
        &Origin::enumerate([Point::new(18.05, 59.33)]),
        &specs,
        chrono_tz::Europe::Stockholm,
    )
    .unwrap();

    let client = BingClient::new("bing-key").with_endpoint(format!("{}/isochrones", server.uri()));
    let callback_url = client.submit(&rows[0]).await.unwrap().expect("Request not accepted");
    assert_eq!(callback_url, callback);

    let result_url = client.poll(&callback_url).await.unwrap().expect("Result not ready");
    let geometry = client.fetch_result(&result_url).await.unwrap().unwrap();
    assert_eq!(geometry.0.len(), 1);
    // Transposed to lon, lat.
    assert_eq!(geometry.0[0].exterior().0[1].x, 18.1);
    assert_eq!(geometry.0[0].exterior().0[1].y, 59.3);
}

#[tokio::test]
async fn test_bing_unfinished_poll_and_malformed_submit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/isochrones"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>Service unavailable</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/callback/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceSets": [{ "resources": [{ "isCompleted": false }] }]
        })))
        .mount(&server)
        .await;

    let specs = vec![IsochroneSpec::new(TravelMode::Walking, vec![15], departure(8, 30), Source::Bing)];
    let rows = expand_batch(
        &CityId::new(CITY),
        &Origin::enumerate([Point::new(18.05, 59.33)]),
        &specs,
        chrono_tz::Europe::Stockholm,
    )
    .unwrap();

    let client = BingClient::new("bing-key").with_endpoint(format!("{}/isochrones", server.uri()));
    assert!(client.submit(&rows[0]).await.unwrap().is_none());
    let polled = client
        .poll(&format!("{}/callback/2", server.uri()))
        .await
        .unwrap();
    assert!(polled.is_none());
}

#[tokio::test]
async fn test_bing_malformed_result_and_status_are_stored_empty() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let server = MockServer::start().await;

    for (minutes, callback) in [("15", "/callback/15"), ("30", "/callback/30")] {
        Mock::given(method("GET"))
            .and(path("/isochrones"))
            .and(query_param("maxTime", minutes))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resourceSets": [{ "resources": [{ "callbackUrl": format!("{}{}", server.uri(), callback) }] }]
            })))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/callback/15"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceSets": [{ "resources": [{
                "isCompleted": true,
                "resultUrl": format!("{}/result/15", server.uri())
            }] }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/result/15"))
        .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/callback/30"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let client = BingClient::new("bing-key").with_endpoint(format!("{}/isochrones", server.uri()));
    let fetcher = IsochroneFetcher::new(
        ctx.cache.clone(),
        Arc::new(CountingEngine::default()),
        Arc::new(TimezoneFinder::new()),
    )
    .with_settings(FetchSettings {
        bing_poll_delay: Duration::ZERO,
        ..Default::default()
    })
    .with_bing(Arc::new(client));

    let city = CityId::new(CITY);
    let origins = Origin::enumerate([Point::new(18.05, 59.33)]);
    let specs = vec![IsochroneSpec::new(TravelMode::Walking, vec![15, 30], departure(8, 30), Source::Bing)];

    let outcome = fetcher
        .get_isochrones(&city, &origins, &specs, false)
        .await
        .expect("Malformed Bing bodies must not fail the batch");
    assert!(outcome.completeness.is_complete());
    assert!(outcome.rows.iter().all(|r| r.is_unreachable()));

    // Stored empty, so nothing is requested again.
    let again = fetcher.get_isochrones(&city, &origins, &specs, false).await.unwrap();
    assert!(again.completeness.is_complete());
}

#[tokio::test]
async fn test_google_routes_static_duration() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/routes"))
        .and(header("X-Goog-Api-Key", "google-key"))
        .and(body_partial_json(json!({
            "travelMode": "DRIVE",
            "routingPreference": "TRAFFIC_AWARE",
            "departureTime": "2023-06-13T06:30:00Z"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "routes": [{ "duration": "900s", "staticDuration": "780s", "distanceMeters": 8400 }]
        })))
        .mount(&server)
        .await;

    let client = GoogleRoutesClient::new("google-key").with_endpoint(format!("{}/routes", server.uri()));
    let route = client
        .route(
            Point::new(18.0, 59.3),
            Point::new(18.1, 59.35),
            Utc.with_ymd_and_hms(2023, 6, 13, 6, 30, 0).unwrap(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(route.duration_s, 780.0);
    assert_eq!(route.distance_m, 8400.0);
}

#[tokio::test]
async fn test_google_routes_rejection_is_no_route() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/routes"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": 403, "message": "API key not valid" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/empty"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let departure = Utc.with_ymd_and_hms(2023, 6, 13, 6, 30, 0).unwrap();
    let rejected = GoogleRoutesClient::new("bad").with_endpoint(format!("{}/routes", server.uri()));
    assert!(rejected
        .route(Point::new(18.0, 59.3), Point::new(18.1, 59.35), departure)
        .await
        .unwrap()
        .is_none());

    let empty = GoogleRoutesClient::new("key").with_endpoint(format!("{}/empty", server.uri()));
    assert!(empty
        .route(Point::new(18.0, 59.3), Point::new(18.1, 59.35), departure)
        .await
        .unwrap()
        .is_none());
}
