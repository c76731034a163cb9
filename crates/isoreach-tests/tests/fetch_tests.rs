//! Isochrone fetch scenarios against the in-memory cache.

use isoreach_core::ports::IsochroneCache;
use isoreach_core::{CacheRecord, CityId, Error, IsochroneSpec, Source, TimezoneFinder, TravelMode};
use isoreach_fetch::{FetchSettings, IsochroneFetcher};
use isoreach_tests::{
    CITY, CountingEngine, InstantIsochroneApi, TestContext, departure, square_around,
    stockholm_origins, walking_and_cycling,
};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn fetcher(ctx: &TestContext, engine: Arc<CountingEngine>) -> IsochroneFetcher {
    IsochroneFetcher::new(ctx.cache.clone(), engine, Arc::new(TimezoneFinder::new())).with_settings(
        FetchSettings {
            bing_poll_delay: Duration::ZERO,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_batch_has_one_uid_per_origin_mode_and_duration() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let fetcher = fetcher(&ctx, Arc::new(CountingEngine::default()));

    let rows = fetcher
        .expand(&CityId::new(CITY), &stockholm_origins(3), &walking_and_cycling())
        .expect("Failed to expand");
    assert_eq!(rows.len(), 6);
    let uids: HashSet<_> = rows.iter().map(|r| r.uid.clone()).collect();
    assert_eq!(uids.len(), 6);
    assert_eq!(rows[0].uid.as_str(), "2973-0-walking-15m-g");
    assert_eq!(rows[0].departure.to_rfc3339(), "2023-06-13T08:30:00+02:00");
}

#[tokio::test]
async fn test_dry_run_reports_pre_seeded_fraction_without_fetching() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let engine = Arc::new(CountingEngine::default());
    let fetcher = fetcher(&ctx, engine.clone());
    let city = CityId::new(CITY);
    let origins = stockholm_origins(3);
    let specs = walking_and_cycling();

    let rows = fetcher.expand(&city, &origins, &specs).unwrap();
    for row in &rows[..4] {
        ctx.cache
            .insert(&CacheRecord::from_row(row, square_around(row.origin, 0.004)))
            .await
            .unwrap();
    }

    let outcome = fetcher
        .get_isochrones(&city, &origins, &specs, true)
        .await
        .expect("Dry run failed");
    assert_eq!(outcome.completeness.total, 6);
    assert_eq!(outcome.completeness.done, 4);
    assert!((outcome.completeness.fraction - 4.0 / 6.0).abs() < 1e-12);
    assert!(outcome.rows.iter().all(|r| r.geometry.is_none()));

    assert_eq!(engine.isochrone_calls(), 0);
    assert_eq!(ctx.cache.count(&city).await.unwrap(), 4);
}

#[tokio::test]
async fn test_fetch_fills_missing_and_repeat_is_free() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let engine = Arc::new(CountingEngine::default());
    let fetcher = fetcher(&ctx, engine.clone());
    let city = CityId::new(CITY);
    let origins = stockholm_origins(3);
    let specs = walking_and_cycling();

    let rows = fetcher.expand(&city, &origins, &specs).unwrap();
    for row in &rows[..4] {
        ctx.cache
            .insert(&CacheRecord::from_row(row, square_around(row.origin, 0.004)))
            .await
            .unwrap();
    }

    let outcome = fetcher
        .get_isochrones(&city, &origins, &specs, false)
        .await
        .expect("Fetch failed");
    assert!(outcome.completeness.is_complete());
    assert_eq!(outcome.completeness.fraction, 1.0);
    assert_eq!(engine.isochrone_calls(), 2);
    assert!(outcome.rows.iter().all(|r| r.geometry.is_some()));

    // Pre-seeded geometry is left as it was.
    let seeded = ctx.cache.get(&rows[0].uid).await.unwrap().unwrap();
    assert_eq!(seeded.geometry, square_around(rows[0].origin, 0.004));

    let again = fetcher
        .get_isochrones(&city, &origins, &specs, false)
        .await
        .expect("Second fetch failed");
    assert!(again.completeness.is_complete());
    assert_eq!(engine.isochrone_calls(), 2);
    assert_eq!(ctx.cache.count(&city).await.unwrap(), 6);
}

#[tokio::test]
async fn test_engine_isochrones_are_buffered() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let fetcher = fetcher(&ctx, Arc::new(CountingEngine::default()));
    let city = CityId::new(CITY);
    let origins = stockholm_origins(1);
    let specs = vec![walking_and_cycling().remove(0)];

    let outcome = fetcher.get_isochrones(&city, &origins, &specs, false).await.unwrap();
    let stored = outcome.rows[0].geometry.clone().expect("Missing geometry");

    use geo::{BoundingRect, ChamberlainDuquetteArea};
    let raw = square_around(origins[0].point, 15.0 * 0.0005);
    assert!(stored.chamberlain_duquette_unsigned_area() > raw.chamberlain_duquette_unsigned_area());
    let (raw_rect, stored_rect) = (raw.bounding_rect().unwrap(), stored.bounding_rect().unwrap());
    assert!(stored_rect.min().x < raw_rect.min().x);
    assert!(stored_rect.max().y > raw_rect.max().y);
}

#[tokio::test]
async fn test_multi_feature_response_is_stored_empty_and_final() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let engine = Arc::new(CountingEngine::with_features(2));
    let fetcher = fetcher(&ctx, engine.clone());
    let city = CityId::new(CITY);
    let origins = stockholm_origins(1);
    let specs = walking_and_cycling();

    let outcome = fetcher.get_isochrones(&city, &origins, &specs, false).await.unwrap();
    assert!(outcome.completeness.is_complete());
    assert!(outcome.rows.iter().all(|r| r.is_unreachable()));

    fetcher.get_isochrones(&city, &origins, &specs, false).await.unwrap();
    assert_eq!(engine.isochrone_calls(), 2);
}

#[tokio::test]
async fn test_bing_rows_go_through_the_async_api() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let engine = Arc::new(CountingEngine::default());
    let bing = Arc::new(InstantIsochroneApi {
        rejected: vec![1],
        ..Default::default()
    });
    let fetcher = fetcher(&ctx, engine.clone()).with_bing(bing.clone());
    let city = CityId::new(CITY);
    let origins = stockholm_origins(3);
    let specs = vec![IsochroneSpec::new(
        TravelMode::DrivingPeak,
        vec![10, 25],
        departure(8, 30),
        Source::Bing,
    )];

    let outcome = fetcher.get_isochrones(&city, &origins, &specs, false).await.unwrap();
    assert_eq!(bing.submits(), 6);
    assert_eq!(engine.isochrone_calls(), 0);
    assert_eq!(outcome.completeness.total, 6);
    assert_eq!(outcome.completeness.done, 4);

    // Rejected rows stay missing and are retried next time.
    let missing: Vec<_> = outcome.rows.iter().filter(|r| !r.cached).map(|r| r.row.pid).collect();
    assert_eq!(missing, vec![1, 1]);
    assert_eq!(outcome.rows[0].row.uid.as_str(), "2973-0-driving_peak-10m-b");

    fetcher.get_isochrones(&city, &origins, &specs, false).await.unwrap();
    assert_eq!(bing.submits(), 8);
}

#[tokio::test]
async fn test_bing_rows_without_a_client_are_rejected() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let fetcher = fetcher(&ctx, Arc::new(CountingEngine::default()));
    let specs = vec![IsochroneSpec::new(TravelMode::Walking, vec![15], departure(8, 30), Source::Bing)];

    let result = fetcher
        .get_isochrones(&CityId::new(CITY), &stockholm_origins(1), &specs, false)
        .await;
    assert!(matches!(result, Err(Error::InvalidRequest(_))));
}

#[tokio::test]
async fn test_here_source_is_unsupported() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let fetcher = fetcher(&ctx, Arc::new(CountingEngine::default()));
    let specs = vec![IsochroneSpec::new(TravelMode::Walking, vec![15], departure(8, 30), Source::Here)];

    let result = fetcher
        .get_isochrones(&CityId::new(CITY), &stockholm_origins(1), &specs, false)
        .await;
    assert!(matches!(result, Err(Error::UnsupportedSource(_))));

    let dry = fetcher
        .get_isochrones(&CityId::new(CITY), &stockholm_origins(1), &specs, true)
        .await;
    assert!(matches!(dry, Err(Error::UnsupportedSource(_))));
}

#[tokio::test]
async fn test_batch_with_repeated_uids_is_rejected_before_fetching() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let engine = Arc::new(CountingEngine::default());
    let fetcher = fetcher(&ctx, engine.clone());
    let city = CityId::new(CITY);
    let origins = stockholm_origins(2);

    // The uid carries no departure, so the same mode at two times collides.
    let two_departures = vec![
        IsochroneSpec::new(TravelMode::Walking, vec![15], departure(8, 30), Source::GraphHopper),
        IsochroneSpec::new(TravelMode::Walking, vec![15, 30], departure(13, 30), Source::GraphHopper),
    ];
    let result = fetcher.get_isochrones(&city, &origins, &two_departures, false).await;
    assert!(matches!(result, Err(Error::InvalidRequest(_))));

    let repeated_duration = vec![IsochroneSpec::new(
        TravelMode::Cycling,
        vec![15, 15],
        departure(8, 30),
        Source::GraphHopper,
    )];
    assert!(matches!(
        fetcher.expand(&city, &origins, &repeated_duration),
        Err(Error::InvalidRequest(_))
    ));
    let dry = fetcher.get_isochrones(&city, &origins, &repeated_duration, true).await;
    assert!(matches!(dry, Err(Error::InvalidRequest(_))));

    assert_eq!(engine.isochrone_calls(), 0);
    assert_eq!(ctx.cache.count(&city).await.unwrap(), 0);
}
