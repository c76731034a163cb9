//! Scripted fakes for the external ports.

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use geo::{MultiPolygon, Point, Rect, coord};
use isoreach_core::ports::{IsochroneApi, IsochroneQuery, ReferenceRouter, RouteSummary, RoutingEngine};
use isoreach_core::{BatchRow, FactorSet, Result};
use isoreach_engine::manager::READY_MARKER;
use isoreach_engine::{ContainerHandle, ContainerRuntime, ContainerSpec, LogStream};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Container runtime that either becomes ready at once or exits on every attempt.
pub struct ScriptedRuntime {
    ready: bool,
    starts: AtomicUsize,
    live: Mutex<Vec<ContainerHandle>>,
}

impl ScriptedRuntime {
    pub fn ready() -> Self {
        Self::new(true)
    }

    /// Every container exits without printing the ready marker.
    pub fn never_ready() -> Self {
        Self::new(false)
    }

    fn new(ready: bool) -> Self {
        Self {
            ready,
            starts: AtomicUsize::new(0),
            live: Mutex::new(Vec::new()),
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Containers started and not yet removed.
    pub fn live(&self) -> usize {
        self.live.lock().map(|l| l.len()).unwrap_or_default()
    }

    fn remove(&self, handle: &ContainerHandle) {
        if let Ok(mut live) = self.live.lock() {
            live.retain(|h| h.id != handle.id);
        }
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let n = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = ContainerHandle {
            id: format!("{}-{}", spec.name, n),
            name: spec.name.clone(),
        };
        if let Ok(mut live) = self.live.lock() {
            live.push(handle.clone());
        }
        Ok(handle)
    }

    fn logs<'a>(&'a self, _handle: &'a ContainerHandle) -> LogStream<'a> {
        let mut lines = vec![Ok("Loading graph".to_string())];
        if self.ready {
            lines.push(Ok(format!("12:00:00 INFO {}", READY_MARKER)));
        }
        Box::pin(futures::stream::iter(lines))
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<()> {
        self.remove(handle);
        Ok(())
    }

    async fn list_tagged(&self, _label: &str) -> Result<Vec<ContainerHandle>> {
        Ok(self.live.lock().map(|l| l.clone()).unwrap_or_default())
    }

    async fn force_remove(&self, handle: &ContainerHandle) -> Result<()> {
        self.remove(handle);
        Ok(())
    }
}

/// Square of `half` degrees around `point`.
pub fn square_around(point: Point<f64>, half: f64) -> MultiPolygon<f64> {
    let rect = Rect::new(
        coord! { x: point.x() - half, y: point.y() - half },
        coord! { x: point.x() + half, y: point.y() + half },
    );
    MultiPolygon::new(vec![rect.to_polygon()])
}

/// Base speed of the fake road network in m/s.
pub const BASE_SPEED: f64 = 14.0;

fn distance_m(from: Point<f64>, to: Point<f64>) -> f64 {
    let dx = (to.x() - from.x()) * 111_320.0 * from.y().to_radians().cos();
    let dy = (to.y() - from.y()) * 111_320.0;
    (dx * dx + dy * dy).sqrt()
}

/// Routing engine answering with square isochrones and straight-line routes.
#[derive(Default)]
pub struct CountingEngine {
    isochrones: AtomicUsize,
    routes: AtomicUsize,
    /// Answer every isochrone with this many features.
    pub features: Option<usize>,
    /// Eastward shift applied by `nearest`, in degrees.
    pub snap_offset: f64,
}

impl CountingEngine {
    pub fn with_features(features: usize) -> Self {
        Self {
            features: Some(features),
            ..Default::default()
        }
    }

    pub fn snapping(snap_offset: f64) -> Self {
        Self {
            snap_offset,
            ..Default::default()
        }
    }

    pub fn isochrone_calls(&self) -> usize {
        self.isochrones.load(Ordering::SeqCst)
    }

    pub fn route_calls(&self) -> usize {
        self.routes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoutingEngine for CountingEngine {
    async fn nearest(&self, point: Point<f64>) -> Result<Point<f64>> {
        Ok(Point::new(point.x() + self.snap_offset, point.y()))
    }

    async fn isochrone(&self, query: &IsochroneQuery) -> Result<Option<Vec<MultiPolygon<f64>>>> {
        self.isochrones.fetch_add(1, Ordering::SeqCst);
        let half = query.minutes as f64 * 0.0005;
        let features = self.features.unwrap_or(1);
        Ok(Some(
            (0..features)
                .map(|_| square_around(query.point, half))
                .collect(),
        ))
    }

    async fn route(
        &self,
        from: Point<f64>,
        to: Point<f64>,
        factors: &FactorSet,
    ) -> Result<Option<RouteSummary>> {
        self.routes.fetch_add(1, Ordering::SeqCst);
        let mean = factors.as_slice().iter().sum::<f64>() / factors.as_slice().len() as f64;
        let distance = distance_m(from, to);
        Ok(Some(RouteSummary {
            duration_s: (distance / (BASE_SPEED * mean)).floor(),
            distance_m: distance,
        }))
    }
}

/// Reference router whose traffic slows the base speed by a fixed factor.
pub struct TrafficReference {
    /// Factor before 07:00 UTC.
    pub peak: f64,
    pub off_peak: f64,
    calls: AtomicUsize,
}

impl TrafficReference {
    pub fn new(peak: f64, off_peak: f64) -> Self {
        Self {
            peak,
            off_peak,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReferenceRouter for TrafficReference {
    async fn route(
        &self,
        from: Point<f64>,
        to: Point<f64>,
        departure: DateTime<Utc>,
    ) -> Result<Option<RouteSummary>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let factor = if departure.hour() < 7 { self.peak } else { self.off_peak };
        let distance = distance_m(from, to);
        Ok(Some(RouteSummary {
            duration_s: (distance / (BASE_SPEED * factor)).floor(),
            distance_m: distance,
        }))
    }
}

/// Asynchronous isochrone API that accepts everything and finishes at once.
#[derive(Default)]
pub struct InstantIsochroneApi {
    pub submits: AtomicUsize,
    /// Rows with these pids are rejected on submission.
    pub rejected: Vec<usize>,
}

impl InstantIsochroneApi {
    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IsochroneApi for InstantIsochroneApi {
    async fn submit(&self, row: &BatchRow) -> Result<Option<String>> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        if self.rejected.contains(&row.pid) {
            return Ok(None);
        }
        Ok(Some(format!(
            "callback/{}/{}/{}",
            row.origin.x(),
            row.origin.y(),
            row.minutes
        )))
    }

    async fn poll(&self, callback_url: &str) -> Result<Option<String>> {
        Ok(callback_url
            .strip_prefix("callback/")
            .map(|rest| format!("result/{}", rest)))
    }

    async fn fetch_result(&self, result_url: &str) -> Result<Option<MultiPolygon<f64>>> {
        let parts: Vec<f64> = result_url
            .split('/')
            .skip(1)
            .filter_map(|p| p.parse().ok())
            .collect();
        match parts.as_slice() {
            [x, y, minutes] => Ok(Some(square_around(Point::new(*x, *y), minutes * 0.0005))),
            _ => Ok(None),
        }
    }
}
