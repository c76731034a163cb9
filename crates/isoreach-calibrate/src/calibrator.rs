//! Calibration driver.
//!
//! Fits the peak and off-peak speed models of a city's engine so that its
//! car routes between sample points match the reference router, then
//! rebuilds the engine once with both models in place.

use crate::comparison::Comparator;
use crate::reference::ReferenceMemo;
use crate::simplex::{NelderMead, Objective};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use chrono_tz::Tz;
use geo::Point;
use isoreach_core::batch::localize;
use isoreach_core::ports::{ReferenceRouter, RoutingEngine};
use isoreach_core::{CityId, Error, FactorBounds, FactorSet, Period, Result, TimezoneFinder};
use isoreach_engine::EngineManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// The parts of the engine lifecycle calibration drives.
#[async_trait]
pub trait EngineControl: Send {
    fn city_id(&self) -> &CityId;

    /// Whether calibrated factors for the city are already available.
    fn is_calibrated(&self) -> bool;

    async fn set_factors(&mut self, period: Period, factors: FactorSet) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    async fn build(&mut self, force: bool) -> Result<()>;
}

#[async_trait]
impl EngineControl for EngineManager {
    fn city_id(&self) -> &CityId {
        EngineManager::city_id(self)
    }

    fn is_calibrated(&self) -> bool {
        EngineManager::is_calibrated(self) || self.has_cached_factors()
    }

    async fn set_factors(&mut self, period: Period, factors: FactorSet) -> Result<()> {
        EngineManager::set_factors(self, period, factors).await
    }

    async fn stop(&mut self) -> Result<()> {
        EngineManager::stop(self).await
    }

    async fn build(&mut self, force: bool) -> Result<()> {
        EngineManager::build(self, force).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationOptions {
    pub force: bool,
    pub bounds: FactorBounds,
    /// Initial value of every factor.
    pub start: f64,
    pub max_evaluations: usize,
    pub tolerance: f64,
    /// Sample sizes above this are slow for little gain.
    pub warn_above: usize,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            force: false,
            bounds: FactorBounds::default(),
            start: 0.8,
            max_evaluations: 40,
            tolerance: 5.0,
            warn_above: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationOutcome {
    /// Factors from an earlier calibration were kept.
    Skipped,
    Calibrated { peak: FactorSet, off_peak: FactorSet },
}

struct PeriodObjective<'a> {
    comparator: &'a Comparator<'a>,
    period: Period,
    departure: DateTime<Tz>,
}

#[async_trait]
impl Objective for PeriodObjective<'_> {
    async fn evaluate(&mut self, x: &[f64]) -> Result<f64> {
        let factors = FactorSet::from_slice(x)?;
        let set = self
            .comparator
            .compare(&factors, self.period, &self.departure)
            .await?;
        if set.pairs.is_empty() {
            return Err(Error::Calibration(format!(
                "no comparable routes for {} ({} pairs skipped)",
                self.period, set.skipped
            )));
        }
        Ok(set.total_score())
    }
}

/// Calibrates engine speed models against a reference router.
pub struct Calibrator {
    engine: Arc<dyn RoutingEngine>,
    reference: Arc<dyn ReferenceRouter>,
    timezones: Arc<TimezoneFinder>,
    memo: ReferenceMemo,
}

impl Calibrator {
    pub fn new(
        engine: Arc<dyn RoutingEngine>,
        reference: Arc<dyn ReferenceRouter>,
        timezones: Arc<TimezoneFinder>,
        memo: ReferenceMemo,
    ) -> Self {
        Self {
            engine,
            reference,
            timezones,
            memo,
        }
    }

    /// Calibrate both periods, then force one rebuild of the engine.
    ///
    /// The engine is stopped before any error is returned.
    pub async fn calibrate<C: EngineControl + ?Sized>(
        &self,
        control: &mut C,
        points: &[Point<f64>],
        peak: NaiveDateTime,
        off_peak: NaiveDateTime,
        options: &CalibrationOptions,
    ) -> Result<CalibrationOutcome> {
        if control.is_calibrated() && !options.force {
            info!(city = %control.city_id(), "Already calibrated from cached factors, skipping");
            return Ok(CalibrationOutcome::Skipped);
        }
        if points.len() > options.warn_above {
            warn!(
                points = points.len(),
                "Calibrating with more than {} points is much slower and barely better",
                options.warn_above
            );
        }

        match self.run(control, points, peak, off_peak, options).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(city = %control.city_id(), error = %e, "Calibration failed, stopping engine");
                if let Err(stop_err) = control.stop().await {
                    warn!(error = %stop_err, "Failed to stop engine after calibration failure");
                }
                Err(e)
            }
        }
    }

    async fn run<C: EngineControl + ?Sized>(
        &self,
        control: &mut C,
        points: &[Point<f64>],
        peak: NaiveDateTime,
        off_peak: NaiveDateTime,
        options: &CalibrationOptions,
    ) -> Result<CalibrationOutcome> {
        if points.len() < 2 {
            return Err(Error::Calibration(format!(
                "need at least 2 sample points, got {}",
                points.len()
            )));
        }

        let tz = self.timezones.timezone_at(points[0])?;
        let peak_dt = localize(tz, peak)?;
        let off_dt = localize(tz, off_peak)?;
        info!(peak = %peak_dt, off_peak = %off_dt, "Localised calibration departures");

        let mut snapped = Vec::with_capacity(points.len());
        for point in points {
            snapped.push(self.engine.nearest(*point).await?);
        }

        let city_id = control.city_id().clone();
        let comparator = Comparator {
            city_id: &city_id,
            points: &snapped,
            engine: self.engine.as_ref(),
            reference: self.reference.as_ref(),
            memo: &self.memo,
        };
        let optimizer = NelderMead::uniform(5, options.bounds.min, options.bounds.max)
            .with_max_evaluations(options.max_evaluations)
            .with_tolerance(options.tolerance);
        let start = FactorSet::uniform(options.bounds.clamp(options.start));

        let mut fitted = Vec::with_capacity(Period::ALL.len());
        for (period, departure) in [(Period::Peak, peak_dt), (Period::OffPeak, off_dt)] {
            info!(city = %city_id, period = %period, "Starting calibration");
            let mut objective = PeriodObjective {
                comparator: &comparator,
                period,
                departure,
            };
            let minimum = optimizer.minimize(&mut objective, start.as_slice()).await?;
            let factors = FactorSet::from_slice(&minimum.x)?;
            info!(
                city = %city_id,
                period = %period,
                factors = %factors,
                score = minimum.value,
                evaluations = minimum.evaluations,
                converged = minimum.converged,
                "Calibrated speed factors"
            );
            fitted.push((period, factors));
        }

        for (period, factors) in &fitted {
            control.set_factors(*period, *factors).await?;
        }
        control.stop().await?;
        control.build(true).await?;

        Ok(CalibrationOutcome::Calibrated {
            peak: fitted[0].1,
            off_peak: fitted[1].1,
        })
    }
}
