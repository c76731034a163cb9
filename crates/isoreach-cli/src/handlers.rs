//! Command handlers.

use crate::config::Settings;
use crate::pipeline::{Pipeline, Services};
use anyhow::{Context, Result};
use isoreach_core::CityId;
use isoreach_engine::manager::remove_tagged_containers;
use isoreach_engine::{DockerRuntime, EngineLayout};
use tracing::{error, info, warn};

/// Build, calibrate and fetch for each city.
pub async fn run(settings: Settings, city: Option<String>, force_calibration: bool) -> Result<()> {
    let services = Services::connect(&settings).await?;
    let pipeline = Pipeline::new(settings, services);

    let selected = pipeline.settings().cities(city.as_deref()).len();
    let reports = pipeline.run(city.as_deref(), force_calibration).await;

    println!(
        "{:<12} {:>8} {:>8} {:>8} {:>7}  {}",
        "CITY", "DONE", "TOTAL", "PCT", "ENGINE", "RESULT"
    );
    for report in &reports {
        println!(
            "{:<12} {:>8} {:>8} {:>7.1}% {:>7}  {}",
            report.city_id,
            report.completeness.done,
            report.completeness.total,
            report.completeness.fraction * 100.0,
            if report.engine_started { "yes" } else { "no" },
            report
                .result
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }

    let failed = selected - reports.len();
    if failed > 0 {
        warn!(failed, selected, "Some cities failed, see the log above");
    }
    Ok(())
}

/// Print cached completeness per city.
pub async fn status(settings: Settings, city: Option<String>) -> Result<()> {
    let services = Services::connect(&settings).await?;
    let pipeline = Pipeline::new(settings, services);

    println!("{:<12} {:>8} {:>8} {:>8}", "CITY", "DONE", "TOTAL", "PCT");
    for city in pipeline.settings().cities(city.as_deref()) {
        match pipeline.status_city(&city).await {
            Ok(c) => println!(
                "{:<12} {:>8} {:>8} {:>7.1}%",
                city.id,
                c.done,
                c.total,
                c.fraction * 100.0
            ),
            Err(e) => {
                error!(city = %city.id, error = ?e, "Status failed");
                println!("{:<12} {:>8}", city.id, "error");
            }
        }
    }
    Ok(())
}

/// Recompute reach result files for completed cities.
pub async fn reach(settings: Settings, city: Option<String>) -> Result<()> {
    let services = Services::connect(&settings).await?;
    let pipeline = Pipeline::new(settings, services);

    for city in pipeline.settings().cities(city.as_deref()) {
        let city_id = CityId::new(city.id.clone());
        match pipeline.reach_city(&city_id, true).await {
            Ok(Some(path)) => println!("{} -> {}", city_id, path.display()),
            Ok(None) => println!("{} incomplete, skipped", city_id),
            Err(e) => error!(city = %city_id, error = ?e, "Reach failed"),
        }
    }
    Ok(())
}

/// Remove engine containers and the build lock left by an interrupted run.
pub async fn engine_stop(settings: &Settings) -> Result<()> {
    let runtime = DockerRuntime::connect().context("connecting to docker")?;
    remove_tagged_containers(&runtime).await?;

    let lock = EngineLayout::under(&settings.data_root).lock_path();
    match tokio::fs::remove_file(&lock).await {
        Ok(()) => info!(path = %lock.display(), "Removed engine lock"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("removing {}", lock.display())),
    }
    println!("Engine stopped");
    Ok(())
}
