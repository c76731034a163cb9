//! Test fixtures for origins, specs and population grids.

use chrono::{NaiveDate, NaiveDateTime};
use geo::Point;
use isoreach_core::{IsochroneSpec, Origin, Source, TravelMode};

/// Minimal engine template with both calibration profiles.
pub const ENGINE_TEMPLATE: &str = r#"graphhopper:
  datareader.file: ""
  graph.location: ""
  profiles:
    - name: car_cbr_peak
    - name: car_cbr_off
    - name: foot
    - name: bike
"#;

pub const CITY: &str = "2973";

/// Local wall-clock departure on a Tuesday.
pub fn departure(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 6, 13)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .unwrap_or_default()
}

/// `n` origins about 1 km apart in central Stockholm.
pub fn stockholm_origins(n: usize) -> Vec<Origin> {
    Origin::enumerate((0..n).map(|i| Point::new(18.04 + i as f64 * 0.018, 59.33)))
}

/// Walking and cycling at 15 minutes from the local engine.
pub fn walking_and_cycling() -> Vec<IsochroneSpec> {
    vec![
        IsochroneSpec::new(TravelMode::Walking, vec![15], departure(8, 30), Source::GraphHopper),
        IsochroneSpec::new(TravelMode::Cycling, vec![15], departure(8, 30), Source::GraphHopper),
    ]
}

/// GeoJSON grid of `cols` x `rows` cells of 0.01 degrees, population 100 each.
pub fn population_geojson(cols: usize, rows: usize) -> String {
    let mut features = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            let x = 18.04 + col as f64 * 0.01;
            let y = 59.33 + row as f64 * 0.01;
            features.push(serde_json::json!({
                "type": "Feature",
                "properties": { "cell_pop": 100 },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[x, y], [x + 0.01, y], [x + 0.01, y + 0.01], [x, y + 0.01], [x, y]]]
                }
            }));
        }
    }
    serde_json::json!({ "type": "FeatureCollection", "features": features }).to_string()
}
