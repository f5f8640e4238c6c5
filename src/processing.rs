use crate::colorscale::{ColorScale, ScaleError};
use crate::config::AppConfig;
use crate::join::{self, JoinDiagnostics};
use crate::simplify::{self, SimplifyStats};
use crate::types::{AttributeTable, JoinedTract, RawTract};
use anyhow::{anyhow, Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

/// Everything the map needs, plus the diagnostics gathered on the way.
#[derive(Debug)]
pub struct Processed {
    pub tracts: Vec<JoinedTract>,
    pub join: JoinDiagnostics,
    pub simplify: SimplifyStats,
    /// Kept as a result so diagnostics survive an all-null metric.
    pub scale: Result<ColorScale, ScaleError>,
}

#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub metric: &'a str,
    pub join: &'a JoinDiagnostics,
    pub simplify: SimplifyStats,
    pub range: Option<(f64, f64)>,
    pub scale_error: Option<String>,
}

impl Processed {
    pub fn report<'a>(&'a self, metric: &'a str) -> Report<'a> {
        Report {
            metric,
            join: &self.join,
            simplify: self.simplify,
            range: self.scale.as_ref().ok().map(ColorScale::range),
            scale_error: self.scale.as_ref().err().map(|e| e.to_string()),
        }
    }
}

pub fn process(
    config: &AppConfig,
    raw_tracts: Vec<RawTract>,
    table: &AttributeTable,
) -> Result<Processed> {
    let metric = &config.processing.metric;
    if !table.columns.iter().any(|c| c == metric) {
        return Err(anyhow!("Metric column '{}' not found in attribute data", metric));
    }

    // 1. Normalize and join
    let normalizer = config
        .identifier
        .normalizer()
        .context("Invalid identifier settings")?;
    let outcome = join::join(raw_tracts, table, &normalizer, config.join.on_duplicate)
        .context("Join aborted")?;
    outcome.diagnostics.log();
    let mut tracts = outcome.tracts;

    // 2. Reproject to lon/lat before any tolerance is applied
    let crs = config.input.source_crs;
    if !crs.is_geographic() {
        info!("Reprojecting {} tracts from {} to EPSG:4326", tracts.len(), crs);
        tracts
            .par_iter_mut()
            .for_each(|t| t.geometry = crs.reproject(&t.geometry));
    }

    // 3. Simplify
    let tolerance = config.processing.simplify_tolerance;
    let (tracts, stats) = simplify::simplify_tracts(tracts, tolerance);
    info!(
        "Simplified {} polygons at tolerance {}: {} -> {} vertices ({} kept unsimplified)",
        stats.polygons, tolerance, stats.vertices_before, stats.vertices_after, stats.fallbacks
    );

    // 4. Color scale over the joined metric
    let scale = ColorScale::from_values(
        tracts.iter().map(|t| t.metric(metric)),
        config.map.palette,
        config.map.no_data_color,
    );
    match &scale {
        Ok(s) => {
            let (min, max) = s.range();
            info!("{} range: {} to {}", metric, min, max);
        }
        Err(e) => warn!("{}: {}", metric, e),
    }

    Ok(Processed {
        tracts,
        join: outcome.diagnostics,
        simplify: stats,
        scale,
    })
}
