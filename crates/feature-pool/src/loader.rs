//! Build in-memory layers from GPX files
//!
//! Every GPX track becomes one line feature in Web Mercator (EPSG:3857) with `name`,
//! `track_index` and `points` attributes. Files are read and parsed in parallel.

use crate::{
    Crs, Feature, FeatureId, GeometryType, LayerMetadata, MemoryLayer, PoolError, Result, utils,
};
use geo::{Coord, LineString, MultiLineString};
use rayon::prelude::*;
use std::path::Path;

/// Convert the tracks of a GPX document into features, numbering them from `first_id`
///
/// Tracks without any point are skipped and do not consume an id.
pub fn track_features(gpx_data: &gpx::Gpx, first_id: FeatureId) -> Vec<Feature> {
    let mut next_id = first_id;
    let mut features = Vec::new();

    for (track_index, track) in gpx_data.tracks.iter().enumerate() {
        let lines: Vec<LineString<f64>> = track
            .segments
            .iter()
            .filter(|segment| !segment.points.is_empty())
            .map(|segment| {
                segment
                    .points
                    .iter()
                    .map(|wp| {
                        let p = utils::wgs84_to_mercator(wp.point().y(), wp.point().x());
                        Coord { x: p.x(), y: p.y() }
                    })
                    .collect::<LineString<f64>>()
            })
            .collect();

        if lines.is_empty() {
            tracing::warn!("Skipping track {track_index} without points");
            continue;
        }

        let points: usize = lines.iter().map(|line| line.0.len()).sum();
        let mut feature = Feature::new(next_id, MultiLineString::new(lines))
            .with_attribute("track_index", track_index as i64)
            .with_attribute("points", points as i64);
        if let Some(name) = &track.name {
            feature = feature.with_attribute("name", name.as_str());
        }

        features.push(feature);
        next_id += 1;
    }

    features
}

/// Build a layer from already parsed GPX documents
pub fn layer_from_gpx(layer_id: &str, gpx_data: &[gpx::Gpx]) -> Result<MemoryLayer> {
    let mut features = Vec::new();
    for gpx in gpx_data {
        let first_id = features.len() as FeatureId;
        features.extend(track_features(gpx, first_id));
    }

    if features.is_empty() {
        return Err(PoolError::EmptyLayer);
    }

    tracing::info!(layer_id, features = features.len(), "Built layer from GPX data");

    let metadata = LayerMetadata {
        layer_id: layer_id.to_string(),
        geometry_type: GeometryType::Line,
        crs: Crs::web_mercator(),
    };
    Ok(MemoryLayer::new(metadata).with_features(features))
}

/// Load GPX files in parallel and build a layer from all their tracks
pub fn load_from_files<P: AsRef<Path> + Send + Sync>(
    layer_id: &str,
    paths: &[P],
) -> Result<MemoryLayer> {
    #[cfg(feature = "profiling")]
    profiling::scope!("loader::load_from_files");

    let gpx_data: Result<Vec<gpx::Gpx>> = paths
        .par_iter()
        .map(|path| {
            let file = std::fs::File::open(path.as_ref())?;
            let reader = std::io::BufReader::new(file);
            Ok(gpx::read(reader)?)
        })
        .collect();

    layer_from_gpx(layer_id, &gpx_data?)
}
