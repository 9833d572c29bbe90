//! Feature requests passed to the backing source
//!
//! A request combines optional filters; a feature matches when it passes all of them.

use crate::{AttributeValue, Feature, FeatureId, utils};
use geo::Rect;
use std::collections::HashSet;

/// Filters passed to [`FeatureSource::get_features`](crate::FeatureSource::get_features)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRequest {
    ids: Option<HashSet<FeatureId>>,
    filter_rect: Option<Rect<f64>>,
    attribute_filter: Option<(String, AttributeValue)>,
    limit: Option<usize>,
}

impl FeatureRequest {
    /// Request every feature of the layer
    pub fn all() -> Self {
        Self::default()
    }

    /// Request exactly one feature by id
    pub fn by_id(id: FeatureId) -> Self {
        Self::by_ids([id])
    }

    /// Request a set of features by id
    pub fn by_ids(ids: impl IntoIterator<Item = FeatureId>) -> Self {
        Self {
            ids: Some(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Request features whose bounding box intersects `rect`
    pub fn by_rect(rect: Rect<f64>) -> Self {
        Self::default().with_rect(rect)
    }

    pub fn with_rect(mut self, rect: Rect<f64>) -> Self {
        self.filter_rect = Some(rect);
        self
    }

    /// Keep only features whose attribute `name` equals `value`
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attribute_filter = Some((name.into(), value.into()));
        self
    }

    /// Stop after `limit` matching features
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[inline]
    pub fn ids(&self) -> Option<&HashSet<FeatureId>> {
        self.ids.as_ref()
    }

    #[inline]
    pub fn filter_rect(&self) -> Option<Rect<f64>> {
        self.filter_rect
    }

    #[inline]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Check whether a feature passes every filter of this request
    ///
    /// Features without geometry never match a rectangle filter.
    pub fn matches(&self, feature: &Feature) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&feature.id()) {
                return false;
            }
        }

        if let Some(rect) = self.filter_rect {
            match feature.bounding_box() {
                Some(bbox) if utils::rects_intersect(bbox, rect) => {}
                _ => return false,
            }
        }

        if let Some((name, value)) = &self.attribute_filter {
            if feature.attribute(name) != Some(value) {
                return false;
            }
        }

        true
    }
}
