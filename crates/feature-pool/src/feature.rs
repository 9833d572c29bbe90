//! Feature snapshots and layer metadata types
//!
//! A [`Feature`] is an immutable copy of a record from the backing layer: its id, an optional
//! geometry and its attribute values. The pool shares snapshots as `Arc<Feature>`; a refresh
//! replaces the whole snapshot instead of editing it.

use geo::{BoundingRect, Geometry, Rect};
use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Unique identifier of a feature within its layer
pub type FeatureId = i64;

/// Attribute values keyed by field name
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A single attribute value
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

/// Coarse geometry family of a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GeometryType {
    Point,
    Line,
    Polygon,
    #[default]
    Unknown,
    Null,
}

impl GeometryType {
    /// Classify a geometry. Collections report `Unknown`.
    pub fn of(geometry: Option<&Geometry<f64>>) -> Self {
        match geometry {
            None => GeometryType::Null,
            Some(Geometry::Point(_)) | Some(Geometry::MultiPoint(_)) => GeometryType::Point,
            Some(Geometry::Line(_))
            | Some(Geometry::LineString(_))
            | Some(Geometry::MultiLineString(_)) => GeometryType::Line,
            Some(Geometry::Polygon(_))
            | Some(Geometry::MultiPolygon(_))
            | Some(Geometry::Rect(_))
            | Some(Geometry::Triangle(_)) => GeometryType::Polygon,
            Some(Geometry::GeometryCollection(_)) => GeometryType::Unknown,
        }
    }
}

/// Coordinate reference system descriptor
///
/// Only the authority identifier is carried (e.g. `EPSG:3857`); reprojection is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Crs {
    auth_id: String,
}

impl Crs {
    pub fn new(auth_id: impl Into<String>) -> Self {
        Self {
            auth_id: auth_id.into(),
        }
    }

    /// Web Mercator, the CRS used by the GPX loader
    pub fn web_mercator() -> Self {
        Self::new("EPSG:3857")
    }

    #[inline]
    pub fn auth_id(&self) -> &str {
        &self.auth_id
    }

    /// A CRS without an authority id is treated as unknown
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.auth_id.is_empty()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.auth_id)
    }
}

/// Immutable snapshot of a feature's geometry and attributes
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Feature {
    id: FeatureId,
    geometry: Option<Geometry<f64>>,
    attributes: Attributes,
}

impl Feature {
    /// Create a feature with a geometry and no attributes
    pub fn new(id: FeatureId, geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            id,
            geometry: Some(geometry.into()),
            attributes: Attributes::new(),
        }
    }

    /// Create an attribute-only feature
    pub fn without_geometry(id: FeatureId) -> Self {
        Self {
            id,
            geometry: None,
            attributes: Attributes::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[inline]
    pub fn id(&self) -> FeatureId {
        self.id
    }

    #[inline]
    pub fn geometry(&self) -> Option<&Geometry<f64>> {
        self.geometry.as_ref()
    }

    #[inline]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    #[inline]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Bounding box of the geometry, `None` for missing or empty geometries
    pub fn bounding_box(&self) -> Option<Rect<f64>> {
        self.geometry.as_ref().and_then(|g| g.bounding_rect())
    }

    #[inline]
    pub fn geometry_type(&self) -> GeometryType {
        GeometryType::of(self.geometry.as_ref())
    }
}
