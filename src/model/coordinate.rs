//! Coordinates and points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single value on one dimension.
///
/// Linear dimensions take a scalar; spherical dimensions take a
/// latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coordinate {
    Linear(f64),
    Spherical { lat: f64, lon: f64 },
}

impl Coordinate {
    pub fn linear(value: f64) -> Self {
        Coordinate::Linear(value)
    }

    pub fn spherical(lat: f64, lon: f64) -> Self {
        Coordinate::Spherical { lat, lon }
    }

    /// Epoch seconds (with sub-second fraction) for a time dimension.
    pub fn timestamp(at: DateTime<Utc>) -> Self {
        let secs = at.timestamp() as f64;
        let frac = f64::from(at.timestamp_subsec_nanos()) / 1e9;
        Coordinate::Linear(secs + frac)
    }

    pub fn now() -> Self {
        Self::timestamp(Utc::now())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Coordinate::Linear(_) => "linear",
            Coordinate::Spherical { .. } => "spherical",
        }
    }

    pub fn as_linear(&self) -> Option<f64> {
        match self {
            Coordinate::Linear(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_spherical(&self) -> Option<(f64, f64)> {
        match self {
            Coordinate::Spherical { lat, lon } => Some((*lat, *lon)),
            _ => None,
        }
    }
}

impl From<f64> for Coordinate {
    fn from(v: f64) -> Self {
        Coordinate::Linear(v)
    }
}

impl From<(f64, f64)> for Coordinate {
    fn from((lat, lon): (f64, f64)) -> Self {
        Coordinate::Spherical { lat, lon }
    }
}

/// One coordinate per dimension, in dimension order.
///
/// Order matters: a point only encodes against a space whose dimensions
/// carry the same names in the same order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    entries: Vec<(String, Coordinate)>,
}

impl Point {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a coordinate. Setting an existing name replaces it in place.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Coordinate>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Coordinate>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Coordinate> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Coordinate)> {
        self.entries.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, C: Into<Coordinate>> FromIterator<(N, C)> for Point {
    fn from_iter<I: IntoIterator<Item = (N, C)>>(iter: I) -> Self {
        let mut point = Point::new();
        for (name, value) in iter {
            point.set(name, value);
        }
        point
    }
}
