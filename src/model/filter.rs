//! Per-dimension query filters.
//!
//! A filter bounds how far (`distance`) and in which relative direction
//! (`direction`) a candidate may lie from the query origin. Units follow the
//! dimension: seconds for a time axis, metres and compass degrees for a
//! spherical one. A `[0, 0]` range means "no constraint".

use serde::{Deserialize, Serialize};

/// Closed interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// `[0, 0]`: matches everything.
    pub const fn unconstrained() -> Self {
        Self { min: 0.0, max: 0.0 }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.min == 0.0 && self.max == 0.0
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }

    /// `contains` with both ends pushed out by `slack`.
    pub fn contains_within(&self, v: f64, slack: f64) -> bool {
        v >= self.min - slack && v <= self.max + slack
    }

    pub fn covers(&self, other: &Range) -> bool {
        self.min <= other.min && self.max >= other.max
    }
}

impl From<[f64; 2]> for Range {
    fn from([min, max]: [f64; 2]) -> Self {
        Self { min, max }
    }
}

/// Distance and direction bounds for one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Filter {
    pub distance: Range,
    pub direction: Range,
}

impl Filter {
    pub fn new(distance: impl Into<Range>, direction: impl Into<Range>) -> Self {
        Self {
            distance: distance.into(),
            direction: direction.into(),
        }
    }

    /// No constraint on this dimension.
    pub fn any() -> Self {
        Self::default()
    }

    /// Distance `[0, max]` in any direction. `within(0.0)` is unconstrained.
    pub fn within(max: f64) -> Self {
        Self {
            distance: Range::new(0.0, max),
            direction: Range::unconstrained(),
        }
    }

    pub fn between(min: f64, max: f64) -> Self {
        Self {
            distance: Range::new(min, max),
            direction: Range::unconstrained(),
        }
    }

    pub fn towards(mut self, min: f64, max: f64) -> Self {
        self.direction = Range::new(min, max);
        self
    }

    pub fn direction_unconstrained(&self, domain: &Range) -> bool {
        self.direction.is_unconstrained() || self.direction.covers(domain)
    }
}

impl From<[[f64; 2]; 2]> for Filter {
    fn from([distance, direction]: [[f64; 2]; 2]) -> Self {
        Self::new(distance, direction)
    }
}

/// Filters keyed by dimension name. Dimensions without an entry are
/// unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSet {
    entries: Vec<(String, Filter)>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, filter: impl Into<Filter>) -> Self {
        let name = name.into();
        let filter = filter.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = filter,
            None => self.entries.push((name, filter)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Filter> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
