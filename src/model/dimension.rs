//! Dimension definitions and the capability trait the space compiler drives.
//!
//! A dimension is a closed set of variants (`Linear`, `Spherical`). The
//! compiler never matches on the variant: it only sees `DimensionCodec`,
//! which turns a coordinate into one quantized cell per axis and back.
//!
//! ```text
//! Linear     1 axis   [lower, upper]              → cell ∈ [0, 2^bits)
//! Spherical  2 axes   lat ∈ [lower, upper]        → cell ∈ [0, 2^bits)
//!                     lon wrapped to [-180, 180)  → cell ∈ [0, 2^bits)
//! ```

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use super::{Coordinate, Filter, Range};
use crate::{Error, Result};

/// Mean Earth radius (IUGG), metres.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Quantized cells, one per axis.
pub type Cells = SmallVec<[u64; 2]>;

/// Widest axis whose cells still round-trip through `f64` within one cell.
pub const MAX_AXIS_BITS: u32 = 48;

// ============================================================================
// Quantization
// ============================================================================

fn cell_count(bits: u32) -> f64 {
    2f64.powi(bits as i32)
}

/// Largest cell index representable in `bits` bits.
fn max_cell(bits: u32) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

/// Map `t ∈ [0, 1]` to a cell index (floor, clamped).
fn quantize(t: f64, bits: u32) -> u64 {
    let scaled = (t * cell_count(bits)).floor();
    if scaled <= 0.0 {
        0
    } else {
        // `as` saturates at u64::MAX
        (scaled as u64).min(max_cell(bits))
    }
}

fn cell_centre(cell: u64, bits: u32) -> f64 {
    (cell as f64 + 0.5) / cell_count(bits)
}

fn cell_lower(cell: u64, bits: u32) -> f64 {
    cell as f64 / cell_count(bits)
}

fn cell_upper(cell: u64, bits: u32) -> f64 {
    (cell as f64 + 1.0) / cell_count(bits)
}

// ============================================================================
// Capability trait
// ============================================================================

/// Coordinate range covered by a key prefix, per dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoordinateSpan {
    Linear { lower: f64, upper: f64 },
    Spherical { lat: (f64, f64), lon: (f64, f64) },
}

/// What the space compiler and the locality engine need from a dimension.
pub trait DimensionCodec: Send + Sync {
    /// Number of scalar axes this dimension interleaves into the key.
    fn axes(&self) -> usize;

    /// Most bits per axis worth spending.
    fn max_axis_bits(&self) -> u32 {
        MAX_AXIS_BITS
    }

    /// Quantize a coordinate to one cell per axis.
    fn normalize(&self, name: &str, value: &Coordinate, bits: u32) -> Result<Cells>;

    /// Cell centres back to a coordinate.
    fn denormalize(&self, cells: &[u64], bits: u32) -> Coordinate;

    /// Coordinate span of an inclusive cell range per axis.
    fn cell_span(&self, cells: &[(u64, u64)], bits: u32) -> CoordinateSpan;

    /// How far the decoded centre of a cell may sit from any value that
    /// encodes into it: the cell's full extent, which also absorbs `f64`
    /// rounding on the way in and out.
    fn cell_tolerance(&self, cells: &[u64], bits: u32) -> f64;

    fn distance(&self, a: &Coordinate, b: &Coordinate) -> f64;

    fn direction(&self, from: &Coordinate, to: &Coordinate) -> f64;

    /// The full range of values `direction` can return.
    fn direction_domain(&self) -> Range;

    fn direction_allowed(&self, direction: f64, range: &Range) -> bool {
        range.contains(direction)
    }

    /// Conservative: false only if no point of `span` can satisfy `filter`.
    fn may_match(&self, origin: &Coordinate, span: &CoordinateSpan, filter: &Filter) -> bool;

    /// Filter evaluation for a decoded candidate, with the distance bounds
    /// widened by `slack`.
    fn matches_within(
        &self,
        origin: &Coordinate,
        candidate: &Coordinate,
        filter: &Filter,
        slack: f64,
    ) -> bool {
        if !filter.distance.is_unconstrained()
            && !filter.distance.contains_within(self.distance(origin, candidate), slack)
        {
            return false;
        }
        if filter.direction_unconstrained(&self.direction_domain()) {
            return true;
        }
        self.direction_allowed(self.direction(origin, candidate), &filter.direction)
    }
}

// ============================================================================
// Linear
// ============================================================================

/// A bounded scalar axis, e.g. epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    pub lower: f64,
    pub upper: f64,
}

impl Linear {
    fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

impl DimensionCodec for Linear {
    fn axes(&self) -> usize {
        1
    }

    fn normalize(&self, name: &str, value: &Coordinate, bits: u32) -> Result<Cells> {
        let v = value.as_linear().ok_or_else(|| {
            Error::DimensionMismatch(format!(
                "dimension '{name}' is linear, got a {} coordinate",
                value.kind_name()
            ))
        })?;
        if !v.is_finite() || v < self.lower || v > self.upper {
            return Err(Error::OutOfBounds {
                dimension: name.to_string(),
                value: v,
                lower: self.lower,
                upper: self.upper,
            });
        }
        let t = (v - self.lower) / self.width();
        Ok(smallvec![quantize(t, bits)])
    }

    fn denormalize(&self, cells: &[u64], bits: u32) -> Coordinate {
        Coordinate::Linear(self.lower + cell_centre(cells[0], bits) * self.width())
    }

    fn cell_span(&self, cells: &[(u64, u64)], bits: u32) -> CoordinateSpan {
        let (lo, hi) = cells[0];
        CoordinateSpan::Linear {
            lower: self.lower + cell_lower(lo, bits) * self.width(),
            upper: self.lower + cell_upper(hi, bits) * self.width(),
        }
    }

    fn cell_tolerance(&self, _cells: &[u64], bits: u32) -> f64 {
        self.width() / cell_count(bits)
    }

    fn distance(&self, a: &Coordinate, b: &Coordinate) -> f64 {
        match (a.as_linear(), b.as_linear()) {
            (Some(a), Some(b)) => (b - a).abs(),
            _ => f64::NAN,
        }
    }

    /// -1 before, 0 at, +1 after the origin.
    fn direction(&self, from: &Coordinate, to: &Coordinate) -> f64 {
        match (from.as_linear(), to.as_linear()) {
            (Some(a), Some(b)) if b > a => 1.0,
            (Some(a), Some(b)) if b < a => -1.0,
            (Some(_), Some(_)) => 0.0,
            _ => f64::NAN,
        }
    }

    fn direction_domain(&self) -> Range {
        Range::new(-1.0, 1.0)
    }

    fn may_match(&self, origin: &Coordinate, span: &CoordinateSpan, filter: &Filter) -> bool {
        let (Some(o), CoordinateSpan::Linear { lower, upper }) = (origin.as_linear(), span) else {
            return true;
        };
        let (lo, hi) = (*lower, *upper);

        if !filter.distance.is_unconstrained() {
            let nearest = if o < lo { lo - o } else if o > hi { o - hi } else { 0.0 };
            let farthest = (o - lo).abs().max((hi - o).abs());
            if nearest > filter.distance.max || farthest < filter.distance.min {
                return false;
            }
        }

        if filter.direction_unconstrained(&self.direction_domain()) {
            return true;
        }
        let possible: &[f64] = if lo > o {
            &[1.0]
        } else if hi < o {
            &[-1.0]
        } else {
            &[-1.0, 0.0, 1.0]
        };
        possible.iter().any(|d| filter.direction.contains(*d))
    }
}

// ============================================================================
// Spherical
// ============================================================================

/// Latitude/longitude in degrees. Bounds apply to latitude; longitude
/// always covers the full circle and wraps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spherical {
    pub lower: f64,
    pub upper: f64,
}

impl Default for Spherical {
    fn default() -> Self {
        Self { lower: -90.0, upper: 90.0 }
    }
}

impl Spherical {
    fn lat_width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Wrap any finite longitude to `[-180, 180)`.
pub fn wrap_longitude(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped >= 180.0 { -180.0 } else { wrapped }
}

fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dp = p2 - p1;
    let dl = (lon2 - lon1).to_radians();
    let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dl = (lon2 - lon1).to_radians();
    let y = dl.sin() * p2.cos();
    let x = p1.cos() * p2.sin() - p1.sin() * p2.cos() * dl.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

impl DimensionCodec for Spherical {
    fn axes(&self) -> usize {
        2
    }

    fn normalize(&self, name: &str, value: &Coordinate, bits: u32) -> Result<Cells> {
        let (lat, lon) = value.as_spherical().ok_or_else(|| {
            Error::DimensionMismatch(format!(
                "dimension '{name}' is spherical, got a {} coordinate",
                value.kind_name()
            ))
        })?;
        if !lat.is_finite() || lat < self.lower || lat > self.upper {
            return Err(Error::OutOfBounds {
                dimension: name.to_string(),
                value: lat,
                lower: self.lower,
                upper: self.upper,
            });
        }
        if !lon.is_finite() {
            return Err(Error::OutOfBounds {
                dimension: name.to_string(),
                value: lon,
                lower: -180.0,
                upper: 180.0,
            });
        }
        let t_lat = (lat - self.lower) / self.lat_width();
        let t_lon = (wrap_longitude(lon) + 180.0) / 360.0;
        Ok(smallvec![quantize(t_lat, bits), quantize(t_lon, bits)])
    }

    fn denormalize(&self, cells: &[u64], bits: u32) -> Coordinate {
        Coordinate::Spherical {
            lat: self.lower + cell_centre(cells[0], bits) * self.lat_width(),
            lon: cell_centre(cells[1], bits) * 360.0 - 180.0,
        }
    }

    fn cell_span(&self, cells: &[(u64, u64)], bits: u32) -> CoordinateSpan {
        let (lat_lo, lat_hi) = cells[0];
        let (lon_lo, lon_hi) = cells[1];
        CoordinateSpan::Spherical {
            lat: (
                self.lower + cell_lower(lat_lo, bits) * self.lat_width(),
                self.lower + cell_upper(lat_hi, bits) * self.lat_width(),
            ),
            lon: (
                cell_lower(lon_lo, bits) * 360.0 - 180.0,
                cell_upper(lon_hi, bits) * 360.0 - 180.0,
            ),
        }
    }

    fn cell_tolerance(&self, cells: &[u64], bits: u32) -> f64 {
        let centre = self.denormalize(cells, bits);
        let CoordinateSpan::Spherical { lat, lon } =
            self.cell_span(&[(cells[0], cells[0]), (cells[1], cells[1])], bits)
        else {
            return 0.0;
        };
        [(lat.0, lon.0), (lat.0, lon.1), (lat.1, lon.0), (lat.1, lon.1)]
            .into_iter()
            .map(|corner| 2.0 * self.distance(&centre, &Coordinate::from(corner)))
            .fold(0.0, f64::max)
    }

    /// Great-circle distance in metres.
    fn distance(&self, a: &Coordinate, b: &Coordinate) -> f64 {
        match (a.as_spherical(), b.as_spherical()) {
            (Some((lat1, lon1)), Some((lat2, lon2))) => haversine(lat1, lon1, lat2, lon2),
            _ => f64::NAN,
        }
    }

    /// Initial bearing in degrees, clockwise from north, `[0, 360)`.
    fn direction(&self, from: &Coordinate, to: &Coordinate) -> f64 {
        match (from.as_spherical(), to.as_spherical()) {
            (Some((lat1, lon1)), Some((lat2, lon2))) => initial_bearing(lat1, lon1, lat2, lon2),
            _ => f64::NAN,
        }
    }

    fn direction_domain(&self) -> Range {
        Range::new(0.0, 360.0)
    }

    /// A range with `min > max` wraps through north.
    fn direction_allowed(&self, direction: f64, range: &Range) -> bool {
        if range.min <= range.max {
            range.contains(direction)
        } else {
            direction >= range.min || direction <= range.max
        }
    }

    fn may_match(&self, origin: &Coordinate, span: &CoordinateSpan, filter: &Filter) -> bool {
        if filter.distance.is_unconstrained() {
            return true;
        }
        let (Some((lat, _)), CoordinateSpan::Spherical { lat: (lo, hi), .. }) =
            (origin.as_spherical(), span)
        else {
            return true;
        };
        // Meridian arc is a lower bound on the great-circle distance.
        let gap = if lat < *lo { lo - lat } else if lat > *hi { lat - hi } else { 0.0 };
        EARTH_RADIUS_M * gap.to_radians() <= filter.distance.max
    }
}

// ============================================================================
// Dimension
// ============================================================================

/// The closed set of dimension kinds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DimensionKind {
    Linear(Linear),
    Spherical(Spherical),
}

impl DimensionKind {
    pub fn codec(&self) -> &dyn DimensionCodec {
        match self {
            DimensionKind::Linear(l) => l as &dyn DimensionCodec,
            DimensionKind::Spherical(s) => s as &dyn DimensionCodec,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DimensionKind::Linear(_) => "linear",
            DimensionKind::Spherical(_) => "spherical",
        }
    }
}

/// A named axis with bounds and a coordinate kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    #[serde(default)]
    pub label: String,
    pub kind: DimensionKind,
}

impl Dimension {
    pub fn linear(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            label: String::new(),
            kind: DimensionKind::Linear(Linear { lower, upper }),
        }
    }

    /// Full-globe spherical dimension (latitude `[-90, 90]`).
    pub fn spherical(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: String::new(),
            kind: DimensionKind::Spherical(Spherical::default()),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn codec(&self) -> &dyn DimensionCodec {
        self.kind.codec()
    }

    pub fn bounds(&self) -> (f64, f64) {
        match self.kind {
            DimensionKind::Linear(Linear { lower, upper }) => (lower, upper),
            DimensionKind::Spherical(Spherical { lower, upper }) => (lower, upper),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidDimension("dimension name must not be empty".into()));
        }
        let (lower, upper) = self.bounds();
        if !lower.is_finite() || !upper.is_finite() || lower >= upper {
            return Err(Error::InvalidDimension(format!(
                "dimension '{}' has invalid bounds [{lower}, {upper}]",
                self.name
            )));
        }
        if let DimensionKind::Spherical(_) = self.kind {
            if lower < -90.0 || upper > 90.0 {
                return Err(Error::InvalidDimension(format!(
                    "dimension '{}' latitude bounds [{lower}, {upper}] exceed [-90, 90]",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
