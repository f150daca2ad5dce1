//! # Space Compiler
//!
//! Compiles an ordered dimension list into a fixed bit layout and encodes
//! points into position keys.
//!
//! ## Bit allocation
//!
//! Every axis gets an equal share of the configured key width,
//! `budget / total_axes`, capped at the dimension's `max_axis_bits`. Bits
//! the division leaves over go one level at a time to dimensions still
//! under their cap, in dimension order. A linear dimension has one axis; a
//! spherical one has two (latitude, longitude).
//!
//! The space's own key format is exactly the allocated width. When every
//! axis hits its cap (`[time]` alone uses 48 bits) the key is narrower than
//! the configured budget. No key bit is ever left unowned.
//!
//! ## Interleaving
//!
//! Bits are dealt MSB first, one bit level at a time, to each axis in
//! dimension order:
//!
//! ```text
//! dims [time, gps]  →  axes [time, lat, lon]
//! key bit:  0    1    2    3    4    5   ...
//! owner:    t0   a0   o0   t1   a1   o1  ...
//! ```
//!
//! Points close on every axis therefore share long key prefixes, which is
//! what the locality engine routes on. Swapping the dimension order changes
//! which axis owns bit 0, so the layout is order-sensitive.

pub mod key;

use crate::model::{
    Cells, Coordinate, CoordinateSpan, Dimension, Filter, FilterSet, Point, PositionKey,
};
use crate::{Error, Result};

pub use key::{KeyFormat, KeyPrefix, DEFAULT_KEY_BYTES};
use key::{get_bit, set_bit};

// ============================================================================
// Layout
// ============================================================================

/// Where one dimension's bits live inside the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionLayout {
    pub name: String,
    pub axes: usize,
    pub bits_per_axis: u32,
    /// First (most significant) key bit owned by this dimension.
    pub offset: u32,
    /// Key-width bitmap of the bits owned by this dimension.
    pub mask: Vec<u8>,
    /// Per axis, owned key bit positions, most significant first.
    positions: Vec<Vec<u32>>,
}

impl DimensionLayout {
    /// Total bits owned across all axes.
    pub fn width(&self) -> u32 {
        self.axes as u32 * self.bits_per_axis
    }

    pub fn positions(&self, axis: usize) -> &[u32] {
        &self.positions[axis]
    }

    /// The mask rendered like a position key.
    pub fn mask_key(&self) -> PositionKey {
        PositionKey::from_bytes(&self.mask)
    }
}

// ============================================================================
// Space
// ============================================================================

/// The compiled, fixed-layout combination of a collection's dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Space {
    dimensions: Vec<Dimension>,
    layouts: Vec<DimensionLayout>,
    format: KeyFormat,
}

impl Space {
    /// Compile an ordered dimension list. Deterministic: the same list and
    /// format always yield the same layout.
    pub fn compile(dimensions: Vec<Dimension>, format: KeyFormat) -> Result<Self> {
        if dimensions.is_empty() {
            return Err(Error::DimensionMismatch(
                "a space needs at least one dimension".into(),
            ));
        }
        for (i, dim) in dimensions.iter().enumerate() {
            dim.validate()?;
            if dimensions[..i].iter().any(|d| d.name == dim.name) {
                return Err(Error::DimensionMismatch(format!(
                    "dimension '{}' appears more than once",
                    dim.name
                )));
            }
        }

        let total_axes: usize = dimensions.iter().map(|d| d.codec().axes()).sum();
        let budget = format.bits();
        let share = budget / total_axes as u32;
        if share == 0 {
            return Err(Error::Config(format!(
                "a {budget}-bit key cannot hold {total_axes} axes"
            )));
        }
        let mut widths: Vec<u32> = dimensions
            .iter()
            .map(|d| share.min(d.codec().max_axis_bits()))
            .collect();
        let mut spare = budget
            - dimensions
                .iter()
                .zip(&widths)
                .map(|(d, w)| w * d.codec().axes() as u32)
                .sum::<u32>();
        loop {
            let mut grew = false;
            for (d, dim) in dimensions.iter().enumerate() {
                let axes = dim.codec().axes() as u32;
                if widths[d] < dim.codec().max_axis_bits() && spare >= axes {
                    widths[d] += 1;
                    spare -= axes;
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }
        let key_bits = budget - spare;
        if key_bits % 8 != 0 {
            return Err(Error::Config(format!(
                "{key_bits} allocated bits do not fill whole key bytes"
            )));
        }
        let format = KeyFormat::new((key_bits / 8) as usize)?;

        let mut positions: Vec<Vec<Vec<u32>>> = dimensions
            .iter()
            .map(|d| vec![Vec::new(); d.codec().axes()])
            .collect();
        let max_width = widths.iter().copied().max().unwrap_or(0);
        let mut next = 0u32;
        for level in 0..max_width {
            for (d, dim) in dimensions.iter().enumerate() {
                if level >= widths[d] {
                    continue;
                }
                for axis in 0..dim.codec().axes() {
                    positions[d][axis].push(next);
                    next += 1;
                }
            }
        }

        let layouts = dimensions
            .iter()
            .zip(positions)
            .zip(&widths)
            .map(|((dim, positions), &bits_per_axis)| {
                let mut mask = vec![0u8; format.bytes()];
                for &pos in positions.iter().flatten() {
                    set_bit(&mut mask, pos);
                }
                DimensionLayout {
                    name: dim.name.clone(),
                    axes: positions.len(),
                    bits_per_axis,
                    offset: positions[0][0],
                    mask,
                    positions,
                }
            })
            .collect();

        Ok(Self { dimensions, layouts, format })
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension(&self, index: usize) -> Option<&Dimension> {
        self.dimensions.get(index)
    }

    pub fn size(&self) -> usize {
        self.dimensions.len()
    }

    pub fn layouts(&self) -> &[DimensionLayout] {
        &self.layouts
    }

    pub fn layout(&self, name: &str) -> Option<&DimensionLayout> {
        self.layouts.iter().find(|l| l.name == name)
    }

    pub fn format(&self) -> KeyFormat {
        self.format
    }

    /// Bits allocated across all dimensions; always `format().bits()`.
    pub fn key_bits(&self) -> u32 {
        self.layouts.iter().map(DimensionLayout::width).sum()
    }

    /// Build a point from coordinates given in dimension order.
    pub fn point(&self, coordinates: Vec<Coordinate>) -> Result<Point> {
        if coordinates.len() != self.size() {
            return Err(Error::DimensionMismatch(format!(
                "expected {} coordinates, got {}",
                self.size(),
                coordinates.len()
            )));
        }
        Ok(self
            .dimensions
            .iter()
            .map(|d| d.name.clone())
            .zip(coordinates)
            .collect())
    }

    /// Same names in the same order.
    pub fn check_point(&self, point: &Point) -> Result<()> {
        let matches = point.len() == self.size()
            && point.names().zip(&self.dimensions).all(|(n, d)| n == d.name);
        if matches {
            return Ok(());
        }
        let expected: Vec<&str> = self.dimensions.iter().map(|d| d.name.as_str()).collect();
        let got: Vec<&str> = point.names().collect();
        Err(Error::DimensionMismatch(format!(
            "point has {got:?}, space expects {expected:?}"
        )))
    }

    // ========================================================================
    // Encode / decode
    // ========================================================================

    pub fn encode(&self, point: &Point) -> Result<PositionKey> {
        Ok(PositionKey::from_bytes(&self.encode_bytes(point)?))
    }

    pub fn encode_bytes(&self, point: &Point) -> Result<Vec<u8>> {
        self.check_point(point)?;
        let mut key = vec![0u8; self.format.bytes()];
        for (index, (_, coordinate)) in point.iter().enumerate() {
            let cells = self.encode_dimension(index, coordinate)?;
            let layout = &self.layouts[index];
            let bits = layout.bits_per_axis;
            for (axis, cell) in cells.iter().enumerate() {
                for (i, &pos) in layout.positions[axis].iter().enumerate() {
                    if (cell >> (bits - 1 - i as u32)) & 1 == 1 {
                        set_bit(&mut key, pos);
                    }
                }
            }
        }
        Ok(key)
    }

    pub fn decode(&self, key: &PositionKey) -> Result<Point> {
        self.decode_bytes(&key.to_bytes()?)
    }

    pub fn decode_bytes(&self, key: &[u8]) -> Result<Point> {
        let cells = self.cells(key)?;
        Ok(self
            .layouts
            .iter()
            .zip(&cells)
            .enumerate()
            .map(|(index, (layout, cells))| {
                (layout.name.clone(), self.decode_dimension(index, cells))
            })
            .collect())
    }

    /// Per dimension, the quantized cells stored in `key`.
    pub fn cells(&self, key: &[u8]) -> Result<Vec<Cells>> {
        if key.len() != self.format.bytes() {
            return Err(Error::InvalidKey(format!(
                "expected {} key bytes, got {}",
                self.format.bytes(),
                key.len()
            )));
        }
        Ok(self
            .layouts
            .iter()
            .map(|layout| {
                layout
                    .positions
                    .iter()
                    .map(|axis| {
                        axis.iter()
                            .fold(0u64, |acc, &pos| (acc << 1) | u64::from(get_bit(key, pos)))
                    })
                    .collect()
            })
            .collect())
    }

    /// Quantize one coordinate of dimension `index`.
    pub fn encode_dimension(&self, index: usize, coordinate: &Coordinate) -> Result<Cells> {
        let dim = self.dimensions.get(index).ok_or_else(|| {
            Error::DimensionMismatch(format!("space has no dimension #{index}"))
        })?;
        dim.codec()
            .normalize(&dim.name, coordinate, self.layouts[index].bits_per_axis)
    }

    pub fn decode_dimension(&self, index: usize, cells: &[u64]) -> Coordinate {
        self.dimensions[index]
            .codec()
            .denormalize(cells, self.layouts[index].bits_per_axis)
    }

    // ========================================================================
    // Prefix geometry
    // ========================================================================

    /// Per dimension, the coordinates any key under `prefix` can decode to.
    pub fn prefix_span(&self, prefix: &KeyPrefix) -> Vec<CoordinateSpan> {
        self.layouts
            .iter()
            .zip(&self.dimensions)
            .map(|(layout, dim)| {
                let bits = layout.bits_per_axis;
                let ranges: Vec<(u64, u64)> = layout
                    .positions
                    .iter()
                    .map(|axis| {
                        let fixed = axis.partition_point(|&p| p < prefix.bits());
                        let top = axis[..fixed]
                            .iter()
                            .fold(0u64, |acc, &pos| (acc << 1) | u64::from(prefix.bit(pos)));
                        let free = bits - fixed as u32;
                        let low = if free >= 64 { 0 } else { top << free };
                        let high = if free >= 64 { u64::MAX } else { low | ((1u64 << free) - 1) };
                        (low, high)
                    })
                    .collect();
                dim.codec().cell_span(&ranges, bits)
            })
            .collect()
    }

    /// Could any key under `prefix` satisfy every filter around `origin`?
    pub fn prefix_may_match(&self, prefix: &KeyPrefix, origin: &Point, filters: &[Filter]) -> bool {
        self.prefix_span(prefix)
            .iter()
            .zip(&self.dimensions)
            .zip(origin.iter())
            .zip(filters)
            .all(|(((span, dim), (_, o)), filter)| dim.codec().may_match(o, span, filter))
    }

    /// Filter check for stored cells. Each distance bound is widened by the
    /// cell's tolerance, so a value sitting exactly on a bound still passes
    /// after quantization.
    pub fn cells_match(&self, origin: &Point, cells: &[Cells], filters: &[Filter]) -> bool {
        self.dimensions
            .iter()
            .zip(&self.layouts)
            .zip(origin.iter().zip(cells))
            .zip(filters)
            .all(|(((dim, layout), ((_, o), cells)), filter)| {
                let codec = dim.codec();
                let bits = layout.bits_per_axis;
                let centre = codec.denormalize(cells, bits);
                codec.matches_within(o, &centre, filter, codec.cell_tolerance(cells, bits))
            })
    }

    /// One filter per dimension, in space order. Unknown names are a mismatch.
    pub fn resolve_filters(&self, filters: &FilterSet) -> Result<Vec<Filter>> {
        if let Some(unknown) = filters
            .names()
            .find(|n| !self.dimensions.iter().any(|d| d.name == *n))
        {
            return Err(Error::DimensionMismatch(format!(
                "filter names unknown dimension '{unknown}'"
            )));
        }
        Ok(self
            .dimensions
            .iter()
            .map(|d| filters.get(&d.name).copied().unwrap_or_default())
            .collect())
    }
}
