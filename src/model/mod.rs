//! # Coordinate Model
//!
//! Plain DTOs shared by the compiler, the encoder and the locality engine.
//! These types cross every boundary: registry ↔ space ↔ network ↔ user.
//!
//! Design rule: no I/O, no async, no network handles here.

pub mod dimension;
pub mod coordinate;
pub mod filter;
pub mod item;

pub use dimension::{
    Cells, CoordinateSpan, Dimension, DimensionCodec, DimensionKind, Linear, Spherical,
    EARTH_RADIUS_M, MAX_AXIS_BITS,
};
pub use coordinate::{Coordinate, Point};
pub use filter::{Filter, FilterSet, Range};
pub use item::{CollectionId, ContentId, Item, ItemRecord, PositionKey};
