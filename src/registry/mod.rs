//! Dimension registry: the static catalog of named dimensions.
//!
//! Built once at startup, then shared read-only (`Arc<DimensionRegistry>`).
//! Collections reference dimensions by name; the registry turns names into
//! full definitions.

use hashbrown::HashMap;

use crate::model::{Dimension, DimensionKind, Linear, Spherical};
use crate::{Error, Result};

/// Half-width of the built-in `time` dimension, in seconds (~16 millennia).
pub const TIME_SPAN_SECONDS: f64 = 126_230_400.0 * 16.0 * 16.0 * 8.0;

/// Named dimension definitions.
#[derive(Debug, Clone, Default)]
pub struct DimensionRegistry {
    dimensions: HashMap<String, Dimension>,
}

impl DimensionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `time` and `gps` dimensions.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for dim in [Self::time(), Self::gps()] {
            registry.dimensions.insert(dim.name.clone(), dim);
        }
        registry
    }

    /// Epoch seconds, linear.
    pub fn time() -> Dimension {
        Dimension {
            name: "time".into(),
            label: "Timestamp".into(),
            kind: DimensionKind::Linear(Linear {
                lower: -TIME_SPAN_SECONDS,
                upper: TIME_SPAN_SECONDS,
            }),
        }
    }

    /// Latitude/longitude, spherical.
    pub fn gps() -> Dimension {
        Dimension {
            name: "gps".into(),
            label: "GPS".into(),
            kind: DimensionKind::Spherical(Spherical::default()),
        }
    }

    /// Add a definition. Names are unique; bounds must be valid.
    pub fn register(&mut self, definition: Dimension) -> Result<Dimension> {
        definition.validate()?;
        if self.dimensions.contains_key(&definition.name) {
            return Err(Error::InvalidDimension(format!(
                "dimension '{}' is already registered",
                definition.name
            )));
        }
        tracing::debug!(name = %definition.name, kind = definition.kind.name(), "registered dimension");
        self.dimensions.insert(definition.name.clone(), definition.clone());
        Ok(definition)
    }

    pub fn lookup(&self, name: &str) -> Result<&Dimension> {
        self.dimensions
            .get(name)
            .ok_or_else(|| Error::UnknownDimension(name.to_string()))
    }

    /// Resolve names in order.
    pub fn resolve(&self, names: &[&str]) -> Result<Vec<Dimension>> {
        names.iter().map(|n| self.lookup(n).cloned()).collect()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.dimensions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }
}
