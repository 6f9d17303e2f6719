//! Spatial indexing abstractions for agent neighbourhood queries on the ground plane.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Common behaviour exposed by neighbourhood indices.
///
/// Positions are `(x, z)` pairs on the ground plane, addressed by dense index.
pub trait NeighborhoodIndex {
    /// Rebuild internal structures from agent positions.
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError>;

    /// Visit neighbours of `agent_idx` within the provided squared radius.
    ///
    /// The agent itself is never visited.
    fn neighbors_within(
        &self,
        agent_idx: usize,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    );
}

type CellKey = (i32, i32);

/// Uniform bucket grid over the ground plane.
///
/// Queries with a radius wider than one cell scan as many rings of cells as needed,
/// so a single grid serves agents with differing perception radii.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniformGridIndex {
    /// Edge length of each grid cell used for bucketing agents.
    pub cell_size: f32,
    #[serde(skip)]
    positions: Vec<(f32, f32)>,
    #[serde(skip)]
    buckets: HashMap<CellKey, Vec<usize>>,
}

impl UniformGridIndex {
    /// Create a new uniform grid with the provided cell size.
    #[must_use]
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            positions: Vec::new(),
            buckets: HashMap::new(),
        }
    }

    /// Number of positions captured by the last rebuild.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true when the last rebuild captured no positions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn cell_of(&self, x: f32, z: f32) -> CellKey {
        let inv = 1.0 / self.cell_size;
        ((x * inv).floor() as i32, (z * inv).floor() as i32)
    }
}

impl Default for UniformGridIndex {
    fn default() -> Self {
        Self::new(8.0)
    }
}

impl NeighborhoodIndex for UniformGridIndex {
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError> {
        if !(self.cell_size > 0.0) || !self.cell_size.is_finite() {
            return Err(IndexError::InvalidConfig("cell_size must be positive"));
        }
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        for bucket in self.buckets.values_mut() {
            bucket.clear();
        }
        for (idx, &(x, z)) in positions.iter().enumerate() {
            if !x.is_finite() || !z.is_finite() {
                continue;
            }
            let key = self.cell_of(x, z);
            self.buckets.entry(key).or_default().push(idx);
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        Ok(())
    }

    fn neighbors_within(
        &self,
        agent_idx: usize,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        let Some(&(x, z)) = self.positions.get(agent_idx) else {
            return;
        };
        if !(radius_sq > 0.0) || !x.is_finite() || !z.is_finite() {
            return;
        }
        let mut visit = |other: usize| {
            if other == agent_idx {
                return;
            }
            let (ox, oz) = self.positions[other];
            let dx = ox - x;
            let dz = oz - z;
            let dist_sq = dx * dx + dz * dz;
            if dist_sq <= radius_sq {
                visitor(other, OrderedFloat(dist_sq));
            }
        };

        // Fall back to a linear scan once the ring window holds more cells than there are
        // positions.
        let span = (radius_sq.sqrt() / self.cell_size).ceil();
        let window = (2.0 * f64::from(span) + 1.0).powi(2);
        if !(window <= self.positions.len() as f64) {
            (0..self.positions.len()).for_each(&mut visit);
            return;
        }
        let span = span as i32;
        let (cx, cz) = self.cell_of(x, z);
        for gz in (cz - span)..=(cz + span) {
            for gx in (cx - span)..=(cx + span) {
                if let Some(bucket) = self.buckets.get(&(gx, gz)) {
                    bucket.iter().copied().for_each(&mut visit);
                }
            }
        }
    }
}
