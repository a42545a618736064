//! Topology registry and connectivity detection
//!
//! The [`TopologyRegistry`] is built once per world and handed to routers by
//! reference; it answers population and density queries from the host
//! positions of the latest mobility step. The [`ConnectivityGrid`] buckets
//! hosts into square cells so that range checks only look at neighbouring
//! cells.

use std::collections::BTreeMap;

use ferry_core::{ConfigError, Coord, HostAddress};
use ferry_dtn::TopologyView;

/// Smallest allowed ratio of grid cell size to transmit range
pub const MIN_CELL_SIZE_MULT: f64 = 2.0;

/// Spatial hash of host positions
#[derive(Debug, Clone)]
pub struct ConnectivityGrid {
    cell_size: f64,
    cells: BTreeMap<(i64, i64), Vec<usize>>,
}

impl ConnectivityGrid {
    /// Grid with cells of `transmit_range * cell_size_mult`
    pub fn new(transmit_range: f64, cell_size_mult: f64) -> Result<Self, ConfigError> {
        if cell_size_mult < MIN_CELL_SIZE_MULT {
            return Err(ConfigError::invalid(
                "Optimization.cellSizeMult",
                format!("must be at least {MIN_CELL_SIZE_MULT}, got {cell_size_mult}"),
            ));
        }
        let cell_size = transmit_range * cell_size_mult;
        if cell_size <= 0.0 {
            return Err(ConfigError::invalid(
                "Interface.transmitRange",
                "transmit range must be positive",
            ));
        }
        Ok(Self {
            cell_size,
            cells: BTreeMap::new(),
        })
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    fn cell_of(&self, at: &Coord) -> (i64, i64) {
        (
            (at.x / self.cell_size).floor() as i64,
            (at.y / self.cell_size).floor() as i64,
        )
    }

    /// Re-bucket every host; `None` slots are left out
    pub fn rebuild(&mut self, positions: &[Option<Coord>]) {
        self.cells.clear();
        for (slot, position) in positions.iter().enumerate() {
            if let Some(at) = position {
                let cell = self.cell_of(at);
                self.cells.entry(cell).or_default().push(slot);
            }
        }
    }

    /// Slots in the cell of `at` and the eight cells around it
    pub fn nearby(&self, at: &Coord) -> Vec<usize> {
        let (cx, cy) = self.cell_of(at);
        let mut slots = Vec::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(cell) = self.cells.get(&(cx + dx, cy + dy)) {
                    slots.extend_from_slice(cell);
                }
            }
        }
        slots.sort_unstable();
        slots
    }
}

/// Positions of every host, refreshed after each mobility step
#[derive(Debug, Clone)]
pub struct TopologyRegistry {
    positions: Vec<Option<Coord>>,
    grid: ConnectivityGrid,
}

impl TopologyRegistry {
    pub fn new(grid: ConnectivityGrid) -> Self {
        Self {
            positions: Vec::new(),
            grid,
        }
    }

    pub fn refresh(&mut self, positions: Vec<Option<Coord>>) {
        self.grid.rebuild(&positions);
        self.positions = positions;
    }

    pub fn position(&self, host: HostAddress) -> Option<Coord> {
        self.positions.get(host.index()).copied().flatten()
    }

    /// Hosts other than `host` within `range`, in address order
    pub fn in_range(&self, host: HostAddress, range: f64) -> Vec<HostAddress> {
        let Some(at) = self.position(host) else {
            return Vec::new();
        };
        self.grid
            .nearby(&at)
            .into_iter()
            .filter(|&slot| slot != host.index())
            .filter_map(|slot| {
                let other = self.positions[slot]?;
                (at.distance(&other) <= range).then_some(HostAddress(slot as u32))
            })
            .collect()
    }
}

impl TopologyView for TopologyRegistry {
    fn host_count(&self) -> usize {
        self.positions.len()
    }

    fn density(&self, host: HostAddress, range: f64) -> f64 {
        let total = self.positions.len();
        if total <= 1 {
            return 0.0;
        }
        let Some(at) = self.position(host) else {
            return 0.0;
        };
        let near = self
            .positions
            .iter()
            .enumerate()
            .filter(|(slot, _)| *slot != host.index())
            .filter_map(|(_, position)| position.as_ref())
            .filter(|other| at.distance(other) <= range)
            .count();
        near as f64 / (total - 1) as f64
    }
}
