use crate::models::{PortfolioAllocation, Position};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Mutex;

/// Injectable persistence seam for live position and allocation state.
/// The core owns the types; the hosting process owns the storage. No
/// process-wide singleton, no implicit file paths.
pub trait StateStore: Send + Sync {
    fn load_positions(&self) -> Result<Vec<Position>>;
    fn save_positions(&self, positions: &[Position]) -> Result<()>;
    fn load_allocations(&self) -> Result<HashMap<String, PortfolioAllocation>>;
    fn save_allocations(&self, allocations: &HashMap<String, PortfolioAllocation>) -> Result<()>;
}

/// In-memory store for tests and embedded use.
#[derive(Default)]
pub struct MemoryStore {
    positions: Mutex<Vec<Position>>,
    allocations: Mutex<HashMap<String, PortfolioAllocation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.lock().expect("store lock").clone())
    }

    fn save_positions(&self, positions: &[Position]) -> Result<()> {
        *self.positions.lock().expect("store lock") = positions.to_vec();
        Ok(())
    }

    fn load_allocations(&self) -> Result<HashMap<String, PortfolioAllocation>> {
        Ok(self.allocations.lock().expect("store lock").clone())
    }

    fn save_allocations(&self, allocations: &HashMap<String, PortfolioAllocation>) -> Result<()> {
        *self.allocations.lock().expect("store lock") = allocations.clone();
        Ok(())
    }
}
