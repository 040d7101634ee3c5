use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::engine::simulate;
use super::error::ValuationResult;
use super::types::{MonteCarloInput, MonteCarloResult};

/// Stored `f64` values across all entries, about 32 MB.
pub const DEFAULT_CACHE_CAPACITY: usize = 4_000_000;

/// Every parameter that changes simulation output. Floats are keyed by bit
/// pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimulationKey {
    baseline_eps: u64,
    years_forward: u32,
    n_simulations: u32,
    mean_growth: u64,
    std_dev: u64,
    pe_ratio: u64,
    index_to_tracker_ratio: u64,
    random_seed: u64,
}

impl From<&MonteCarloInput> for SimulationKey {
    fn from(input: &MonteCarloInput) -> Self {
        Self {
            baseline_eps: input.baseline_eps.to_bits(),
            years_forward: input.years_forward,
            n_simulations: input.n_simulations,
            mean_growth: input.mean_growth.to_bits(),
            std_dev: input.std_dev.to_bits(),
            pe_ratio: input.pe_ratio.to_bits(),
            index_to_tracker_ratio: input.index_to_tracker_ratio.to_bits(),
            random_seed: input.random_seed,
        }
    }
}

/// Caller-owned memo of simulation results, bounded by the number of stored
/// values (paths plus terminal prices). Entries never go stale because
/// `simulate` is a pure function of its key. An insert that would exceed the
/// bound drops the whole map first; a result larger than the bound is never
/// stored.
#[derive(Debug)]
pub struct SimulationCache {
    entries: HashMap<SimulationKey, Arc<MonteCarloResult>>,
    capacity: usize,
    stored_values: usize,
    hits: u64,
    misses: u64,
}

impl Default for SimulationCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl SimulationCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            stored_values: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get_or_simulate(
        &mut self,
        input: &MonteCarloInput,
    ) -> ValuationResult<Arc<MonteCarloResult>> {
        if let Some(hit) = self.get(input) {
            return Ok(hit);
        }
        let result = Arc::new(simulate(input)?);
        self.insert(input, Arc::clone(&result));
        Ok(result)
    }

    /// Looks up a stored result, counting the hit or miss.
    pub fn get(&mut self, input: &MonteCarloInput) -> Option<Arc<MonteCarloResult>> {
        match self.entries.get(&SimulationKey::from(input)) {
            Some(hit) => {
                self.hits += 1;
                Some(Arc::clone(hit))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Stores `result` unless it alone exceeds the capacity. Returns whether
    /// it was stored.
    pub fn insert(&mut self, input: &MonteCarloInput, result: Arc<MonteCarloResult>) -> bool {
        let size = stored_size(&result);
        if size > self.capacity {
            debug!(size, capacity = self.capacity, "simulation too large to cache");
            return false;
        }

        let key = SimulationKey::from(input);
        if let Some(previous) = self.entries.remove(&key) {
            self.stored_values -= stored_size(&previous);
        }
        if self.stored_values + size > self.capacity {
            debug!(
                entries = self.entries.len(),
                stored_values = self.stored_values,
                "simulation cache full, clearing"
            );
            self.entries.clear();
            self.stored_values = 0;
        }
        self.stored_values += size;
        self.entries.insert(key, result);
        true
    }

    pub fn stored_values(&self) -> usize {
        self.stored_values
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

fn stored_size(result: &MonteCarloResult) -> usize {
    result.eps_paths.iter().map(Vec::len).sum::<usize>() + result.terminal_prices.len()
}
