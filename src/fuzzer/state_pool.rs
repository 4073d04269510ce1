use std::sync::Arc;

use rand::Rng;

use crate::state::WorldState;

const INITIAL_WEIGHT: f64 = 1.0;

struct PoolEntry {
    state: Arc<WorldState>,
    weight: f64,
}

/// Saved world states that transactions are executed against, sampled by weight
#[derive(Default)]
pub struct StatePool {
    entries: Vec<PoolEntry>,
    /// Entry count above which the oldest derived state is dropped
    limit: Option<usize>,
}

impl StatePool {
    /// Pool holding at most `limit` states. The first pushed state (the
    /// deployment snapshot) is never evicted.
    pub fn bounded(limit: usize) -> Self {
        StatePool {
            entries: Vec::new(),
            limit: Some(limit.max(1)),
        }
    }

    pub fn push(&mut self, state: Arc<WorldState>) {
        self.entries.push(PoolEntry {
            state,
            weight: INITIAL_WEIGHT,
        });
        if let Some(limit) = self.limit {
            if self.entries.len() > limit {
                let excess = self.entries.len() - limit;
                self.entries.drain(1..1 + excess);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn weight(&self, idx: usize) -> Option<f64> {
        self.entries.get(idx).map(|e| e.weight)
    }

    /// Pick the first entry whose cumulative weight reaches `rand * total`
    pub fn priority_sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(usize, Arc<WorldState>)> {
        let total: f64 = self.entries.iter().map(|e| e.weight).sum();
        let threshold = rng.gen::<f64>() * total;
        let mut cumulative = 0.0;
        for (idx, entry) in self.entries.iter().enumerate() {
            cumulative += entry.weight;
            if cumulative >= threshold {
                return Some((idx, entry.state.clone()));
            }
        }
        let idx = self.entries.len().checked_sub(1)?;
        Some((idx, self.entries[idx].state.clone()))
    }

    /// Weight update after entry `idx` was used. Weights are currently left
    /// untouched, so sampling stays uniform.
    pub fn on_sampled(&mut self, _idx: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sampling_covers_all_entries() {
        let mut pool = StatePool::default();
        for _ in 0..4 {
            pool.push(Arc::new(WorldState::new()));
        }
        let mut rng = StdRng::seed_from_u64(9);
        let mut hits = [0usize; 4];
        for _ in 0..4000 {
            let (idx, _) = pool.priority_sample(&mut rng).unwrap();
            pool.on_sampled(idx);
            hits[idx] += 1;
        }
        // uniform weights
        assert!(hits.iter().all(|h| *h > 800 && *h < 1200), "{:?}", hits);
        assert_eq!(pool.weight(0), Some(1.0));
    }

    #[test]
    fn test_bounded_pool_keeps_base_state() {
        let mut pool = StatePool::bounded(3);
        let base = Arc::new(WorldState::new());
        pool.push(base.clone());
        let derived: Vec<Arc<WorldState>> = (0..5).map(|_| Arc::new(WorldState::new())).collect();
        for state in &derived {
            pool.push(state.clone());
        }
        assert_eq!(pool.len(), 3);
        let kept: Vec<&Arc<WorldState>> = pool.entries.iter().map(|e| &e.state).collect();
        assert!(Arc::ptr_eq(kept[0], &base));
        assert!(Arc::ptr_eq(kept[1], &derived[3]));
        assert!(Arc::ptr_eq(kept[2], &derived[4]));
    }

    #[test]
    fn test_empty_pool() {
        let pool = StatePool::default();
        assert!(pool.priority_sample(&mut StdRng::seed_from_u64(0)).is_none());
    }
}
