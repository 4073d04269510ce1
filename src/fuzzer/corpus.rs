use std::sync::Arc;

use rand::Rng;

use crate::mutator::AbiValue;
use crate::state::WorldState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedInput {
    /// Typed arguments for `contract.methods[method]`
    Abi { method: usize, args: Vec<AbiValue> },
    /// Raw calldata for targets without an ABI
    Raw { selector: [u8; 4], data: Vec<u8> },
}

/// Retained input together with the state it is replayed against
#[derive(Clone)]
pub struct Seed {
    pub contract: usize,
    pub input: SeedInput,
    pub state: Arc<WorldState>,
}

/// Decides which seeds survive when a new one is retained
pub trait EvictionPolicy: Send {
    fn on_insert(&mut self, seeds: &mut Vec<Seed>);
}

/// Never evicts
pub struct KeepAll;

impl EvictionPolicy for KeepAll {
    fn on_insert(&mut self, _seeds: &mut Vec<Seed>) {}
}

/// Bounded corpus keeping the `n` most recent seeds
pub struct KeepLatest(pub usize);

impl EvictionPolicy for KeepLatest {
    fn on_insert(&mut self, seeds: &mut Vec<Seed>) {
        let max = self.0.max(1);
        if seeds.len() > max {
            let excess = seeds.len() - max;
            seeds.drain(..excess);
        }
    }
}

pub struct Corpus {
    seeds: Vec<Seed>,
    policy: Box<dyn EvictionPolicy>,
}

impl Default for Corpus {
    fn default() -> Self {
        Corpus::new(Box::new(KeepAll))
    }
}

impl Corpus {
    pub fn new(policy: Box<dyn EvictionPolicy>) -> Self {
        Corpus {
            seeds: Vec::new(),
            policy,
        }
    }

    pub fn push(&mut self, seed: Seed) {
        self.seeds.push(seed);
        self.policy.on_insert(&mut self.seeds);
    }

    /// Uniformly random seed
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Seed> {
        if self.seeds.is_empty() {
            return None;
        }
        self.seeds.get(rng.gen_range(0..self.seeds.len()))
    }

    pub fn seeds(&self) -> &[Seed] {
        &self.seeds
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seed(selector: u8) -> Seed {
        Seed {
            contract: 0,
            input: SeedInput::Raw {
                selector: [selector; 4],
                data: vec![selector; 4],
            },
            state: Arc::new(WorldState::new()),
        }
    }

    #[test]
    fn test_keep_all_grows() {
        let mut corpus = Corpus::default();
        for i in 0..100 {
            corpus.push(seed(i));
        }
        assert_eq!(corpus.len(), 100);
        assert!(corpus.select(&mut StdRng::seed_from_u64(1)).is_some());
    }

    #[test]
    fn test_keep_latest_bounds() {
        let mut corpus = Corpus::new(Box::new(KeepLatest(3)));
        for i in 0..10 {
            corpus.push(seed(i));
        }
        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.seeds()[0].input, seed(7).input);
    }

    #[test]
    fn test_empty_select() {
        assert!(Corpus::default().select(&mut StdRng::seed_from_u64(1)).is_none());
    }
}
