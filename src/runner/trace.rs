use std::collections::HashSet;
use std::fmt;

use alloy_primitives::{B256, U256};

use super::runner::{Step, Tracer};
use crate::mutator::encode::selector;
use crate::state::Address;

const CALLDATALOAD: u8 = 0x35;
const CALL: u8 = 0xf1;
const CALLCODE: u8 = 0xf2;
const DELEGATECALL: u8 = 0xf4;
const STATICCALL: u8 = 0xfa;
/// Offsets past this are computed garbage, not argument reads
const MAX_LEARNED_CALLDATA: usize = 1 << 16;

/// Control-flow edge between two trace nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub src: u64,
    pub dst: u64,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{}", self.src, self.dst)
    }
}

/// Ordered edges observed during one transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dag(pub Vec<Edge>);

impl Dag {
    pub fn edges(&self) -> &[Edge] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `src>dst` fingerprints
    pub fn fingerprints(&self) -> Vec<String> {
        self.0.iter().map(Edge::to_string).collect()
    }
}

/// A `transfer(address,uint256)` call seen in the trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub token: Address,
    pub to: Address,
    pub amount: U256,
}

/// Trace buffer owned by one run and reset at every transaction
#[derive(Debug, Default)]
pub struct TraceSink {
    frame: u64,
    last_depth: Option<usize>,
    prev: Option<u64>,
    seen: HashSet<Edge>,
    dag: Vec<Edge>,
    watch_transfers: bool,
    transfers: Vec<Transfer>,
    calldata_len: usize,
}

impl TraceSink {
    pub fn new(watch_transfers: bool) -> Self {
        TraceSink {
            watch_transfers,
            ..Default::default()
        }
    }

    pub fn reset(&mut self) {
        *self = TraceSink::new(self.watch_transfers);
    }

    /// Start a new execution frame. Node ids of the next frame never collide with earlier ones.
    pub fn begin_frame(&mut self) {
        self.frame += 1;
        self.last_depth = None;
    }

    pub fn dag(&self) -> Dag {
        Dag(self.dag.clone())
    }

    pub fn take_dag(&mut self) -> Dag {
        self.seen.clear();
        Dag(std::mem::take(&mut self.dag))
    }

    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    /// Calldata length the top-level frame actually read
    pub fn learned_calldata_len(&self) -> usize {
        self.calldata_len
    }

    fn node(&mut self, step: &Step<'_>) -> u64 {
        if self.last_depth != Some(step.depth) {
            if self.last_depth.is_some() {
                self.frame += 1;
            }
            self.last_depth = Some(step.depth);
        }
        (self.frame << 32) | (step.pc as u64 & 0xffff_ffff)
    }

    fn record_transfer(&mut self, step: &Step<'_>) {
        let len = step.stack.len();
        let (target_idx, offset_idx, size_idx) = match step.opcode {
            CALL | CALLCODE if len >= 7 => (len - 2, len - 4, len - 5),
            DELEGATECALL | STATICCALL if len >= 6 => (len - 2, len - 3, len - 4),
            _ => return,
        };
        let (Ok(offset), Ok(size)) = (
            usize::try_from(step.stack[offset_idx]),
            usize::try_from(step.stack[size_idx]),
        ) else {
            return;
        };
        if size < 68 || offset.saturating_add(68) > step.memory.len() {
            return;
        }
        let input = &step.memory[offset..offset + 68];
        if input[..4] != selector("transfer(address,uint256)") {
            return;
        }
        let amount = U256::from_be_slice(&input[36..68]);
        if amount.is_zero() {
            return;
        }
        self.transfers.push(Transfer {
            token: Address::from_word(B256::from(step.stack[target_idx].to_be_bytes::<32>())),
            to: Address::from_word(B256::from_slice(&input[4..36])),
            amount,
        });
    }
}

impl Tracer for TraceSink {
    fn step(&mut self, step: &Step<'_>) {
        let node = self.node(step);
        if let Some(prev) = self.prev {
            let edge = Edge {
                src: prev,
                dst: node,
            };
            if self.seen.insert(edge) {
                self.dag.push(edge);
            }
        }
        self.prev = Some(node);

        if step.opcode == CALLDATALOAD && step.depth == 0 {
            if let Some(offset) = step.stack.last().and_then(|word| usize::try_from(*word).ok()) {
                if offset < MAX_LEARNED_CALLDATA {
                    self.calldata_len = self.calldata_len.max(offset + 32);
                }
            }
        }
        if self.watch_transfers {
            self.record_transfer(step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AddressExt;

    fn step(sink: &mut TraceSink, pc: usize, opcode: u8, stack: &[U256], memory: &[u8]) {
        sink.step(&Step {
            pc,
            opcode,
            depth: 0,
            stack,
            memory,
        });
    }

    #[test]
    fn test_edges_are_deduplicated_in_order() {
        let mut sink = TraceSink::new(false);
        for pc in [0, 1, 2, 1, 2, 3] {
            step(&mut sink, pc, 0x5b, &[], &[]);
        }
        assert_eq!(sink.dag().fingerprints(), vec!["0>1", "1>2", "2>1", "2>3"]);
    }

    #[test]
    fn test_frames_separate_nodes() {
        let mut sink = TraceSink::new(false);
        step(&mut sink, 0, 0x00, &[], &[]);
        sink.begin_frame();
        step(&mut sink, 0, 0x00, &[], &[]);
        let dag = sink.take_dag();
        assert_eq!(dag.edges(), &[Edge { src: 0, dst: 1 << 32 }]);
    }

    #[test]
    fn test_learned_calldata_len() {
        let mut sink = TraceSink::new(false);
        step(&mut sink, 0, CALLDATALOAD, &[U256::from(4u32)], &[]);
        step(&mut sink, 1, CALLDATALOAD, &[U256::from(36u32)], &[]);
        step(&mut sink, 2, CALLDATALOAD, &[U256::from(1u8) << 200usize], &[]);
        assert_eq!(sink.learned_calldata_len(), 68);
    }

    #[test]
    fn test_transfer_detection() {
        let mut memory = vec![0u8; 68];
        memory[..4].copy_from_slice(&selector("transfer(address,uint256)"));
        memory[35] = 7;
        memory[67] = 100;
        // CALL stack: retSize retOffset argsSize argsOffset value addr gas (top)
        let stack: Vec<U256> = [0u32, 0, 68, 0, 0, 0xaa, 50000]
            .iter()
            .map(|v| U256::from(*v))
            .collect();

        let mut sink = TraceSink::new(true);
        step(&mut sink, 0, CALL, &stack, &memory);
        assert_eq!(
            sink.transfers(),
            &[Transfer {
                token: Address::from_low_u64(0xaa),
                to: Address::from_low_u64(7),
                amount: U256::from(100u32),
            }]
        );

        memory[67] = 0;
        let mut sink = TraceSink::new(true);
        step(&mut sink, 0, CALL, &stack, &memory);
        assert!(sink.transfers().is_empty());
    }
}
