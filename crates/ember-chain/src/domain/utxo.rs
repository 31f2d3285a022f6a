//! UTXO bookkeeping for full-verification mode.
//!
//! The live set is the composition of every connected block's delta along
//! the best chain. A delta records exactly what one block's connection
//! did, which is enough to replay it or revert it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use ember_types::{OutPoint, TxOutput};

/// What one block's connection did to the set of open outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoDelta {
    /// Outputs the block created.
    pub added: Vec<(OutPoint, TxOutput)>,
    /// Outputs the block consumed, with their spent values so a revert
    /// can restore them.
    pub spent: Vec<(OutPoint, TxOutput)>,
}

impl UtxoDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.spent.is_empty()
    }
}

/// The set of unspent transaction outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    outputs: HashMap<OutPoint, TxOutput>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.outputs.contains_key(outpoint)
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        self.outputs.get(outpoint)
    }

    pub fn insert(&mut self, outpoint: OutPoint, output: TxOutput) {
        self.outputs.insert(outpoint, output);
    }

    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<TxOutput> {
        self.outputs.remove(outpoint)
    }

    /// Replay a delta: add what the block added, consume what it spent.
    pub fn apply(&mut self, delta: &UtxoDelta) {
        for (outpoint, output) in &delta.added {
            self.outputs.insert(*outpoint, output.clone());
        }
        for (outpoint, _) in &delta.spent {
            self.outputs.remove(outpoint);
        }
    }

    /// Undo a delta: remove what the block added, restore what it spent.
    pub fn revert(&mut self, delta: &UtxoDelta) {
        for (outpoint, _) in &delta.added {
            self.outputs.remove(outpoint);
        }
        for (outpoint, output) in &delta.spent {
            self.outputs.insert(*outpoint, output.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outpoint(tag: u8, index: u32) -> OutPoint {
        OutPoint::new([tag; 32], index)
    }

    fn output(value: u64) -> TxOutput {
        TxOutput { value, script_pubkey: vec![] }
    }

    #[test]
    fn test_apply_then_revert_is_identity() {
        let mut set = UtxoSet::new();
        set.insert(outpoint(1, 0), output(10));
        set.insert(outpoint(2, 0), output(20));
        let before = set.clone();

        let delta = UtxoDelta {
            added: vec![(outpoint(3, 0), output(30))],
            spent: vec![(outpoint(1, 0), output(10))],
        };

        set.apply(&delta);
        assert!(!set.contains(&outpoint(1, 0)));
        assert!(set.contains(&outpoint(3, 0)));

        set.revert(&delta);
        assert_eq!(set.outputs, before.outputs);
    }

    #[test]
    fn test_revert_restores_spent_values() {
        let mut set = UtxoSet::new();
        let delta = UtxoDelta {
            added: vec![],
            spent: vec![(outpoint(7, 1), output(77))],
        };
        set.revert(&delta);
        assert_eq!(set.get(&outpoint(7, 1)).map(|o| o.value), Some(77));
    }
}
