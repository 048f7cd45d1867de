//! Cache of multipole to local operators, one per distinct displacement of the interaction lists.
use std::collections::BTreeSet;

use log::debug;
use rayon::prelude::*;

use crate::{
    traits::kernel::ExpansionKernel,
    tree::types::{CellTable, Interaction, InteractionLists},
};

/// Identifies a transfer operator.
///
/// Same level interactions depend only on the offset. Operators for parent level sources also depend on the octant
/// of the target within its parent, for the remaining ones the octant is recorded as zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferKey {
    /// Level of the target cell.
    pub level: u32,

    /// Level difference between target and source.
    pub level_delta: u32,

    /// Relative anchor offset of the source.
    pub offset: [i64; 3],

    /// Octant of the target when the source is on the parent level.
    pub octant: usize,
}

impl TransferKey {
    /// Key of an interaction list entry at a level.
    pub fn new(level: u32, octant: usize, interaction: &Interaction) -> Self {
        Self {
            level,
            level_delta: interaction.level_delta,
            offset: interaction.offset,
            octant: if interaction.level_delta == 0 { 0 } else { octant },
        }
    }
}

/// Transfer operators of a kernel for every interaction of every level of a cell table generation. Immutable once
/// built, a new table generation gets a new cache.
pub struct TransferCache<K: ExpansionKernel> {
    generation: u64,
    keys: Vec<TransferKey>,
    transfers: Vec<K::Transfer>,
}

impl<K: ExpansionKernel> TransferCache<K> {
    /// Compute the operators needed by a table and its interaction lists.
    ///
    /// # Arguments
    /// * `kernel` - Expansion kernel.
    /// * `table` - Cell table, supplying the cell sizes and the levels with a far field.
    /// * `lists` - Interaction lists in relative form.
    pub fn new(kernel: &K, table: &CellTable, lists: &InteractionLists) -> Self {
        let mut keys = BTreeSet::new();
        for level in table.first_transfer_level()..=table.leaf_level() {
            for (octant, far) in lists.far.iter().enumerate() {
                keys.extend(far.iter().map(|i| TransferKey::new(level, octant, i)));
            }
        }
        let keys = keys.into_iter().collect::<Vec<_>>();

        let transfers = keys
            .par_iter()
            .map(|key| {
                let size = table.domain.cell_size(key.level);
                let interaction = Interaction {
                    level_delta: key.level_delta,
                    offset: key.offset,
                };
                let d = InteractionLists::displacement(key.octant, &interaction);
                kernel.transfer(&[d[0] * size[0], d[1] * size[1], d[2] * size[2]])
            })
            .collect();

        debug!(
            "{:?} transfer cache for generation {}: {} operators",
            kernel.kind(),
            table.generation,
            keys.len()
        );

        Self {
            generation: table.generation,
            keys,
            transfers,
        }
    }

    /// Generation of the cell table the operators were computed for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of operators.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the cache holds no operators.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Sorted keys of the cached operators.
    pub fn keys(&self) -> &[TransferKey] {
        &self.keys
    }

    /// Operator for a key.
    pub fn get(&self, key: &TransferKey) -> Option<&K::Transfer> {
        self.keys
            .binary_search(key)
            .ok()
            .map(|position| &self.transfers[position])
    }
}
