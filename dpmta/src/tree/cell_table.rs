//! Construction and queries of the versioned cell ownership table.
use std::collections::BTreeSet;

use log::info;
use rayon::prelude::*;

use crate::{
    traits::{tree::OwnershipPolicy, types::FmmError},
    tree::{
        constants::{DEEPEST_LEVEL, MAX_RANKS},
        morton::{decode_key, ncells},
        types::{CellIndex, CellTable, Domain},
    },
};

impl CellTable {
    /// Build the table of a new geometry.
    ///
    /// # Arguments
    /// * `generation` - Generation counter of the new table.
    /// * `domain` - Volume covered by the root cell.
    /// * `levels` - Number of levels, counting the root.
    /// * `periodic` - Whether the domain is the unit of a periodic lattice.
    /// * `nranks` - Number of processes owning cells.
    /// * `policy` - Ownership strategy.
    pub fn new(
        generation: u64,
        domain: Domain,
        levels: u32,
        periodic: bool,
        nranks: usize,
        policy: &dyn OwnershipPolicy,
    ) -> Result<Self, FmmError> {
        if levels == 0 || levels > DEEPEST_LEVEL + 1 {
            return Err(FmmError::Configuration(format!(
                "number of levels must be between 1 and {}, found {levels}",
                DEEPEST_LEVEL + 1
            )));
        }

        if nranks == 0 || nranks > MAX_RANKS {
            return Err(FmmError::Configuration(format!(
                "cells must be owned by between 1 and {MAX_RANKS} processes, found {nranks}"
            )));
        }

        if !domain.is_valid() {
            return Err(FmmError::Configuration(format!(
                "invalid domain {domain:?}"
            )));
        }

        let owners = (0..levels)
            .map(|level| {
                (0..ncells(level) as u64)
                    .into_par_iter()
                    .map(|morton| policy.owner(level, &decode_key(morton), nranks) as u32)
                    .collect::<Vec<_>>()
            })
            .collect();

        info!(
            "cell table generation {generation}: {levels} levels over {nranks} ranks, {} ownership, domain {:?}",
            policy.name(),
            domain
        );

        Ok(Self {
            generation,
            domain,
            levels,
            periodic,
            nranks,
            owners,
        })
    }

    /// The deepest level, holding the particles.
    pub fn leaf_level(&self) -> u32 {
        self.levels - 1
    }

    /// First level at which cells have a non empty far field.
    pub fn first_transfer_level(&self) -> u32 {
        if self.periodic {
            1
        } else {
            2
        }
    }

    /// Rank owning a cell.
    pub fn owner(&self, cell: &CellIndex) -> usize {
        self.owners[cell.level as usize][cell.morton as usize] as usize
    }

    /// Cells of a level owned by `rank`, in Morton order.
    pub fn owned(&self, rank: usize, level: u32) -> impl Iterator<Item = CellIndex> + '_ {
        self.owners[level as usize]
            .iter()
            .enumerate()
            .filter(move |(_, &owner)| owner as usize == rank)
            .map(move |(morton, _)| CellIndex {
                level,
                morton: morton as u64,
            })
    }

    /// Number of cells of each level owned by `rank` and enclosing at least one of `leaves` that `rank` also owns.
    pub fn occupied(&self, rank: usize, leaves: impl IntoIterator<Item = CellIndex>) -> Vec<u64> {
        let mut cells = vec![BTreeSet::new(); self.levels as usize];
        for leaf in leaves.into_iter().filter(|leaf| self.owner(leaf) == rank) {
            for (level, cells) in cells.iter_mut().enumerate() {
                let cell = leaf.ancestor(level as u32);
                if self.owner(&cell) == rank {
                    cells.insert(cell);
                }
            }
        }
        cells.iter().map(|cells| cells.len() as u64).collect()
    }

    /// Number of cells, over all levels, owned by `rank`.
    pub fn owned_count(&self, rank: usize) -> usize {
        self.owners
            .iter()
            .map(|level| level.iter().filter(|&&owner| owner as usize == rank).count())
            .sum()
    }

    /// Total number of cells over all levels.
    pub fn ncells(&self) -> usize {
        (0..self.levels).map(ncells).sum()
    }

    /// Check the internal consistency of a table received from another process.
    pub fn validate(&self) -> Result<(), FmmError> {
        if self.owners.len() != self.levels as usize {
            return Err(FmmError::Synchronization(format!(
                "cell table generation {} describes {} levels but holds owners for {}",
                self.generation,
                self.levels,
                self.owners.len()
            )));
        }

        for (level, owners) in self.owners.iter().enumerate() {
            if owners.len() != ncells(level as u32) {
                return Err(FmmError::Synchronization(format!(
                    "cell table generation {} holds {} owners at level {level}, expected {}",
                    self.generation,
                    owners.len(),
                    ncells(level as u32)
                )));
            }
            if let Some(owner) = owners.iter().find(|&&o| o as usize >= self.nranks) {
                return Err(FmmError::Synchronization(format!(
                    "cell table generation {} assigns a cell to rank {owner} of {}",
                    self.generation, self.nranks
                )));
            }
        }

        Ok(())
    }
}
