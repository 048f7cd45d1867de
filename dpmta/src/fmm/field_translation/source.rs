//! Multipole expansion translations
use std::ops::Range;

use num::Zero;
use rayon::prelude::*;

use crate::{
    fmm::{helpers::sub, worker::KernelPass},
    traits::{comm::Communicator, fmm::SourceTranslation, kernel::ExpansionKernel, types::FmmError},
    tree::types::CellIndex,
};

/// Ranges of consecutive cells sharing a parent, cells must be sorted.
fn sibling_ranges(cells: &[CellIndex]) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = Vec::new();
    for (i, cell) in cells.iter().enumerate() {
        match ranges.last_mut() {
            Some(range) if cells[range.start].parent() == cell.parent() => range.end = i + 1,
            _ => ranges.push(i..i + 1),
        }
    }
    ranges
}

impl<K, C> SourceTranslation for KernelPass<'_, K, C>
where
    K: ExpansionKernel,
    C: Communicator,
{
    fn p2m(&mut self) -> Result<(), FmmError> {
        if self.is_faulted() {
            return Ok(());
        }

        let kernel = self.kernel;
        let particles = self.context.particles;
        let domain = &self.context.table.domain;
        let leaf_level = self.context.table.leaf_level();
        let n = kernel.ncoeffs();

        let (leaves, multipoles) = self.multipoles.level_mut(leaf_level);

        // Empty leaves keep an explicitly zeroed expansion
        multipoles
            .par_chunks_exact_mut(n)
            .zip(leaves.par_iter())
            .for_each(|(multipole, leaf)| {
                multipole.iter_mut().for_each(|c| *c = K::Coefficient::zero());
                kernel.p2m(particles.get(leaf), &leaf.centre(domain), multipole);
            });

        Ok(())
    }

    fn m2m(&mut self, level: u32) -> Result<(), FmmError> {
        let table = self.context.table;
        let rank = self.context.rank;
        let n = self.kernel.ncoeffs();
        let mut outgoing = vec![(Vec::new(), Vec::new()); self.context.peers.size()];

        if !self.is_faulted() {
            let kernel = self.kernel;
            let domain = &table.domain;
            let (children, multipoles) = self.multipoles.level(level);

            // Partial parent expansions from the children held here
            let parents = sibling_ranges(children)
                .into_par_iter()
                .map(|range| {
                    let parent = children[range.start].parent();
                    let centre = parent.centre(domain);
                    let mut sum = vec![K::Coefficient::zero(); n];
                    for i in range {
                        let displacement = sub(&children[i].centre(domain), &centre);
                        kernel.m2m(&multipoles[i * n..(i + 1) * n], &displacement, &mut sum);
                    }
                    (parent, sum)
                })
                .collect::<Vec<_>>();

            for (parent, sum) in parents {
                let owner = table.owner(&parent);
                if owner == rank {
                    if let Err(e) = Self::accumulate(&mut self.multipoles, &parent, &sum) {
                        self.record(e);
                    }
                } else {
                    outgoing[owner].0.push(parent);
                    outgoing[owner].1.extend(sum);
                }
            }
        }

        // Merge the partial sums of parents owned here
        for (cells, coefficients) in self.exchange_expansions(outgoing)? {
            for (cell, values) in cells.iter().zip(coefficients.chunks_exact(n)) {
                if let Err(e) = Self::accumulate(&mut self.multipoles, cell, values) {
                    self.record(e);
                }
            }
        }

        Ok(())
    }
}
