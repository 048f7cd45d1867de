//! Local expansion translations and particle evaluation.
use std::{collections::BTreeSet, ops::Range};

use rayon::prelude::*;

use crate::{
    fmm::{
        expansions::ExpansionStore,
        helpers::{add_scaled, image_shift, outer, sub},
        types::Evaluation,
        worker::KernelPass,
    },
    traits::{comm::Communicator, fmm::TargetTranslation, kernel::ExpansionKernel, types::FmmError},
};

type LeafEvaluations = (Range<usize>, Vec<Evaluation>, [[f64; 3]; 3]);

impl<K, C> KernelPass<'_, K, C>
where
    K: ExpansionKernel,
    C: Communicator,
{
    fn apply_evaluations(&mut self, leaves: Vec<LeafEvaluations>) {
        for (range, evaluations, w) in leaves {
            for (slot, evaluation) in self.evaluations[range].iter_mut().zip(evaluations) {
                *slot += evaluation;
            }
            add_scaled(&mut self.virial, &w, 1.0);
        }
    }
}

impl<K, C> TargetTranslation for KernelPass<'_, K, C>
where
    K: ExpansionKernel,
    C: Communicator,
{
    fn l2l(&mut self, level: u32) -> Result<(), FmmError> {
        let table = self.context.table;
        let rank = self.context.rank;
        let n = self.kernel.ncoeffs();
        let mut outgoing = vec![(Vec::new(), Vec::new()); self.context.peers.size()];

        // Parent locals go to every other owner of one of their children
        if !self.is_faulted() {
            let (parents, locals) = self.locals.level(level - 1);
            for (parent, local) in parents.iter().zip(locals.chunks_exact(n)) {
                let owners = parent
                    .children()
                    .iter()
                    .map(|child| table.owner(child))
                    .filter(|&owner| owner != rank)
                    .collect::<BTreeSet<_>>();
                for owner in owners {
                    outgoing[owner].0.push(*parent);
                    outgoing[owner].1.extend_from_slice(local);
                }
            }
        }

        let incoming = self.exchange_expansions(outgoing)?;
        if self.is_faulted() {
            return Ok(());
        }

        let (own, own_locals) = self.locals.level(level - 1);
        let mut parents = ExpansionStore::new(
            own.iter()
                .copied()
                .chain(incoming.iter().flat_map(|(cells, _)| cells.iter().copied())),
            n,
        );
        for (cells, coefficients) in std::iter::once((own, own_locals))
            .chain(incoming.iter().map(|(cells, coefficients)| (cells.as_slice(), coefficients.as_slice())))
        {
            for (cell, values) in cells.iter().zip(coefficients.chunks_exact(n)) {
                if let Some(slot) = parents.get_mut(cell) {
                    slot.copy_from_slice(values);
                }
            }
        }

        let kernel = self.kernel;
        let domain = &table.domain;
        let (children, locals) = self.locals.level_mut(level);

        let result = children
            .par_iter()
            .zip(locals.par_chunks_exact_mut(n))
            .try_for_each(|(child, local)| {
                let parent = child.parent();
                let expansion = parents.get(&parent).ok_or_else(|| {
                    FmmError::Synchronization(format!("no local expansion for parent {parent:?}"))
                })?;
                let displacement = sub(&child.centre(domain), &parent.centre(domain));
                kernel.l2l(expansion, &displacement, local);
                Ok(())
            });

        if let Err(e) = result {
            self.record(e);
        }
        Ok(())
    }

    fn l2p(&mut self) -> Result<(), FmmError> {
        if self.is_faulted() {
            return Ok(());
        }

        let kernel = self.kernel;
        let particles = self.context.particles;
        let domain = &self.context.table.domain;
        let virial = self.context.settings.virial.is_some();
        let centre = domain.centre();
        let n = kernel.ncoeffs();

        let (leaves, locals) = self.locals.level(self.context.table.leaf_level());

        let evaluated = leaves
            .par_iter()
            .zip(locals.par_chunks_exact(n))
            .map(|(leaf, local)| {
                let range = particles.range(leaf);
                let expansion_centre = leaf.centre(domain);
                let mut w = [[0f64; 3]; 3];

                let evaluations = particles.particles()[range.clone()]
                    .iter()
                    .map(|particle| {
                        let evaluation = kernel.l2p(local, &expansion_centre, particle);
                        if virial {
                            let r = sub(&particle.position, &centre);
                            add_scaled(&mut w, &outer(&r, &evaluation.force), 1.0);
                        }
                        evaluation
                    })
                    .collect();

                (range, evaluations, w)
            })
            .collect::<Vec<_>>();

        self.apply_evaluations(evaluated);
        Ok(())
    }

    fn p2p(&mut self) -> Result<(), FmmError> {
        if self.is_faulted() {
            return Ok(());
        }

        let kernel = self.kernel;
        let lists = self.context.lists;
        let particles = self.context.particles;
        let table = self.context.table;
        let domain = &table.domain;
        let virial = self.context.settings.virial.is_some();

        let (leaves, _) = self.locals.level(table.leaf_level());

        let evaluated = leaves
            .par_iter()
            .map(|leaf| {
                let range = particles.range(leaf);
                let mut w = [[0f64; 3]; 3];
                let sources = lists
                    .near_sources(leaf, table.periodic)
                    .map(|(source, image)| (particles.get(&source), image, image_shift(&image, domain)))
                    .collect::<Vec<_>>();

                let evaluations = particles.particles()[range.clone()]
                    .iter()
                    .map(|target| {
                        let mut evaluation = Evaluation::default();
                        for (cluster, image, shift) in sources.iter() {
                            let zero_image = *image == [0, 0, 0];
                            for source in cluster.iter() {
                                if zero_image && source.id == target.id {
                                    continue;
                                }
                                let pair = kernel.p2p(target, source, shift);
                                if virial {
                                    let r = sub(&sub(&target.position, &source.position), shift);
                                    add_scaled(&mut w, &outer(&r, &pair.force), 0.5);
                                }
                                evaluation += pair;
                            }
                        }
                        evaluation
                    })
                    .collect();

                (range, evaluations, w)
            })
            .collect::<Vec<_>>();

        self.apply_evaluations(evaluated);
        Ok(())
    }
}
