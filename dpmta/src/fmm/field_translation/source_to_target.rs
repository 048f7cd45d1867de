//! Multipole to local translations, the exchange of the multipoles they read and the periodic lattice correction.
use std::collections::BTreeSet;

use log::debug;
use num::Zero;
use rayon::prelude::*;

use crate::{
    fmm::{
        expansions::ExpansionStore,
        helpers::{add_scaled, image_shift, outer},
        transfer::TransferKey,
        types::M2lMethod,
        worker::KernelPass,
    },
    traits::{comm::Communicator, fmm::SourceToTargetTranslation, kernel::ExpansionKernel, types::FmmError},
    tree::types::CellIndex,
};

impl<K, C> KernelPass<'_, K, C>
where
    K: ExpansionKernel,
    C: Communicator,
{
    /// Fold the far lattice into the root local expansion. Only the root's owner holds a correction to apply.
    pub fn lattice(&mut self) {
        let Some(lattice) = self.lattice else {
            return;
        };
        let root = CellIndex::root();
        if self.is_faulted() || self.context.table.owner(&root) != self.context.rank {
            return;
        }

        let refined = self.context.settings.refined_virial();
        if let (Some(multipole), Some(local)) = (self.multipoles.get(&root), self.locals.get_mut(&root)) {
            let w = lattice.apply(multipole, local, refined);
            add_scaled(&mut self.virial, &w, 1.0);
        }
    }

    /// Number of targets sharing an accumulator batch.
    fn block_size(&self) -> usize {
        match self.context.settings.m2l {
            M2lMethod::Fft => self.context.settings.fft_blocking_factor.max(1),
            M2lMethod::Dense => 1,
        }
    }
}

impl<K, C> SourceToTargetTranslation for KernelPass<'_, K, C>
where
    K: ExpansionKernel,
    C: Communicator,
{
    fn exchange(&mut self) -> Result<(), FmmError> {
        let table = self.context.table;
        let lists = self.context.lists;
        let rank = self.context.rank;
        let n = self.kernel.ncoeffs();

        // Far sources owned elsewhere, per owner
        let mut needed = vec![BTreeSet::new(); self.context.peers.size()];
        if !self.is_faulted() {
            for level in table.first_transfer_level()..=table.leaf_level() {
                for target in table.owned(rank, level) {
                    for (_, source, _) in lists.far_sources(&target, table.periodic) {
                        let owner = table.owner(&source);
                        if owner != rank {
                            needed[owner].insert(source);
                        }
                    }
                }
            }
        }

        let requests = self.exchange_requests(
            needed
                .into_iter()
                .map(|cells| cells.into_iter().collect())
                .collect(),
        )?;

        let mut outgoing = vec![(Vec::new(), Vec::new()); requests.len()];
        let mut unowned = None;
        for (requester, cells) in requests.into_iter().enumerate() {
            for cell in cells {
                match self.multipoles.get(&cell) {
                    Some(multipole) => {
                        outgoing[requester].0.push(cell);
                        outgoing[requester].1.extend_from_slice(multipole);
                    }
                    None => {
                        unowned.get_or_insert((requester, cell));
                    }
                }
            }
        }
        if let Some((requester, cell)) = unowned {
            self.record(FmmError::Synchronization(format!(
                "rank {requester} requested the multipole of {cell:?}, which rank {rank} does not own"
            )));
        }

        let incoming = self.exchange_expansions(outgoing)?;

        let mut remote = ExpansionStore::new(
            incoming.iter().flat_map(|(cells, _)| cells.iter().copied()),
            n,
        );
        for (cells, coefficients) in incoming.iter() {
            for (cell, values) in cells.iter().zip(coefficients.chunks_exact(n)) {
                if let Some(slot) = remote.get_mut(cell) {
                    slot.copy_from_slice(values);
                }
            }
        }

        debug!(
            "rank {} {:?} exchange: {} remote multipoles",
            rank,
            self.kernel.kind(),
            remote.len()
        );
        self.remote = remote;
        Ok(())
    }

    fn m2l(&mut self, level: u32) -> Result<(), FmmError> {
        if self.is_faulted() {
            return Ok(());
        }

        let kernel = self.kernel;
        let transfers = self.transfers;
        let lists = self.context.lists;
        let table = self.context.table;
        let domain = &table.domain;
        let periodic = table.periodic;
        let refined = self.context.settings.refined_virial();
        let block = self.block_size();
        let n = kernel.ncoeffs();

        let multipoles = &self.multipoles;
        let remote = &self.remote;
        let (targets, locals) = self.locals.level_mut(level);

        let sources = targets
            .iter()
            .flat_map(|target| {
                lists
                    .far_sources(target, periodic)
                    .map(|(_, source, _)| source)
                    .collect::<Vec<_>>()
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();

        // Each source is prepared once for all of its targets
        let signals = sources
            .par_iter()
            .map(|source| {
                multipoles
                    .get(source)
                    .or_else(|| remote.get(source))
                    .map(|multipole| kernel.signal(multipole))
            })
            .collect::<Vec<_>>();

        let missing = sources
            .iter()
            .zip(signals.iter())
            .find(|(_, signal)| signal.is_none())
            .map(|(source, _)| *source);

        let result = match missing {
            Some(source) => Err(FmmError::Synchronization(format!(
                "no multipole for far source {source:?} at level {level}"
            ))),
            None => targets
                .par_chunks(block)
                .zip(locals.par_chunks_mut(block * n))
                .map(|(targets, locals)| {
                    let mut accumulator = kernel.accumulator();
                    let mut w = [[0f64; 3]; 3];

                    for (target, local) in targets.iter().zip(locals.chunks_exact_mut(n)) {
                        for (interaction, source, image) in lists.far_sources(target, periodic) {
                            let key = TransferKey::new(level, target.octant(), interaction);
                            let transfer = transfers.get(&key).ok_or_else(|| {
                                FmmError::Failed(format!("no transfer operator for {key:?}"))
                            })?;
                            let signal = sources
                                .binary_search(&source)
                                .ok()
                                .and_then(|i| signals[i].as_ref())
                                .ok_or_else(|| {
                                    FmmError::Synchronization(format!("no signal for {source:?}"))
                                })?;

                            if refined && image != [0, 0, 0] {
                                // Image contributions are kept apart to weigh them by their lattice shift
                                let mut single = kernel.accumulator();
                                let mut contribution = vec![K::Coefficient::zero(); n];
                                kernel.m2l(transfer, signal, &mut single);
                                kernel.finalise(&mut single, &mut contribution);

                                let multipole = multipoles.get(target).ok_or_else(|| {
                                    FmmError::Synchronization(format!("no multipole for target {target:?}"))
                                })?;
                                let gradient = kernel.net_gradient(&contribution, multipole);
                                add_scaled(&mut w, &outer(&image_shift(&image, domain), &gradient), 0.5);

                                for (l, c) in local.iter_mut().zip(contribution) {
                                    *l += c;
                                }
                            } else {
                                kernel.m2l(transfer, signal, &mut accumulator);
                            }
                        }
                        kernel.finalise(&mut accumulator, local);
                    }
                    Ok(w)
                })
                .collect::<Result<Vec<_>, FmmError>>(),
        };

        match result {
            Ok(contributions) => contributions
                .iter()
                .for_each(|w| add_scaled(&mut self.virial, w, 1.0)),
            Err(e) => self.record(e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        fmm::{
            direct,
            field_translation::fixture,
            types::{Boundary, Interactions, Particle},
        },
        traits::fmm::SourceTranslation,
        tree::{helpers::particles_fixture, types::Domain},
    };

    fn relative_rms(found: &[f64], expected: &[f64]) -> f64 {
        let error = found
            .iter()
            .zip(expected)
            .map(|(f, e)| (f - e).powi(2))
            .sum::<f64>();
        let norm = expected.iter().map(|e| e * e).sum::<f64>();
        (error / norm).sqrt()
    }

    #[test]
    fn test_exchange_supplies_far_sources() {
        let settings = fixture::settings(4, Boundary::Open);
        let particles = fixture::numbered(particles_fixture(300, 1));

        let results = fixture::run(3, &settings, &particles, |pass| {
            pass.p2m().unwrap();
            for level in (1..=pass.context.table.leaf_level()).rev() {
                pass.m2m(level).unwrap();
            }
            pass.exchange().unwrap();

            let table = pass.context.table;
            let complete = (table.first_transfer_level()..=table.leaf_level()).all(|level| {
                table.owned(pass.context.rank, level).all(|target| {
                    pass.context
                        .lists
                        .far_sources(&target, false)
                        .all(|(_, source, _)| pass.multipoles.contains(&source) || pass.remote.contains(&source))
                })
            });
            (complete, pass.remote.len())
        });

        assert!(results.iter().all(|(complete, _)| *complete));
        assert!(results.iter().any(|(_, remote)| *remote > 0));
    }

    #[test]
    fn test_far_field_matches_direct() {
        let settings = fixture::settings(4, Boundary::Open);
        let particles = fixture::numbered(particles_fixture(400, 2));

        let found = fixture::merged(fixture::run(2, &settings, &particles, fixture::evaluate));
        let expected = direct::evaluate(&particles, Interactions::default(), false).unwrap();
        assert_eq!(found.len(), particles.len());

        let potentials = found.iter().map(|e| e.potential).collect::<Vec<_>>();
        let expected_potentials = expected.particles.iter().map(|r| r.potential).collect::<Vec<_>>();
        assert!(relative_rms(&potentials, &expected_potentials) < 1e-3);

        let forces = found.iter().flat_map(|e| e.force).collect::<Vec<_>>();
        let expected_forces = expected.particles.iter().flat_map(|r| r.force).collect::<Vec<_>>();
        assert!(relative_rms(&forces, &expected_forces) < 1e-2);
    }

    #[test]
    fn test_fft_matches_dense() {
        let mut settings = fixture::settings(4, Boundary::Open);
        let particles = fixture::numbered(particles_fixture(200, 3));
        let dense = fixture::merged(fixture::run(1, &settings, &particles, fixture::evaluate));

        settings.m2l = M2lMethod::Fft;
        settings.fft_blocking_factor = 4;
        let fft = fixture::merged(fixture::run(2, &settings, &particles, fixture::evaluate));

        for (d, f) in dense.iter().zip(fft.iter()) {
            assert!((d.potential - f.potential).abs() < 1e-9 * d.potential.abs().max(1.0));
            for i in 0..3 {
                assert!((d.force[i] - f.force[i]).abs() < 1e-8 * d.force[i].abs().max(1.0));
            }
        }
    }

    #[test]
    fn test_periodic_forces_balance() {
        // Internal forces of a periodic system cancel, up to the truncation error
        let domain = Domain::new(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]);
        let mut settings = fixture::settings(3, Boundary::Periodic(domain));
        settings.macroscopic_levels = 4;

        let mut particles = particles_fixture(120, 4);
        let net = particles.iter().map(|p| p.charge).sum::<f64>() / particles.len() as f64;
        particles.iter_mut().for_each(|p| p.charge -= net);
        let particles = fixture::numbered(particles);

        let found = fixture::merged(fixture::run(2, &settings, &particles, fixture::evaluate));
        let mut total = [0f64; 3];
        let mut magnitude = 0f64;
        for e in found.iter() {
            for i in 0..3 {
                total[i] += e.force[i];
                magnitude += e.force[i].abs();
            }
        }
        for t in total {
            assert!(t.abs() < 1e-3 * magnitude);
        }
    }

    #[test]
    fn test_missing_source_is_a_fault() {
        let settings = fixture::settings(3, Boundary::Open);
        let particles = fixture::numbered(vec![
            Particle::new([0.1, 0.1, 0.1], 1.0),
            Particle::new([0.9, 0.9, 0.9], 1.0),
        ]);

        let faults = fixture::run(2, &settings, &particles, |pass| {
            pass.p2m().unwrap();
            for level in (1..=pass.context.table.leaf_level()).rev() {
                pass.m2m(level).unwrap();
            }
            // Skipping the exchange leaves remote sources unavailable
            pass.m2l(pass.context.table.leaf_level()).unwrap();
            pass.fault.clone()
        });

        assert!(faults
            .iter()
            .any(|f| matches!(f, Some(FmmError::Synchronization(_)))));
    }
}
