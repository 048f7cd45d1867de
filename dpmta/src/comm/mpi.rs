//! MPI communicator.
use itertools::Itertools;
use mpi::{
    datatype::{Partition, PartitionMut},
    topology::{Color, SimpleCommunicator},
    traits::{Communicator as _, CommunicatorCollectives, Destination, Source},
    Count,
};

use crate::{
    fmm::constants::MASTER_RANK,
    traits::{comm::Communicator, types::FmmError},
};

/// Wrapper of an MPI communicator exchanging byte buffers.
pub struct MpiCommunicator {
    comm: SimpleCommunicator,
}

impl MpiCommunicator {
    /// Wrap a duplicate of `comm`.
    pub fn new(comm: &SimpleCommunicator) -> Self {
        Self {
            comm: comm.duplicate(),
        }
    }

    /// Communicators of a coordinated run: a duplicate of `world`, holding the master and every worker, and on
    /// worker ranks the communicator of the workers alone.
    pub fn world_and_peers(world: &SimpleCommunicator) -> (Self, Option<Self>) {
        let color = if world.rank() as usize == MASTER_RANK {
            Color::undefined()
        } else {
            Color::with_value(1)
        };

        let peers = world
            .split_by_color(color)
            .map(|comm| MpiCommunicator { comm });

        (Self::new(world), peers)
    }
}

fn displacements(counts: &[Count]) -> Vec<Count> {
    counts
        .iter()
        .scan(0, |acc, &x| {
            let tmp = *acc;
            *acc += x;
            Some(tmp)
        })
        .collect_vec()
}

impl Communicator for MpiCommunicator {
    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn send(&self, destination: usize, buffer: Vec<u8>) -> Result<(), FmmError> {
        if destination >= self.size() {
            return Err(FmmError::Communication(format!(
                "send to rank {destination} outside a communicator of {}",
                self.size()
            )));
        }
        self.comm
            .process_at_rank(destination as i32)
            .send(&buffer[..]);
        Ok(())
    }

    fn receive(&self, source: usize) -> Result<Vec<u8>, FmmError> {
        if source >= self.size() {
            return Err(FmmError::Communication(format!(
                "receive from rank {source} outside a communicator of {}",
                self.size()
            )));
        }
        let (buffer, _status) = self
            .comm
            .process_at_rank(source as i32)
            .receive_vec::<u8>();
        Ok(buffer)
    }

    fn barrier(&self) -> Result<(), FmmError> {
        self.comm.barrier();
        Ok(())
    }

    fn all_to_all(&self, outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, FmmError> {
        let size = self.size();
        if outgoing.len() != size {
            return Err(FmmError::Communication(format!(
                "all to all expects {size} buffers, found {}",
                outgoing.len()
            )));
        }

        let counts_snd = outgoing.iter().map(|b| b.len() as Count).collect_vec();
        let displs_snd = displacements(&counts_snd);
        let send_buffer = outgoing.concat();

        let mut counts_recv = vec![0 as Count; size];
        self.comm.all_to_all_into(&counts_snd, &mut counts_recv);
        let displs_recv = displacements(&counts_recv);

        let total = counts_recv.iter().sum::<Count>();
        let mut received = vec![0u8; total as usize];
        {
            let mut partition_received: PartitionMut<[u8], Vec<i32>, &[i32]> =
                PartitionMut::new(&mut received[..], counts_recv.clone(), &displs_recv[..]);
            let partition_snd = Partition::new(&send_buffer[..], counts_snd, &displs_snd[..]);
            self.comm
                .all_to_all_varcount_into(&partition_snd, &mut partition_received);
        }

        Ok(counts_recv
            .iter()
            .zip(displs_recv.iter())
            .map(|(&count, &displ)| received[displ as usize..(displ + count) as usize].to_vec())
            .collect())
    }
}
