//! In-process communicator, one member per thread.
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::traits::{comm::Communicator, types::FmmError};

/// Member of a group of threads joined by a complete matrix of channels.
///
/// Every ordered pair of members has its own channel, so messages from one source arrive in the order they were
/// sent regardless of traffic from other sources.
pub struct LocalCommunicator {
    rank: usize,
    senders: Vec<Sender<Vec<u8>>>,
    receivers: Vec<Receiver<Vec<u8>>>,
}

impl std::fmt::Debug for LocalCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCommunicator")
            .field("rank", &self.rank)
            .field("size", &self.senders.len())
            .finish()
    }
}

impl LocalCommunicator {
    /// Create the members of a group of `size` processes, member `r` has rank `r`.
    pub fn group(size: usize) -> Vec<LocalCommunicator> {
        // channels[source][destination]
        let mut senders = vec![Vec::with_capacity(size); size];
        let mut receivers: Vec<Vec<Receiver<Vec<u8>>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();

        for source_senders in senders.iter_mut() {
            for destination_receivers in receivers.iter_mut() {
                let (sender, receiver) = channel();
                source_senders.push(sender);
                destination_receivers.push(receiver);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| LocalCommunicator {
                rank,
                senders,
                receivers,
            })
            .collect()
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn send(&self, destination: usize, buffer: Vec<u8>) -> Result<(), FmmError> {
        let sender = self.senders.get(destination).ok_or_else(|| {
            FmmError::Communication(format!(
                "rank {} sent to rank {destination} outside a group of {}",
                self.rank,
                self.size()
            ))
        })?;
        sender.send(buffer).map_err(|_| {
            FmmError::Communication(format!(
                "rank {destination} left the group before receiving from rank {}",
                self.rank
            ))
        })
    }

    fn receive(&self, source: usize) -> Result<Vec<u8>, FmmError> {
        let receiver = self.receivers.get(source).ok_or_else(|| {
            FmmError::Communication(format!(
                "rank {} received from rank {source} outside a group of {}",
                self.rank,
                self.size()
            ))
        })?;
        receiver.recv().map_err(|_| {
            FmmError::Communication(format!(
                "rank {source} left the group before sending to rank {}",
                self.rank
            ))
        })
    }

}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    #[test]
    fn test_all_to_all() {
        let size = 4;
        let handles: Vec<_> = LocalCommunicator::group(size)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let outgoing = (0..comm.size())
                        .map(|destination| vec![comm.rank() as u8, destination as u8])
                        .collect();
                    let incoming = comm.all_to_all(outgoing).unwrap();
                    comm.barrier().unwrap();
                    (comm.rank(), incoming)
                })
            })
            .collect();

        for handle in handles {
            let (rank, incoming) = handle.join().unwrap();
            assert_eq!(incoming.len(), size);
            for (source, buffer) in incoming.iter().enumerate() {
                assert_eq!(buffer, &vec![source as u8, rank as u8]);
            }
        }
    }

    #[test]
    fn test_broadcast_and_ordering() {
        let handles: Vec<_> = LocalCommunicator::group(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let data = (comm.rank() == 1).then(|| vec![7, 8, 9]);
                    let received = comm.broadcast(1, data).unwrap();

                    // Successive messages from one source keep their order
                    if comm.rank() == 0 {
                        for i in 0..10u8 {
                            comm.send(2, vec![i]).unwrap();
                        }
                    }
                    if comm.rank() == 2 {
                        for i in 0..10u8 {
                            assert_eq!(comm.receive(0).unwrap(), vec![i]);
                        }
                    }
                    received
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![7, 8, 9]);
        }
    }

    #[test]
    fn test_departed_peer() {
        let mut group = LocalCommunicator::group(2);
        let survivor = group.remove(0);
        drop(group);

        assert!(matches!(survivor.receive(1), Err(FmmError::Communication(_))));
        assert!(survivor.send(1, vec![1]).is_err());
        assert!(survivor.send(5, vec![1]).is_err());
    }

    #[test]
    fn test_barrier_detects_lost_member() {
        let mut group = LocalCommunicator::group(3);
        let departed = group.pop().unwrap();
        let waiting = group.pop().unwrap();
        let root = group.pop().unwrap();
        drop(departed);

        let handle = thread::spawn(move || waiting.barrier());
        assert!(matches!(root.barrier(), Err(FmmError::Communication(_))));

        // The released member sees a message where the token should be
        root.send(1, vec![6]).unwrap();
        assert!(matches!(handle.join().unwrap(), Err(FmmError::Communication(_))));
    }
}
