//! Process group communication substrate.
use crate::traits::types::FmmError;

/// A fixed size group of cooperating processes exchanging byte buffers.
///
/// Every send is paired with a receive expected at a known phase, there is no partial message tolerance.
pub trait Communicator {
    /// Rank of this process in the group.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Blocking send of a buffer to `destination`.
    fn send(&self, destination: usize, buffer: Vec<u8>) -> Result<(), FmmError>;

    /// Blocking receive of the next buffer sent by `source`.
    fn receive(&self, source: usize) -> Result<Vec<u8>, FmmError>;

    /// Block until every process in the group has reached the barrier.
    ///
    /// Empty tokens are gathered on rank 0 and released from it. A member that has left the group, or a message
    /// arriving in place of a token, is an error on every process that observes it.
    fn barrier(&self) -> Result<(), FmmError> {
        let unexpected = |source: usize, length: usize| {
            FmmError::Communication(format!(
                "rank {} received {length} bytes from rank {source} in place of a barrier token",
                self.rank()
            ))
        };

        if self.rank() == 0 {
            for source in 1..self.size() {
                let token = self.receive(source)?;
                if !token.is_empty() {
                    return Err(unexpected(source, token.len()));
                }
            }
            for destination in 1..self.size() {
                self.send(destination, Vec::new())?;
            }
        } else {
            self.send(0, Vec::new())?;
            let token = self.receive(0)?;
            if !token.is_empty() {
                return Err(unexpected(0, token.len()));
            }
        }
        Ok(())
    }

    /// Broadcast a buffer from `root`, which must pass `Some`, to every process.
    ///
    /// # Arguments
    /// * `root` - Rank that owns the data.
    /// * `buffer` - The data, only read on the root.
    fn broadcast(&self, root: usize, buffer: Option<Vec<u8>>) -> Result<Vec<u8>, FmmError> {
        if self.rank() == root {
            let buffer = buffer.ok_or_else(|| {
                FmmError::Communication(format!("broadcast root {root} supplied no data"))
            })?;
            for destination in (0..self.size()).filter(|&r| r != root) {
                self.send(destination, buffer.clone())?;
            }
            Ok(buffer)
        } else {
            self.receive(root)
        }
    }

    /// Sparse all to all, `outgoing[r]` is delivered to rank `r` and the result holds one buffer from every rank.
    /// Empty buffers are still exchanged so that every process can count on one message per peer.
    fn all_to_all(&self, mut outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, FmmError> {
        if outgoing.len() != self.size() {
            return Err(FmmError::Communication(format!(
                "all to all expects {} buffers, found {}",
                self.size(),
                outgoing.len()
            )));
        }

        let rank = self.rank();
        let own = std::mem::take(&mut outgoing[rank]);
        for (destination, buffer) in outgoing.into_iter().enumerate() {
            if destination != rank {
                self.send(destination, buffer)?;
            }
        }

        let mut incoming = Vec::with_capacity(self.size());
        for source in 0..self.size() {
            if source == rank {
                incoming.push(Vec::new());
            } else {
                incoming.push(self.receive(source)?);
            }
        }
        incoming[rank] = own;
        Ok(incoming)
    }
}
