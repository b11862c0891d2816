use serde::de::DeserializeOwned;
use serde::Serialize;

use super::util;
use crate::error::{Error, Result};

/// Marks a collective's frames. 0xC1 is the one byte MessagePack reserves
/// and never produces, so tagged frames cannot be mistaken for the
/// engine's encoded traffic, and vice versa.
const COLLECTIVE_TAG: u8 = 0xC1;

/// Interface for a group of processes that can exchange messages over a
/// network. The underlying transport can in principle be TCP, shared
/// channels, or a higher level abstraction like MPI.
///
pub trait Communicator: Send + Sync {
    /// Must be implemented to return the rank of this process within the
    /// communicator.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peer processes in this
    /// communicator.
    fn size(&self) -> usize;

    /// Must be implemented to send a message to a peer. This method must
    /// return without waiting for a matching receive to be posted.
    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()>;

    /// Must be implemented to receive a message from any of the peers. This
    /// method is allowed to block until a message is ready.
    fn recv(&self) -> Result<Vec<u8>>;

    /// Requeue a received message which is not yet needed.
    fn requeue_recv(&self, bytes: Vec<u8>);

    /// Send one frame of a collective.
    fn send_collective(&self, rank: usize, payload: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(COLLECTIVE_TAG);
        frame.extend_from_slice(payload);
        self.send(rank, frame)
    }

    /// Receive the next collective frame, requeueing any point-to-point
    /// traffic a faster peer has already put on the wire.
    fn recv_collective(&self) -> Result<Vec<u8>> {
        loop {
            let mut bytes = self.recv()?;
            if bytes.first() == Some(&COLLECTIVE_TAG) {
                bytes.remove(0);
                return Ok(bytes);
            }
            self.requeue_recv(bytes);
            std::thread::yield_now();
        }
    }

    /// Implements a binomial tree broadcast from the root rank. The message
    /// buffer must be `Some` on the root rank and `None` everywhere else.
    ///
    fn broadcast(&self, value: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let r = self.rank();
        let p = self.size();

        let value = match value {
            Some(value) => value,
            None => self.recv_collective()?,
        };
        for level in (0..util::ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 && r + one < p {
                self.send_collective(r + one, &value)?
            }
        }
        Ok(value)
    }

    /// Implements a binomial tree reduce over a commutative combiner. All
    /// ranks return `None` except for the root.
    ///
    fn reduce(
        &self,
        f: &dyn Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
        mut value: Vec<u8>,
    ) -> Result<Option<Vec<u8>>> {
        let r = self.rank();
        let p = self.size();

        for level in 0..util::ceil_log2(p) {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 {
                if r + one < p {
                    value = f(value, self.recv_collective()?)
                }
            } else {
                self.send_collective(r - one, &value)?;
                return Ok(None);
            }
        }
        Ok(Some(value))
    }

    /// Implements an all-reduce (symmetric fold) over a commutative
    /// combiner.
    ///
    fn all_reduce(&self, f: &dyn Fn(Vec<u8>, Vec<u8>) -> Vec<u8>, value: Vec<u8>) -> Result<Vec<u8>> {
        self.broadcast(self.reduce(f, value)?)
    }
}

/// A communicator for a group of one. Collectives are identities and any
/// attempt at point-to-point traffic is an error.
pub struct SoloCommunicator;

impl Communicator for SoloCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, _rank: usize, _message: Vec<u8>) -> Result<()> {
        Err(Error::CommunicationFailure { rank: 0, stage: "solo send" })
    }

    fn recv(&self) -> Result<Vec<u8>> {
        Err(Error::CommunicationFailure { rank: 0, stage: "solo recv" })
    }

    fn requeue_recv(&self, _bytes: Vec<u8>) {}
}

/// All-reduce a scalar sum across the communicator.
pub fn all_reduce_sum(comm: &dyn Communicator, value: f64) -> Result<f64> {
    let folded = comm.all_reduce(
        &|a, b| (util::decode_f64(&a) + util::decode_f64(&b)).to_le_bytes().to_vec(),
        value.to_le_bytes().to_vec(),
    )?;
    Ok(util::decode_f64(&folded))
}

/// All-reduce a scalar max across the communicator.
pub fn all_reduce_max(comm: &dyn Communicator, value: f64) -> Result<f64> {
    let folded = comm.all_reduce(
        &|a, b| util::decode_f64(&a).max(util::decode_f64(&b)).to_le_bytes().to_vec(),
        value.to_le_bytes().to_vec(),
    )?;
    Ok(util::decode_f64(&folded))
}

/// Gather one serializable value per rank onto every rank, returned in rank
/// order. Implemented as an all-reduce whose combiner merges rank-tagged
/// payload lists.
pub fn all_gather<T>(comm: &dyn Communicator, value: &T) -> Result<Vec<T>>
where
    T: Serialize + DeserializeOwned,
{
    let payload = rmp_serde::to_vec(value).map_err(|e| Error::MalformedData {
        detail: format!("all_gather encode: {}", e),
    })?;
    let tagged: Vec<(usize, Vec<u8>)> = vec![(comm.rank(), payload)];
    let encoded = rmp_serde::to_vec(&tagged).expect("vec of byte buffers encodes");

    let merged = comm.all_reduce(
        &|a, b| {
            let mut left: Vec<(usize, Vec<u8>)> = rmp_serde::from_slice(&a).expect("well-formed");
            let right: Vec<(usize, Vec<u8>)> = rmp_serde::from_slice(&b).expect("well-formed");
            left.extend(right);
            rmp_serde::to_vec(&left).expect("vec of byte buffers encodes")
        },
        encoded,
    )?;

    let mut tagged: Vec<(usize, Vec<u8>)> =
        rmp_serde::from_slice(&merged).map_err(|e| Error::MalformedData {
            detail: format!("all_gather decode: {}", e),
        })?;
    tagged.sort_by_key(|(rank, _)| *rank);

    tagged
        .into_iter()
        .map(|(_, bytes)| {
            rmp_serde::from_slice(&bytes).map_err(|e| Error::MalformedData {
                detail: format!("all_gather payload decode: {}", e),
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::ChannelCommunicator;

    #[test]
    fn solo_collectives_are_identities() {
        let comm = SoloCommunicator;
        assert_eq!(all_reduce_sum(&comm, 3.5).unwrap(), 3.5);
        assert_eq!(all_reduce_max(&comm, -1.0).unwrap(), -1.0);
        let gathered = all_gather(&comm, &42_i64).unwrap();
        assert_eq!(gathered, [42]);
    }

    #[test]
    fn channel_group_collectives() {
        for num_ranks in [2, 3, 4, 7] {
            let comms = ChannelCommunicator::group(num_ranks);
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    std::thread::spawn(move || {
                        let rank = comm.rank();
                        let sum = all_reduce_sum(&comm, rank as f64 + 1.0).unwrap();
                        let max = all_reduce_max(&comm, rank as f64).unwrap();
                        let all = all_gather(&comm, &(rank * 10)).unwrap();
                        (sum, max, all)
                    })
                })
                .collect();
            let expected_sum = (num_ranks * (num_ranks + 1)) as f64 / 2.0;
            let expected_all: Vec<_> = (0..num_ranks).map(|r| r * 10).collect();
            for handle in handles {
                let (sum, max, all) = handle.join().unwrap();
                assert_eq!(sum, expected_sum);
                assert_eq!(max, (num_ranks - 1) as f64);
                assert_eq!(all, expected_all);
            }
        }
    }
}
