use std::time::Duration;

use crate::error::{Error, Result};

use super::comm::Communicator;

/// How long a rank will wait on an empty inbox before declaring the group
/// wedged. Generous; a healthy group delivers in microseconds.
const RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// An in-process communicator group where each rank is backed by an
/// unbounded channel. Intended for driving multi-rank code paths from a
/// single OS process: create a group, move each member onto its own thread,
/// and run the same bulk-synchronous program on all of them.
///
pub struct ChannelCommunicator {
    rank: usize,
    peers: Vec<crossbeam_channel::Sender<Vec<u8>>>,
    inbox: crossbeam_channel::Receiver<Vec<u8>>,
}

impl ChannelCommunicator {
    /// Create a group of `size` connected communicators, one per rank.
    pub fn group(size: usize) -> Vec<Self> {
        let (sinks, sources): (Vec<_>, Vec<_>) =
            (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        sources
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Self {
                rank,
                peers: sinks.clone(),
                inbox,
            })
            .collect()
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()> {
        self.peers[rank]
            .send(message)
            .map_err(|_| Error::CommunicationFailure {
                rank: self.rank,
                stage: "channel send",
            })
    }

    fn recv(&self) -> Result<Vec<u8>> {
        self.inbox
            .recv_timeout(RECV_TIMEOUT)
            .map_err(|_| Error::CommunicationFailure {
                rank: self.rank,
                stage: "channel recv",
            })
    }

    fn requeue_recv(&self, bytes: Vec<u8>) {
        // Own channel, so a requeue can only fail if we dropped our inbox.
        self.peers[self.rank].send(bytes).expect("own inbox is open")
    }
}
