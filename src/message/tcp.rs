use log::{error, info};

use super::comm::Communicator;
use super::util;
use crate::error::{Error, Result};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

type OutboundSender = crossbeam_channel::Sender<(usize, Vec<u8>)>;
type InboundReceiver = crossbeam_channel::Receiver<Vec<u8>>;

/// Background transport for one rank of a TCP group: a listener thread
/// accepting length-prefixed frames from peers, and a sender thread
/// draining an outbound queue with connect retries.
pub struct TcpHost {
    send_thread: Option<thread::JoinHandle<()>>,
}

impl TcpHost {
    pub fn new(
        rank: usize,
        peers: Vec<SocketAddr>,
    ) -> (Self, OutboundSender, crossbeam_channel::Sender<Vec<u8>>, InboundReceiver) {
        let (send_sink, send_src) = crossbeam_channel::unbounded();
        let send_thread = Self::start_sender(peers.clone(), send_src);

        let (recv_sink, recv_src) = crossbeam_channel::unbounded();
        Self::start_listener(peers[rank], recv_sink.clone());

        (
            TcpHost {
                send_thread: Some(send_thread),
            },
            send_sink,
            recv_sink,
            recv_src,
        )
    }

    /// Block until the outbound queue is drained and the sender thread has
    /// exited. Call after dropping every attached communicator.
    pub fn join(&mut self) {
        if let Some(thread) = self.send_thread.take() {
            thread.join().expect("sender thread panicked")
        }
    }

    fn start_sender(
        peers: Vec<SocketAddr>,
        send_src: crossbeam_channel::Receiver<(usize, Vec<u8>)>,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            for (rank, message) in send_src {
                let mut sleep_ms = 250;
                loop {
                    match TcpStream::connect(peers[rank]) {
                        Ok(mut stream) => match util::write_frame(&mut stream, &message) {
                            Ok(()) => break,
                            Err(msg) => error!("send to rank {} failed mid-frame: {}", rank, msg),
                        },
                        Err(msg) => {
                            error!("connect to rank {} failed: {}", rank, msg);
                            info!("retrying in {}ms", sleep_ms);
                            thread::sleep(Duration::from_millis(sleep_ms));
                            sleep_ms = (2 * sleep_ms).min(5000);
                        }
                    }
                }
            }
        })
    }

    fn start_listener(addr: SocketAddr, recv_sink: crossbeam_channel::Sender<Vec<u8>>) {
        thread::spawn(move || {
            info!("listening on {}", addr);
            let listener = match TcpListener::bind(addr) {
                Ok(listener) => listener,
                Err(msg) => {
                    error!("bind {} failed: {}", addr, msg);
                    return;
                }
            };
            loop {
                match listener.accept() {
                    Ok((mut stream, _)) => Self::handle_connection(&mut stream, recv_sink.clone()),
                    Err(msg) => {
                        error!("accept failed: {}", msg);
                        break;
                    }
                }
            }
        });
    }

    fn handle_connection(stream: &mut TcpStream, recv_sink: crossbeam_channel::Sender<Vec<u8>>) {
        loop {
            let frame = util::read_frame_len(stream)
                .and_then(|size| util::read_bytes_vec(stream, size));
            match frame {
                Ok(bytes) => {
                    if recv_sink.send(bytes).is_err() {
                        break;
                    }
                }
                // Peers close the connection between frames.
                Err(_) => break,
            }
        }
    }
}

/// A `Communicator` over TCP sockets, one listener per rank. Ranks find
/// each other through a shared, ordered address list.
pub struct TcpCommunicator {
    rank: usize,
    num_peers: usize,
    send_sink: OutboundSender,
    recv_sink: crossbeam_channel::Sender<Vec<u8>>,
    recv_src: InboundReceiver,
}

impl TcpCommunicator {
    pub fn new(
        rank: usize,
        peers: Vec<SocketAddr>,
        send_sink: OutboundSender,
        recv_sink: crossbeam_channel::Sender<Vec<u8>>,
        recv_src: InboundReceiver,
    ) -> Self {
        let num_peers = peers.len();
        Self {
            rank,
            num_peers,
            send_sink,
            recv_sink,
            recv_src,
        }
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.num_peers
    }

    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()> {
        self.send_sink
            .send((rank, message))
            .map_err(|_| Error::CommunicationFailure {
                rank: self.rank,
                stage: "tcp send",
            })
    }

    fn recv(&self) -> Result<Vec<u8>> {
        self.recv_src
            .recv_timeout(Duration::from_secs(60))
            .map_err(|_| Error::CommunicationFailure {
                rank: self.rank,
                stage: "tcp recv",
            })
    }

    fn requeue_recv(&self, bytes: Vec<u8>) {
        self.recv_sink.send(bytes).expect("own inbox is open")
    }
}
