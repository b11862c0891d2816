//! A minimal message-passing API encapsulated by the [`Communicator`]
//! trait. Implementors only need `send` and `recv` for a given transport;
//! the trait provides binomial-tree broadcast, reduce, and all-reduce
//! collectives on top. A single-process communicator, an in-process
//! multi-rank group over channels, and a pure-Rust TCP transport are
//! included.
//!
//! [`Communicator`]: comm::Communicator

pub mod channel;
pub mod comm;
pub mod tcp;
pub mod util;

pub use channel::ChannelCommunicator;
pub use comm::{Communicator, SoloCommunicator};
pub use tcp::{TcpCommunicator, TcpHost};
