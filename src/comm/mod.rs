//! Message passing for guard-cell exchange.
//!
//! [`communicator`] is the thin transport façade (serial, intra-process
//! mailbox, or MPI); [`exchange`] is the halo-exchange engine built on top
//! of it.

pub mod communicator;
pub mod exchange;

pub use communicator::{Communicator, LocalComm, NoComm, Wait};
pub use exchange::CommHandle;
