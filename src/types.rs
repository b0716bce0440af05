//! Ordinate types shared across the crate.
//!
//! Counts that are local to one process fit in a [`LO`]; counts that span a
//! whole job need a [`GO`]. The payload element set additionally includes
//! reals and complex values, matching what the streaming substrate can carry.

use serde::{Deserialize, Serialize};

/// Local ordinate, used to count items local to a process.
pub type LO = i32;
/// Vector of local ordinates.
pub type LOs = Vec<LO>;
/// Global ordinate, used to count items across multiple processes.
pub type GO = i64;
/// Vector of global ordinates.
pub type GOs = Vec<GO>;
/// Floating point values.
pub type Real = f64;
/// Vector of floating point values.
pub type Reals = Vec<Real>;
/// Complex values.
pub type CV = num_complex::Complex64;
/// Vector of complex values.
pub type CVs = Vec<CV>;

/// Role of this set of processes in the coupling.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessType {
    /// Holds its own partition and exchanges data with the server.
    Client = 0,
    /// Holds the rendezvous partition.
    Server = 1,
}

/// Transport discipline of a channel's two streams.
///
/// `Bp4` is buffered: a writer-side open does not wait for a reader.
/// `Sst` is streaming: reader and writer opens rendezvous pairwise, which
/// constrains the order in which a channel may open its engines.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportType {
    Bp4 = 0,
    Sst = 1,
}

/// Data-movement mode for puts and gets.
///
/// `Deferred` lets the substrate batch the transfer until the step is
/// flushed; `Synchronous` requires the call to complete before returning.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    Deferred,
    Synchronous,
}
