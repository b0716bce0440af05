//! Typed communicators over one direction of a channel.
//!
//! A communicator moves flat arrays of one element type from the ranks of
//! one job to the ranks of the other. The send side describes its outgoing
//! message once with an [`OutMessageLayout`]; the receive side discovers
//! the incoming [`InMessageLayout`] from wire metadata on its first receive
//! and reuses it afterwards.
//!
//! Three variants share the [`Communicator`] trait: [`StreamComm`] (the
//! layout-negotiating default), [`GlobalComm`] (a single-writer,
//! single-reader fast path for aggregate signals), and [`NoOpComm`] (for
//! ranks that do not participate in the coupling). The user-facing handle
//! is a [`BidirectionalComm`]: one owned communicator per direction, with
//! "send" bound to the outgoing direction for this process's role.

use crate::error::RedevError;
use crate::types::{CV, GOs, LOs, Mode};
use crate::wire::WireElem;
use std::marker::PhantomData;

pub mod global;
pub mod stream_comm;

pub use global::GlobalComm;
pub use stream_comm::StreamComm;

/// Receive-side description of an incoming message.
///
/// `src_ranks` is the sender-by-receiver matrix of per-sender start
/// offsets (row per sender rank), `offset` the global segmentation of the
/// payload by receiver rank, and `start`/`count` this rank's slice of the
/// payload. `known_sizes` flips on the first receive; afterwards the
/// layout is reused verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InMessageLayout {
    pub src_ranks: GOs,
    pub offset: GOs,
    pub known_sizes: bool,
    pub start: usize,
    pub count: usize,
}

/// Send-side description of an outgoing message.
///
/// `dest[i]` is the destination rank of the `i`-th local segment and
/// `offsets[i]..offsets[i+1]` its span in the user's payload buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutMessageLayout {
    pub dest: LOs,
    pub offsets: LOs,
}

/// Operations shared by every communicator variant.
pub trait Communicator<T: WireElem> {
    /// Store the outbound layout; subsequent sends reuse it.
    fn set_out_message_layout(&mut self, dest: LOs, offsets: LOs);

    /// Configure the variable name and length of the global fast path.
    /// Ignored by the other variants.
    fn set_comm_params(&mut self, _name: &str, _len: usize) {}

    /// Send `msgs` according to the stored layout. Must run inside the
    /// owning channel's send phase.
    fn send(&mut self, msgs: &[T], mode: Mode) -> Result<(), RedevError>;

    /// Receive this rank's slice of the incoming payload. Must run inside
    /// the owning channel's receive phase.
    fn recv(&mut self, mode: Mode) -> Result<Vec<T>, RedevError>;

    /// The cached receive-side layout; meaningful after the first receive.
    fn in_message_layout(&self) -> InMessageLayout;
}

/// Communicator for ranks outside the coupled computation: sends are
/// discarded, receives are empty.
#[derive(Clone, Debug, Default)]
pub struct NoOpComm<T> {
    _elem: PhantomData<T>,
}

impl<T> NoOpComm<T> {
    pub fn new() -> Self {
        Self { _elem: PhantomData }
    }
}

impl<T: WireElem> Communicator<T> for NoOpComm<T> {
    fn set_out_message_layout(&mut self, _dest: LOs, _offsets: LOs) {}

    fn send(&mut self, _msgs: &[T], _mode: Mode) -> Result<(), RedevError> {
        Ok(())
    }

    fn recv(&mut self, _mode: Mode) -> Result<Vec<T>, RedevError> {
        Ok(Vec::new())
    }

    fn in_message_layout(&self) -> InMessageLayout {
        InMessageLayout::default()
    }
}

/// Paired communicators for one logical connection.
///
/// On a client, sending targets the server and receiving drains from it;
/// on a server, the reverse. Which underlying direction is which was
/// decided by the channel that created the pair.
pub struct BidirectionalComm<T: WireElem> {
    sender: Box<dyn Communicator<T>>,
    receiver: Box<dyn Communicator<T>>,
}

impl<T: WireElem> BidirectionalComm<T> {
    pub fn new(sender: Box<dyn Communicator<T>>, receiver: Box<dyn Communicator<T>>) -> Self {
        Self { sender, receiver }
    }

    /// A pair that discards sends and returns empty receives.
    pub fn no_op() -> Self {
        Self::new(Box::new(NoOpComm::new()), Box::new(NoOpComm::new()))
    }

    pub fn set_out_message_layout(&mut self, dest: LOs, offsets: LOs) {
        self.sender.set_out_message_layout(dest, offsets);
    }

    pub fn set_comm_params(&mut self, name: &str, len: usize) {
        self.sender.set_comm_params(name, len);
        self.receiver.set_comm_params(name, len);
    }

    pub fn send(&mut self, msgs: &[T], mode: Mode) -> Result<(), RedevError> {
        self.sender.send(msgs, mode)
    }

    pub fn recv(&mut self, mode: Mode) -> Result<Vec<T>, RedevError> {
        self.receiver.recv(mode)
    }

    pub fn in_message_layout(&self) -> InMessageLayout {
        self.receiver.in_message_layout()
    }
}

/// Runtime tag for the element type of a communicator.
///
/// The payload type must sometimes be chosen at runtime from metadata; this
/// closed set, with [`CommV`], is the dynamically-typed face of the
/// otherwise monomorphic communicator API.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CommDataType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    C64,
}

/// A [`BidirectionalComm`] whose element type was chosen at runtime.
pub enum CommV {
    I8(BidirectionalComm<i8>),
    I16(BidirectionalComm<i16>),
    I32(BidirectionalComm<i32>),
    I64(BidirectionalComm<i64>),
    U8(BidirectionalComm<u8>),
    U16(BidirectionalComm<u16>),
    U32(BidirectionalComm<u32>),
    U64(BidirectionalComm<u64>),
    F32(BidirectionalComm<f32>),
    F64(BidirectionalComm<f64>),
    C64(BidirectionalComm<CV>),
}

impl CommV {
    /// The tag of the contained element type.
    pub fn data_type(&self) -> CommDataType {
        match self {
            CommV::I8(_) => CommDataType::I8,
            CommV::I16(_) => CommDataType::I16,
            CommV::I32(_) => CommDataType::I32,
            CommV::I64(_) => CommDataType::I64,
            CommV::U8(_) => CommDataType::U8,
            CommV::U16(_) => CommDataType::U16,
            CommV::U32(_) => CommDataType::U32,
            CommV::U64(_) => CommDataType::U64,
            CommV::F32(_) => CommDataType::F32,
            CommV::F64(_) => CommDataType::F64,
            CommV::C64(_) => CommDataType::C64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LO;

    #[test]
    fn no_op_pair_discards_and_returns_empty() {
        let mut pair = BidirectionalComm::<LO>::no_op();
        pair.set_out_message_layout(vec![0], vec![0, 1]);
        pair.send(&[42], Mode::Deferred).unwrap();
        assert_eq!(pair.recv(Mode::Deferred).unwrap(), Vec::<LO>::new());
        assert_eq!(pair.in_message_layout(), InMessageLayout::default());
    }

    #[test]
    fn default_in_layout_has_unknown_sizes() {
        let layout = InMessageLayout::default();
        assert!(!layout.known_sizes);
        assert_eq!(layout.count, 0);
    }
}
