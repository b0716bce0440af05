//! Layout-negotiating communicator over one stream direction.
//!
//! The sender's first call computes where every rank's segments land in the
//! receiver job's flat inbox and publishes that layout next to the payload;
//! the receiver's first call reads the layout back and caches it. After
//! that, each step carries only payload.
//!
//! Wire variables for a communicator named `N`: the payload `N`
//! (irregular, global shape = total payload length), `N_srcRanks` (the
//! sender-by-receiver matrix of per-sender start offsets, one row per
//! sender rank), and `N_offsets` (the receiver-rank segmentation of the
//! payload, written by sender rank 0 only).

use super::{Communicator, InMessageLayout, OutMessageLayout};
use crate::always_assert;
use crate::comm::JobComm;
use crate::error::RedevError;
use crate::function_timer;
use crate::scan::exclusive_scan;
use crate::stream::{StreamEngine, StreamIo};
use crate::types::{GO, LO, LOs, Mode};
use crate::wire::WireElem;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

pub struct StreamComm<T: WireElem, IO: StreamIo> {
    comm: Arc<dyn JobComm>,
    /// Rank count of the receiving job.
    ///
    /// The receiving (rendezvous) job is assumed to be orders of magnitude
    /// smaller than the largest sending job, so per-receiver-rank scratch
    /// arrays of this length are acceptable on every sender rank.
    peer_ranks: LO,
    engine: IO::Engine,
    io: IO,
    name: String,
    out: Option<OutMessageLayout>,
    in_msg: InMessageLayout,
    payload_defined: bool,
    metadata_sent: bool,
    _elem: PhantomData<T>,
}

impl<T: WireElem, IO: StreamIo> StreamComm<T, IO> {
    pub fn new(
        comm: Arc<dyn JobComm>,
        peer_ranks: LO,
        engine: IO::Engine,
        io: IO,
        name: &str,
    ) -> Self {
        Self {
            comm,
            peer_ranks,
            engine,
            io,
            name: name.to_owned(),
            out: None,
            in_msg: InMessageLayout::default(),
            payload_defined: false,
            metadata_sent: false,
            _elem: PhantomData,
        }
    }

    fn src_ranks_name(&self) -> String {
        format!("{}_srcRanks", self.name)
    }

    fn offsets_name(&self) -> String {
        format!("{}_offsets", self.name)
    }
}

impl<T: WireElem, IO: StreamIo> Communicator<T> for StreamComm<T, IO> {
    fn set_out_message_layout(&mut self, dest: LOs, offsets: LOs) {
        function_timer!("StreamComm::set_out_message_layout");
        always_assert!(offsets.len() == dest.len() + 1);
        for d in &dest {
            always_assert!((0..self.peer_ranks).contains(d));
        }
        for pair in offsets.windows(2) {
            always_assert!(pair[0] <= pair[1]);
        }
        self.out = Some(OutMessageLayout { dest, offsets });
    }

    fn send(&mut self, msgs: &[T], mode: Mode) -> Result<(), RedevError> {
        function_timer!("StreamComm::send");
        always_assert!(self.out.is_some());
        let out = self.out.clone().unwrap();
        always_assert!(msgs.len() as LO == *out.offsets.last().unwrap());

        let rank = self.comm.rank();
        let comm_size = self.comm.size();
        let peers = self.peer_ranks as usize;

        // element count this rank sends to each receiver rank
        let mut degree = vec![0 as GO; peers];
        for (i, dest) in out.dest.iter().enumerate() {
            degree[*dest as usize] += (out.offsets[i + 1] - out.offsets[i]) as GO;
        }

        // where this rank's contribution begins inside each receiver's inbox
        let mut peer_rank_start = vec![0 as GO; peers];
        self.comm.exscan_sum_go(&degree, &mut peer_rank_start);

        // total element count each receiver rank gets, from all senders
        let mut g_degree = vec![0 as GO; peers];
        self.comm.allreduce_sum_go(&degree, &mut g_degree);
        let g_total: GO = g_degree.iter().sum();

        // start of each receiver rank's segment in the global payload
        let mut g_start = vec![0 as GO; peers];
        exclusive_scan(&g_degree, &mut g_start, 0);

        // the payload length differs per rank, so no local window is defined
        if !self.payload_defined {
            self.io
                .define_variable::<T>(&self.name, g_total as u64, None, None)?;
            self.payload_defined = true;
        }

        if !self.metadata_sent {
            if rank == 0 {
                let mut offsets = g_start.clone();
                offsets.push(g_total);
                let len = offsets.len() as u64;
                self.io
                    .define_variable::<GO>(&self.offsets_name(), len, Some(0), Some(len))?;
                self.engine
                    .put::<GO>(&self.offsets_name(), None, &offsets, mode)?;
            }
            // every sender writes its own row of the start-offset matrix
            self.io.define_variable::<GO>(
                &self.src_ranks_name(),
                (comm_size * peers) as u64,
                Some((peers * rank) as u64),
                Some(peers as u64),
            )?;
            self.engine
                .put::<GO>(&self.src_ranks_name(), None, &peer_rank_start, mode)?;
            self.metadata_sent = true;
        }

        for (i, dest) in out.dest.iter().enumerate() {
            let dest = *dest as usize;
            let start = g_start[dest] + peer_rank_start[dest];
            let count = (out.offsets[i + 1] - out.offsets[i]) as GO;
            if count > 0 {
                let segment = &msgs[out.offsets[i] as usize..out.offsets[i + 1] as usize];
                self.engine.put::<T>(
                    &self.name,
                    Some((start as u64, count as u64)),
                    segment,
                    mode,
                )?;
            }
        }

        self.engine.perform_puts();
        Ok(())
    }

    fn recv(&mut self, mode: Mode) -> Result<Vec<T>, RedevError> {
        function_timer!("StreamComm::recv");
        let rank = self.comm.rank();
        let layout_start = Instant::now();

        if !self.in_msg.known_sizes {
            let src_ranks_shape = self.engine.inquire_variable::<GO>(&self.src_ranks_name());
            always_assert!(src_ranks_shape.is_some());
            let offsets_shape = self.engine.inquire_variable::<GO>(&self.offsets_name());
            always_assert!(offsets_shape.is_some());

            let offsets_len = offsets_shape.unwrap();
            self.in_msg.offset = vec![0 as GO; offsets_len as usize];
            self.engine.get::<GO>(
                &self.offsets_name(),
                Some((0, offsets_len)),
                &mut self.in_msg.offset,
                mode,
            )?;

            let src_ranks_len = src_ranks_shape.unwrap();
            self.in_msg.src_ranks = vec![0 as GO; src_ranks_len as usize];
            self.engine.get::<GO>(
                &self.src_ranks_name(),
                Some((0, src_ranks_len)),
                &mut self.in_msg.src_ranks,
                mode,
            )?;

            self.engine.perform_gets();
            self.in_msg.start = self.in_msg.offset[rank] as usize;
            self.in_msg.count = self.in_msg.offset[rank + 1] as usize - self.in_msg.start;
            self.in_msg.known_sizes = true;
        }
        let layout_elapsed = layout_start.elapsed();

        let payload_shape = self.engine.inquire_variable::<T>(&self.name);
        always_assert!(payload_shape.is_some());
        let mut msgs = vec![T::zeroed(); self.in_msg.count];
        if self.in_msg.count > 0 {
            self.engine.get::<T>(
                &self.name,
                Some((self.in_msg.start as u64, self.in_msg.count as u64)),
                &mut msgs,
                mode,
            )?;
        }
        self.engine.perform_gets();

        if rank == 0 {
            tracing::debug!(
                name = %self.name,
                known_sizes = self.in_msg.known_sizes,
                layout_secs = layout_elapsed.as_secs_f64(),
                payload_secs = layout_start.elapsed().as_secs_f64(),
                "recv"
            );
        }
        Ok(msgs)
    }

    fn in_message_layout(&self) -> InMessageLayout {
        self.in_msg.clone()
    }
}
