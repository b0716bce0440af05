//! Bidirectional channel between the server and one client.
//!
//! A channel owns two streams, `<path><name>_s2c` and `<path><name>_c2s`,
//! one per direction, and drives them through an explicit phase state
//! machine: a send phase opens a step on the outgoing stream, a receive
//! phase opens a step on the incoming one, and the two directions are
//! independent. Construction opens the engines in the order the transport
//! discipline requires and then runs the setup handshake that carries the
//! partition type, the build identity, the partition payload, and both
//! job sizes.

use crate::always_assert;
use crate::comm::JobComm;
use crate::communicator::{BidirectionalComm, CommDataType, CommV, GlobalComm, StreamComm};
use crate::error::RedevError;
use crate::function_timer;
use crate::partition::Partition;
use crate::stream::{OpenMode, Params, StepStatus, StreamEngine, StreamEnv, StreamIo};
use crate::types::{LO, Mode, ProcessType, TransportType};
use crate::wire::WireElem;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

/// Wire variable carrying the build identity during setup.
const GIT_HASH_VAR: &str = "redev git hash";
/// Wire variable carrying the partition variant's tag index.
const PARTITION_TYPE_VAR: &str = "redev partition type";
/// Wire variable carrying the server job's rank count.
const SERVER_SIZE_VAR: &str = "redev server communicator size";
/// Wire variable carrying the client job's rank count.
const CLIENT_SIZE_VAR: &str = "redev client communicator size";

/// Deterministic build identity compared between server and client during
/// setup. Override with `REDEV_BUILD_ID` at compile time to pin it to a
/// source revision.
pub fn build_identity() -> &'static str {
    option_env!("REDEV_BUILD_ID").unwrap_or(concat!("redev-", env!("CARGO_PKG_VERSION")))
}

/// Give a buffered-transport peer time to produce its stream before we try
/// to open it for reading. Not needed when the engine rendezvouses on open
/// (SST) or when the reader is configured to wait itself (streaming mode
/// with an open timeout). This is a pragmatic workaround for the buffered
/// engine's non-blocking open, not a correctness primitive.
fn wait_for_engine_creation<IO: StreamIo>(io: &IO) {
    if io.engine_type().eq_ignore_ascii_case("sst") {
        return;
    }
    let params = io.parameters();
    if params.streaming_on() && params.open_timeout_secs().is_some() {
        return;
    }
    tracing::debug!("sleeping to let the peer's writer create its stream");
    thread::sleep(Duration::from_secs(2));
}

/// A live channel between the server and one client.
pub struct StreamChannel<IO: StreamIo> {
    s2c_io: IO,
    c2s_io: IO,
    s2c_engine: IO::Engine,
    /// `None` only on a server constructed with `no_clients`.
    c2s_engine: Option<IO::Engine>,
    num_client_ranks: LO,
    num_server_ranks: LO,
    comm: Arc<dyn JobComm>,
    process_type: ProcessType,
    rank: usize,
    partition: Arc<RwLock<Partition>>,
    send_phase_active: bool,
    receive_phase_active: bool,
}

impl<IO: StreamIo> StreamChannel<IO> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new<E: StreamEnv<Io = IO>>(
        env: &E,
        comm: Arc<dyn JobComm>,
        name: &str,
        params: Params,
        transport: TransportType,
        process_type: ProcessType,
        partition: Arc<RwLock<Partition>>,
        path: &str,
        no_clients: bool,
    ) -> Result<Self, RedevError> {
        function_timer!("StreamChannel::new");
        let rank = comm.rank();
        let mut s2c_name = format!("{path}{name}_s2c");
        let mut c2s_name = format!("{path}{name}_c2s");
        let s2c_io = env.declare_io(&s2c_name);
        let c2s_io = env.declare_io(&c2s_name);

        let transport = if transport == TransportType::Sst && no_clients {
            tracing::warn!("no clients connected; downgrading SST to BP4");
            TransportType::Bp4
        } else {
            transport
        };
        let engine_type = match transport {
            TransportType::Bp4 => {
                s2c_name.push_str(".bp");
                c2s_name.push_str(".bp");
                "BP4"
            }
            TransportType::Sst => "SST",
        };
        s2c_io.set_engine_type(engine_type);
        c2s_io.set_engine_type(engine_type);
        s2c_io.set_parameters(params.clone());
        c2s_io.set_parameters(params);
        always_assert!(s2c_io
            .engine_type()
            .eq_ignore_ascii_case(&c2s_io.engine_type()));

        let (s2c_engine, c2s_engine) = match transport {
            TransportType::Bp4 => Self::open_engines_bp4(
                no_clients,
                &s2c_name,
                &c2s_name,
                &s2c_io,
                &c2s_io,
                process_type,
            )?,
            TransportType::Sst => Self::open_engines_sst(
                no_clients,
                &s2c_name,
                &c2s_name,
                &s2c_io,
                &c2s_io,
                process_type,
            )?,
        };

        // engine opens are collective over the job: no rank may begin a
        // step until every peer rank holds its engines
        comm.barrier();

        let mut channel = Self {
            s2c_io,
            c2s_io,
            s2c_engine,
            c2s_engine,
            num_client_ranks: 0,
            num_server_ranks: 0,
            comm,
            process_type,
            rank,
            partition,
            send_phase_active: false,
            receive_phase_active: false,
        };
        channel.setup(no_clients)?;
        Ok(channel)
    }

    /// Buffered-transport open: writer opens never wait, so both sides
    /// write-open first, wait for the peer's stream to appear, then
    /// read-open.
    fn open_engines_bp4(
        no_clients: bool,
        s2c_name: &str,
        c2s_name: &str,
        s2c_io: &IO,
        c2s_io: &IO,
        process_type: ProcessType,
    ) -> Result<(IO::Engine, Option<IO::Engine>), RedevError> {
        match process_type {
            ProcessType::Server => {
                let s2c_engine = s2c_io.open(s2c_name, OpenMode::Write)?;
                let c2s_engine = if no_clients {
                    None
                } else {
                    wait_for_engine_creation(c2s_io);
                    Some(c2s_io.open(c2s_name, OpenMode::Read)?)
                };
                Ok((s2c_engine, c2s_engine))
            }
            ProcessType::Client => {
                let c2s_engine = c2s_io.open(c2s_name, OpenMode::Write)?;
                wait_for_engine_creation(s2c_io);
                let s2c_engine = s2c_io.open(s2c_name, OpenMode::Read)?;
                Ok((s2c_engine, Some(c2s_engine)))
            }
        }
    }

    /// Streaming-transport open: reader and writer opens rendezvous
    /// pairwise, so the two sides must pair one direction completely
    /// before touching the other. Server: s2c write, then c2s read.
    /// Client: s2c read, then c2s write.
    fn open_engines_sst(
        no_clients: bool,
        s2c_name: &str,
        c2s_name: &str,
        s2c_io: &IO,
        c2s_io: &IO,
        process_type: ProcessType,
    ) -> Result<(IO::Engine, Option<IO::Engine>), RedevError> {
        match process_type {
            ProcessType::Server => {
                let s2c_engine = s2c_io.open(s2c_name, OpenMode::Write)?;
                let c2s_engine = if no_clients {
                    None
                } else {
                    Some(c2s_io.open(c2s_name, OpenMode::Read)?)
                };
                Ok((s2c_engine, c2s_engine))
            }
            ProcessType::Client => {
                let s2c_engine = s2c_io.open(s2c_name, OpenMode::Read)?;
                let c2s_engine = c2s_io.open(c2s_name, OpenMode::Write)?;
                Ok((s2c_engine, Some(c2s_engine)))
            }
        }
    }

    /// The setup handshake. Items 1-4 travel in one step over `s2c`
    /// (partition tag, build identity, partition payload, server size);
    /// item 5 (client size) travels in one step over `c2s`.
    fn setup(&mut self, no_clients: bool) -> Result<(), RedevError> {
        function_timer!("StreamChannel::setup");
        match self.process_type {
            ProcessType::Server => {
                let status = self.s2c_engine.begin_step()?;
                always_assert!(status == StepStatus::Ok);
                if self.rank == 0 {
                    let index = [self.partition.read().expect("partition poisoned").index() as u64];
                    self.s2c_io
                        .define_variable::<u64>(PARTITION_TYPE_VAR, 1, Some(0), Some(1))?;
                    self.s2c_engine
                        .put::<u64>(PARTITION_TYPE_VAR, None, &index, Mode::Deferred)?;

                    self.s2c_engine.put_string(GIT_HASH_VAR, build_identity())?;

                    self.partition
                        .read()
                        .expect("partition poisoned")
                        .write(&self.s2c_engine, &self.s2c_io)?;

                    let size = [self.comm.size() as LO];
                    self.s2c_io
                        .define_variable::<LO>(SERVER_SIZE_VAR, 1, Some(0), Some(1))?;
                    self.s2c_engine
                        .put::<LO>(SERVER_SIZE_VAR, None, &size, Mode::Deferred)?;
                }
                self.s2c_engine.end_step()?;
                self.num_server_ranks = self.comm.size() as LO;

                if no_clients {
                    self.num_client_ranks = 0;
                } else {
                    let c2s_engine = self.c2s_engine.as_ref().expect("c2s engine open");
                    let status = c2s_engine.begin_step()?;
                    always_assert!(status == StepStatus::Ok);
                    let mut size = [0 as LO];
                    if self.rank == 0 {
                        c2s_engine.get::<LO>(CLIENT_SIZE_VAR, Some((0, 1)), &mut size, Mode::Deferred)?;
                        c2s_engine.perform_gets();
                    }
                    c2s_engine.end_step()?;
                    crate::comm::broadcast(self.comm.as_ref(), &mut size, 0);
                    self.num_client_ranks = size[0];
                }
            }
            ProcessType::Client => {
                let status = self.s2c_engine.begin_step()?;
                always_assert!(status == StepStatus::Ok);

                // 1. partition type: read on rank 0, agree job-wide, and
                //    reconstruct the local variant if it does not match
                let mut index = [0u64];
                if self.rank == 0 {
                    self.s2c_engine
                        .get::<u64>(PARTITION_TYPE_VAR, Some((0, 1)), &mut index, Mode::Deferred)?;
                    self.s2c_engine.perform_gets();
                }
                crate::comm::broadcast(self.comm.as_ref(), &mut index, 0);
                {
                    let mut partition = self.partition.write().expect("partition poisoned");
                    if partition.index() != index[0] as usize {
                        *partition = Partition::from_index(index[0] as usize);
                    }
                }

                // 2. build identity must match the server's exactly
                if self.rank == 0 {
                    let server_identity = self.s2c_engine.get_string(GIT_HASH_VAR)?;
                    always_assert!(
                        server_identity == build_identity(),
                        "server built as `{}`, client as `{}`",
                        server_identity,
                        build_identity()
                    );
                }

                // 3. partition payload: rank 0 reads, everyone broadcasts
                {
                    let mut partition = self.partition.write().expect("partition poisoned");
                    if self.rank == 0 {
                        partition.read(&self.s2c_engine, &self.s2c_io)?;
                    }
                    partition.broadcast(self.comm.as_ref(), 0);
                }

                // 4. server job size
                let mut size = [0 as LO];
                if self.rank == 0 {
                    self.s2c_engine
                        .get::<LO>(SERVER_SIZE_VAR, Some((0, 1)), &mut size, Mode::Deferred)?;
                    self.s2c_engine.perform_gets();
                }
                self.s2c_engine.end_step()?;
                crate::comm::broadcast(self.comm.as_ref(), &mut size, 0);
                self.num_server_ranks = size[0];

                // 5. client job size, over the other direction
                let c2s_engine = self.c2s_engine.as_ref().expect("c2s engine open");
                let status = c2s_engine.begin_step()?;
                always_assert!(status == StepStatus::Ok);
                if self.rank == 0 {
                    let size = [self.comm.size() as LO];
                    self.c2s_io
                        .define_variable::<LO>(CLIENT_SIZE_VAR, 1, Some(0), Some(1))?;
                    c2s_engine.put::<LO>(CLIENT_SIZE_VAR, None, &size, Mode::Deferred)?;
                }
                c2s_engine.end_step()?;
                self.num_client_ranks = self.comm.size() as LO;
            }
        }
        Ok(())
    }

    /// Build a typed communicator pair for this channel.
    ///
    /// `comm` is the caller's participant communicator; `None` marks a
    /// non-participating rank and yields a no-op pair.
    pub fn create_comm<T: WireElem>(
        &self,
        name: &str,
        comm: Option<Arc<dyn JobComm>>,
    ) -> BidirectionalComm<T> {
        function_timer!("StreamChannel::create_comm");
        let Some(comm) = comm else {
            return BidirectionalComm::no_op();
        };
        let s2c: Box<dyn crate::communicator::Communicator<T>> = Box::new(StreamComm::<T, IO>::new(
            comm.clone(),
            self.num_client_ranks,
            self.s2c_engine.clone(),
            self.s2c_io.clone(),
            name,
        ));
        let c2s: Box<dyn crate::communicator::Communicator<T>> = match &self.c2s_engine {
            Some(engine) => Box::new(StreamComm::<T, IO>::new(
                comm,
                self.num_server_ranks,
                engine.clone(),
                self.c2s_io.clone(),
                name,
            )),
            // a server running without clients has nothing to receive
            None => Box::new(crate::communicator::NoOpComm::new()),
        };
        match self.process_type {
            ProcessType::Client => BidirectionalComm::new(c2s, s2c),
            ProcessType::Server => BidirectionalComm::new(s2c, c2s),
        }
    }

    /// Build a single-writer/single-reader communicator pair; configure it
    /// with `set_comm_params` before the first send or receive.
    pub fn create_global_comm<T: WireElem>(
        &self,
        comm: Option<Arc<dyn JobComm>>,
    ) -> BidirectionalComm<T> {
        function_timer!("StreamChannel::create_global_comm");
        let Some(comm) = comm else {
            return BidirectionalComm::no_op();
        };
        let s2c: Box<dyn crate::communicator::Communicator<T>> = Box::new(GlobalComm::<T, IO>::new(
            comm.clone(),
            self.s2c_engine.clone(),
            self.s2c_io.clone(),
        ));
        let c2s: Box<dyn crate::communicator::Communicator<T>> = match &self.c2s_engine {
            Some(engine) => Box::new(GlobalComm::<T, IO>::new(
                comm,
                engine.clone(),
                self.c2s_io.clone(),
            )),
            None => Box::new(crate::communicator::NoOpComm::new()),
        };
        match self.process_type {
            ProcessType::Client => BidirectionalComm::new(c2s, s2c),
            ProcessType::Server => BidirectionalComm::new(s2c, c2s),
        }
    }

    fn send_engine(&self) -> &IO::Engine {
        match self.process_type {
            ProcessType::Client => self.c2s_engine.as_ref().expect("client c2s engine open"),
            ProcessType::Server => &self.s2c_engine,
        }
    }

    fn recv_engine(&self) -> &IO::Engine {
        match self.process_type {
            ProcessType::Client => &self.s2c_engine,
            ProcessType::Server => {
                let engine = self.c2s_engine.as_ref();
                always_assert!(engine.is_some(), "receive phase on a server with no clients");
                engine.unwrap()
            }
        }
    }

    pub fn begin_send_communication_phase(&mut self) {
        function_timer!("StreamChannel::begin_send_communication_phase");
        always_assert!(!self.in_send_communication_phase());
        let status = self.send_engine().begin_step();
        always_assert!(status == Ok(StepStatus::Ok));
        self.send_phase_active = true;
    }

    pub fn end_send_communication_phase(&mut self) {
        function_timer!("StreamChannel::end_send_communication_phase");
        always_assert!(self.in_send_communication_phase());
        let result = self.send_engine().end_step();
        always_assert!(result.is_ok());
        self.send_phase_active = false;
    }

    pub fn begin_receive_communication_phase(&mut self) {
        function_timer!("StreamChannel::begin_receive_communication_phase");
        always_assert!(!self.in_receive_communication_phase());
        let status = self.recv_engine().begin_step();
        always_assert!(status == Ok(StepStatus::Ok));
        self.receive_phase_active = true;
    }

    pub fn end_receive_communication_phase(&mut self) {
        function_timer!("StreamChannel::end_receive_communication_phase");
        always_assert!(self.in_receive_communication_phase());
        let result = self.recv_engine().end_step();
        always_assert!(result.is_ok());
        self.receive_phase_active = false;
    }

    pub fn in_send_communication_phase(&self) -> bool {
        self.send_phase_active
    }

    pub fn in_receive_communication_phase(&self) -> bool {
        self.receive_phase_active
    }

    /// Run `f` inside a send phase; the phase ends on every exit path.
    pub fn send_phase<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let _scope = SendPhaseScope::new(self);
        f()
    }

    /// Run `f` inside a receive phase; the phase ends on every exit path.
    pub fn receive_phase<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let _scope = ReceivePhaseScope::new(self);
        f()
    }

    /// Rank count of the server job, as exchanged during setup.
    pub fn num_server_ranks(&self) -> LO {
        self.num_server_ranks
    }

    /// Rank count of the client job, as exchanged during setup.
    pub fn num_client_ranks(&self) -> LO {
        self.num_client_ranks
    }
}

impl<IO: StreamIo> Drop for StreamChannel<IO> {
    fn drop(&mut self) {
        self.s2c_engine.close();
        if let Some(engine) = &self.c2s_engine {
            engine.close();
        }
    }
}

struct SendPhaseScope<'a, IO: StreamIo> {
    channel: &'a mut StreamChannel<IO>,
}

impl<'a, IO: StreamIo> SendPhaseScope<'a, IO> {
    fn new(channel: &'a mut StreamChannel<IO>) -> Self {
        channel.begin_send_communication_phase();
        Self { channel }
    }
}

impl<IO: StreamIo> Drop for SendPhaseScope<'_, IO> {
    fn drop(&mut self) {
        self.channel.end_send_communication_phase();
    }
}

struct ReceivePhaseScope<'a, IO: StreamIo> {
    channel: &'a mut StreamChannel<IO>,
}

impl<'a, IO: StreamIo> ReceivePhaseScope<'a, IO> {
    fn new(channel: &'a mut StreamChannel<IO>) -> Self {
        channel.begin_receive_communication_phase();
        Self { channel }
    }
}

impl<IO: StreamIo> Drop for ReceivePhaseScope<'_, IO> {
    fn drop(&mut self) {
        self.channel.end_receive_communication_phase();
    }
}

/// Channel stand-in for ranks outside the coupled computation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpChannel;

impl NoOpChannel {
    pub fn create_comm<T: WireElem>(&self) -> BidirectionalComm<T> {
        BidirectionalComm::no_op()
    }

    pub fn begin_send_communication_phase(&mut self) {}
    pub fn end_send_communication_phase(&mut self) {}
    pub fn begin_receive_communication_phase(&mut self) {}
    pub fn end_receive_communication_phase(&mut self) {}

    pub fn in_send_communication_phase(&self) -> bool {
        false
    }

    pub fn in_receive_communication_phase(&self) -> bool {
        false
    }
}

/// A channel handle that is either live or a no-op, depending on whether
/// this rank participates in the coupling.
pub enum Channel<IO: StreamIo> {
    Stream(StreamChannel<IO>),
    NoOp(NoOpChannel),
}

impl<IO: StreamIo> Channel<IO> {
    pub fn create_comm<T: WireElem>(
        &self,
        name: &str,
        comm: Option<Arc<dyn JobComm>>,
    ) -> BidirectionalComm<T> {
        match self {
            Channel::Stream(c) => c.create_comm(name, comm),
            Channel::NoOp(c) => c.create_comm(),
        }
    }

    pub fn create_global_comm<T: WireElem>(
        &self,
        comm: Option<Arc<dyn JobComm>>,
    ) -> BidirectionalComm<T> {
        match self {
            Channel::Stream(c) => c.create_global_comm(comm),
            Channel::NoOp(c) => c.create_comm(),
        }
    }

    pub fn begin_send_communication_phase(&mut self) {
        match self {
            Channel::Stream(c) => c.begin_send_communication_phase(),
            Channel::NoOp(c) => c.begin_send_communication_phase(),
        }
    }

    pub fn end_send_communication_phase(&mut self) {
        match self {
            Channel::Stream(c) => c.end_send_communication_phase(),
            Channel::NoOp(c) => c.end_send_communication_phase(),
        }
    }

    pub fn begin_receive_communication_phase(&mut self) {
        match self {
            Channel::Stream(c) => c.begin_receive_communication_phase(),
            Channel::NoOp(c) => c.begin_receive_communication_phase(),
        }
    }

    pub fn end_receive_communication_phase(&mut self) {
        match self {
            Channel::Stream(c) => c.end_receive_communication_phase(),
            Channel::NoOp(c) => c.end_receive_communication_phase(),
        }
    }

    pub fn in_send_communication_phase(&self) -> bool {
        match self {
            Channel::Stream(c) => c.in_send_communication_phase(),
            Channel::NoOp(c) => c.in_send_communication_phase(),
        }
    }

    pub fn in_receive_communication_phase(&self) -> bool {
        match self {
            Channel::Stream(c) => c.in_receive_communication_phase(),
            Channel::NoOp(c) => c.in_receive_communication_phase(),
        }
    }

    /// Build a communicator pair whose element type is chosen at runtime.
    ///
    /// The monomorphic [`Self::create_comm`] is preferable when the type is
    /// known statically; this entry point exists because the payload type
    /// must sometimes come from metadata.
    pub fn create_comm_v(
        &self,
        name: &str,
        comm: Option<Arc<dyn JobComm>>,
        data_type: CommDataType,
    ) -> CommV {
        match data_type {
            CommDataType::I8 => CommV::I8(self.create_comm(name, comm)),
            CommDataType::I16 => CommV::I16(self.create_comm(name, comm)),
            CommDataType::I32 => CommV::I32(self.create_comm(name, comm)),
            CommDataType::I64 => CommV::I64(self.create_comm(name, comm)),
            CommDataType::U8 => CommV::U8(self.create_comm(name, comm)),
            CommDataType::U16 => CommV::U16(self.create_comm(name, comm)),
            CommDataType::U32 => CommV::U32(self.create_comm(name, comm)),
            CommDataType::U64 => CommV::U64(self.create_comm(name, comm)),
            CommDataType::F32 => CommV::F32(self.create_comm(name, comm)),
            CommDataType::F64 => CommV::F64(self.create_comm(name, comm)),
            CommDataType::C64 => CommV::C64(self.create_comm(name, comm)),
        }
    }

    /// Run `f` inside a send phase; the phase ends on every exit path.
    pub fn send_phase<R>(&mut self, f: impl FnOnce() -> R) -> R {
        match self {
            Channel::Stream(c) => c.send_phase(f),
            Channel::NoOp(_) => f(),
        }
    }

    /// Run `f` inside a receive phase; the phase ends on every exit path.
    pub fn receive_phase<R>(&mut self, f: impl FnOnce() -> R) -> R {
        match self {
            Channel::Stream(c) => c.receive_phase(f),
            Channel::NoOp(_) => f(),
        }
    }
}
