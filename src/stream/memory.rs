//! In-process loopback broker.
//!
//! A process-wide registry of named streams lets independently constructed
//! jobs (thread groups in one process) rendezvous by stream name alone,
//! with no file or socket I/O. Each stream is unidirectional: one job's
//! ranks open it for writing, the peer job's ranks open it for reading.
//!
//! Semantics kept faithful to the two transport disciplines:
//! - buffered (`BP4`): writer-open never waits; reader-open waits for a
//!   writer up to `OpenTimeoutSecs` when configured, else fails if no
//!   writer has appeared;
//! - rendezvous (`SST`): reader-open waits for a writer and writer-open
//!   waits for a reader, so a channel that opens its engines in the wrong
//!   order deadlocks here exactly as it would on the real transport.
//!
//! Writers assemble a step jointly; the step becomes visible to readers
//! atomically when the last writer ends it. Each reader handle walks the
//! published steps through its own cursor.

use super::{OpenMode, Params, StepStatus, StreamEngine, StreamEnv, StreamIo};
use crate::always_assert;
use crate::error::RedevError;
use crate::types::Mode;
use crate::wire::{WireElem, WireTag};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

fn elem_size(tag: WireTag) -> usize {
    match tag {
        WireTag::I8 | WireTag::U8 | WireTag::Str => 1,
        WireTag::I16 | WireTag::U16 => 2,
        WireTag::I32 | WireTag::U32 | WireTag::F32 => 4,
        WireTag::I64 | WireTag::U64 | WireTag::F64 => 8,
        WireTag::C64 => 16,
    }
}

#[derive(Clone)]
struct VarDef {
    tag: WireTag,
    shape: u64,
    start: Option<u64>,
    count: Option<u64>,
}

struct VarData {
    tag: WireTag,
    shape: u64,
    bytes: Vec<u8>,
}

type StepVars = HashMap<String, VarData>;

struct StreamInner {
    writer_handles: usize,
    reader_handles: usize,
    writer_ever: bool,
    /// Step under assembly by the writer job.
    accum: Option<StepVars>,
    writers_done: usize,
    published: Vec<Arc<StepVars>>,
}

struct StreamState {
    name: String,
    inner: Mutex<StreamInner>,
    cv: Condvar,
}

impl StreamState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            inner: Mutex::new(StreamInner {
                writer_handles: 0,
                reader_handles: 0,
                writer_ever: false,
                accum: None,
                writers_done: 0,
                published: Vec::new(),
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StreamInner> {
        self.inner.lock().expect("stream state poisoned")
    }
}

static STREAMS: Lazy<Mutex<HashMap<String, Arc<StreamState>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn stream_entry(name: &str) -> Arc<StreamState> {
    let mut registry = STREAMS.lock().expect("stream registry poisoned");
    registry
        .entry(name.to_owned())
        .or_insert_with(|| Arc::new(StreamState::new(name)))
        .clone()
}

/// The loopback substrate environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryEnv;

impl MemoryEnv {
    pub fn new() -> Self {
        MemoryEnv
    }
}

impl StreamEnv for MemoryEnv {
    type Io = MemoryIo;

    fn declare_io(&self, name: &str) -> MemoryIo {
        MemoryIo {
            state: Arc::new(Mutex::new(IoState {
                name: name.to_owned(),
                engine_type: String::new(),
                params: Params::new(),
                defs: HashMap::new(),
            })),
        }
    }
}

struct IoState {
    #[allow(dead_code)]
    name: String,
    engine_type: String,
    params: Params,
    defs: HashMap<String, VarDef>,
}

/// A declared IO of the loopback broker.
#[derive(Clone)]
pub struct MemoryIo {
    state: Arc<Mutex<IoState>>,
}

impl MemoryIo {
    fn lock(&self) -> MutexGuard<'_, IoState> {
        self.state.lock().expect("io state poisoned")
    }
}

impl StreamIo for MemoryIo {
    type Engine = MemoryEngine;

    fn set_engine_type(&self, kind: &str) {
        self.lock().engine_type = kind.to_owned();
    }

    fn engine_type(&self) -> String {
        self.lock().engine_type.clone()
    }

    fn set_parameters(&self, params: Params) {
        self.lock().params = params;
    }

    fn parameters(&self) -> Params {
        self.lock().params.clone()
    }

    fn open(&self, stream: &str, mode: OpenMode) -> Result<MemoryEngine, RedevError> {
        let (engine_type, timeout) = {
            let io = self.lock();
            (io.engine_type.clone(), io.params.open_timeout_secs())
        };
        let rendezvous = if engine_type.eq_ignore_ascii_case("sst") {
            true
        } else if engine_type.eq_ignore_ascii_case("bp4") {
            false
        } else {
            return Err(RedevError::UnsupportedEngine(engine_type));
        };

        let state = stream_entry(stream);
        {
            let mut inner = state.lock();
            match mode {
                OpenMode::Write => {
                    inner.writer_handles += 1;
                    inner.writer_ever = true;
                    state.cv.notify_all();
                    if rendezvous {
                        while inner.reader_handles == 0 {
                            inner = state.cv.wait(inner).expect("stream state poisoned");
                        }
                    }
                }
                OpenMode::Read => {
                    inner.reader_handles += 1;
                    state.cv.notify_all();
                    if rendezvous {
                        while !inner.writer_ever {
                            inner = state.cv.wait(inner).expect("stream state poisoned");
                        }
                    } else if !inner.writer_ever {
                        let Some(secs) = timeout else {
                            inner.reader_handles -= 1;
                            return Err(RedevError::StreamUnavailable(stream.to_owned()));
                        };
                        let deadline = Instant::now() + Duration::from_secs(secs);
                        while !inner.writer_ever {
                            let now = Instant::now();
                            if now >= deadline {
                                inner.reader_handles -= 1;
                                return Err(RedevError::OpenTimeout {
                                    stream: stream.to_owned(),
                                    seconds: secs,
                                });
                            }
                            let (guard, _) = state
                                .cv
                                .wait_timeout(inner, deadline - now)
                                .expect("stream state poisoned");
                            inner = guard;
                        }
                    }
                }
            }
        }

        Ok(MemoryEngine {
            shared: Arc::new(EngineShared {
                stream: state,
                io: self.clone(),
                mode,
                local: Mutex::new(EngineLocal {
                    in_step: false,
                    cursor: 0,
                    closed: false,
                    current: None,
                }),
            }),
        })
    }

    fn define_variable<T: WireElem>(
        &self,
        name: &str,
        shape: u64,
        start: Option<u64>,
        count: Option<u64>,
    ) -> Result<(), RedevError> {
        let mut io = self.lock();
        if let Some(existing) = io.defs.get(name) {
            if existing.tag != T::TAG || existing.shape != shape {
                return Err(RedevError::VariableRedefined(name.to_owned()));
            }
        }
        io.defs.insert(
            name.to_owned(),
            VarDef {
                tag: T::TAG,
                shape,
                start,
                count,
            },
        );
        Ok(())
    }
}

struct EngineLocal {
    in_step: bool,
    cursor: usize,
    closed: bool,
    /// Reader-side snapshot of the step opened by `begin_step`.
    current: Option<Arc<StepVars>>,
}

struct EngineShared {
    stream: Arc<StreamState>,
    io: MemoryIo,
    mode: OpenMode,
    local: Mutex<EngineLocal>,
}

/// An open engine handle of the loopback broker.
#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<EngineShared>,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine").finish_non_exhaustive()
    }
}

impl MemoryEngine {
    fn local(&self) -> MutexGuard<'_, EngineLocal> {
        self.shared.local.lock().expect("engine state poisoned")
    }

    fn stream_name(&self) -> String {
        self.shared.stream.name.clone()
    }

    fn writer_begin(&self) -> Result<StepStatus, RedevError> {
        let mut local = self.local();
        always_assert!(!local.in_step);
        let mut inner = self.shared.stream.lock();
        if inner.accum.is_none() {
            inner.accum = Some(StepVars::new());
        }
        drop(inner);
        local.in_step = true;
        Ok(StepStatus::Ok)
    }

    fn writer_end(&self) -> Result<(), RedevError> {
        let mut local = self.local();
        if !local.in_step {
            return Err(RedevError::NoActiveStep(self.stream_name()));
        }
        local.in_step = false;
        drop(local);

        let state = &self.shared.stream;
        let mut inner = state.lock();
        inner.writers_done += 1;
        let target = inner.published.len() + 1;
        if inner.writers_done == inner.writer_handles {
            let step = inner.accum.take().unwrap_or_default();
            inner.published.push(Arc::new(step));
            inner.writers_done = 0;
            state.cv.notify_all();
        } else {
            // collective end: wait until the last writer publishes
            while inner.published.len() < target {
                inner = state.cv.wait(inner).expect("stream state poisoned");
            }
        }
        Ok(())
    }

    fn reader_begin(&self) -> Result<StepStatus, RedevError> {
        let mut local = self.local();
        always_assert!(!local.in_step);
        let cursor = local.cursor;
        let timeout = self.shared.io.parameters().open_timeout_secs();
        let deadline = timeout.map(|secs| Instant::now() + Duration::from_secs(secs));

        let state = &self.shared.stream;
        let mut inner = state.lock();
        loop {
            if inner.published.len() > cursor {
                local.current = Some(inner.published[cursor].clone());
                local.in_step = true;
                return Ok(StepStatus::Ok);
            }
            if inner.writer_ever && inner.writer_handles == 0 {
                return Ok(StepStatus::EndOfStream);
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(StepStatus::NotReady);
                    }
                    let (guard, _) = state
                        .cv
                        .wait_timeout(inner, deadline - now)
                        .expect("stream state poisoned");
                    inner = guard;
                }
                None => {
                    inner = state.cv.wait(inner).expect("stream state poisoned");
                }
            }
        }
    }

    fn reader_end(&self) -> Result<(), RedevError> {
        let mut local = self.local();
        if !local.in_step {
            return Err(RedevError::NoActiveStep(self.stream_name()));
        }
        local.in_step = false;
        local.current = None;
        local.cursor += 1;
        Ok(())
    }

    fn write_into_step(
        &self,
        name: &str,
        tag: WireTag,
        shape: u64,
        start: u64,
        bytes: &[u8],
    ) -> Result<(), RedevError> {
        let esize = elem_size(tag) as u64;
        let mut inner = self.shared.stream.lock();
        let step = inner
            .accum
            .as_mut()
            .ok_or_else(|| RedevError::NoActiveStep(self.stream_name()))?;
        let var = step.entry(name.to_owned()).or_insert_with(|| VarData {
            tag,
            shape,
            bytes: vec![0u8; (shape * esize) as usize],
        });
        if var.tag != tag || var.shape != shape {
            return Err(RedevError::VariableRedefined(name.to_owned()));
        }
        let offset = (start * esize) as usize;
        var.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl StreamEngine for MemoryEngine {
    fn begin_step(&self) -> Result<StepStatus, RedevError> {
        match self.shared.mode {
            OpenMode::Write => self.writer_begin(),
            OpenMode::Read => self.reader_begin(),
        }
    }

    fn end_step(&self) -> Result<(), RedevError> {
        match self.shared.mode {
            OpenMode::Write => self.writer_end(),
            OpenMode::Read => self.reader_end(),
        }
    }

    fn perform_puts(&self) {
        // data is copied eagerly at put time
    }

    fn perform_gets(&self) {
        // data is copied eagerly at get time
    }

    fn close(&self) {
        let mut local = self.local();
        if local.closed {
            return;
        }
        local.closed = true;
        drop(local);
        let state = &self.shared.stream;
        let mut inner = state.lock();
        match self.shared.mode {
            OpenMode::Write => inner.writer_handles -= 1,
            OpenMode::Read => inner.reader_handles -= 1,
        }
        state.cv.notify_all();
    }

    fn inquire_variable<T: WireElem>(&self, name: &str) -> Option<u64> {
        let local = self.local();
        let step = local.current.as_ref()?;
        let var = step.get(name)?;
        (var.tag == T::TAG).then_some(var.shape)
    }

    fn put<T: WireElem>(
        &self,
        name: &str,
        selection: Option<(u64, u64)>,
        data: &[T],
        _mode: Mode,
    ) -> Result<(), RedevError> {
        always_assert!(self.shared.mode == OpenMode::Write);
        {
            let local = self.local();
            if !local.in_step {
                return Err(RedevError::NoActiveStep(self.stream_name()));
            }
        }
        let def = self
            .shared
            .io
            .lock()
            .defs
            .get(name)
            .cloned()
            .ok_or_else(|| RedevError::MissingVariable(name.to_owned()))?;
        if def.tag != T::TAG {
            return Err(RedevError::TypeMismatch {
                name: name.to_owned(),
                expected: def.tag.name(),
                found: T::TAG.name(),
            });
        }
        let (start, count) = selection
            .or_else(|| def.start.zip(def.count))
            .unwrap_or((0, def.shape));
        if start + count > def.shape {
            return Err(RedevError::SelectionOutOfBounds {
                name: name.to_owned(),
                start,
                count,
                shape: def.shape,
            });
        }
        always_assert!(data.len() as u64 == count);
        self.write_into_step(name, def.tag, def.shape, start, bytemuck::cast_slice(data))
    }

    fn get<T: WireElem>(
        &self,
        name: &str,
        selection: Option<(u64, u64)>,
        out: &mut [T],
        _mode: Mode,
    ) -> Result<(), RedevError> {
        always_assert!(self.shared.mode == OpenMode::Read);
        let local = self.local();
        let step = local
            .current
            .as_ref()
            .ok_or_else(|| RedevError::NoActiveStep(self.stream_name()))?;
        let var = step
            .get(name)
            .ok_or_else(|| RedevError::MissingVariable(name.to_owned()))?;
        if var.tag != T::TAG {
            return Err(RedevError::TypeMismatch {
                name: name.to_owned(),
                expected: T::TAG.name(),
                found: var.tag.name(),
            });
        }
        let (start, count) = selection.unwrap_or((0, var.shape));
        if start + count > var.shape {
            return Err(RedevError::SelectionOutOfBounds {
                name: name.to_owned(),
                start,
                count,
                shape: var.shape,
            });
        }
        always_assert!(out.len() as u64 == count);
        let esize = elem_size(var.tag);
        let offset = start as usize * esize;
        let len = count as usize * esize;
        bytemuck::cast_slice_mut::<T, u8>(out)
            .copy_from_slice(&var.bytes[offset..offset + len]);
        Ok(())
    }

    fn put_string(&self, name: &str, value: &str) -> Result<(), RedevError> {
        always_assert!(self.shared.mode == OpenMode::Write);
        {
            let local = self.local();
            if !local.in_step {
                return Err(RedevError::NoActiveStep(self.stream_name()));
            }
        }
        self.write_into_step(
            name,
            WireTag::Str,
            value.len() as u64,
            0,
            value.as_bytes(),
        )
    }

    fn get_string(&self, name: &str) -> Result<String, RedevError> {
        always_assert!(self.shared.mode == OpenMode::Read);
        let local = self.local();
        let step = local
            .current
            .as_ref()
            .ok_or_else(|| RedevError::NoActiveStep(self.stream_name()))?;
        let var = step
            .get(name)
            .ok_or_else(|| RedevError::MissingVariable(name.to_owned()))?;
        if var.tag != WireTag::Str {
            return Err(RedevError::TypeMismatch {
                name: name.to_owned(),
                expected: WireTag::Str.name(),
                found: var.tag.name(),
            });
        }
        Ok(String::from_utf8_lossy(&var.bytes).into_owned())
    }
}
