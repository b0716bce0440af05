//! Streaming-substrate seam.
//!
//! Redev performs no file or socket I/O itself; every byte that crosses
//! between the server and a client moves through this interface. The shape
//! mirrors the step-oriented substrate it abstracts: an environment
//! declares named IOs, an IO carries an engine type and a parameter bag and
//! opens engines in read or write mode, and an engine moves typed variables
//! inside paired begin/end steps. A reader observes a step either in its
//! entirety or not at all.
//!
//! The crate ships one backend, the in-process [`memory`] loopback broker,
//! which is what the test suite couples jobs over.

use crate::error::RedevError;
use crate::types::Mode;
use crate::wire::WireElem;

pub mod memory;

pub use memory::{MemoryEngine, MemoryEnv, MemoryIo};

/// Result of a reader- or writer-side `begin_step`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepStatus {
    /// A step is open; variables may be put or gotten.
    Ok,
    /// No step became available within the configured wait.
    NotReady,
    /// The writer closed the stream and every step has been consumed.
    EndOfStream,
    /// Any other substrate condition.
    OtherError,
}

/// Direction an engine is opened in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// Ordered key-value parameter bag handed to the substrate.
///
/// Keys and lookups are ASCII case-insensitive; the last setting of a key
/// wins. Two keys are interpreted by redev itself: `Streaming` (value
/// `"ON"`) and `OpenTimeoutSecs` (decimal seconds), which together with the
/// engine type decide whether the buffered-transport post-open wait is
/// needed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.0.push((key.to_owned(), value.to_owned()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// True when the bag requests a streaming read mode (`Streaming=ON`).
    pub fn streaming_on(&self) -> bool {
        self.get("Streaming")
            .is_some_and(|v| v.eq_ignore_ascii_case("on"))
    }

    /// Positive open timeout, if one is configured.
    pub fn open_timeout_secs(&self) -> Option<u64> {
        self.get("OpenTimeoutSecs")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&s| s > 0)
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.set(k.as_ref(), v.as_ref());
        }
        params
    }
}

/// The substrate environment owned by a [`Redev`](crate::Redev) instance.
pub trait StreamEnv {
    type Io: StreamIo;

    /// Declare a named IO through which one stream will be opened.
    fn declare_io(&self, name: &str) -> Self::Io;
}

/// A declared IO: engine-type and parameter configuration plus variable
/// definitions, and the factory for the stream's engine.
///
/// Implementations are cloneable handles onto shared state, matching the
/// substrate's own handle semantics; a clone refers to the same IO.
pub trait StreamIo: Clone + 'static {
    type Engine: StreamEngine;

    fn set_engine_type(&self, kind: &str);
    fn engine_type(&self) -> String;
    fn set_parameters(&self, params: Params);
    fn parameters(&self) -> Params;

    /// Open the named stream for reading or writing.
    fn open(&self, stream: &str, mode: OpenMode) -> Result<Self::Engine, RedevError>;

    /// Define a typed variable with global `shape` and, for regularly laid
    /// out variables, this rank's default `start`/`count` window.
    fn define_variable<T: WireElem>(
        &self,
        name: &str,
        shape: u64,
        start: Option<u64>,
        count: Option<u64>,
    ) -> Result<(), RedevError>;
}

/// An open engine: stepping, typed data movement, and shutdown.
///
/// Cloneable handle semantics, as with [`StreamIo`].
pub trait StreamEngine: Clone {
    fn begin_step(&self) -> Result<StepStatus, RedevError>;
    fn end_step(&self) -> Result<(), RedevError>;

    /// Flush enqueued deferred puts to the substrate.
    fn perform_puts(&self);
    /// Flush enqueued deferred gets from the substrate.
    fn perform_gets(&self);

    fn close(&self);

    /// Global shape of `name` in the current step, if present with element
    /// type `T`.
    fn inquire_variable<T: WireElem>(&self, name: &str) -> Option<u64>;

    /// Write `data` into `[start, start+count)` of the variable; with no
    /// selection, the variable's defined window is used.
    fn put<T: WireElem>(
        &self,
        name: &str,
        selection: Option<(u64, u64)>,
        data: &[T],
        mode: Mode,
    ) -> Result<(), RedevError>;

    /// Read `[start, start+count)` of the variable into `out`; with no
    /// selection, the full shape is read.
    fn get<T: WireElem>(
        &self,
        name: &str,
        selection: Option<(u64, u64)>,
        out: &mut [T],
        mode: Mode,
    ) -> Result<(), RedevError>;

    /// Write a string variable (defined implicitly).
    fn put_string(&self, name: &str, value: &str) -> Result<(), RedevError>;

    /// Read a string variable from the current step.
    fn get_string(&self, name: &str) -> Result<String, RedevError>;
}

#[cfg(test)]
mod tests {
    use super::Params;

    #[test]
    fn params_last_setting_wins() {
        let mut p = Params::new();
        p.set("OpenTimeoutSecs", "2");
        p.set("opentimeoutsecs", "8");
        assert_eq!(p.open_timeout_secs(), Some(8));
    }

    #[test]
    fn params_keys_and_values_are_case_insensitive() {
        let p: Params = [("streaming", "On")].into_iter().collect();
        assert!(p.streaming_on());
        assert_eq!(p.get("STREAMING"), Some("On"));
    }

    #[test]
    fn absent_or_nonpositive_timeout_reads_as_none() {
        let p = Params::new();
        assert_eq!(p.open_timeout_secs(), None);
        let p: Params = [("OpenTimeoutSecs", "0")].into_iter().collect();
        assert_eq!(p.open_timeout_secs(), None);
        let p: Params = [("OpenTimeoutSecs", "junk")].into_iter().collect();
        assert_eq!(p.open_timeout_secs(), None);
    }
}
