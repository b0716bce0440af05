//! Call-count and elapsed-time profiling.
//!
//! A process-wide map from name to `(call count, accumulated seconds)`.
//! Instrumentation is purely observational: it must never influence control
//! flow, so the API is additive-only and failures to record are impossible
//! by construction. The map is behind a mutex because the loopback tests
//! host several ranks as threads of one process.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Instant;

static PROFILE: Lazy<Mutex<BTreeMap<String, (u64, f64)>>> =
    Lazy::new(|| Mutex::new(BTreeMap::new()));

/// Increment the call count for `name` and add `seconds` to its total.
pub fn add_time(name: &str, seconds: f64) {
    let mut map = PROFILE.lock().expect("profile map poisoned");
    let entry = map.entry(name.to_owned()).or_insert((0, 0.0));
    entry.0 += 1;
    entry.1 += seconds;
}

/// Accumulated seconds recorded under `name`, 0 if never recorded.
pub fn elapsed(name: &str) -> f64 {
    let map = PROFILE.lock().expect("profile map poisoned");
    map.get(name).map_or(0.0, |e| e.1)
}

/// Number of activations recorded under `name`, 0 if never recorded.
pub fn call_count(name: &str) -> u64 {
    let map = PROFILE.lock().expect("profile map poisoned");
    map.get(name).map_or(0, |e| e.0)
}

/// Write all recorded entries as `name, callCount, time(s)` lines.
pub fn write_profile(os: &mut dyn Write) -> io::Result<()> {
    let map = PROFILE.lock().expect("profile map poisoned");
    writeln!(os, "Profiling")?;
    writeln!(os, "name, callCount, time(s)")?;
    for (name, (calls, time)) in map.iter() {
        writeln!(os, "{name}, {calls}, {time}")?;
    }
    Ok(())
}

/// Records the lifetime of one scope under a fixed name.
///
/// On drop the elapsed wall time since construction is added to the named
/// entry. Construct it at the top of the scope being measured, usually via
/// [`function_timer!`](crate::function_timer).
pub struct ScopedTimer {
    name: &'static str,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        add_time(self.name, self.start.elapsed().as_secs_f64());
    }
}

/// Time the enclosing scope under the given name.
#[macro_export]
macro_rules! function_timer {
    ($name:literal) => {
        let _redev_scoped_function_timer = $crate::profile::ScopedTimer::new($name);
    };
}
