//! Always-on assertion for invariant violations.
//!
//! Coupling runs detect-early and abort-fast: a broken invariant on any rank
//! leaves the paired job wedged in a collective, so the only useful response
//! is to fail loudly and immediately. The macro stays active in release
//! builds, unlike `debug_assert!`.

/// Assert `cond` in every build profile; on failure, panic with the failed
/// condition text and its source location.
#[macro_export]
macro_rules! always_assert {
    ($cond:expr) => {
        if !($cond) {
            panic!("{} failed at {}:{}", stringify!($cond), file!(), line!());
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            panic!(
                "{} failed at {}:{}: {}",
                stringify!($cond),
                file!(),
                line!(),
                format_args!($($arg)+)
            );
        }
    };
}
