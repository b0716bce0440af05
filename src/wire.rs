//! Wire element types.
//!
//! Every value that crosses a stream or a collective is one of a closed set
//! of plain-old-data element types. [`WireElem`] is the compile-time map
//! from a Rust type to its on-wire identity: unsupported types fail to
//! compile, and [`WireTag`] is the runtime face of the same map, used by
//! the substrate to type-check variables and by the runtime-typed
//! communicator wrapper.
//!
//! The trait is sealed; the element set cannot grow outside this module.

use crate::types::CV;
use bytemuck::Pod;

mod sealed {
    pub trait Sealed {}
}

/// Runtime tag for each supported wire element type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WireTag {
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
    /// UTF-8 string variables (handshake items); never a payload element.
    Str,
}

impl WireTag {
    /// Human-readable name used in error messages.
    pub const fn name(self) -> &'static str {
        match self {
            WireTag::I8 => "i8",
            WireTag::I16 => "i16",
            WireTag::I32 => "i32",
            WireTag::I64 => "i64",
            WireTag::U8 => "u8",
            WireTag::U16 => "u16",
            WireTag::U32 => "u32",
            WireTag::U64 => "u64",
            WireTag::F32 => "f32",
            WireTag::F64 => "f64",
            WireTag::C64 => "complex64",
            WireTag::Str => "string",
        }
    }
}

/// Element types that can travel over a stream or a collective.
///
/// Sealed: the supported set is exactly the eleven impls below.
pub trait WireElem: sealed::Sealed + Pod + PartialEq + Send + Sync + 'static {
    const TAG: WireTag;
}

macro_rules! impl_wire_elem {
    ($ty:ty, $tag:expr) => {
        impl sealed::Sealed for $ty {}
        impl WireElem for $ty {
            const TAG: WireTag = $tag;
        }
    };
}

impl_wire_elem!(i8, WireTag::I8);
impl_wire_elem!(i16, WireTag::I16);
impl_wire_elem!(i32, WireTag::I32);
impl_wire_elem!(i64, WireTag::I64);
impl_wire_elem!(u8, WireTag::U8);
impl_wire_elem!(u16, WireTag::U16);
impl_wire_elem!(u32, WireTag::U32);
impl_wire_elem!(u64, WireTag::U64);
impl_wire_elem!(f32, WireTag::F32);
impl_wire_elem!(f64, WireTag::F64);
impl_wire_elem!(CV, WireTag::C64);
