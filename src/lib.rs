//! Decodes Ruby VM values and objects out of a stopped Ruby process.
//!
//! The core is `core::decoder::Decoder`, which turns a raw `VALUE` word into a `RubyValue` tree
//! by reading the process's memory through any `remoteprocess::ProcessMemory`. `inspector` wraps
//! it for live processes.
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod core;
pub mod inspector;
pub mod ui;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::core::decoder::{DecodeOptions, Decoder};
pub use crate::core::layout::Layout;
pub use crate::core::memory::Reader;
pub use crate::core::types::{ClassKind, DecodeError, MemoryCopyError, OutputFormat, RubyValue};
pub use crate::inspector::{inspect_value, resolve_symbol, InspectConfig, LineQuery};
