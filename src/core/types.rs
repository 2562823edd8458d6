/// Core types used throughout rbinspect: RubyValue, OutputFormat and the error taxonomies
use std::fmt;

use serde::Serializer;
use thiserror::Error;

pub use remoteprocess::{Pid, Process, ProcessMemory};

/// A decoded Ruby value. Containers hold their decoded children; anything that couldn't be
/// decoded is represented by one of the placeholder variants at the bottom.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RubyValue {
    Nil,
    True,
    False,
    Undef,
    Integer(i64),
    Float(f64),
    /// `None` when the symbol id couldn't be resolved to a name
    Symbol(Option<String>),
    String(#[serde(serialize_with = "lossy_string")] Vec<u8>),
    Array(Vec<RubyValue>),
    Hash(Vec<(RubyValue, RubyValue)>),
    Object {
        class: usize,
        ivars: Vec<(String, RubyValue)>,
    },
    Class {
        kind: ClassKind,
        address: usize,
        class_vars: Vec<(String, RubyValue)>,
        constants: Vec<(String, RubyValue)>,
    },
    Unknown {
        type_tag: u64,
        address: usize,
    },
    Unreadable(usize),
    Cyclic(usize),
    DepthLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassKind {
    Class,
    Module,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Error, Debug)]
pub enum MemoryCopyError {
    #[error("Permission denied when reading from process. If you're not running as root, try again with sudo. If you're using Docker, try passing `--cap-add=SYS_PTRACE` to `docker run`")]
    PermissionDenied,
    #[error("Failed to copy memory address {:x}", _0)]
    Io(usize, std::io::Error),
    #[error("Process isn't running")]
    ProcessEnded,
    #[error("Copy error: {}", _0)]
    Message(String),
    #[error("Too much memory requested when copying: {}", _0)]
    RequestTooLarge(usize),
    #[error("Tried to read invalid string")]
    InvalidStringError(std::string::FromUtf8Error),
    #[error("Tried to read invalid memory address {:x}", _0)]
    InvalidAddressError(usize),
}

/// Failures while interpreting Ruby data structures. None of these abort a whole decode: the
/// decoder contains each one at the smallest enclosing aggregate.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Symbol id {:#x} is not in the symbol table", _0)]
    UnresolvedSymbol(u64),
    #[error("Inaccessible memory: {}", _0)]
    InaccessibleMemory(#[from] MemoryCopyError),
    #[error("Unknown type tag {tag:#x} for object at {address:#x}")]
    UnknownTypeTag { tag: u64, address: usize },
    #[error("Hash table at {:#x} is malformed", _0)]
    MalformedHashTable(usize),
}

fn lossy_string<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

fn write_pairs<K: fmt::Display>(f: &mut fmt::Formatter, pairs: &[(K, RubyValue)]) -> fmt::Result {
    if pairs.is_empty() {
        return write!(f, "{{ }}");
    }
    write!(f, "{{ ")?;
    for (i, (k, v)) in pairs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{} => {}", k, v)?;
    }
    write!(f, " }}")
}

impl fmt::Display for RubyValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RubyValue::Nil => write!(f, "nil"),
            RubyValue::True => write!(f, "true"),
            RubyValue::False => write!(f, "false"),
            RubyValue::Undef => write!(f, "undef"),
            RubyValue::Integer(n) => write!(f, "{}", n),
            RubyValue::Float(x) => write!(f, "{:?}", x),
            RubyValue::Symbol(Some(name)) => write!(f, ":{}", name),
            // unresolved symbols render as nothing at all
            RubyValue::Symbol(None) => Ok(()),
            RubyValue::String(bytes) => {
                write!(f, "\"")?;
                for b in bytes {
                    write!(f, "{}", std::ascii::escape_default(*b))?;
                }
                write!(f, "\"")
            }
            RubyValue::Array(elements) => {
                write!(f, "[")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, "]")
            }
            RubyValue::Hash(pairs) => write_pairs(f, pairs),
            RubyValue::Object { ivars, .. } => write_pairs(f, ivars),
            RubyValue::Class {
                kind,
                address,
                class_vars,
                constants,
            } => {
                let kind = match kind {
                    ClassKind::Class => "Class",
                    ClassKind::Module => "Module",
                };
                write!(f, "#<{}:{:#x}>", kind, address)?;
                if class_vars.is_empty() && constants.is_empty() {
                    return Ok(());
                }
                let all: Vec<(String, RubyValue)> =
                    class_vars.iter().chain(constants.iter()).cloned().collect();
                write!(f, " ")?;
                write_pairs(f, &all)
            }
            RubyValue::Unknown { type_tag, address } => {
                write!(f, "#<T_{:#04x} {:#x}>", type_tag, address)
            }
            RubyValue::Unreadable(addr) => write!(f, "<unreadable {:#x}>", addr),
            RubyValue::Cyclic(addr) => write!(f, "<cyclic {:#x}>", addr),
            RubyValue::DepthLimit => write!(f, "<depth limit>"),
        }
    }
}
