/*
 * Records produced by the Ruby VM tracer's probes: GC mark latency events and object creation
 * counts. Both are fixed-layout native structs, dumped back to back.
 */
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};

use byteorder::{NativeEndian, ReadBytesExt};
use chrono::{DateTime, TimeZone};
use thiserror::Error;

/// linux/sched.h
pub const TASK_COMM_LEN: usize = 16;
/// `struct data_t { u64 pid; u64 ts; u64 delta; char comm[TASK_COMM_LEN]; }`
pub const GC_EVENT_SIZE: usize = 24 + TASK_COMM_LEN;
pub const OBJECT_NAME_LEN: usize = 128;
/// `struct key_t { char objectname[128]; }` followed by its u64 count
pub const OBJECT_COUNT_SIZE: usize = OBJECT_NAME_LEN + 8;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Couldn't read events: {}", _0)]
    Io(#[from] io::Error),
    #[error("Truncated record at byte {offset}: expected {expected} bytes, got {got}")]
    Truncated {
        offset: usize,
        expected: usize,
        got: usize,
    },
    #[error("Invalid object counts: {}", _0)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcEvent {
    pub pid: u64,
    /// Microseconds on the kernel's monotonic clock
    pub ts: u64,
    /// Nanoseconds between the mark phase starting and ending
    pub delta: u64,
    pub comm: String,
}

impl GcEvent {
    pub fn parse(record: &[u8]) -> Result<GcEvent, EventError> {
        let mut cursor = Cursor::new(record);
        let pid = cursor.read_u64::<NativeEndian>()?;
        let ts = cursor.read_u64::<NativeEndian>()?;
        let delta = cursor.read_u64::<NativeEndian>()?;
        let mut comm = [0u8; TASK_COMM_LEN];
        cursor.read_exact(&mut comm)?;
        Ok(GcEvent {
            pid,
            ts,
            delta,
            comm: c_string(&comm),
        })
    }

    pub fn latency_ms(&self) -> f64 {
        self.delta as f64 / 1_000_000.0
    }

    pub fn header() -> String {
        format!("{:<9} {:<6} {:<16} {:>10}", "TIME", "PID", "COMM", "LATms")
    }

    /// A table row, stamped with the wall clock time `now`
    pub fn row<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        format!(
            "{:<9} {:<6} {:<16} {:>10.2}",
            now.format("%H:%M:%S").to_string(),
            self.pid,
            self.comm,
            self.latency_ms()
        )
    }
}

/// Decodes a stream of GC events. Events with no measured latency are dropped, the same way the
/// probe never submits them.
pub fn read_gc_events<R: Read>(mut input: R) -> Result<Vec<GcEvent>, EventError> {
    let mut events = Vec::new();
    let mut record = [0u8; GC_EVENT_SIZE];
    let mut offset = 0;
    loop {
        let got = read_record(&mut input, &mut record)?;
        if got == 0 {
            break;
        }
        if got < GC_EVENT_SIZE {
            return Err(EventError::Truncated {
                offset,
                expected: GC_EVENT_SIZE,
                got,
            });
        }
        let event = GcEvent::parse(&record)?;
        if event.delta == 0 {
            debug!("Dropping GC event with zero latency at byte {}", offset);
        } else {
            events.push(event);
        }
        offset += GC_EVENT_SIZE;
    }
    Ok(events)
}

/// Objects created per type name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectCounts {
    counts: BTreeMap<String, u64>,
}

impl ObjectCounts {
    pub fn new() -> ObjectCounts {
        ObjectCounts::default()
    }

    pub fn add(&mut self, name: &str, count: u64) {
        *self.counts.entry(name.to_string()).or_insert(0) += count;
    }

    /// Counts in ascending order, ties broken by name
    pub fn sorted(&self) -> Vec<(&str, u64)> {
        let mut counts: Vec<(&str, u64)> =
            self.counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        counts.sort_by_key(|&(name, count)| (count, name));
        counts
    }

    pub fn from_json(json: &str) -> Result<ObjectCounts, EventError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn rows(&self) -> Vec<String> {
        self.sorted()
            .into_iter()
            .map(|(name, count)| format!("\t{:<10} {}", count, name))
            .collect()
    }
}

/// Decodes a dump of the object count table: a NUL padded type name followed by its count
pub fn read_object_counts<R: Read>(mut input: R) -> Result<ObjectCounts, EventError> {
    let mut counts = ObjectCounts::new();
    let mut record = [0u8; OBJECT_COUNT_SIZE];
    let mut offset = 0;
    loop {
        let got = read_record(&mut input, &mut record)?;
        if got == 0 {
            break;
        }
        if got < OBJECT_COUNT_SIZE {
            return Err(EventError::Truncated {
                offset,
                expected: OBJECT_COUNT_SIZE,
                got,
            });
        }
        let name = c_string(&record[..OBJECT_NAME_LEN]);
        let count = Cursor::new(&record[OBJECT_NAME_LEN..]).read_u64::<NativeEndian>()?;
        counts.add(&name, count);
        offset += OBJECT_COUNT_SIZE;
    }
    Ok(counts)
}

// Fills `buf` unless the input ends first; returns how many bytes were read
fn read_record<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
