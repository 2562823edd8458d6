use anyhow::{format_err, Context, Result};
use proc_maps::{get_process_maps, MapRange};

use crate::core::decoder::{DecodeOptions, Decoder};
use crate::core::iseq;
use crate::core::layout::Layout;
use crate::core::memory::Reader;
use crate::core::process::{with_process_locked, ProcessRetry};
use crate::core::types::{Pid, Process, RubyValue};

/**
 * Inspecting a live Ruby process.
 *
 * Each call attaches to the process, optionally stops it for the duration of the read (resuming
 * it afterwards even if decoding fails), and runs the decoder against its memory.
 */

#[derive(Debug, Clone)]
pub struct InspectConfig {
    pub layout: Layout,
    pub options: DecodeOptions,
    /// Address of `global_symbols`, for resolving symbol names
    pub symbols_addr: Option<usize>,
    pub lock_process: bool,
}

impl Default for InspectConfig {
    fn default() -> Self {
        InspectConfig {
            layout: Layout::default(),
            options: DecodeOptions::default(),
            symbols_addr: None,
            lock_process: true,
        }
    }
}

/// Where to find an instruction sequence's line table and the frame's program counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineQuery {
    pub table: usize,
    pub size: usize,
    pub pc: usize,
    pub iseq_encoded: usize,
}

pub fn inspect_value(pid: Pid, word: u64, config: &InspectConfig) -> Result<RubyValue> {
    let process = attach(pid)?;
    let maps = memory_maps(pid);
    with_process_locked(&process, config.lock_process, || {
        decoder(&process, maps.as_deref(), config).decode(word)
    })
}

pub fn resolve_symbol(pid: Pid, id: u64, config: &InspectConfig) -> Result<Option<String>> {
    if config.symbols_addr.is_none() {
        return Err(format_err!(
            "Resolving symbols needs the address of global_symbols"
        ));
    }
    let process = attach(pid)?;
    let maps = memory_maps(pid);
    with_process_locked(&process, config.lock_process, || {
        decoder(&process, maps.as_deref(), config).symbol_name(id)
    })
}

pub fn line_number(pid: Pid, query: &LineQuery, config: &InspectConfig) -> Result<u32> {
    let process = attach(pid)?;
    let maps = memory_maps(pid);
    let lineno = with_process_locked(&process, config.lock_process, || {
        iseq::get_lineno(
            &reader(&process, maps.as_deref()),
            &config.layout.line_info,
            query.table,
            query.size,
            query.pc,
            query.iseq_encoded,
        )
    })?;
    Ok(lineno.context(format!("reading line table at {:#x}", query.table))?)
}

fn attach(pid: Pid) -> Result<Process> {
    Process::new_with_retry(pid)
        .with_context(|| format!("Couldn't find process with PID {}. Is it running?", pid))
}

// The mapped-region check is an optimization, so carry on without it if the maps are unreadable
fn memory_maps(pid: Pid) -> Option<Vec<MapRange>> {
    match get_process_maps(pid) {
        Ok(maps) => Some(maps),
        Err(e) => {
            warn!("Couldn't read memory maps of process {}: {}", pid, e);
            None
        }
    }
}

fn reader<'a>(process: &'a Process, maps: Option<&'a [MapRange]>) -> Reader<'a, Process> {
    match maps {
        Some(maps) => Reader::with_maps(process, maps),
        None => Reader::new(process),
    }
}

fn decoder<'a>(
    process: &'a Process,
    maps: Option<&'a [MapRange]>,
    config: &'a InspectConfig,
) -> Decoder<'a, Process> {
    let decoder = Decoder::new(reader(process, maps), &config.layout, config.options);
    match config.symbols_addr {
        Some(addr) => decoder.with_symbol_table(addr),
        None => decoder,
    }
}
