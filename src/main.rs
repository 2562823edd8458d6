use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use rbinspect::core::events::{read_gc_events, read_object_counts, ObjectCounts};
use rbinspect::core::fault::FaultReason;
use rbinspect::core::types::Pid;
use rbinspect::inspector::{self, InspectConfig, LineQuery};
use rbinspect::ui::output;
use rbinspect::{DecodeOptions, Layout, OutputFormat};

#[derive(Parser, Debug)]
#[command(
    name = "rbinspect",
    version,
    about = "Decode Ruby VM values and objects out of a running Ruby process"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a VALUE (an immediate, or the address of a heap object)
    Value {
        /// PID of the Ruby process
        #[arg(short, long)]
        pid: Pid,
        /// The raw VALUE, in hex
        #[arg(value_parser = parse_hex)]
        value: u64,
        /// Address of `global_symbols`, used to resolve symbol and instance variable names
        #[arg(long, value_parser = parse_address)]
        symbols_addr: Option<usize>,
        #[command(flatten)]
        layout: LayoutArgs,
        #[command(flatten)]
        limits: LimitArgs,
        /// Don't stop the process while reading it. Faster, but the result may be inconsistent
        #[arg(long)]
        nonblocking: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Look up the name of a symbol id
    Symbol {
        #[arg(short, long)]
        pid: Pid,
        /// The symbol id (not the tagged VALUE), in hex
        #[arg(value_parser = parse_hex)]
        id: u64,
        /// Address of `global_symbols`
        #[arg(long, value_parser = parse_address)]
        symbols_addr: usize,
        #[command(flatten)]
        layout: LayoutArgs,
        #[arg(long)]
        nonblocking: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Find the line a frame is executing from its iseq's line table and program counter
    Lineno {
        #[arg(short, long)]
        pid: Pid,
        /// Address of the iseq's line_info_table
        #[arg(long, value_parser = parse_address)]
        table: usize,
        /// Number of entries in the line table
        #[arg(long)]
        size: usize,
        /// The frame's pc
        #[arg(long, value_parser = parse_address)]
        pc: usize,
        /// The iseq's iseq_encoded
        #[arg(long, value_parser = parse_address)]
        iseq_encoded: usize,
        #[command(flatten)]
        layout: LayoutArgs,
        #[arg(long)]
        nonblocking: bool,
    },
    /// Explain a page fault error code (REG_ERR from a segfault's ucontext)
    Fault {
        #[arg(value_parser = parse_hex)]
        code: u64,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print GC mark latency events recorded by the VM tracer
    GcEvents {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print object creation counts recorded by the VM tracer, least common first
    ObjectCounts {
        /// Either a dump of the tracer's count table, or a JSON object of name => count
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Args, Debug)]
struct LayoutArgs {
    /// Version of the Ruby process, e.g. 2.3.1
    #[arg(long)]
    ruby_version: Option<String>,
    /// JSON file with layout constants, applied on top of the --ruby-version preset
    #[arg(long)]
    layout: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct LimitArgs {
    /// How many containers deep to decode
    #[arg(long, default_value_t = DecodeOptions::default().max_depth)]
    max_depth: usize,
    /// Maximum number of elements decoded per array or hash
    #[arg(long, default_value_t = DecodeOptions::default().max_elements)]
    max_elements: usize,
    /// Strings longer than this are truncated
    #[arg(long, default_value_t = DecodeOptions::default().max_string_len)]
    max_string_len: usize,
}

impl LayoutArgs {
    fn resolve(&self) -> Result<Layout> {
        let base = match self.ruby_version {
            Some(ref version) => Layout::for_version(version)?,
            None => {
                if self.layout.is_none() {
                    info!("No --ruby-version given, assuming a Ruby 2.3 layout");
                }
                Layout::default()
            }
        };
        match self.layout {
            Some(ref path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading layout file {}", path.display()))?;
                Ok(base
                    .with_overrides(&json)
                    .with_context(|| format!("parsing layout file {}", path.display()))?)
            }
            None => Ok(base),
        }
    }
}

impl From<&LimitArgs> for DecodeOptions {
    fn from(limits: &LimitArgs) -> Self {
        DecodeOptions {
            max_depth: limits.max_depth,
            max_elements: limits.max_elements,
            max_string_len: limits.max_string_len,
        }
    }
}

fn parse_hex(s: &str) -> Result<u64, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| format!("{:?} isn't a hex number: {}", s, e))
}

fn parse_address(s: &str) -> Result<usize, String> {
    Ok(parse_hex(s)? as usize)
}

fn run<W: Write>(command: Command, out: &mut W) -> Result<()> {
    match command {
        Command::Value {
            pid,
            value,
            symbols_addr,
            layout,
            limits,
            nonblocking,
            format,
        } => {
            let config = InspectConfig {
                layout: layout.resolve()?,
                options: DecodeOptions::from(&limits),
                symbols_addr,
                lock_process: !nonblocking,
            };
            let decoded = inspector::inspect_value(pid, value, &config)?;
            output::write_value(out, &decoded, format)
        }
        Command::Symbol {
            pid,
            id,
            symbols_addr,
            layout,
            nonblocking,
            format,
        } => {
            let config = InspectConfig {
                layout: layout.resolve()?,
                options: DecodeOptions::default(),
                symbols_addr: Some(symbols_addr),
                lock_process: !nonblocking,
            };
            let name = inspector::resolve_symbol(pid, id, &config)?;
            output::write_symbol(out, id, name.as_deref(), format)
        }
        Command::Lineno {
            pid,
            table,
            size,
            pc,
            iseq_encoded,
            layout,
            nonblocking,
        } => {
            let config = InspectConfig {
                layout: layout.resolve()?,
                lock_process: !nonblocking,
                ..InspectConfig::default()
            };
            let query = LineQuery {
                table,
                size,
                pc,
                iseq_encoded,
            };
            let lineno = inspector::line_number(pid, &query, &config)?;
            writeln!(out, "{}", lineno)?;
            Ok(())
        }
        Command::Fault { code, format } => {
            output::write_fault(out, &FaultReason::from_error_code(code), format)
        }
        Command::GcEvents { file, format } => {
            let input = File::open(&file)
                .with_context(|| format!("opening GC event file {}", file.display()))?;
            let events = read_gc_events(BufReader::new(input))
                .with_context(|| format!("reading GC events from {}", file.display()))?;
            output::write_gc_events(out, &events, format)
        }
        Command::ObjectCounts { file, format } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("opening object count file {}", file.display()))?;
            let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
            let counts = if first == Some(&b'{') {
                ObjectCounts::from_json(&String::from_utf8_lossy(&bytes))
            } else {
                read_object_counts(&bytes[..])
            }
            .with_context(|| format!("reading object counts from {}", file.display()))?;
            output::write_object_counts(out, &counts, format)
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let stdout = io::stdout();
    if let Err(e) = run(cli.command, &mut stdout.lock()) {
        eprintln!("Error. Causes: ");
        for cause in e.chain() {
            eprintln!("- {}", cause);
        }
        std::process::exit(1);
    }
}
