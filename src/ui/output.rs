use std::io::Write;

use anyhow::Result;
use chrono::Local;

use crate::core::events::{GcEvent, ObjectCounts};
use crate::core::fault::FaultReason;
use crate::core::types::{OutputFormat, RubyValue};

pub fn write_value<W: Write>(out: &mut W, value: &RubyValue, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => writeln!(out, "{}", value)?,
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, value)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

pub fn write_symbol<W: Write>(
    out: &mut W,
    id: u64,
    name: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => match name {
            Some(name) => writeln!(out, ":{}", name)?,
            None => writeln!(out, "{:#x} is not in the symbol table", id)?,
        },
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &serde_json::json!({ "id": id, "name": name }))?;
            writeln!(out)?;
        }
    }
    Ok(())
}

pub fn write_fault<W: Write>(out: &mut W, reason: &FaultReason, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => writeln!(out, "Fault reason : {}", reason)?,
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, reason)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// GC events as a table, or one JSON object per line
pub fn write_gc_events<W: Write>(
    out: &mut W,
    events: &[GcEvent],
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => {
            writeln!(out, "{}", GcEvent::header())?;
            let now = Local::now();
            for event in events {
                writeln!(out, "{}", event.row(&now))?;
            }
        }
        OutputFormat::Json => {
            for event in events {
                serde_json::to_writer(&mut *out, event)?;
                writeln!(out)?;
            }
        }
    }
    Ok(())
}

pub fn write_object_counts<W: Write>(
    out: &mut W,
    counts: &ObjectCounts,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for row in counts.rows() {
                writeln!(out, "{}", row)?;
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &counts.sorted())?;
            writeln!(out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written<F: FnOnce(&mut Vec<u8>) -> Result<()>>(f: F) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_write_value() {
        let value = RubyValue::Array(vec![RubyValue::Integer(1), RubyValue::Symbol(None)]);
        assert_eq!(
            written(|out| write_value(out, &value, OutputFormat::Text)),
            "[1 ]\n"
        );
        assert_eq!(
            written(|out| write_value(out, &value, OutputFormat::Json)),
            "{\"type\":\"array\",\"value\":[{\"type\":\"integer\",\"value\":1},{\"type\":\"symbol\",\"value\":null}]}\n"
        );
    }

    #[test]
    fn test_write_symbol() {
        assert_eq!(
            written(|out| write_symbol(out, 0x3e01, Some("foo"), OutputFormat::Text)),
            ":foo\n"
        );
        assert_eq!(
            written(|out| write_symbol(out, 0x3e01, None, OutputFormat::Text)),
            "0x3e01 is not in the symbol table\n"
        );
        assert_eq!(
            written(|out| write_symbol(out, 16, None, OutputFormat::Json)),
            "{\"id\":16,\"name\":null}\n"
        );
    }

    #[test]
    fn test_write_fault() {
        let reason = FaultReason::from_error_code(6);
        assert_eq!(
            written(|out| write_fault(out, &reason, OutputFormat::Text)),
            "Fault reason : 0x6 (NoPageFound WriteAccess UserMode)\n"
        );
        let json = written(|out| write_fault(out, &reason, OutputFormat::Json));
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["write_access"], true);
        assert_eq!(parsed["protection_fault"], false);
    }

    #[test]
    fn test_write_gc_events() {
        let events = vec![GcEvent {
            pid: 7,
            ts: 1,
            delta: 1_500_000,
            comm: "ruby".to_string(),
        }];
        let table = written(|out| write_gc_events(out, &events, OutputFormat::Text));
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], GcEvent::header());
        assert!(lines[1].ends_with("1.50"));
        assert!(lines[1].contains(" 7      ruby "));

        let json = written(|out| write_gc_events(out, &events, OutputFormat::Json));
        assert_eq!(
            json,
            "{\"pid\":7,\"ts\":1,\"delta\":1500000,\"comm\":\"ruby\"}\n"
        );
    }

    #[test]
    fn test_write_object_counts() {
        let mut counts = ObjectCounts::new();
        counts.add("String", 5);
        counts.add("Array", 2);
        assert_eq!(
            written(|out| write_object_counts(out, &counts, OutputFormat::Text)),
            "\t2          Array\n\t5          String\n"
        );
        assert_eq!(
            written(|out| write_object_counts(out, &counts, OutputFormat::Json)),
            "[[\"Array\",2],[\"String\",5]]\n"
        );
    }
}
