use byteorder::{ByteOrder, NativeEndian};

use crate::core::layout::LineInfoLayout;
use crate::core::memory::Reader;
use crate::core::types::{MemoryCopyError, ProcessMemory};

/// One row of an instruction sequence's `line_info_table`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineInfoEntry {
    pub position: u32,
    pub line_no: u32,
}

/// Offset of `pc` into the encoded instruction sequence, in instructions. `pc` points at the
/// next instruction, so non-zero offsets are moved back by one.
pub fn get_pos(pc: usize, iseq_encoded: usize) -> Result<usize, MemoryCopyError> {
    if pc < iseq_encoded {
        return Err(MemoryCopyError::Message(
            "program counter and iseq are out of sync".to_string(),
        ));
    }
    let mut pos = (pc - iseq_encoded) / std::mem::size_of::<u64>();
    if pos != 0 {
        pos -= 1;
    }
    Ok(pos)
}

pub fn lineno_for_pos(table: &[LineInfoEntry], pos: usize) -> u32 {
    match table.len() {
        0 => 0,
        1 => table[0].line_no,
        _ => {
            for (i, entry) in table.iter().enumerate() {
                let position = entry.position as usize;
                if position == pos {
                    return entry.line_no;
                } else if position > pos {
                    return table[i.saturating_sub(1)].line_no;
                }
            }
            table[table.len() - 1].line_no
        }
    }
}

pub fn read_line_table<M: ProcessMemory>(
    reader: &Reader<M>,
    layout: &LineInfoLayout,
    addr: usize,
    size: usize,
) -> Result<Vec<LineInfoEntry>, MemoryCopyError> {
    if layout.entry_size < layout.position.max(layout.line_no) + 4 {
        return Err(MemoryCopyError::Message(format!(
            "line info entries of {} bytes can't hold their fields",
            layout.entry_size
        )));
    }
    let length = size
        .checked_mul(layout.entry_size)
        .ok_or(MemoryCopyError::RequestTooLarge(usize::MAX))?;
    let bytes = reader.read_bytes(addr, length)?;
    Ok(bytes
        .chunks_exact(layout.entry_size)
        .map(|entry| LineInfoEntry {
            position: NativeEndian::read_u32(&entry[layout.position..layout.position + 4]),
            line_no: NativeEndian::read_u32(&entry[layout.line_no..layout.line_no + 4]),
        })
        .collect())
}

/// Line number being executed by a frame whose iseq has `size` line table entries at `table`
pub fn get_lineno<M: ProcessMemory>(
    reader: &Reader<M>,
    layout: &LineInfoLayout,
    table: usize,
    size: usize,
    pc: usize,
    iseq_encoded: usize,
) -> Result<u32, MemoryCopyError> {
    let pos = get_pos(pc, iseq_encoded)?;
    let entries = read_line_table(reader, layout, table, size)?;
    Ok(lineno_for_pos(&entries, pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::layout::Layout;
    use crate::test_utils::MemoryImage;

    fn table() -> Vec<LineInfoEntry> {
        [(0, 10), (4, 11), (9, 15)]
            .iter()
            .map(|&(position, line_no)| LineInfoEntry { position, line_no })
            .collect()
    }

    #[test]
    fn test_get_pos() {
        assert_eq!(get_pos(0x1000, 0x1000).unwrap(), 0);
        assert_eq!(get_pos(0x1008, 0x1000).unwrap(), 0);
        assert_eq!(get_pos(0x1028, 0x1000).unwrap(), 4);
        assert!(get_pos(0x0ff8, 0x1000).is_err());
    }

    #[test]
    fn test_lineno_for_pos() {
        let table = table();
        assert_eq!(lineno_for_pos(&table, 4), 11);
        assert_eq!(lineno_for_pos(&table, 6), 11);
        assert_eq!(lineno_for_pos(&table, 100), 15);
        assert_eq!(lineno_for_pos(&[], 3), 0);
        assert_eq!(lineno_for_pos(&table[2..], 0), 15);
    }

    #[test]
    fn test_position_before_first_entry() {
        let table = &table()[1..];
        assert_eq!(lineno_for_pos(table, 1), 11);
    }

    #[test]
    fn test_get_lineno_from_memory() {
        let mut image = MemoryImage::new();
        let mut bytes = Vec::new();
        for entry in table() {
            bytes.extend_from_slice(&entry.position.to_ne_bytes());
            bytes.extend_from_slice(&entry.line_no.to_ne_bytes());
        }
        image.insert(0x2000, &bytes);
        let reader = Reader::new(&image);
        let layout = Layout::ruby_2_3().line_info;
        assert_eq!(read_line_table(&reader, &layout, 0x2000, 3).unwrap(), table());
        // pc 6 instructions in: position 5
        assert_eq!(
            get_lineno(&reader, &layout, 0x2000, 3, 0x1000 + 6 * 8, 0x1000).unwrap(),
            11
        );
        assert!(get_lineno(&reader, &layout, 0x2000, 4, 0x1000, 0x1000).is_err());
    }
}
