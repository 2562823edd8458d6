/*
 * Walks Ruby's `st_table`, the hash table behind Hash objects, ivar index tables, class
 * variable tables and constant tables.
 *
 * A table is either packed (a flat array of (hash, key, value) triples, used below a handful of
 * entries) or big (bins of entries that are also threaded onto a doubly linked list in insertion
 * order). We walk the list, so both modes yield entries in insertion order. Ruby 2.2 ends the
 * list with NULL; from 2.3 it's a circular list that ends back at the table's list head, and the
 * links point at a node inside each entry rather than at the entry itself.
 */
use std::collections::HashSet;

use crate::core::layout::HashLayout;
use crate::core::memory::{element_address, field_address, Reader};
use crate::core::types::{DecodeError, MemoryCopyError, ProcessMemory};

const WORD_SIZE: usize = std::mem::size_of::<u64>();

/// One key/value pair, or the error reading it. Pairs fail independently.
pub type StEntry = Result<(u64, u64), MemoryCopyError>;

/// Returns every entry of the table at `table`.
///
/// A null table is empty. A big table whose chain revisits an entry, has an unreadable link or
/// runs past `max_entries` is `MalformedHashTable`; an unreadable table header is
/// `InaccessibleMemory`.
pub fn st_entries<M: ProcessMemory>(
    reader: &Reader<M>,
    layout: &HashLayout,
    table: usize,
    max_entries: usize,
) -> Result<Vec<StEntry>, DecodeError> {
    if table == 0 {
        return Ok(Vec::new());
    }
    // entries_packed is a 1 bit bitfield sharing a word with num_entries
    let word = reader.read_word(field_address(table, layout.num_entries)?)?;
    let num_entries = word >> 1;
    let entries = if word & layout.entries_packed_bit != 0 {
        packed_entries(reader, layout, table, max_entries)?
    } else {
        big_entries(reader, layout, table, max_entries)?
    };
    if entries.len() as u64 != num_entries {
        debug!(
            "st_table at {:#x} claims {} entries, found {}",
            table,
            num_entries,
            entries.len()
        );
    }
    Ok(entries)
}

fn packed_entries<M: ProcessMemory>(
    reader: &Reader<M>,
    layout: &HashLayout,
    table: usize,
    max_entries: usize,
) -> Result<Vec<StEntry>, DecodeError> {
    let real_entries =
        reader.read_word(field_address(table, layout.packed_real_entries)?)? as usize;
    if real_entries > max_entries {
        return Err(DecodeError::MalformedHashTable(table));
    }
    let base = reader.read_pointer(field_address(table, layout.packed_entries)?)?;
    if real_entries == 0 {
        return Ok(Vec::new());
    }

    // Copy the whole packed array at once when the triples are word aligned
    let stride = layout.packed_entry_size / WORD_SIZE;
    let aligned = layout.packed_entry_size % WORD_SIZE == 0
        && layout.packed_key % WORD_SIZE == 0
        && layout.packed_val % WORD_SIZE == 0
        && layout.packed_key.max(layout.packed_val) < layout.packed_entry_size;
    if aligned {
        match reader.read_words(base, real_entries * stride) {
            Ok(words) => {
                return Ok(words
                    .chunks_exact(stride)
                    .map(|entry| {
                        Ok((
                            entry[layout.packed_key / WORD_SIZE],
                            entry[layout.packed_val / WORD_SIZE],
                        ))
                    })
                    .collect())
            }
            Err(e) => debug!(
                "Couldn't copy packed entries of st_table at {:#x} ({}), reading them one by one",
                table, e
            ),
        }
    }
    Ok((0..real_entries)
        .map(|i| {
            let entry = element_address(base, i, layout.packed_entry_size)?;
            read_pair(
                reader,
                field_address(entry, layout.packed_key)?,
                field_address(entry, layout.packed_val)?,
            )
        })
        .collect())
}

fn big_entries<M: ProcessMemory>(
    reader: &Reader<M>,
    layout: &HashLayout,
    table: usize,
    max_entries: usize,
) -> Result<Vec<StEntry>, DecodeError> {
    let malformed = |_| DecodeError::MalformedHashTable(table);
    let head = field_address(table, layout.big_head).map_err(malformed)?;
    let end = if layout.list_circular { head } else { 0 };
    let mut node = reader.read_pointer(head).map_err(malformed)?;
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    while node != end {
        if node == 0 || !seen.insert(node) || entries.len() >= max_entries {
            return Err(DecodeError::MalformedHashTable(table));
        }
        let entry = node
            .checked_sub(layout.entry_list_node)
            .ok_or(DecodeError::MalformedHashTable(table))?;
        entries.push(
            field_address(entry, layout.entry_key).and_then(|key| {
                read_pair(reader, key, field_address(entry, layout.entry_record)?)
            }),
        );
        node = field_address(entry, layout.entry_list_next)
            .and_then(|next| reader.read_pointer(next))
            .map_err(malformed)?;
    }
    Ok(entries)
}

fn read_pair<M: ProcessMemory>(reader: &Reader<M>, key: usize, value: usize) -> StEntry {
    Ok((reader.read_word(key)?, reader.read_word(value)?))
}
