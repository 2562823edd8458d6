use std::collections::BTreeMap;
use std::io;

use rbinspect_ruby_structs::ruby_2_3_0::*;
use remoteprocess::ProcessMemory;

use crate::core::layout::{HashLayout, Layout};
use crate::core::value::fixnum_encode;

/// Allows testing offline with a hand-built image of a Ruby process's memory.
///
/// Reads must fall entirely inside one inserted region and must not overlap a poisoned range,
/// otherwise they fail with EFAULT the way a read of unmapped memory does.
#[derive(Default)]
pub struct MemoryImage {
    regions: BTreeMap<usize, Vec<u8>>,
    poisoned: Vec<(usize, usize)>,
}

impl MemoryImage {
    pub fn new() -> MemoryImage {
        MemoryImage::default()
    }

    pub fn insert(&mut self, addr: usize, bytes: &[u8]) {
        self.regions.insert(addr, bytes.to_vec());
    }

    pub fn poison(&mut self, addr: usize, length: usize) {
        self.poisoned.push((addr, addr + length));
    }

    fn region_for(&self, addr: usize, length: usize) -> Option<&[u8]> {
        let (start, bytes) = self.regions.range(..=addr).next_back()?;
        let offset = addr - start;
        let end = offset.checked_add(length).filter(|&end| end <= bytes.len())?;
        Some(&bytes[offset..end])
    }
}

impl ProcessMemory for MemoryImage {
    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<(), remoteprocess::Error> {
        let end = addr.saturating_add(buf.len());
        if self
            .poisoned
            .iter()
            .any(|&(start, stop)| addr < stop && start < end)
        {
            return Err(efault());
        }
        match self.region_for(addr, buf.len()) {
            Some(bytes) => {
                buf.copy_from_slice(bytes);
                Ok(())
            }
            None => Err(efault()),
        }
    }
}

fn efault() -> remoteprocess::Error {
    remoteprocess::Error::IOError(io::Error::from_raw_os_error(libc::EFAULT))
}

const HEAP_START: usize = 0x5555_0000_0000;
// sizeof(RVALUE) on 64-bit
const RVALUE_SIZE: usize = 40;

/// Lays out Ruby 2.3 objects in a `MemoryImage`. Every allocation gets its own region with a
/// gap after it, so reading past the end of an object fails instead of reading a neighbour.
pub struct HeapBuilder {
    pub image: MemoryImage,
    next: usize,
}

pub fn sym(id: u64) -> u64 {
    (id << SPECIAL_SHIFT) | SYMBOL_FLAG
}

pub fn int(n: i64) -> u64 {
    fixnum_encode(n)
}

/// Builds a non-operator ID for a symbol serial number
pub fn id_for_serial(serial: u64) -> u64 {
    serial << ID_SCOPE_SHIFT
}

impl HeapBuilder {
    pub fn new() -> HeapBuilder {
        HeapBuilder {
            image: MemoryImage::new(),
            next: HEAP_START,
        }
    }

    pub fn alloc_bytes(&mut self, bytes: &[u8]) -> usize {
        let addr = self.next;
        self.image.insert(addr, bytes);
        self.next += (bytes.len().max(1) + 0x10 + 0xf) & !0xf;
        self.next += 0x100;
        addr
    }

    pub fn alloc_words(&mut self, words: &[u64]) -> usize {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_ne_bytes()).collect();
        self.alloc_bytes(&bytes)
    }

    fn rvalue(&mut self, flags: u64, klass: u64, body: &[u64]) -> u64 {
        let mut words = vec![flags, klass];
        words.extend_from_slice(body);
        words.resize(RVALUE_SIZE / 8, 0);
        self.alloc_words(&words) as u64
    }

    pub fn string(&mut self, s: &[u8]) -> u64 {
        if (s.len() as u64) <= RSTRING_EMBED_LEN_MAX {
            let mut bytes = Vec::new();
            let flags = T_STRING | ((s.len() as u64) << RSTRING_EMBED_LEN_SHIFT);
            bytes.extend_from_slice(&flags.to_ne_bytes());
            bytes.extend_from_slice(&0u64.to_ne_bytes());
            let mut ary = s.to_vec();
            ary.resize(24, 0);
            bytes.extend_from_slice(&ary);
            self.alloc_bytes(&bytes) as u64
        } else {
            self.heap_string(s)
        }
    }

    pub fn heap_string(&mut self, s: &[u8]) -> u64 {
        let ptr = self.alloc_bytes(s) as u64;
        self.rvalue(T_STRING | RSTRING_NOEMBED, 0, &[s.len() as u64, ptr, s.len() as u64])
    }

    pub fn array(&mut self, elements: &[u64]) -> u64 {
        if (elements.len() as u64) <= RARRAY_EMBED_LEN_MAX {
            let flags =
                T_ARRAY | RARRAY_EMBED_FLAG | ((elements.len() as u64) << RARRAY_EMBED_LEN_SHIFT);
            self.rvalue(flags, 0, elements)
        } else {
            self.heap_array(elements)
        }
    }

    pub fn heap_array(&mut self, elements: &[u64]) -> u64 {
        let ptr = self.alloc_words(elements) as u64;
        let len = elements.len() as u64;
        self.rvalue(T_ARRAY, 0, &[len, len, ptr])
    }

    pub fn float(&mut self, value: f64) -> u64 {
        self.rvalue(T_FLOAT, 0, &[value.to_bits()])
    }

    /// st_table in packed mode; returns the table address
    pub fn packed_table(&mut self, pairs: &[(u64, u64)]) -> usize {
        let mut entries = Vec::new();
        for (i, &(k, v)) in pairs.iter().enumerate() {
            entries.extend_from_slice(&[i as u64, k, v]);
        }
        let entries_ptr = if entries.is_empty() {
            0
        } else {
            self.alloc_words(&entries) as u64
        };
        let num_entries = ((pairs.len() as u64) << 1) | ST_TABLE_ENTRIES_PACKED_BIT;
        self.alloc_words(&[0, 0, num_entries, entries_ptr, pairs.len() as u64, 0])
    }

    /// st_table in big mode as Ruby 2.3 lays it out; returns the table address
    pub fn big_table(&mut self, pairs: &[(u64, u64)]) -> usize {
        self.big_table_with(&Layout::ruby_2_3().hash, pairs)
    }

    /// st_table in big mode, entries linked in insertion order on the list `layout` describes
    pub fn big_table_with(&mut self, layout: &HashLayout, pairs: &[(u64, u64)]) -> usize {
        let num_entries = (pairs.len() as u64) << 1;
        let table = self.alloc_words(&[0, 0, num_entries, 0, 0, 0]);
        // hash, key, record, next (bin chain), then the list links
        let entries: Vec<usize> = pairs
            .iter()
            .map(|_| self.alloc_words(&[0; 6]))
            .collect();
        let head = table + layout.big_head;
        let end = if layout.list_circular { head as u64 } else { 0 };
        let node = |i: usize| (entries[i] + layout.entry_list_node) as u64;
        let link = layout.entry_list_next / 8;

        for (i, &(k, v)) in pairs.iter().enumerate() {
            let mut words = vec![i as u64, k, v, 0, 0, 0];
            words[link] = if i + 1 < entries.len() { node(i + 1) } else { end };
            words[link + 1] = if i > 0 { node(i - 1) } else { end };
            self.write_words(entries[i], &words);
        }
        let mut words = vec![0, 0, num_entries, 0, 0, 0];
        let head_slot = layout.big_head / 8;
        words[head_slot] = if entries.is_empty() { end } else { node(0) };
        words[head_slot + 1] = match entries.len() {
            0 => end,
            n => node(n - 1),
        };
        self.write_words(table, &words);
        table
    }

    /// A Ruby 2.3 big st_table whose two entries link to each other and never get back to the
    /// table's list head
    pub fn looping_big_table(&mut self) -> usize {
        let hash = Layout::ruby_2_3().hash;
        let table = self.alloc_words(&[0, 0, 2 << 1, 0, 0, 0]);
        let first = self.alloc_words(&[0; 6]);
        let second = self.alloc_words(&[0; 6]);
        let node = |entry: usize| (entry + hash.entry_list_node) as u64;
        self.write_words(first, &[0, int(1), int(2), 0, node(second), node(second)]);
        self.write_words(second, &[0, int(3), int(4), 0, node(first), node(first)]);
        self.write_words(table, &[0, 0, 2 << 1, 0, node(first), node(second)]);
        table
    }

    /// Overwrites an existing allocation
    pub fn write_words(&mut self, addr: usize, words: &[u64]) {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_ne_bytes()).collect();
        self.image.insert(addr, &bytes);
    }

    pub fn hash_with_table(&mut self, table: usize) -> u64 {
        self.rvalue(T_HASH, 0, &[table as u64, 0, Qnil])
    }

    pub fn packed_hash(&mut self, pairs: &[(u64, u64)]) -> u64 {
        let table = self.packed_table(pairs);
        self.hash_with_table(table)
    }

    pub fn big_hash(&mut self, pairs: &[(u64, u64)]) -> u64 {
        let table = self.big_table(pairs);
        self.hash_with_table(table)
    }

    /// A class whose ivar index table maps symbol ids to slot indices
    pub fn class(&mut self, ivar_index: &[(u64, u64)]) -> u64 {
        self.class_with_tables(T_CLASS, ivar_index, &[], 0)
    }

    pub fn class_with_tables(
        &mut self,
        type_tag: u64,
        ivar_index: &[(u64, u64)],
        class_vars: &[(u64, u64)],
        superclass: u64,
    ) -> u64 {
        let iv_index_tbl = self.packed_table(ivar_index) as u64;
        let iv_tbl = if class_vars.is_empty() {
            0
        } else {
            self.packed_table(class_vars) as u64
        };
        let ext = self.alloc_words(&[iv_index_tbl, iv_tbl, 0, 0]) as u64;
        self.rvalue(type_tag, 0, &[superclass, ext, 0])
    }

    pub fn singleton_class(&mut self, superclass: u64) -> u64 {
        let ext = self.alloc_words(&[0, 0, 0, 0]) as u64;
        self.rvalue(T_CLASS | FL_SINGLETON, 0, &[superclass, ext, 0])
    }

    pub fn object(&mut self, klass: u64, slots: &[u64]) -> u64 {
        if (slots.len() as u64) <= ROBJECT_EMBED_LEN_MAX {
            let mut ary = slots.to_vec();
            ary.resize(ROBJECT_EMBED_LEN_MAX as usize, Qundef);
            self.rvalue(T_OBJECT | ROBJECT_EMBED, klass, &ary)
        } else {
            self.heap_object(klass, slots)
        }
    }

    pub fn heap_object(&mut self, klass: u64, slots: &[u64]) -> u64 {
        let ivptr = self.alloc_words(slots) as u64;
        self.rvalue(T_OBJECT, klass, &[slots.len() as u64, ivptr, 0])
    }

    /// Builds `global_symbols` for the given (serial, name) pairs; returns its address
    pub fn symbol_table(&mut self, names: &[(u64, &str)]) -> usize {
        let last_id = names.iter().map(|&(serial, _)| serial).max().unwrap_or(0);
        let page_count = (last_id / ID_ENTRY_UNIT + 1) as usize;
        let page_len = (ID_ENTRY_UNIT * ID_ENTRY_SIZE) as usize;
        let mut pages = vec![vec![Qnil; page_len]; page_count];
        for &(serial, name) in names {
            let s = self.string(name.as_bytes());
            let pos = ((serial % ID_ENTRY_UNIT) * ID_ENTRY_SIZE) as usize;
            let page = &mut pages[(serial / ID_ENTRY_UNIT) as usize];
            page[pos + ID_ENTRY_STR as usize] = s;
            page[pos + 1] = sym(serial);
        }
        let page_values: Vec<u64> = pages.iter().map(|p| self.heap_array(p)).collect();
        let ids = self.heap_array(&page_values);
        self.alloc_words(&[last_id, 0, ids, Qnil])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_rejects_reads_across_regions() {
        let mut image = MemoryImage::new();
        image.insert(0x1000, &[1, 2, 3, 4]);
        let mut buf = [0u8; 4];
        assert!(image.read(0x1000, &mut buf).is_ok());
        assert_eq!(buf, [1, 2, 3, 4]);
        assert!(image.read(0x1002, &mut buf).is_err());
        assert!(image.read(0x0ff0, &mut buf).is_err());
    }

    #[test]
    fn test_image_poison() {
        let mut image = MemoryImage::new();
        image.insert(0x1000, &[0; 16]);
        image.poison(0x1008, 8);
        let mut buf = [0u8; 8];
        assert!(image.read(0x1000, &mut buf).is_ok());
        assert!(image.read(0x1008, &mut buf).is_err());
    }
}
