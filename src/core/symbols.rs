use crate::core::layout::Layout;
use crate::core::memory::{field_address, Reader};
use crate::core::object::{read_string, ArrayView, HeapType, RBasic};
use crate::core::types::{DecodeError, MemoryCopyError, ProcessMemory};

/// Ruby's `global_symbols`, the paged table mapping symbol serial numbers to their names.
///
/// `ids` is an Array of pages; each page is an Array holding `entry_size` VALUEs per symbol, one
/// of which (`entry_str`) is the name String.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTable {
    pub address: usize,
}

impl SymbolTable {
    pub fn new(address: usize) -> SymbolTable {
        SymbolTable { address }
    }

    /// Operator ids are their own serial number; every other id carries its scope in the low bits
    pub fn id_to_serial(id: u64, layout: &Layout) -> u64 {
        if id > layout.symbols.last_op_id {
            id >> layout.symbols.scope_shift
        } else {
            id
        }
    }

    pub fn resolve<M: ProcessMemory>(
        &self,
        reader: &Reader<M>,
        layout: &Layout,
        id: u64,
        max_len: usize,
    ) -> Result<String, DecodeError> {
        let s = &layout.symbols;
        let serial = SymbolTable::id_to_serial(id, layout);
        let last_id = reader.read_word(field_address(self.address, s.last_id)?)?;
        if serial == 0 || serial > last_id || s.entry_unit == 0 {
            return Err(DecodeError::UnresolvedSymbol(id));
        }

        let ids = reader.read_word(field_address(self.address, s.ids)?)?;
        let page = array_entry(reader, layout, ids, (serial / s.entry_unit) as i64)
            .ok_or(DecodeError::UnresolvedSymbol(id))??;
        let index = (serial % s.entry_unit) * s.entry_size + s.entry_str;
        let name = array_entry(reader, layout, page, index as i64)
            .ok_or(DecodeError::UnresolvedSymbol(id))??;
        if is_null(name, layout) {
            return Err(DecodeError::UnresolvedSymbol(id));
        }

        let basic = RBasic::read(reader, layout, name as usize)?;
        if basic.heap_type(layout) != HeapType::String {
            return Err(DecodeError::UnresolvedSymbol(id));
        }
        let bytes = read_string(reader, layout, &basic, max_len)?;
        Ok(String::from_utf8(bytes).map_err(MemoryCopyError::InvalidStringError)?)
    }
}

/// Name of a dynamic (heap allocated) symbol, stored in its `fstr` String
pub fn dynamic_symbol_name<M: ProcessMemory>(
    reader: &Reader<M>,
    layout: &Layout,
    basic: &RBasic,
    max_len: usize,
) -> Result<String, DecodeError> {
    let fstr = reader.read_pointer(field_address(basic.address, layout.basic.symbol_fstr)?)?;
    if is_null(fstr as u64, layout) {
        return Err(DecodeError::UnresolvedSymbol(basic.address as u64));
    }
    let fstr = RBasic::read(reader, layout, fstr)?;
    let bytes = read_string(reader, layout, &fstr, max_len)?;
    Ok(String::from_utf8(bytes).map_err(MemoryCopyError::InvalidStringError)?)
}

fn is_null(value: u64, layout: &Layout) -> bool {
    value == 0 || value == layout.immediates.qnil
}

// Reads element `index` of the Array `value`. `None` when `value` isn't an array or the index is
// out of range.
fn array_entry<M: ProcessMemory>(
    reader: &Reader<M>,
    layout: &Layout,
    value: u64,
    index: i64,
) -> Option<Result<u64, MemoryCopyError>> {
    if is_null(value, layout) {
        return None;
    }
    let basic = match RBasic::read(reader, layout, value as usize) {
        Ok(basic) => basic,
        Err(e) => return Some(Err(e)),
    };
    if basic.heap_type(layout) != HeapType::Array {
        return None;
    }
    match ArrayView::read(reader, layout, &basic) {
        Ok(view) => view.entry(reader, index),
        Err(e) => Some(Err(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{id_for_serial, HeapBuilder};

    #[test]
    fn test_id_to_serial() {
        let layout = Layout::ruby_2_3();
        assert_eq!(SymbolTable::id_to_serial(0x2b, &layout), 0x2b);
        assert_eq!(SymbolTable::id_to_serial(0xa9, &layout), 0xa9);
        assert_eq!(SymbolTable::id_to_serial(0x3e01, &layout), 0x3e0);
    }

    #[test]
    fn test_resolve() {
        let layout = Layout::ruby_2_3();
        let mut heap = HeapBuilder::new();
        let addr = heap.symbol_table(&[(20, "foo"), (700, "bar"), (1100, "baz")]);
        let table = SymbolTable::new(addr);
        let reader = Reader::new(&heap.image);
        let resolve = |serial| table.resolve(&reader, &layout, id_for_serial(serial), 256);
        assert_eq!(resolve(20).unwrap(), "foo");
        assert_eq!(resolve(700).unwrap(), "bar");
        assert_eq!(resolve(1100).unwrap(), "baz");
    }

    #[test]
    fn test_unresolved_symbols() {
        let layout = Layout::ruby_2_3();
        let mut heap = HeapBuilder::new();
        let addr = heap.symbol_table(&[(20, "foo")]);
        let table = SymbolTable::new(addr);
        let reader = Reader::new(&heap.image);
        for serial in [0, 19, 21, 5000] {
            match table.resolve(&reader, &layout, id_for_serial(serial), 256) {
                Err(DecodeError::UnresolvedSymbol(id)) => assert_eq!(id, id_for_serial(serial)),
                other => panic!("serial {} resolved to {:?}", serial, other),
            }
        }
    }

    #[test]
    fn test_entry_stride_is_configurable() {
        let mut layout = Layout::ruby_2_3();
        let mut heap = HeapBuilder::new();
        let addr = heap.symbol_table(&[(20, "foo"), (40, "bar")]);
        let reader = Reader::new(&heap.image);
        let table = SymbolTable::new(addr);
        assert_eq!(table.resolve(&reader, &layout, id_for_serial(40), 256).unwrap(), "bar");
        // with one VALUE per entry, serial 40 lands on the name slot written for serial 20
        layout.symbols.entry_size = 1;
        assert_eq!(table.resolve(&reader, &layout, id_for_serial(40), 256).unwrap(), "foo");
    }
}
