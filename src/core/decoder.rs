/*
 * Turns a raw VALUE word into a `RubyValue` tree.
 *
 * Immediates are decoded from the word alone. Heap references are read through `Reader`, and
 * every container recurses into its children. A read failure is contained at the smallest
 * enclosing aggregate: an array element becomes `Unreadable`, a hash pair or an instance
 * variable is dropped, and the rest of the container carries on.
 */
use std::collections::HashSet;

use crate::core::hash::st_entries;
use crate::core::layout::Layout;
use crate::core::memory::{field_address, Reader};
use crate::core::object::{
    class_ext_table, class_real, read_float, read_string, ArrayView, HeapType, ObjectSlots,
    RBasic,
};
use crate::core::symbols::{dynamic_symbol_name, SymbolTable};
use crate::core::types::{ClassKind, DecodeError, ProcessMemory, RubyValue};
use crate::core::value::{classify, Tagged};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// How many containers deep to recurse before rendering `<depth limit>`
    pub max_depth: usize,
    /// Bound on array elements and hash table entries read per container
    pub max_elements: usize,
    pub max_string_len: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            max_depth: 16,
            max_elements: 10_000,
            max_string_len: 4096,
        }
    }
}

pub struct Decoder<'a, M: ProcessMemory> {
    reader: Reader<'a, M>,
    layout: &'a Layout,
    options: DecodeOptions,
    symbols: Option<SymbolTable>,
}

type Path = HashSet<usize>;

impl<'a, M: ProcessMemory> Decoder<'a, M> {
    pub fn new(reader: Reader<'a, M>, layout: &'a Layout, options: DecodeOptions) -> Self {
        Decoder {
            reader,
            layout,
            options,
            symbols: None,
        }
    }

    /// Resolve symbol names through `global_symbols` at `address`. Without one, every static
    /// symbol is unresolved.
    pub fn with_symbol_table(mut self, address: usize) -> Self {
        self.symbols = Some(SymbolTable::new(address));
        self
    }

    pub fn decode(&self, word: u64) -> RubyValue {
        let mut path = Path::new();
        self.decode_value(word, 0, &mut path)
    }

    /// Name for a symbol id, or `None` when it can't be resolved
    pub fn symbol_name(&self, id: u64) -> Option<String> {
        let table = self.symbols.as_ref()?;
        match table.resolve(
            &self.reader,
            self.layout,
            id,
            self.options.max_string_len,
        ) {
            Ok(name) => Some(name),
            Err(e) => {
                debug!("{}", e);
                None
            }
        }
    }

    fn decode_value(&self, word: u64, depth: usize, path: &mut Path) -> RubyValue {
        match classify(word, &self.layout.immediates) {
            Tagged::Nil => RubyValue::Nil,
            Tagged::True => RubyValue::True,
            Tagged::False => RubyValue::False,
            Tagged::Undef => RubyValue::Undef,
            Tagged::Symbol(id) => RubyValue::Symbol(self.symbol_name(id)),
            Tagged::Fixnum(n) => RubyValue::Integer(n),
            Tagged::Flonum(x) => RubyValue::Float(x),
            Tagged::Heap(address) => {
                if path.contains(&address) {
                    return RubyValue::Cyclic(address);
                }
                path.insert(address);
                let value = match self.decode_heap(address, depth, path) {
                    Ok(value) => value,
                    Err(DecodeError::UnknownTypeTag { tag, address }) => {
                        RubyValue::Unknown {
                            type_tag: tag,
                            address,
                        }
                    }
                    Err(e) => {
                        debug!("Couldn't decode object at {:#x}: {}", address, e);
                        RubyValue::Unreadable(address)
                    }
                };
                path.remove(&address);
                value
            }
        }
    }

    fn decode_heap(
        &self,
        address: usize,
        depth: usize,
        path: &mut Path,
    ) -> Result<RubyValue, DecodeError> {
        let basic = RBasic::read(&self.reader, self.layout, address)?;
        let heap_type = basic.heap_type(self.layout);
        let is_container = matches!(
            heap_type,
            HeapType::Array | HeapType::Hash | HeapType::Object | HeapType::Class | HeapType::Module
        );
        if is_container && depth >= self.options.max_depth {
            return Ok(RubyValue::DepthLimit);
        }
        match heap_type {
            HeapType::String => Ok(RubyValue::String(read_string(
                &self.reader,
                self.layout,
                &basic,
                self.options.max_string_len,
            )?)),
            HeapType::Float => Ok(RubyValue::Float(read_float(
                &self.reader,
                self.layout,
                &basic,
            )?)),
            HeapType::Symbol => Ok(RubyValue::Symbol(
                dynamic_symbol_name(
                    &self.reader,
                    self.layout,
                    &basic,
                    self.options.max_string_len,
                )
                .ok(),
            )),
            HeapType::Array => self.decode_array(&basic, depth, path),
            HeapType::Hash => self.decode_hash(&basic, depth, path),
            HeapType::Object => self.decode_object(&basic, depth, path),
            HeapType::Class => self.decode_class(&basic, ClassKind::Class, depth, path),
            HeapType::Module => self.decode_class(&basic, ClassKind::Module, depth, path),
            _ => Err(DecodeError::UnknownTypeTag {
                tag: basic.type_tag(self.layout),
                address,
            }),
        }
    }

    fn decode_array(
        &self,
        basic: &RBasic,
        depth: usize,
        path: &mut Path,
    ) -> Result<RubyValue, DecodeError> {
        let view = ArrayView::read(&self.reader, self.layout, basic)?;
        if view.len > self.options.max_elements {
            warn!(
                "Array at {:#x} has {} elements, only decoding the first {}",
                basic.address, view.len, self.options.max_elements
            );
        }
        let len = view.len.min(self.options.max_elements) as i64;
        let mut elements = Vec::with_capacity(len as usize);
        for i in 0..len {
            let element = match view.entry(&self.reader, i) {
                Some(Ok(word)) => self.decode_value(word, depth + 1, path),
                Some(Err(e)) => {
                    debug!("Skipping element {} of array at {:#x}: {}", i, basic.address, e);
                    RubyValue::Unreadable(view.slot_address(i).and_then(Result::ok).unwrap_or(0))
                }
                None => break,
            };
            elements.push(element);
        }
        Ok(RubyValue::Array(elements))
    }

    fn decode_hash(
        &self,
        basic: &RBasic,
        depth: usize,
        path: &mut Path,
    ) -> Result<RubyValue, DecodeError> {
        let table = self.reader.read_pointer(field_address(
            basic.address,
            self.layout.hash.rhash_ntbl,
        )?)?;
        let mut pairs = Vec::new();
        for (k, v) in self.table_entries(table) {
            let key = self.decode_value(k, depth + 1, path);
            let value = self.decode_value(v, depth + 1, path);
            pairs.push((key, value));
        }
        Ok(RubyValue::Hash(pairs))
    }

    fn decode_object(
        &self,
        basic: &RBasic,
        depth: usize,
        path: &mut Path,
    ) -> Result<RubyValue, DecodeError> {
        let slots = ObjectSlots::read(&self.reader, self.layout, basic)?;
        let class = class_real(&self.reader, self.layout, basic.klass)?;
        let index_table = if class == 0 {
            0
        } else {
            class_ext_table(
                &self.reader,
                self.layout,
                class,
                self.layout.class.ext_iv_index_tbl,
            )?
        };
        let mut ivars = Vec::new();
        for (id, index) in self.table_entries(index_table) {
            let value = match slots.slot(&self.reader, index as usize) {
                Some(Ok(value)) => value,
                Some(Err(e)) => {
                    debug!("Skipping ivar {} of object at {:#x}: {}", index, basic.address, e);
                    continue;
                }
                // index past numiv: the ivar was never set on this object
                None => continue,
            };
            if value == self.layout.immediates.qundef {
                continue;
            }
            let name = self.symbol_name(id).unwrap_or_default();
            ivars.push((name, self.decode_value(value, depth + 1, path)));
        }
        Ok(RubyValue::Object { class, ivars })
    }

    fn decode_class(
        &self,
        basic: &RBasic,
        kind: ClassKind,
        depth: usize,
        path: &mut Path,
    ) -> Result<RubyValue, DecodeError> {
        let layout = &self.layout.class;
        let iv_tbl = class_ext_table(&self.reader, self.layout, basic.address, layout.ext_iv_tbl)?;
        let mut class_vars = Vec::new();
        for (id, value) in self.table_entries(iv_tbl) {
            let name = self.symbol_name(id).unwrap_or_default();
            class_vars.push((name, self.decode_value(value, depth + 1, path)));
        }

        let mut constants = Vec::new();
        if let Some(field) = layout.ext_const_tbl {
            let const_tbl = class_ext_table(&self.reader, self.layout, basic.address, field)?;
            for (id, entry) in self.table_entries(const_tbl) {
                let value = match field_address(entry as usize, layout.const_entry_value)
                    .and_then(|addr| self.reader.read_word(addr))
                {
                    Ok(value) => value,
                    Err(e) => {
                        debug!("Skipping constant of class at {:#x}: {}", basic.address, e);
                        continue;
                    }
                };
                let name = self.symbol_name(id).unwrap_or_default();
                constants.push((name, self.decode_value(value, depth + 1, path)));
            }
        }

        Ok(RubyValue::Class {
            kind,
            address: basic.address,
            class_vars,
            constants,
        })
    }

    // The readable entries of an st_table. Unreadable pairs are skipped, and a table that can't
    // be walked at all is treated as empty.
    fn table_entries(&self, table: usize) -> Vec<(u64, u64)> {
        match st_entries(
            &self.reader,
            &self.layout.hash,
            table,
            self.options.max_elements,
        ) {
            Ok(entries) => entries
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(pair) => Some(pair),
                    Err(e) => {
                        debug!("Skipping entry of st_table at {:#x}: {}", table, e);
                        None
                    }
                })
                .collect(),
            Err(e) => {
                warn!("{}", e);
                Vec::new()
            }
        }
    }
}
