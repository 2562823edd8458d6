/*
 * Views over boxed Ruby objects. Each view is read fresh from the process on every call: the
 * inspected heap can move between reads, so nothing here is cached.
 */
use crate::core::layout::{Layout, TypeTags};
use crate::core::memory::{element_address, field_address, Reader};
use crate::core::types::{MemoryCopyError, ProcessMemory};

// Bound on singleton/iclass hops when looking up an object's real class
const MAX_CLASS_CHAIN: usize = 64;

/// The header every heap object starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RBasic {
    pub address: usize,
    pub flags: u64,
    pub klass: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapType {
    Object,
    Class,
    Module,
    Float,
    String,
    Regexp,
    Array,
    Hash,
    Struct,
    Symbol,
    IClass,
    Other(u64),
}

impl HeapType {
    pub fn from_tag(tag: u64, types: &TypeTags) -> HeapType {
        match tag {
            t if t == types.object => HeapType::Object,
            t if t == types.class => HeapType::Class,
            t if t == types.module => HeapType::Module,
            t if t == types.float => HeapType::Float,
            t if t == types.string => HeapType::String,
            t if t == types.regexp => HeapType::Regexp,
            t if t == types.array => HeapType::Array,
            t if t == types.hash => HeapType::Hash,
            t if t == types.struct_ => HeapType::Struct,
            t if t == types.symbol => HeapType::Symbol,
            t if t == types.iclass => HeapType::IClass,
            t => HeapType::Other(t),
        }
    }
}

impl RBasic {
    pub fn read<M: ProcessMemory>(
        reader: &Reader<M>,
        layout: &Layout,
        address: usize,
    ) -> Result<RBasic, MemoryCopyError> {
        let flags = reader.read_word(field_address(address, layout.basic.flags)?)?;
        let klass = reader.read_pointer(field_address(address, layout.basic.klass)?)?;
        Ok(RBasic {
            address,
            flags,
            klass,
        })
    }

    pub fn type_tag(&self, layout: &Layout) -> u64 {
        self.flags & layout.types.mask
    }

    pub fn heap_type(&self, layout: &Layout) -> HeapType {
        HeapType::from_tag(self.type_tag(layout), &layout.types)
    }

    pub fn has_flag(&self, flag: u64) -> bool {
        self.flags & flag != 0
    }
}

/// Reads the bytes of a T_STRING, at most `max_len` of them
pub fn read_string<M: ProcessMemory>(
    reader: &Reader<M>,
    layout: &Layout,
    basic: &RBasic,
    max_len: usize,
) -> Result<Vec<u8>, MemoryCopyError> {
    let s = &layout.string;
    let (ptr, len) = if basic.has_flag(s.noembed_flag) {
        let len = reader.read_word(field_address(basic.address, s.heap_len)?)? as usize;
        let ptr = reader.read_pointer(field_address(basic.address, s.heap_ptr)?)?;
        (ptr, len)
    } else {
        let len = (basic.flags >> s.embed_len_shift) & s.embed_len_mask;
        (
            field_address(basic.address, s.ary)?,
            len.min(s.embed_len_max) as usize,
        )
    };
    if len > max_len {
        debug!(
            "Truncating string at {:#x} from {} to {} bytes",
            basic.address, len, max_len
        );
    }
    reader.read_bytes(ptr, len.min(max_len))
}

pub fn read_float<M: ProcessMemory>(
    reader: &Reader<M>,
    layout: &Layout,
    basic: &RBasic,
) -> Result<f64, MemoryCopyError> {
    reader.read_f64(field_address(basic.address, layout.basic.float_value)?)
}

/// Where the elements of a T_ARRAY live and how many there are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayView {
    pub address: usize,
    pub len: usize,
    ptr: usize,
}

impl ArrayView {
    pub fn read<M: ProcessMemory>(
        reader: &Reader<M>,
        layout: &Layout,
        basic: &RBasic,
    ) -> Result<ArrayView, MemoryCopyError> {
        let a = &layout.array;
        let (ptr, len) = if basic.has_flag(a.embed_flag) {
            let len = (basic.flags >> a.embed_len_shift) & a.embed_len_mask;
            (
                field_address(basic.address, a.ary)?,
                len.min(a.embed_len_max) as usize,
            )
        } else {
            let len = reader.read_word(field_address(basic.address, a.heap_len)?)? as usize;
            let ptr = reader.read_pointer(field_address(basic.address, a.heap_ptr)?)?;
            (ptr, len)
        };
        Ok(ArrayView {
            address: basic.address,
            len,
            ptr,
        })
    }

    /// Address of the slot holding element `index`. Negative indices count back from the end;
    /// anything out of range is `None`. A slot past the end of the address space is an
    /// `InvalidAddressError`.
    pub fn slot_address(&self, index: i64) -> Option<Result<usize, MemoryCopyError>> {
        let len = self.len as i64;
        let index = if index < 0 { index + len } else { index };
        if index < 0 || index >= len {
            return None;
        }
        Some(element_address(
            self.ptr,
            index as usize,
            std::mem::size_of::<u64>(),
        ))
    }

    pub fn entry<M: ProcessMemory>(
        &self,
        reader: &Reader<M>,
        index: i64,
    ) -> Option<Result<u64, MemoryCopyError>> {
        self.slot_address(index)
            .map(|addr| addr.and_then(|addr| reader.read_word(addr)))
    }
}

/// Instance variable slots of a T_OBJECT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectSlots {
    pub numiv: usize,
    ptr: usize,
}

impl ObjectSlots {
    pub fn read<M: ProcessMemory>(
        reader: &Reader<M>,
        layout: &Layout,
        basic: &RBasic,
    ) -> Result<ObjectSlots, MemoryCopyError> {
        let o = &layout.object;
        if basic.has_flag(o.embed_flag) {
            Ok(ObjectSlots {
                numiv: o.embed_len_max as usize,
                ptr: field_address(basic.address, o.ary)?,
            })
        } else {
            Ok(ObjectSlots {
                numiv: reader.read_word(field_address(basic.address, o.heap_numiv)?)? as usize,
                ptr: reader.read_pointer(field_address(basic.address, o.heap_ivptr)?)?,
            })
        }
    }

    pub fn slot<M: ProcessMemory>(
        &self,
        reader: &Reader<M>,
        index: usize,
    ) -> Option<Result<u64, MemoryCopyError>> {
        if index >= self.numiv {
            return None;
        }
        Some(
            element_address(self.ptr, index, std::mem::size_of::<u64>())
                .and_then(|addr| reader.read_word(addr)),
        )
    }
}

/// Follows `klass` past singleton classes and include wrappers to the class an object was
/// actually instantiated from
pub fn class_real<M: ProcessMemory>(
    reader: &Reader<M>,
    layout: &Layout,
    klass: usize,
) -> Result<usize, MemoryCopyError> {
    let mut class = klass;
    for _ in 0..MAX_CLASS_CHAIN {
        if class == 0 {
            return Ok(0);
        }
        let basic = RBasic::read(reader, layout, class)?;
        if !basic.has_flag(layout.basic.singleton_flag)
            && basic.heap_type(layout) != HeapType::IClass
        {
            return Ok(class);
        }
        class = reader.read_pointer(field_address(class, layout.class.superclass)?)?;
    }
    warn!("Class chain starting at {:#x} doesn't end", klass);
    Ok(0)
}

/// Reads a table pointer (`iv_index_tbl`, `iv_tbl`, ...) out of a class's `rb_classext_t`
pub fn class_ext_table<M: ProcessMemory>(
    reader: &Reader<M>,
    layout: &Layout,
    class: usize,
    field: usize,
) -> Result<usize, MemoryCopyError> {
    let ext = reader.read_pointer(field_address(class, layout.class.ext)?)?;
    if ext == 0 {
        return Ok(0);
    }
    reader.read_pointer(field_address(ext, field)?)
}
