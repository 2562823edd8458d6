/*
 * Version specific layout of Ruby's object model.
 *
 * Every offset, flag bit and tag the decoder needs lives in a `Layout`, which is resolved once
 * (from a Ruby version, optionally with overrides from a JSON file) and then passed by reference
 * into the decoder. Nothing in the decoder hard-codes these numbers because they move around
 * between Ruby versions.
 */
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Couldn't parse Ruby version {:?}: {}", _0, _1)]
    BadVersion(String, semver::Error),
    #[error("Ruby {} isn't supported. Supported versions are 2.2.x and 2.3.x; pass --layout to describe other versions", _0)]
    UnsupportedVersion(String),
    #[error("Invalid layout file: {}", _0)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub immediates: Immediates,
    pub types: TypeTags,
    pub basic: BasicLayout,
    pub string: StringLayout,
    pub array: ArrayLayout,
    pub object: ObjectLayout,
    pub class: ClassLayout,
    pub hash: HashLayout,
    pub symbols: SymbolLayout,
    pub line_info: LineInfoLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Immediates {
    pub qfalse: u64,
    pub qtrue: u64,
    pub qnil: u64,
    pub qundef: u64,
    pub fixnum_flag: u64,
    pub flonum_mask: u64,
    pub flonum_flag: u64,
    pub symbol_flag: u64,
    pub special_shift: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTags {
    pub mask: u64,
    pub object: u64,
    pub class: u64,
    pub module: u64,
    pub float: u64,
    pub string: u64,
    pub regexp: u64,
    pub array: u64,
    pub hash: u64,
    #[serde(rename = "struct")]
    pub struct_: u64,
    pub symbol: u64,
    pub iclass: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicLayout {
    pub flags: usize,
    pub klass: usize,
    pub singleton_flag: u64,
    pub float_value: usize,
    pub symbol_fstr: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringLayout {
    pub noembed_flag: u64,
    pub embed_len_shift: u32,
    pub embed_len_mask: u64,
    pub embed_len_max: u64,
    pub heap_len: usize,
    pub heap_ptr: usize,
    pub ary: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayLayout {
    pub embed_flag: u64,
    pub embed_len_shift: u32,
    pub embed_len_mask: u64,
    pub embed_len_max: u64,
    pub heap_len: usize,
    pub heap_capa: usize,
    pub heap_ptr: usize,
    pub ary: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLayout {
    pub embed_flag: u64,
    pub embed_len_max: u64,
    pub heap_numiv: usize,
    pub heap_ivptr: usize,
    pub ary: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLayout {
    pub superclass: usize,
    pub ext: usize,
    pub ext_iv_index_tbl: usize,
    pub ext_iv_tbl: usize,
    /// `None` when the constant table isn't an `st_table` (it's an `rb_id_table` from 2.4 on)
    pub ext_const_tbl: Option<usize>,
    pub const_entry_value: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashLayout {
    pub rhash_ntbl: usize,
    pub num_entries: usize,
    pub entries_packed_bit: u64,
    pub big_head: usize,
    pub packed_entries: usize,
    pub packed_real_entries: usize,
    pub packed_entry_size: usize,
    pub packed_key: usize,
    pub packed_val: usize,
    pub entry_key: usize,
    pub entry_record: usize,
    /// Offset inside an entry that list links point at
    pub entry_list_node: usize,
    /// Offset inside an entry of the link to the next entry in insertion order
    pub entry_list_next: usize,
    /// The list ends back at the table's head rather than at NULL
    pub list_circular: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolLayout {
    pub last_id: usize,
    pub ids: usize,
    pub last_op_id: u64,
    pub scope_shift: u32,
    pub entry_unit: u64,
    pub entry_size: u64,
    pub entry_str: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInfoLayout {
    pub entry_size: usize,
    pub position: usize,
    pub line_no: usize,
}

macro_rules! layout_from_structs(
    ($ruby_version:ident) => (
        {
            use rbinspect_ruby_structs::$ruby_version::*;
            Layout {
                immediates: Immediates {
                    qfalse: Qfalse,
                    qtrue: Qtrue,
                    qnil: Qnil,
                    qundef: Qundef,
                    fixnum_flag: FIXNUM_FLAG,
                    flonum_mask: FLONUM_MASK,
                    flonum_flag: FLONUM_FLAG,
                    symbol_flag: SYMBOL_FLAG,
                    special_shift: SPECIAL_SHIFT,
                },
                types: TypeTags {
                    mask: T_MASK,
                    object: T_OBJECT,
                    class: T_CLASS,
                    module: T_MODULE,
                    float: T_FLOAT,
                    string: T_STRING,
                    regexp: T_REGEXP,
                    array: T_ARRAY,
                    hash: T_HASH,
                    struct_: T_STRUCT,
                    symbol: T_SYMBOL,
                    iclass: T_ICLASS,
                },
                basic: BasicLayout {
                    flags: RBASIC_FLAGS,
                    klass: RBASIC_KLASS,
                    singleton_flag: FL_SINGLETON,
                    float_value: RFLOAT_FLOAT_VALUE,
                    symbol_fstr: RSYMBOL_FSTR,
                },
                string: StringLayout {
                    noembed_flag: RSTRING_NOEMBED,
                    embed_len_shift: RSTRING_EMBED_LEN_SHIFT,
                    embed_len_mask: RSTRING_EMBED_LEN_MASK,
                    embed_len_max: RSTRING_EMBED_LEN_MAX,
                    heap_len: RSTRING_AS_HEAP_LEN,
                    heap_ptr: RSTRING_AS_HEAP_PTR,
                    ary: RSTRING_AS_ARY,
                },
                array: ArrayLayout {
                    embed_flag: RARRAY_EMBED_FLAG,
                    embed_len_shift: RARRAY_EMBED_LEN_SHIFT,
                    embed_len_mask: RARRAY_EMBED_LEN_MASK,
                    embed_len_max: RARRAY_EMBED_LEN_MAX,
                    heap_len: RARRAY_AS_HEAP_LEN,
                    heap_capa: RARRAY_AS_HEAP_AUX_CAPA,
                    heap_ptr: RARRAY_AS_HEAP_PTR,
                    ary: RARRAY_AS_ARY,
                },
                object: ObjectLayout {
                    embed_flag: ROBJECT_EMBED,
                    embed_len_max: ROBJECT_EMBED_LEN_MAX,
                    heap_numiv: ROBJECT_AS_HEAP_NUMIV,
                    heap_ivptr: ROBJECT_AS_HEAP_IVPTR,
                    ary: ROBJECT_AS_ARY,
                },
                class: ClassLayout {
                    superclass: RCLASS_SUPER,
                    ext: RCLASS_PTR,
                    ext_iv_index_tbl: CLASSEXT_IV_INDEX_TBL,
                    ext_iv_tbl: CLASSEXT_IV_TBL,
                    ext_const_tbl: CLASSEXT_CONST_TBL,
                    const_entry_value: CONST_ENTRY_VALUE,
                },
                hash: HashLayout {
                    rhash_ntbl: RHASH_NTBL,
                    num_entries: ST_TABLE_NUM_ENTRIES,
                    entries_packed_bit: ST_TABLE_ENTRIES_PACKED_BIT,
                    big_head: ST_TABLE_AS_BIG_HEAD,
                    packed_entries: ST_TABLE_AS_PACKED_ENTRIES,
                    packed_real_entries: ST_TABLE_AS_PACKED_REAL_ENTRIES,
                    packed_entry_size: ST_PACKED_ENTRY_SIZE,
                    packed_key: ST_PACKED_ENTRY_KEY,
                    packed_val: ST_PACKED_ENTRY_VAL,
                    entry_key: ST_TABLE_ENTRY_KEY,
                    entry_record: ST_TABLE_ENTRY_RECORD,
                    entry_list_node: ST_TABLE_ENTRY_LIST_NODE,
                    entry_list_next: ST_TABLE_ENTRY_LIST_NEXT,
                    list_circular: ST_TABLE_LIST_CIRCULAR,
                },
                symbols: SymbolLayout {
                    last_id: GLOBAL_SYMBOLS_LAST_ID,
                    ids: GLOBAL_SYMBOLS_IDS,
                    last_op_id: tLAST_OP_ID,
                    scope_shift: ID_SCOPE_SHIFT,
                    entry_unit: ID_ENTRY_UNIT,
                    entry_size: ID_ENTRY_SIZE,
                    entry_str: ID_ENTRY_STR,
                },
                line_info: LineInfoLayout {
                    entry_size: LINE_INFO_ENTRY_SIZE,
                    position: LINE_INFO_ENTRY_POSITION,
                    line_no: LINE_INFO_ENTRY_LINE_NO,
                },
            }
        }
    )
);

impl Layout {
    pub fn ruby_2_2() -> Layout {
        layout_from_structs!(ruby_2_2_0)
    }

    pub fn ruby_2_3() -> Layout {
        layout_from_structs!(ruby_2_3_0)
    }

    /// Picks the preset for a Ruby version string like "2.3.1"
    pub fn for_version(version: &str) -> Result<Layout, LayoutError> {
        let parsed = semver::Version::parse(version.trim())
            .map_err(|e| LayoutError::BadVersion(version.to_string(), e))?;
        match (parsed.major, parsed.minor) {
            (2, 2) => Ok(Layout::ruby_2_2()),
            (2, 3) => Ok(Layout::ruby_2_3()),
            _ => Err(LayoutError::UnsupportedVersion(version.to_string())),
        }
    }

    /// Applies a (possibly partial) JSON layout on top of `self`. Objects are merged key by key,
    /// so a file only needs to mention the fields that differ.
    pub fn with_overrides(&self, json: &str) -> Result<Layout, LayoutError> {
        let mut base = serde_json::to_value(self)?;
        let overrides: serde_json::Value = serde_json::from_str(json)?;
        merge_json(&mut base, overrides);
        Ok(serde_json::from_value(base)?)
    }
}

impl Default for Layout {
    fn default() -> Self {
        Layout::ruby_2_3()
    }
}

fn merge_json(base: &mut serde_json::Value, overrides: serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overrides) => *base = overrides,
    }
}
