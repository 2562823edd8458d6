//! Struct offsets, flag bits and type tags for the internal structures of MRI Ruby.
//!
//! One module per supported Ruby version (`ruby_2_2_0`, `ruby_2_3_0`). All offsets are for
//! 64-bit builds with flonum support, which is what every mainstream Ruby package ships.
#![allow(non_upper_case_globals)]

macro_rules! ruby_2_x_common(
    () => (
        // special constants, include/ruby/ruby.h
        pub const Qfalse: u64 = 0x00;
        pub const Qtrue: u64 = 0x14;
        pub const Qnil: u64 = 0x08;
        pub const Qundef: u64 = 0x34;
        pub const FIXNUM_FLAG: u64 = 0x01;
        pub const FLONUM_MASK: u64 = 0x03;
        pub const FLONUM_FLAG: u64 = 0x02;
        pub const SYMBOL_FLAG: u64 = 0x0c;
        pub const SPECIAL_SHIFT: u32 = 8;

        // enum ruby_value_type
        pub const T_MASK: u64 = 0x1f;
        pub const T_OBJECT: u64 = 0x01;
        pub const T_CLASS: u64 = 0x02;
        pub const T_MODULE: u64 = 0x03;
        pub const T_FLOAT: u64 = 0x04;
        pub const T_STRING: u64 = 0x05;
        pub const T_REGEXP: u64 = 0x06;
        pub const T_ARRAY: u64 = 0x07;
        pub const T_HASH: u64 = 0x08;
        pub const T_STRUCT: u64 = 0x09;
        pub const T_SYMBOL: u64 = 0x14;
        pub const T_ICLASS: u64 = 0x1c;

        pub const FL_USHIFT: u32 = 12;
        pub const FL_SINGLETON: u64 = 1 << FL_USHIFT;

        pub const RSTRING_NOEMBED: u64 = 1 << (FL_USHIFT + 1);
        pub const RSTRING_EMBED_LEN_SHIFT: u32 = FL_USHIFT + 2;
        pub const RSTRING_EMBED_LEN_MASK: u64 = 0x1f;
        pub const RSTRING_EMBED_LEN_MAX: u64 = 23;

        pub const RARRAY_EMBED_FLAG: u64 = 1 << (FL_USHIFT + 1);
        pub const RARRAY_EMBED_LEN_SHIFT: u32 = FL_USHIFT + 3;
        pub const RARRAY_EMBED_LEN_MASK: u64 = 0x03;
        pub const RARRAY_EMBED_LEN_MAX: u64 = 3;

        pub const ROBJECT_EMBED: u64 = 1 << (FL_USHIFT + 1);
        pub const ROBJECT_EMBED_LEN_MAX: u64 = 3;

        pub const RBASIC_FLAGS: usize = 0; // struct RBasic, field "flags"
        pub const RBASIC_KLASS: usize = 8; // struct RBasic, field "klass"

        pub const RSTRING_AS_HEAP_LEN: usize = 16; // struct RString, subfield "as.heap.len"
        pub const RSTRING_AS_HEAP_PTR: usize = 24; // struct RString, subfield "as.heap.ptr"
        pub const RSTRING_AS_ARY: usize = 16; // struct RString, subfield "as.ary"

        pub const RARRAY_AS_HEAP_LEN: usize = 16; // struct RArray, subfield "as.heap.len"
        pub const RARRAY_AS_HEAP_AUX_CAPA: usize = 24; // struct RArray, subfield "as.heap.aux.capa"
        pub const RARRAY_AS_HEAP_PTR: usize = 32; // struct RArray, subfield "as.heap.ptr"
        pub const RARRAY_AS_ARY: usize = 16; // struct RArray, subfield "as.ary"

        pub const ROBJECT_AS_HEAP_NUMIV: usize = 16; // struct RObject, subfield "as.heap.numiv"
        pub const ROBJECT_AS_HEAP_IVPTR: usize = 24; // struct RObject, subfield "as.heap.ivptr"
        pub const ROBJECT_AS_ARY: usize = 16; // struct RObject, subfield "as.ary"

        pub const RFLOAT_FLOAT_VALUE: usize = 16; // struct RFloat, field "float_value"
        pub const RHASH_NTBL: usize = 16; // struct RHash, field "ntbl"
        pub const RSYMBOL_FSTR: usize = 16; // struct RSymbol, field "fstr"

        pub const RCLASS_SUPER: usize = 16; // struct RClass, field "super"
        pub const RCLASS_PTR: usize = 24; // struct RClass, field "ptr" (rb_classext_t *)
        pub const CLASSEXT_IV_INDEX_TBL: usize = 0; // rb_classext_t, field "iv_index_tbl"
        pub const CLASSEXT_IV_TBL: usize = 8; // rb_classext_t, field "iv_tbl"
        pub const CONST_ENTRY_VALUE: usize = 8; // rb_const_entry_t, field "value"

        // struct st_table. entries_packed is bit 0 of the word holding num_entries
        pub const ST_TABLE_NUM_ENTRIES: usize = 16;
        pub const ST_TABLE_ENTRIES_PACKED_BIT: u64 = 1;
        pub const ST_TABLE_AS_BIG_HEAD: usize = 32; // as.big.head (2.2), as.big.private_list_head (2.3)
        pub const ST_TABLE_AS_PACKED_ENTRIES: usize = 24;
        pub const ST_TABLE_AS_PACKED_REAL_ENTRIES: usize = 32;

        pub const ST_TABLE_ENTRY_KEY: usize = 8;
        pub const ST_TABLE_ENTRY_RECORD: usize = 16;

        pub const ST_PACKED_ENTRY_SIZE: usize = 24;
        pub const ST_PACKED_ENTRY_KEY: usize = 8;
        pub const ST_PACKED_ENTRY_VAL: usize = 16;

        // static struct symbols global_symbols, symbol.c
        pub const GLOBAL_SYMBOLS_LAST_ID: usize = 0;
        pub const GLOBAL_SYMBOLS_IDS: usize = 16;
        pub const ID_ENTRY_UNIT: u64 = 512;
        pub const ID_ENTRY_SIZE: u64 = 2;
        pub const ID_ENTRY_STR: u64 = 0;
        pub const ID_SCOPE_SHIFT: u32 = 4;

        // struct iseq_line_info_entry
        pub const LINE_INFO_ENTRY_SIZE: usize = 8;
        pub const LINE_INFO_ENTRY_POSITION: usize = 0;
        pub const LINE_INFO_ENTRY_LINE_NO: usize = 4;
        )
    );

pub mod ruby_2_2_0 {
    ruby_2_x_common!();

    pub const tLAST_OP_ID: u64 = 0xa9;
    pub const CLASSEXT_CONST_TBL: Option<usize> = Some(16); // rb_classext_t, field "const_tbl"

    // Big tables thread their entries on a NULL terminated list: head points at the first
    // st_table_entry and each entry's "fore" at the next one.
    pub const ST_TABLE_ENTRY_LIST_NODE: usize = 0;
    pub const ST_TABLE_ENTRY_LIST_NEXT: usize = 32; // struct st_table_entry, field "fore"
    pub const ST_TABLE_LIST_CIRCULAR: bool = false;
}

pub mod ruby_2_3_0 {
    ruby_2_x_common!();

    pub const tLAST_OP_ID: u64 = 0xa9;
    pub const CLASSEXT_CONST_TBL: Option<usize> = Some(16); // rb_classext_t, field "const_tbl"

    // Big tables use a circular ccan list: the head and every link point at the "olist" node
    // inside an entry, and the list ends back at the table's own list head.
    pub const ST_TABLE_ENTRY_LIST_NODE: usize = 32; // struct st_table_entry, field "olist"
    pub const ST_TABLE_ENTRY_LIST_NEXT: usize = 32; // struct st_table_entry, subfield "olist.next"
    pub const ST_TABLE_LIST_CIRCULAR: bool = true;
}
