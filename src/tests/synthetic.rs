//! Whole-file decodes over a hand-assembled minimal DEX buffer: one class
//! `LFoo;` implementing `LBar;`, with one instance field `x:I` and one
//! direct method `bar()V`.

use crate::dex_file::{
    adler32, AccessFlags, ClassDataItem, DecodeOptions, DexFile, Header, TypeList, ENDIAN_CONSTANT,
    HEADER_SIZE, NO_INDEX,
};
use crate::error::DexError;
use crate::map_list;

struct Builder {
    bytes: Vec<u8>,
}

impl Builder {
    fn new() -> Builder {
        Builder {
            bytes: vec![0u8; HEADER_SIZE as usize],
        }
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn uleb(&mut self, mut v: u32) {
        loop {
            let mut byte = (v & 0x7F) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            self.bytes.push(byte);
            if v == 0 {
                break;
            }
        }
    }

    fn patch_u32(&mut self, pos: usize, v: u32) {
        self.bytes[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn align4(&mut self) {
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
    }
}

// string_ids are sorted: "I" < "LBar;" < "LFoo;" < "V" < "bar" < "x"
const STRINGS: [&str; 6] = ["I", "LBar;", "LFoo;", "V", "bar", "x"];
const STR_I: u32 = 0;
const STR_LBAR: u32 = 1;
const STR_LFOO: u32 = 2;
const STR_V: u32 = 3;
const STR_BAR: u32 = 4;
const STR_X: u32 = 5;

// type_ids, one per descriptor string
const TYPE_I: u32 = 0;
const TYPE_LBAR: u32 = 1;
const TYPE_LFOO: u32 = 2;
const TYPE_V: u32 = 3;

fn build_minimal_dex() -> Vec<u8> {
    let mut b = Builder::new();

    let string_ids_off = b.len() as u32;
    let string_id_positions: Vec<usize> = (0..STRINGS.len()).map(|i| b.len() + 4 * i).collect();
    for _ in &STRINGS {
        b.u32(0); // patched once string_data is laid out
    }

    let type_ids_off = b.len() as u32;
    for descriptor_idx in [STR_I, STR_LBAR, STR_LFOO, STR_V] {
        b.u32(descriptor_idx);
    }

    let proto_ids_off = b.len() as u32;
    b.u32(STR_V); // shorty_idx "V"
    b.u32(TYPE_V); // return_type_idx
    b.u32(0); // parameters_off: none

    let field_ids_off = b.len() as u32;
    b.u16(TYPE_LFOO as u16);
    b.u16(TYPE_I as u16);
    b.u32(STR_X);

    let method_ids_off = b.len() as u32;
    b.u16(TYPE_LFOO as u16);
    b.u16(0); // proto_idx
    b.u32(STR_BAR);

    let class_defs_off = b.len() as u32;
    b.u32(TYPE_LFOO); // class_idx
    b.u32(AccessFlags::PUBLIC.bits());
    b.u32(NO_INDEX); // superclass_idx
    let interfaces_off_pos = b.len();
    b.u32(0); // interfaces_off, patched
    b.u32(NO_INDEX); // source_file_idx
    b.u32(0); // annotations_off
    let class_data_off_pos = b.len();
    b.u32(0); // class_data_off, patched
    b.u32(0); // static_values_off

    // data section
    let data_off = b.len() as u32;
    let string_data_off = b.len() as u32;
    for (i, s) in STRINGS.iter().enumerate() {
        let off = b.len() as u32;
        b.patch_u32(string_id_positions[i], off);
        b.uleb(s.len() as u32); // all-ASCII, one code unit per byte
        for &byte in s.as_bytes() {
            b.u8(byte);
        }
        b.u8(0);
    }

    b.align4();
    let interfaces_off = b.len() as u32;
    b.patch_u32(interfaces_off_pos, interfaces_off);
    b.u32(1); // type_list size
    b.u16(TYPE_LBAR as u16);

    let class_data_off = b.len() as u32;
    b.patch_u32(class_data_off_pos, class_data_off);
    b.uleb(0); // static fields
    b.uleb(1); // instance fields
    b.uleb(1); // direct methods
    b.uleb(0); // virtual methods
    b.uleb(0); // field_idx_diff -> field 0
    b.uleb(AccessFlags::PRIVATE.bits());
    b.uleb(0); // method_idx_diff -> method 0
    b.uleb(AccessFlags::PUBLIC.bits());
    b.uleb(0); // code_off: abstract/native-style, no code

    b.align4();
    let map_off = b.len() as u32;
    let map_entries: [(u16, u32, u32); 11] = [
        (map_list::TYPE_HEADER_ITEM, 1, 0),
        (map_list::TYPE_STRING_ID_ITEM, STRINGS.len() as u32, string_ids_off),
        (map_list::TYPE_TYPE_ID_ITEM, 4, type_ids_off),
        (map_list::TYPE_PROTO_ID_ITEM, 1, proto_ids_off),
        (map_list::TYPE_FIELD_ID_ITEM, 1, field_ids_off),
        (map_list::TYPE_METHOD_ID_ITEM, 1, method_ids_off),
        (map_list::TYPE_CLASS_DEF_ITEM, 1, class_defs_off),
        (map_list::TYPE_STRING_DATA_ITEM, STRINGS.len() as u32, string_data_off),
        (map_list::TYPE_TYPE_LIST, 1, interfaces_off),
        (map_list::TYPE_CLASS_DATA_ITEM, 1, class_data_off),
        (map_list::TYPE_MAP_LIST, 1, map_off),
    ];
    b.u32(map_entries.len() as u32);
    for (item_type, size, offset) in map_entries {
        b.u16(item_type);
        b.u16(0);
        b.u32(size);
        b.u32(offset);
    }

    // header
    let file_size = b.len() as u32;
    b.bytes[0..8].copy_from_slice(b"dex\n039\0");
    b.patch_u32(32, file_size);
    b.patch_u32(36, HEADER_SIZE);
    b.patch_u32(40, ENDIAN_CONSTANT);
    b.patch_u32(44, 0); // link_size
    b.patch_u32(48, 0); // link_off
    b.patch_u32(52, map_off);
    b.patch_u32(56, STRINGS.len() as u32);
    b.patch_u32(60, string_ids_off);
    b.patch_u32(64, 4);
    b.patch_u32(68, type_ids_off);
    b.patch_u32(72, 1);
    b.patch_u32(76, proto_ids_off);
    b.patch_u32(80, 1);
    b.patch_u32(84, field_ids_off);
    b.patch_u32(88, 1);
    b.patch_u32(92, method_ids_off);
    b.patch_u32(96, 1);
    b.patch_u32(100, class_defs_off);
    b.patch_u32(104, file_size - data_off);
    b.patch_u32(108, data_off);

    // checksum covers everything after magic + checksum
    let checksum = adler32(&b.bytes[12..]);
    b.patch_u32(8, checksum);

    b.bytes
}

#[test]
fn decodes_minimal_dex() {
    let bytes = build_minimal_dex();
    let dex = DexFile::from_bytes(&bytes).unwrap();

    assert_eq!(dex.header.version(), 39);
    assert_eq!(dex.strings.len(), 6);
    assert_eq!(dex.type_ids.len(), 4);
    assert_eq!(dex.proto_ids.len(), 1);
    assert_eq!(dex.field_ids.len(), 1);
    assert_eq!(dex.method_ids.len(), 1);
    assert_eq!(dex.class_defs.len(), 1);

    assert_eq!(dex.string(STR_BAR), Some("bar"));
    assert_eq!(dex.type_descriptor(TYPE_LFOO), Some("LFoo;"));

    let def = &dex.class_defs[0];
    assert_eq!(dex.class_name(def), Some("LFoo;"));
    assert!(def.flags().contains(AccessFlags::PUBLIC));
    assert_eq!(dex.superclass_name(def), None);
    assert_eq!(dex.source_file(def), None);

    // interfaces resolve through the type_list at interfaces_off
    assert_eq!(dex.interface_lists[0], Some(TypeList(vec![TYPE_LBAR as u16])));

    // no parameters: parameters_off 0 stays absent
    assert_eq!(dex.parameter_lists[0], None);

    let data = &dex.class_data[0];
    assert!(data.static_fields.is_empty());
    assert_eq!(data.instance_fields.len(), 1);
    assert_eq!(data.instance_fields[0].field_idx, 0);
    assert!(data.instance_fields[0].flags().contains(AccessFlags::PRIVATE));
    assert_eq!(data.direct_methods.len(), 1);
    assert_eq!(data.direct_methods[0].method_idx, 0);
    assert_eq!(data.direct_methods[0].code_off, None);
    assert!(data.virtual_methods.is_empty());

    assert_eq!(dex.field_name(0), Some("x"));
    assert_eq!(dex.method_name(0), Some("bar"));
}

#[test]
fn checksum_verifies() {
    let bytes = build_minimal_dex();
    let dex = DexFile::from_bytes(&bytes).unwrap();
    assert!(dex.header.verify_checksum(&bytes));

    let mut corrupt = bytes.clone();
    *corrupt.last_mut().unwrap() ^= 0xFF;
    assert!(!dex.header.verify_checksum(&corrupt));
}

#[test]
fn map_cross_check_is_clean() {
    let bytes = build_minimal_dex();
    let dex = DexFile::from_bytes_with(&bytes, DecodeOptions { strict_map: true }).unwrap();
    assert!(dex.map.check_consistency(&dex.header).is_empty());
    assert_eq!(
        dex.map.find(map_list::TYPE_CLASS_DEF_ITEM).unwrap().size,
        1
    );
}

#[test]
fn map_mismatch_is_advisory_by_default_and_fatal_in_strict_mode() {
    let mut bytes = build_minimal_dex();

    // corrupt the declared size of the string_ids map entry (entry index 1:
    // map_off + count + one entry, size field 4 bytes in)
    let map_off = u32::from_le_bytes(bytes[52..56].try_into().unwrap()) as usize;
    let size_pos = map_off + 4 + 12 + 4;
    bytes[size_pos..size_pos + 4].copy_from_slice(&99u32.to_le_bytes());

    // default mode decodes on header authority
    let dex = DexFile::from_bytes(&bytes).unwrap();
    assert_eq!(dex.strings.len(), 6);
    let mismatches = dex.map.check_consistency(&dex.header);
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].section, "string_ids");

    // strict mode refuses
    let e = DexFile::from_bytes_with(&bytes, DecodeOptions { strict_map: true }).unwrap_err();
    assert!(matches!(e, DexError::InconsistentMap(_)));
}

#[test]
fn table_past_buffer_end_fails_whole_decode() {
    let mut bytes = build_minimal_dex();
    let bogus = (bytes.len() - 2) as u32;
    bytes[60..64].copy_from_slice(&bogus.to_le_bytes()); // string_ids_off

    assert!(matches!(
        DexFile::from_bytes(&bytes),
        Err(DexError::OutOfBounds { .. })
    ));
}

#[test]
fn truncated_header_fails() {
    let bytes = build_minimal_dex();
    assert!(matches!(
        DexFile::from_bytes(&bytes[..0x40]),
        Err(DexError::OutOfBounds { .. })
    ));
}

#[test]
fn class_without_class_data_yields_empty_members() {
    let mut bytes = build_minimal_dex();

    // zero out class_data_off in the single class_def
    let class_defs_off = u32::from_le_bytes(bytes[100..104].try_into().unwrap()) as usize;
    let pos = class_defs_off + 24;
    bytes[pos..pos + 4].copy_from_slice(&0u32.to_le_bytes());

    let dex = DexFile::from_bytes(&bytes).unwrap();
    assert_eq!(dex.class_data.len(), 1);
    assert!(dex.class_data[0].is_empty());
    assert_eq!(dex.class_data[0], ClassDataItem::default());
}

#[test]
fn repeated_decodes_are_value_equal() {
    let bytes = build_minimal_dex();
    let first = DexFile::from_bytes(&bytes).unwrap();
    let second = DexFile::from_bytes(&bytes).unwrap();

    assert_eq!(first.header, second.header);
    assert_eq!(first.strings, second.strings);
    assert_eq!(first.interface_lists, second.interface_lists);
    assert_eq!(first.class_data, second.class_data);
}

#[test]
fn header_reads_standalone() {
    let bytes = build_minimal_dex();
    let mut ix = 0;
    let header = Header::read(&bytes, &mut ix).unwrap();
    assert_eq!(header.file_size as usize, bytes.len());
    assert_eq!(header.header_size, HEADER_SIZE);
    assert_eq!(header.string_ids_size, 6);
}
