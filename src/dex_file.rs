/* Dex file format structures */

use std::fs;
use std::path::Path;

use bitflags::bitflags;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::DexError;
use crate::leb::read_uleb128;
use crate::map_list::MapList;
use crate::mutf8::read_mutf8_code_unit;
use crate::tables::{read_table, resolve_table};
use crate::{read_array, read_u2, read_u4};

/* Constants */
pub const DEX_MAGIC_PREFIX: [u8; 4] = [0x64, 0x65, 0x78, 0x0a]; // "dex\n"
pub const ENDIAN_CONSTANT: u32 = 0x12345678;
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x78563412;
pub const NO_INDEX: u32 = 0xffffffff;
pub const HEADER_SIZE: u32 = 0x70;

bitflags! {
    /// Java/Dalvik access modifiers as stored in access_flags fields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        const VOLATILE = 0x40;
        const BRIDGE = 0x40;
        const TRANSIENT = 0x80;
        const VARARGS = 0x80;
        const NATIVE = 0x100;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const STRICT = 0x800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
}

impl Header {
    /// Decodes the fixed header at `*ix`.
    ///
    /// The magic must be `dex\n0NN\0` with a supported version NN, and the
    /// declared header_size must match the fixed 0x70-byte layout; every
    /// other table-level check is deferred to the map cross-validation.
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<Header, DexError> {
        let magic: [u8; 8] = read_array(bytes, ix)?;
        if !magic_is_supported(&magic) {
            return Err(DexError::BadMagic { found: magic });
        }

        let header = Header {
            magic,
            checksum: read_u4(bytes, ix)?,
            signature: read_array(bytes, ix)?,
            file_size: read_u4(bytes, ix)?,
            header_size: read_u4(bytes, ix)?,
            endian_tag: read_u4(bytes, ix)?,
            link_size: read_u4(bytes, ix)?,
            link_off: read_u4(bytes, ix)?,
            map_off: read_u4(bytes, ix)?,
            string_ids_size: read_u4(bytes, ix)?,
            string_ids_off: read_u4(bytes, ix)?,
            type_ids_size: read_u4(bytes, ix)?,
            type_ids_off: read_u4(bytes, ix)?,
            proto_ids_size: read_u4(bytes, ix)?,
            proto_ids_off: read_u4(bytes, ix)?,
            field_ids_size: read_u4(bytes, ix)?,
            field_ids_off: read_u4(bytes, ix)?,
            method_ids_size: read_u4(bytes, ix)?,
            method_ids_off: read_u4(bytes, ix)?,
            class_defs_size: read_u4(bytes, ix)?,
            class_defs_off: read_u4(bytes, ix)?,
            data_size: read_u4(bytes, ix)?,
            data_off: read_u4(bytes, ix)?,
        };

        if header.header_size != HEADER_SIZE {
            return Err(DexError::BadHeaderSize {
                found: header.header_size,
            });
        }
        if header.endian_tag == REVERSE_ENDIAN_CONSTANT {
            warn!("[header] reverse-endian tag; this decoder only reads little-endian files");
        } else if header.endian_tag != ENDIAN_CONSTANT {
            warn!("[header] unrecognised endian_tag {:#010x}", header.endian_tag);
        }

        Ok(header)
    }

    /// Numeric DEX version from the magic, e.g. 35, 39, 41.
    pub fn version(&self) -> u32 {
        ((self.magic[4] - b'0') as u32) * 100
            + ((self.magic[5] - b'0') as u32) * 10
            + ((self.magic[6] - b'0') as u32)
    }

    /// Recomputes the Adler-32 checksum over everything after the checksum
    /// field and compares it with the declared value. Advisory; a mismatch
    /// indicates corruption but does not stop decoding.
    pub fn verify_checksum(&self, bytes: &[u8]) -> bool {
        if bytes.len() < 12 {
            return false;
        }
        adler32(&bytes[12..]) == self.checksum
    }
}

fn magic_is_supported(magic: &[u8; 8]) -> bool {
    if magic[0..4] != DEX_MAGIC_PREFIX || magic[7] != 0 {
        return false;
    }
    if !magic[4..7].iter().all(u8::is_ascii_digit) {
        return false;
    }
    let version = ((magic[4] - b'0') as u32) * 100
        + ((magic[5] - b'0') as u32) * 10
        + ((magic[6] - b'0') as u32);
    (35..=41).contains(&version)
}

/// Adler-32 as used by the DEX header checksum.
pub fn adler32(data: &[u8]) -> u32 {
    const MOD: u32 = 65_521;
    let mut a = 1u32;
    let mut b = 0u32;

    for &byte in data {
        a = (a + byte as u32) % MOD;
        b = (b + a) % MOD;
    }

    (b << 16) | a
}

/* The six fixed-stride id tables. Index fields stay raw u16/u32 indices and
   offset fields stay raw byte offsets; both are resolved through DexFile
   accessors rather than inlined at decode time, so records that legally
   share one offset share one decode. */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringIdItem {
    pub string_data_off: u32,
}

impl StringIdItem {
    pub const STRIDE: usize = 4;

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<StringIdItem, DexError> {
        Ok(StringIdItem {
            string_data_off: read_u4(bytes, ix)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeIdItem {
    pub descriptor_idx: u32,
}

impl TypeIdItem {
    pub const STRIDE: usize = 4;

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<TypeIdItem, DexError> {
        Ok(TypeIdItem {
            descriptor_idx: read_u4(bytes, ix)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtoIdItem {
    pub shorty_idx: u32,
    pub return_type_idx: u32,
    /// 0 means the prototype has no parameters.
    pub parameters_off: u32,
}

impl ProtoIdItem {
    pub const STRIDE: usize = 12;

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ProtoIdItem, DexError> {
        Ok(ProtoIdItem {
            shorty_idx: read_u4(bytes, ix)?,
            return_type_idx: read_u4(bytes, ix)?,
            parameters_off: read_u4(bytes, ix)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIdItem {
    pub class_idx: u16,
    pub type_idx: u16,
    pub name_idx: u32,
}

impl FieldIdItem {
    pub const STRIDE: usize = 8;

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<FieldIdItem, DexError> {
        Ok(FieldIdItem {
            class_idx: read_u2(bytes, ix)?,
            type_idx: read_u2(bytes, ix)?,
            name_idx: read_u4(bytes, ix)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodIdItem {
    pub class_idx: u16,
    pub proto_idx: u16,
    pub name_idx: u32,
}

impl MethodIdItem {
    pub const STRIDE: usize = 8;

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<MethodIdItem, DexError> {
        Ok(MethodIdItem {
            class_idx: read_u2(bytes, ix)?,
            proto_idx: read_u2(bytes, ix)?,
            name_idx: read_u4(bytes, ix)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDefItem {
    pub class_idx: u32,
    pub access_flags: u32,
    /// NO_INDEX when the class has no superclass.
    pub superclass_idx: u32,
    /// 0 means no interfaces.
    pub interfaces_off: u32,
    /// NO_INDEX when the source file is unknown.
    pub source_file_idx: u32,
    pub annotations_off: u32,
    /// 0 means the class declares no members.
    pub class_data_off: u32,
    pub static_values_off: u32,
}

impl ClassDefItem {
    pub const STRIDE: usize = 32;

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ClassDefItem, DexError> {
        Ok(ClassDefItem {
            class_idx: read_u4(bytes, ix)?,
            access_flags: read_u4(bytes, ix)?,
            superclass_idx: read_u4(bytes, ix)?,
            interfaces_off: read_u4(bytes, ix)?,
            source_file_idx: read_u4(bytes, ix)?,
            annotations_off: read_u4(bytes, ix)?,
            class_data_off: read_u4(bytes, ix)?,
            static_values_off: read_u4(bytes, ix)?,
        })
    }

    pub fn flags(&self) -> AccessFlags {
        AccessFlags::from_bits_retain(self.access_flags)
    }

    pub fn has_superclass(&self) -> bool {
        self.superclass_idx != NO_INDEX
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeList(pub Vec<u16>);

impl TypeList {
    /// Reads one type_list: its own u32 count then that many u16 type
    /// indices, tightly packed (alignment padding before the list is the
    /// writer's concern and is never read as data).
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<TypeList, DexError> {
        let mut v = vec![];
        let size = read_u4(bytes, ix)?;
        for _ in 0..size {
            v.push(read_u2(bytes, ix)?);
        }
        Ok(TypeList(v))
    }
}

/// One decoded string_data_item.
///
/// `utf16_size` is the declared UTF-16 code-unit length; the decoded string
/// is kept alongside it because the two can disagree in hostile files, and
/// that disagreement is observable rather than an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringData {
    pub utf16_size: u32,
    pub string: String,
}

impl StringData {
    /// Decodes a string_data_item at `*ix`: a ULEB128 code-unit count, then
    /// MUTF-8 sequences until the count is met or a literal NUL byte is next.
    /// Both stop conditions are live; the earlier one wins.
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<StringData, DexError> {
        let utf16_size = read_uleb128(bytes, ix)?;
        let data_start = *ix;

        let mut units: u32 = 0;
        while units < utf16_size {
            if bytes.get(*ix) == Some(&0) {
                break;
            }
            read_mutf8_code_unit(bytes, ix)?;
            units += 1;
        }

        let string = match cesu8::from_java_cesu8(&bytes[data_start..*ix]) {
            Ok(s) => s.into_owned(),
            Err(_) => return Err(DexError::MalformedStringData { offset: data_start }),
        };

        // step over the terminator when present
        if bytes.get(*ix) == Some(&0) {
            *ix += 1;
        }

        Ok(StringData { utf16_size, string })
    }

    pub fn as_str(&self) -> &str {
        &self.string
    }

    /// UTF-16 length of the decoded text, for comparison with `utf16_size`.
    pub fn decoded_utf16_len(&self) -> usize {
        self.string.encode_utf16().count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedField {
    /// Absolute index into field_ids, reconstructed from the diff encoding.
    pub field_idx: u32,
    pub access_flags: u32,
}

impl EncodedField {
    pub fn flags(&self) -> AccessFlags {
        AccessFlags::from_bits_retain(self.access_flags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedMethod {
    /// Absolute index into method_ids, reconstructed from the diff encoding.
    pub method_idx: u32,
    pub access_flags: u32,
    /// None for abstract and native methods.
    pub code_off: Option<u32>,
}

impl EncodedMethod {
    pub fn flags(&self) -> AccessFlags {
        AccessFlags::from_bits_retain(self.access_flags)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDataItem {
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

impl ClassDataItem {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ClassDataItem, DexError> {
        let static_fields_size = read_uleb128(bytes, ix)?;
        let instance_fields_size = read_uleb128(bytes, ix)?;
        let direct_methods_size = read_uleb128(bytes, ix)?;
        let virtual_methods_size = read_uleb128(bytes, ix)?;

        Ok(ClassDataItem {
            static_fields: Self::read_fields(bytes, ix, static_fields_size)?,
            instance_fields: Self::read_fields(bytes, ix, instance_fields_size)?,
            direct_methods: Self::read_methods(bytes, ix, direct_methods_size)?,
            virtual_methods: Self::read_methods(bytes, ix, virtual_methods_size)?,
        })
    }

    /// Decodes one class_data_item, or the empty item when `offset` is 0
    /// (no class_data_off means no declared members, and nothing is read).
    pub fn read_at(bytes: &[u8], offset: u32) -> Result<ClassDataItem, DexError> {
        if offset == 0 {
            return Ok(ClassDataItem::default());
        }
        let mut ix = offset as usize;
        ClassDataItem::read(bytes, &mut ix)
    }

    // Member indices are stored as differences from the previous entry in
    // the same group. The accumulator starts at 0 for every group; it never
    // carries across the static/instance or direct/virtual boundary.
    fn read_fields(
        bytes: &[u8],
        ix: &mut usize,
        count: u32,
    ) -> Result<Vec<EncodedField>, DexError> {
        let mut fields = vec![];
        let mut prev: u32 = 0;
        for _ in 0..count {
            let idx_diff = read_uleb128(bytes, ix)?;
            let access_flags = read_uleb128(bytes, ix)?;
            prev = prev.wrapping_add(idx_diff);
            fields.push(EncodedField {
                field_idx: prev,
                access_flags,
            });
        }
        Ok(fields)
    }

    fn read_methods(
        bytes: &[u8],
        ix: &mut usize,
        count: u32,
    ) -> Result<Vec<EncodedMethod>, DexError> {
        let mut methods = vec![];
        let mut prev: u32 = 0;
        for _ in 0..count {
            let idx_diff = read_uleb128(bytes, ix)?;
            let access_flags = read_uleb128(bytes, ix)?;
            let code_off = read_uleb128(bytes, ix)?;
            prev = prev.wrapping_add(idx_diff);
            methods.push(EncodedMethod {
                method_idx: prev,
                access_flags,
                code_off: if code_off == 0 { None } else { Some(code_off) },
            });
        }
        Ok(methods)
    }

    pub fn is_empty(&self) -> bool {
        self.static_fields.is_empty()
            && self.instance_fields.is_empty()
            && self.direct_methods.is_empty()
            && self.virtual_methods.is_empty()
    }
}

/// Decode configuration.
///
/// `strict_map` turns map_list/header disagreements into a hard
/// `InconsistentMap` error; by default they are logged and the header stays
/// authoritative, matching how the format treats the map as a redundant
/// directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    pub strict_map: bool,
}

/// A fully decoded DEX file.
///
/// The resolved sequences (`strings`, `parameter_lists`, `interface_lists`,
/// `class_data`) are parallel to the id tables they were derived from, in
/// file order. Everything is immutable once constructed.
#[derive(Debug)]
pub struct DexFile {
    pub header: Header,
    pub map: MapList,
    pub string_ids: Vec<StringIdItem>,
    pub strings: Vec<StringData>,
    pub type_ids: Vec<TypeIdItem>,
    pub proto_ids: Vec<ProtoIdItem>,
    /// Parameter type_list per proto_id; None when parameters_off is 0.
    pub parameter_lists: Vec<Option<TypeList>>,
    pub field_ids: Vec<FieldIdItem>,
    pub method_ids: Vec<MethodIdItem>,
    pub class_defs: Vec<ClassDefItem>,
    /// Interface type_list per class_def; None when interfaces_off is 0.
    pub interface_lists: Vec<Option<TypeList>>,
    /// Class members per class_def; empty when class_data_off is 0.
    pub class_data: Vec<ClassDataItem>,
}

impl DexFile {
    pub fn from_bytes(bytes: &[u8]) -> Result<DexFile, DexError> {
        DexFile::read(bytes, DecodeOptions::default())
    }

    pub fn from_bytes_with(bytes: &[u8], options: DecodeOptions) -> Result<DexFile, DexError> {
        DexFile::read(bytes, options)
    }

    pub fn from_file(path: &Path) -> Result<DexFile, DexError> {
        let bytes = fs::read(path)?;
        DexFile::from_bytes(&bytes)
    }

    fn read(bytes: &[u8], options: DecodeOptions) -> Result<DexFile, DexError> {
        let mut ix = 0;
        let header = Header::read(bytes, &mut ix)?;

        if header.file_size as usize != bytes.len() {
            warn!(
                "[header] declared file_size {} differs from buffer length {}",
                header.file_size,
                bytes.len()
            );
        }

        let map = if header.map_off == 0 {
            warn!("[map] map_off is 0; no map_list in this file");
            MapList(vec![])
        } else {
            let mut ix = header.map_off as usize;
            MapList::read(bytes, &mut ix)?
        };

        let mismatches = map.check_consistency(&header);
        for m in &mismatches {
            warn!("[map] {}", m);
        }
        if options.strict_map {
            if let Some(m) = mismatches.into_iter().next() {
                return Err(DexError::InconsistentMap(m));
            }
        }

        let string_ids = read_table(
            bytes,
            header.string_ids_size,
            header.string_ids_off,
            StringIdItem::STRIDE,
            StringIdItem::read,
        )?;
        let type_ids = read_table(
            bytes,
            header.type_ids_size,
            header.type_ids_off,
            TypeIdItem::STRIDE,
            TypeIdItem::read,
        )?;
        let proto_ids = read_table(
            bytes,
            header.proto_ids_size,
            header.proto_ids_off,
            ProtoIdItem::STRIDE,
            ProtoIdItem::read,
        )?;
        let field_ids = read_table(
            bytes,
            header.field_ids_size,
            header.field_ids_off,
            FieldIdItem::STRIDE,
            FieldIdItem::read,
        )?;
        let method_ids = read_table(
            bytes,
            header.method_ids_size,
            header.method_ids_off,
            MethodIdItem::STRIDE,
            MethodIdItem::read,
        )?;
        let class_defs = read_table(
            bytes,
            header.class_defs_size,
            header.class_defs_off,
            ClassDefItem::STRIDE,
            ClassDefItem::read,
        )?;

        // Well-formed files keep string_data offsets ascending; that is a
        // property to verify, not one to rely on.
        if string_ids
            .windows(2)
            .any(|w| w[0].string_data_off >= w[1].string_data_off)
        {
            warn!("[strings] string_data offsets are not strictly ascending");
        }

        let strings = resolve_table(
            bytes,
            &string_ids,
            |s| Some(s.string_data_off),
            StringData::read,
        )?
        .into_iter()
        .flatten()
        .collect();

        let parameter_lists = resolve_table(
            bytes,
            &proto_ids,
            |p| {
                if p.parameters_off == 0 {
                    None
                } else {
                    Some(p.parameters_off)
                }
            },
            TypeList::read,
        )?;

        let interface_lists = resolve_table(
            bytes,
            &class_defs,
            |c| {
                if c.interfaces_off == 0 {
                    None
                } else {
                    Some(c.interfaces_off)
                }
            },
            TypeList::read,
        )?;

        let mut class_data = Vec::with_capacity(class_defs.len());
        for def in &class_defs {
            class_data.push(ClassDataItem::read_at(bytes, def.class_data_off)?);
        }

        Ok(DexFile {
            header,
            map,
            string_ids,
            strings,
            type_ids,
            proto_ids,
            parameter_lists,
            field_ids,
            method_ids,
            class_defs,
            interface_lists,
            class_data,
        })
    }

    /* Navigation */

    pub fn string(&self, idx: u32) -> Option<&str> {
        self.strings.get(idx as usize).map(StringData::as_str)
    }

    pub fn type_descriptor(&self, idx: u32) -> Option<&str> {
        let type_id = self.type_ids.get(idx as usize)?;
        self.string(type_id.descriptor_idx)
    }

    pub fn field_name(&self, idx: u32) -> Option<&str> {
        let field_id = self.field_ids.get(idx as usize)?;
        self.string(field_id.name_idx)
    }

    pub fn method_name(&self, idx: u32) -> Option<&str> {
        let method_id = self.method_ids.get(idx as usize)?;
        self.string(method_id.name_idx)
    }

    pub fn class_name(&self, def: &ClassDefItem) -> Option<&str> {
        self.type_descriptor(def.class_idx)
    }

    pub fn superclass_name(&self, def: &ClassDefItem) -> Option<&str> {
        if !def.has_superclass() {
            return None;
        }
        self.type_descriptor(def.superclass_idx)
    }

    pub fn source_file(&self, def: &ClassDefItem) -> Option<&str> {
        if def.source_file_idx == NO_INDEX {
            return None;
        }
        self.string(def.source_file_idx)
    }
}
