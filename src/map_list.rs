/* The map_list at header.map_off is a redundant directory of every section
   in the file. The header remains the authority for table offsets; the map
   is decoded for diagnostics and for cross-validation against the header. */

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::dex_file::Header;
use crate::error::DexError;
use crate::{read_u2, read_u4};

/* Map item type codes */
pub const TYPE_HEADER_ITEM: u16 = 0x0000;
pub const TYPE_STRING_ID_ITEM: u16 = 0x0001;
pub const TYPE_TYPE_ID_ITEM: u16 = 0x0002;
pub const TYPE_PROTO_ID_ITEM: u16 = 0x0003;
pub const TYPE_FIELD_ID_ITEM: u16 = 0x0004;
pub const TYPE_METHOD_ID_ITEM: u16 = 0x0005;
pub const TYPE_CLASS_DEF_ITEM: u16 = 0x0006;
pub const TYPE_CALL_SITE_ID_ITEM: u16 = 0x0007;
pub const TYPE_METHOD_HANDLE_ITEM: u16 = 0x0008;
pub const TYPE_MAP_LIST: u16 = 0x1000;
pub const TYPE_TYPE_LIST: u16 = 0x1001;
pub const TYPE_ANNOTATION_SET_REF_LIST: u16 = 0x1002;
pub const TYPE_ANNOTATION_SET_ITEM: u16 = 0x1003;
pub const TYPE_CLASS_DATA_ITEM: u16 = 0x2000;
pub const TYPE_CODE_ITEM: u16 = 0x2001;
pub const TYPE_STRING_DATA_ITEM: u16 = 0x2002;
pub const TYPE_DEBUG_INFO_ITEM: u16 = 0x2003;
pub const TYPE_ANNOTATION_ITEM: u16 = 0x2004;
pub const TYPE_ENCODED_ARRAY_ITEM: u16 = 0x2005;
pub const TYPE_ANNOTATIONS_DIRECTORY_ITEM: u16 = 0x2006;
pub const TYPE_HIDDENAPI_CLASS_DATA_ITEM: u16 = 0xF000;

static SECTION_NAMES: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (TYPE_HEADER_ITEM, "header_item"),
        (TYPE_STRING_ID_ITEM, "string_id_item"),
        (TYPE_TYPE_ID_ITEM, "type_id_item"),
        (TYPE_PROTO_ID_ITEM, "proto_id_item"),
        (TYPE_FIELD_ID_ITEM, "field_id_item"),
        (TYPE_METHOD_ID_ITEM, "method_id_item"),
        (TYPE_CLASS_DEF_ITEM, "class_def_item"),
        (TYPE_CALL_SITE_ID_ITEM, "call_site_id_item"),
        (TYPE_METHOD_HANDLE_ITEM, "method_handle_item"),
        (TYPE_MAP_LIST, "map_list"),
        (TYPE_TYPE_LIST, "type_list"),
        (TYPE_ANNOTATION_SET_REF_LIST, "annotation_set_ref_list"),
        (TYPE_ANNOTATION_SET_ITEM, "annotation_set_item"),
        (TYPE_CLASS_DATA_ITEM, "class_data_item"),
        (TYPE_CODE_ITEM, "code_item"),
        (TYPE_STRING_DATA_ITEM, "string_data_item"),
        (TYPE_DEBUG_INFO_ITEM, "debug_info_item"),
        (TYPE_ANNOTATION_ITEM, "annotation_item"),
        (TYPE_ENCODED_ARRAY_ITEM, "encoded_array_item"),
        (TYPE_ANNOTATIONS_DIRECTORY_ITEM, "annotations_directory_item"),
        (TYPE_HIDDENAPI_CLASS_DATA_ITEM, "hiddenapi_class_data_item"),
    ])
});

/// Human-readable name of a map item type code.
pub fn section_name(item_type: u16) -> &'static str {
    SECTION_NAMES.get(&item_type).copied().unwrap_or("unknown")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapItem {
    // The map_item struct
    pub item_type: u16,
    pub unused: u16,
    pub size: u32,
    pub offset: u32,
}

impl MapItem {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<MapItem, DexError> {
        Ok(MapItem {
            item_type: read_u2(bytes, ix)?,
            unused: read_u2(bytes, ix)?,
            size: read_u4(bytes, ix)?,
            offset: read_u4(bytes, ix)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapList(pub Vec<MapItem>);

impl MapList {
    /// Reads the map_list at `*ix`: its own u32 count, distinct from any
    /// header-declared count, followed by that many map_items.
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<MapList, DexError> {
        let size = read_u4(bytes, ix)?;
        let mut items = vec![];
        for _ in 0..size {
            items.push(MapItem::read(bytes, ix)?);
        }
        Ok(MapList(items))
    }

    pub fn find(&self, item_type: u16) -> Option<&MapItem> {
        self.0.iter().find(|m| m.item_type == item_type)
    }

    /// Cross-validates the header-derived tables against this map.
    ///
    /// For each table reconstructed from the header a map entry of the
    /// matching type should exist with matching size and offset. Returned
    /// mismatches are advisory; the header stays authoritative.
    pub fn check_consistency(&self, header: &Header) -> Vec<MapMismatch> {
        let tables: [(u16, &'static str, u32, u32); 6] = [
            (
                TYPE_STRING_ID_ITEM,
                "string_ids",
                header.string_ids_size,
                header.string_ids_off,
            ),
            (
                TYPE_TYPE_ID_ITEM,
                "type_ids",
                header.type_ids_size,
                header.type_ids_off,
            ),
            (
                TYPE_PROTO_ID_ITEM,
                "proto_ids",
                header.proto_ids_size,
                header.proto_ids_off,
            ),
            (
                TYPE_FIELD_ID_ITEM,
                "field_ids",
                header.field_ids_size,
                header.field_ids_off,
            ),
            (
                TYPE_METHOD_ID_ITEM,
                "method_ids",
                header.method_ids_size,
                header.method_ids_off,
            ),
            (
                TYPE_CLASS_DEF_ITEM,
                "class_defs",
                header.class_defs_size,
                header.class_defs_off,
            ),
        ];

        let mut mismatches = Vec::new();
        for (item_type, section, size, offset) in tables {
            match self.find(item_type) {
                Some(m) if m.size == size && m.offset == offset => {}
                Some(m) => mismatches.push(MapMismatch {
                    section,
                    header: (size, offset),
                    map: Some((m.size, m.offset)),
                }),
                // An empty table needs no map entry.
                None if size == 0 => {}
                None => mismatches.push(MapMismatch {
                    section,
                    header: (size, offset),
                    map: None,
                }),
            }
        }

        // The map also describes itself.
        if let Some(m) = self.find(TYPE_MAP_LIST) {
            if m.offset != header.map_off {
                mismatches.push(MapMismatch {
                    section: "map_list",
                    header: (1, header.map_off),
                    map: Some((m.size, m.offset)),
                });
            }
        }

        mismatches
    }
}

/// One disagreement between a header-derived table and its map entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapMismatch {
    pub section: &'static str,
    /// (size, offset) declared in the header
    pub header: (u32, u32),
    /// (size, offset) found in the map, None when the entry is missing
    pub map: Option<(u32, u32)>,
}

impl fmt::Display for MapMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.map {
            Some((size, offset)) => write!(
                f,
                "{}: header declares size {} at {:#x}, map declares size {} at {:#x}",
                self.section, self.header.0, self.header.1, size, offset
            ),
            None => write!(
                f,
                "{}: header declares size {} at {:#x}, no map entry",
                self.section, self.header.0, self.header.1
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_bytes(items: &[(u16, u32, u32)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(items.len() as u32).to_le_bytes());
        for &(item_type, size, offset) in items {
            bytes.extend_from_slice(&item_type.to_le_bytes());
            bytes.extend_from_slice(&0u16.to_le_bytes());
            bytes.extend_from_slice(&size.to_le_bytes());
            bytes.extend_from_slice(&offset.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_read_map_list() {
        let bytes = map_bytes(&[
            (TYPE_HEADER_ITEM, 1, 0),
            (TYPE_STRING_ID_ITEM, 4, 0x70),
            (TYPE_MAP_LIST, 1, 0x200),
        ]);

        let mut ix = 0;
        let map = MapList::read(&bytes, &mut ix).unwrap();
        assert_eq!(ix, bytes.len());
        assert_eq!(map.0.len(), 3);
        assert_eq!(map.find(TYPE_STRING_ID_ITEM).unwrap().size, 4);
        assert_eq!(map.find(TYPE_CODE_ITEM), None);
    }

    #[test]
    fn test_read_map_list_truncated() {
        let mut bytes = map_bytes(&[(TYPE_HEADER_ITEM, 1, 0)]);
        bytes.truncate(bytes.len() - 2);

        let mut ix = 0;
        assert!(matches!(
            MapList::read(&bytes, &mut ix),
            Err(DexError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_section_names() {
        assert_eq!(section_name(TYPE_CLASS_DATA_ITEM), "class_data_item");
        assert_eq!(section_name(0x1234), "unknown");
    }
}
