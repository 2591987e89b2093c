/* Generic table decoding. The six id tables of a DEX file are all the same
   algorithm with a different stride and field layout, and the string_data /
   type_list sections are reached the same way: an offset field dereferenced
   once per record. */

use std::collections::HashMap;

use crate::error::DexError;

/// Decodes `count` fixed-stride records, record `i` at `offset + i * stride`.
///
/// The whole extent is bounds-checked up front so a failing table never
/// yields a partial result. `count == 0` returns an empty list without
/// touching `offset`, which may then legitimately be zero.
pub fn read_table<T, F>(
    bytes: &[u8],
    count: u32,
    offset: u32,
    stride: usize,
    mut read_one: F,
) -> Result<Vec<T>, DexError>
where
    F: FnMut(&[u8], &mut usize) -> Result<T, DexError>,
{
    if count == 0 {
        return Ok(Vec::new());
    }

    let start = offset as usize;
    let span = (count as usize)
        .checked_mul(stride)
        .and_then(|n| start.checked_add(n))
        .ok_or_else(|| DexError::OutOfBounds {
            offset: start,
            wanted: (count as usize).saturating_mul(stride),
            len: bytes.len(),
        })?;
    if span > bytes.len() {
        return Err(DexError::OutOfBounds {
            offset: start,
            wanted: span - start,
            len: bytes.len(),
        });
    }

    let mut records = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let mut ix = start + i * stride;
        records.push(read_one(bytes, &mut ix)?);
    }
    Ok(records)
}

/// Dereferences an offset field of every record, decoding the structure it
/// points at. The result is aligned 1:1 with `records`; a `None` from the
/// selector is the table's "absent" sentinel and produces `None` without any
/// read.
///
/// Several records may share one offset (string/type_list data is
/// deduplicated in well-formed files); repeated offsets are served from a
/// per-call memo arena, which is pure: a hit is value-equal to a fresh
/// decode.
pub fn resolve_table<R, T, S, F>(
    bytes: &[u8],
    records: &[R],
    mut select: S,
    mut decode_one: F,
) -> Result<Vec<Option<T>>, DexError>
where
    T: Clone,
    S: FnMut(&R) -> Option<u32>,
    F: FnMut(&[u8], &mut usize) -> Result<T, DexError>,
{
    let mut arena: HashMap<u32, T> = HashMap::new();
    let mut resolved = Vec::with_capacity(records.len());

    for record in records {
        let Some(offset) = select(record) else {
            resolved.push(None);
            continue;
        };
        if let Some(hit) = arena.get(&offset) {
            resolved.push(Some(hit.clone()));
            continue;
        }
        let mut ix = offset as usize;
        let value = decode_one(bytes, &mut ix)?;
        arena.insert(offset, value.clone());
        resolved.push(Some(value));
    }
    Ok(resolved)
}
