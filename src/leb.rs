/* LEB128 decoding. DEX uses uleb128/sleb128 for all variable-length counts
   and indices; values fit in 32 bits, so a valid encoding is at most 5 bytes. */

use crate::error::DexError;

pub fn read_uleb128(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError> {
    let start = *ix;
    let mut value: u32 = 0;
    let mut shift: u32 = 0;

    loop {
        let byte = *bytes
            .get(*ix)
            .ok_or(DexError::MalformedVarint { offset: start })?;
        *ix += 1;

        let low = (byte & 0x7F) as u32;

        // The 5th byte may only carry the top 4 bits of a u32.
        if shift == 28 && (low >> 4) != 0 {
            return Err(DexError::MalformedVarint { offset: start });
        }
        value |= low << shift;

        if (byte & 0x80) == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 28 {
            // A 5th continuation byte would push past 32 bits.
            return Err(DexError::MalformedVarint { offset: start });
        }
    }
}

pub fn read_sleb128(bytes: &[u8], ix: &mut usize) -> Result<i32, DexError> {
    let start = *ix;
    let mut value: i32 = 0;
    let mut shift: u32 = 0;

    loop {
        let byte = *bytes
            .get(*ix)
            .ok_or(DexError::MalformedVarint { offset: start })?;
        *ix += 1;

        value |= ((byte & 0x7F) as i32) << shift;
        shift += 7;

        if (byte & 0x80) == 0 {
            // Sign-extend from the last byte's bit 6.
            if shift < 32 && (byte & 0x40) != 0 {
                value |= -1i32 << shift;
            }
            return Ok(value);
        }
        if shift > 28 {
            return Err(DexError::MalformedVarint { offset: start });
        }
    }
}
