pub mod error;
pub(crate) mod dex_file;
pub(crate) mod leb;

pub use dex_file::{jni_to_java, parse, AccessFlags, ClassDef, Code, Header, Method, ParsedDex};
pub use error::DexError;

use crate::dex::leb::decode_uleb128;

// Basic little-endian type reading against an explicit cursor
pub(crate) fn read_u1(bytes: &[u8], ix: &mut usize) -> Result<u8, DexError> {
    if bytes.len() < *ix + 1 {
        return Err(DexError::Truncated { what: "u1", offset: *ix });
    }
    let result = bytes[*ix];
    *ix += 1;
    Ok(result)
}

pub(crate) fn read_u2(bytes: &[u8], ix: &mut usize) -> Result<u16, DexError> {
    if bytes.len() < *ix + 2 {
        return Err(DexError::Truncated { what: "u2", offset: *ix });
    }
    let result = ((bytes[*ix + 1] as u16) << 8) | (bytes[*ix] as u16);
    *ix += 2;
    Ok(result)
}

pub(crate) fn read_u4(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError> {
    if bytes.len() < *ix + 4 {
        return Err(DexError::Truncated { what: "u4", offset: *ix });
    }
    let result = ((bytes[*ix + 3] as u32) << 24)
        | ((bytes[*ix + 2] as u32) << 16)
        | ((bytes[*ix + 1] as u32) << 8)
        | (bytes[*ix] as u32);
    *ix += 4;
    Ok(result)
}

/// Reads a uleb128 at the cursor. A cursor at or past the end of the buffer
/// yields 0 without advancing; the decode itself never reads past the slice.
pub(crate) fn read_uleb128(bytes: &[u8], ix: &mut usize) -> u32 {
    if *ix >= bytes.len() {
        return 0;
    }
    let (val, size) = decode_uleb128(&bytes[*ix..]);
    *ix += size;
    val
}

pub(crate) fn read_x(bytes: &[u8], ix: &mut usize, length: usize) -> Result<Vec<u8>, DexError> {
    if bytes.len() >= *ix && bytes.len() - *ix >= length {
        let mut v = Vec::with_capacity(length);
        v.extend_from_slice(&bytes[*ix..*ix + length]);
        *ix += length;
        Ok(v)
    } else {
        Err(DexError::Truncated { what: "byte array", offset: *ix })
    }
}
