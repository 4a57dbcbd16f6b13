//! Volume label encoding
//!
//! Labels live on disk as UTF-16LE without a terminator.

use crate::error::MountError;
use alloc::string::String;
use alloc::vec::Vec;

/// Longest label in UTF-16 code units
pub const MAX_LABEL_UNITS: usize = 128;

/// Encode a label into its on-disk bytes
///
/// # Errors
/// `MountError::InvalidArgument` if the label contains NUL or exceeds
/// [`MAX_LABEL_UNITS`] code units
pub fn encode(label: &str) -> Result<Vec<u8>, MountError> {
    if label.contains('\0') {
        return Err(MountError::InvalidArgument);
    }
    let units = label.encode_utf16().count();
    if units > MAX_LABEL_UNITS {
        return Err(MountError::InvalidArgument);
    }

    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(units * 2)
        .map_err(|_| MountError::OutOfMemory)?;
    for unit in label.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    Ok(bytes)
}

/// Decode on-disk label bytes, replacing unpaired surrogates
pub fn decode(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}
