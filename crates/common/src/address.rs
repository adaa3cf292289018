//! Address-like callback tokens.
//!
//! Some downstream consumers accept "an address" where a script wants to
//! pass a function. These tokens let a script name a public function by
//! index, or a native by its host address, in a form that survives being
//! stored in an array: a fixed tag byte followed by base-255 digits, each
//! shifted by one so no byte is ever zero.

use crate::cell::{Cell, UCell};
use crate::error::EncodeError;

/// Tag byte marking a token.
pub const ADDRESS_TOKEN_TAG: UCell = 0x1B00_0000;

/// Exclusive upper bound for encodable public indices (255 * 255).
pub const PUBLIC_INDEX_LIMIT: Cell = 65_025;

/// Exclusive upper bound for encodable native addresses (255^5).
pub const NATIVE_ADDRESS_LIMIT: u64 = 1_078_203_909_375;

const BASE: u64 = 255;

fn digit(value: u64, place: u32) -> UCell {
    (value / BASE.pow(place) % BASE + 1) as UCell
}

fn undigit(byte: UCell) -> Result<u64, EncodeError> {
    match byte {
        0 => Err(EncodeError::ZeroDigit),
        d => Ok(u64::from(d) - 1),
    }
}

/// Encode a public function index into one token cell.
pub fn encode_public(index: Cell) -> Result<Cell, EncodeError> {
    if !(0..PUBLIC_INDEX_LIMIT).contains(&index) {
        return Err(EncodeError::PublicIndexOutOfRange(index));
    }
    let index = index as u64;
    Ok((ADDRESS_TOKEN_TAG | digit(index, 0) << 16 | digit(index, 1) << 8) as Cell)
}

/// Recover a public index from a token cell.
pub fn decode_public(token: Cell) -> Result<Cell, EncodeError> {
    let bits = token as UCell;
    if bits & 0xFF00_0000 != ADDRESS_TOKEN_TAG || bits & 0xFF != 0 {
        return Err(EncodeError::NotAnAddressToken(bits));
    }
    let low = undigit(bits >> 16 & 0xFF)?;
    let high = undigit(bits >> 8 & 0xFF)?;
    Ok((low + high * BASE) as Cell)
}

/// Encode a native function address into two token cells.
///
/// The first cell holds the tag and the three low digits, the second the
/// two high digits in its upper half.
pub fn encode_native(address: u64) -> Result<[Cell; 2], EncodeError> {
    if address >= NATIVE_ADDRESS_LIMIT {
        return Err(EncodeError::NativeAddressOutOfRange(address));
    }
    let first =
        ADDRESS_TOKEN_TAG | digit(address, 0) << 16 | digit(address, 1) << 8 | digit(address, 2);
    let second = digit(address, 3) << 24 | digit(address, 4) << 16;
    Ok([first as Cell, second as Cell])
}

/// Recover a native address from two token cells.
pub fn decode_native(token: [Cell; 2]) -> Result<u64, EncodeError> {
    let first = token[0] as UCell;
    let second = token[1] as UCell;
    if first & 0xFF00_0000 != ADDRESS_TOKEN_TAG || second & 0xFFFF != 0 {
        return Err(EncodeError::NotAnAddressToken(first));
    }
    let digits = [
        undigit(first >> 16 & 0xFF)?,
        undigit(first >> 8 & 0xFF)?,
        undigit(first & 0xFF)?,
        undigit(second >> 24)?,
        undigit(second >> 16 & 0xFF)?,
    ];
    Ok(digits.iter().rev().fold(0, |acc, d| acc * BASE + d))
}
