//! Machine status codes and encoding errors.

use crate::cell::Cell;
use std::fmt;
use thiserror::Error;

/// A machine status code.
///
/// The interpreter carries one of these per instance; natives raise them to
/// abort, exit, or suspend the running script. Any cell value is a legal
/// code, so this is a newtype with named constants rather than a closed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ErrorCode(pub Cell);

impl ErrorCode {
    pub const NONE: Self = Self(0);
    /// Forced exit.
    pub const EXIT: Self = Self(1);
    pub const ASSERT: Self = Self(2);
    pub const STACKERR: Self = Self(3);
    pub const BOUNDS: Self = Self(4);
    pub const MEMACCESS: Self = Self(5);
    pub const INVINSTR: Self = Self(6);
    pub const STACKLOW: Self = Self(7);
    pub const HEAPLOW: Self = Self(8);
    pub const CALLBACK: Self = Self(9);
    /// A native function failed.
    pub const NATIVE: Self = Self(10);
    pub const DIVIDE: Self = Self(11);
    /// Go into sleep mode: the scheduler takes over the current call.
    pub const SLEEP: Self = Self(12);
    pub const INVSTATE: Self = Self(13);
    pub const MEMORY: Self = Self(16);
    pub const FORMAT: Self = Self(17);
    pub const VERSION: Self = Self(18);
    /// Function or variable not found.
    pub const NOTFOUND: Self = Self(19);
    pub const INDEX: Self = Self(20);
    pub const DEBUG: Self = Self(21);
    pub const INIT: Self = Self(22);
    pub const USERDATA: Self = Self(23);
    pub const INIT_JIT: Self = Self(24);
    pub const PARAMS: Self = Self(25);
    pub const DOMAIN: Self = Self(26);
    pub const GENERAL: Self = Self(27);

    /// Raw cell value.
    pub const fn code(self) -> Cell {
        self.0
    }

    /// True for [`ErrorCode::NONE`].
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Short symbolic name, if the code is a known one.
    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            0 => "AMX_ERR_NONE",
            1 => "AMX_ERR_EXIT",
            2 => "AMX_ERR_ASSERT",
            3 => "AMX_ERR_STACKERR",
            4 => "AMX_ERR_BOUNDS",
            5 => "AMX_ERR_MEMACCESS",
            6 => "AMX_ERR_INVINSTR",
            7 => "AMX_ERR_STACKLOW",
            8 => "AMX_ERR_HEAPLOW",
            9 => "AMX_ERR_CALLBACK",
            10 => "AMX_ERR_NATIVE",
            11 => "AMX_ERR_DIVIDE",
            12 => "AMX_ERR_SLEEP",
            13 => "AMX_ERR_INVSTATE",
            16 => "AMX_ERR_MEMORY",
            17 => "AMX_ERR_FORMAT",
            18 => "AMX_ERR_VERSION",
            19 => "AMX_ERR_NOTFOUND",
            20 => "AMX_ERR_INDEX",
            21 => "AMX_ERR_DEBUG",
            22 => "AMX_ERR_INIT",
            23 => "AMX_ERR_USERDATA",
            24 => "AMX_ERR_INIT_JIT",
            25 => "AMX_ERR_PARAMS",
            26 => "AMX_ERR_DOMAIN",
            27 => "AMX_ERR_GENERAL",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "error {}", self.0),
        }
    }
}

/// Errors from the pure wire encoders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Public function index outside `0..65025`.
    #[error("public index {0} out of range")]
    PublicIndexOutOfRange(Cell),

    /// Native address does not fit the five-digit token.
    #[error("native address {0:#x} out of range")]
    NativeAddressOutOfRange(u64),

    /// Cell does not carry the address token tag.
    #[error("cell {0:#010x} is not an address token")]
    NotAnAddressToken(u32),

    /// A token digit was zero.
    #[error("address token contains a zero digit")]
    ZeroDigit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_known_code() {
        assert_eq!(ErrorCode::SLEEP.to_string(), "AMX_ERR_SLEEP (12)");
        assert_eq!(ErrorCode::NOTFOUND.to_string(), "AMX_ERR_NOTFOUND (19)");
    }

    #[test]
    fn display_unknown_code() {
        assert_eq!(ErrorCode(400).to_string(), "error 400");
        assert_eq!(ErrorCode(14).name(), None);
    }

    #[test]
    fn display_encode_errors() {
        assert_eq!(
            EncodeError::PublicIndexOutOfRange(65025).to_string(),
            "public index 65025 out of range"
        );
        assert_eq!(
            EncodeError::NotAnAddressToken(0x1234).to_string(),
            "cell 0x00001234 is not an address token"
        );
    }
}
