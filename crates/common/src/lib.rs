//! Shared types and wire encodings for amxkit.
//!
//! This crate provides the pieces both sides of the native/scheduler
//! boundary agree on:
//!
//! - [`Cell`] and [`InstanceId`]: the machine word and instance identity
//! - [`ErrorCode`]: machine status codes
//! - [`SleepCode`]: packed suspend requests handed to the scheduler
//! - [`address`]: address-like tokens for public and native functions
//! - [`limits`]: pool id packing and default capacities
//!
//! # Dependencies
//!
//! This crate uses `thiserror` and has no other dependencies.

pub mod address;
pub mod cell;
pub mod error;
pub mod limits;
pub mod sleep;

// Re-export commonly used types at the crate root.
pub use cell::{Cell, InstanceId, UCell, CELL_SIZE};
pub use error::{EncodeError, ErrorCode};
pub use sleep::{SleepCode, SleepKind};

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Strategy that generates a random sleep kind.
    fn arb_sleep_kind() -> impl Strategy<Value = SleepKind> {
        prop::sample::select(&sleep::ALL_SLEEP_KINDS[..])
    }

    proptest! {
        /// Every encoded request decodes back to the same kind, and the
        /// payload survives whenever it fits the value mask.
        #[test]
        fn sleep_code_decodes(kind in arb_sleep_kind(), payload in 0..=0x00FF_FFFFi32) {
            let code = SleepCode::new(kind, payload);
            let decoded = SleepCode::decode(code.encode()).unwrap();
            prop_assert_eq!(decoded.kind(), kind);
            if kind.has_payload() {
                prop_assert_eq!(decoded.payload(), payload);
            }
        }

        /// Sleep codes always carry a tag, so they never collide with small
        /// plain return values.
        #[test]
        fn sleep_codes_are_negative(kind in arb_sleep_kind(), payload in any::<i32>()) {
            prop_assert!(SleepCode::new(kind, payload).encode() < 0);
        }

        /// Every public index in range decodes back to itself.
        #[test]
        fn public_token_inverts(index in 0..address::PUBLIC_INDEX_LIMIT) {
            let token = address::encode_public(index).unwrap();
            prop_assert_eq!(address::decode_public(token), Ok(index));
        }

        /// Native tokens never contain a zero byte in the digit positions.
        #[test]
        fn native_token_has_no_zero_digit(ptr in 0..address::NATIVE_ADDRESS_LIMIT) {
            let [first, second] = address::encode_native(ptr).unwrap();
            let first = first as u32;
            let second = second as u32;
            for byte in [first >> 16 & 0xFF, first >> 8 & 0xFF, first & 0xFF, second >> 24, second >> 16 & 0xFF] {
                prop_assert_ne!(byte, 0);
            }
            prop_assert_eq!(address::decode_native([first as Cell, second as Cell]), Ok(ptr));
        }

        /// Pool ids survive packing for every slot and generation.
        #[test]
        fn pool_id_unpacks(slot in 0..limits::MAX_POOL_SLOTS, generation in 0u32..2048) {
            let id = limits::pack_id(slot, generation);
            prop_assert!(id > 0);
            prop_assert_eq!(limits::unpack_id(id), Some((slot, generation)));
        }
    }
}
