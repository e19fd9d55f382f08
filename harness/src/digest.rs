//! Bitwise state digests.

use xxhash_rust::xxh3::Xxh3;

use mulligan_engine::{Engine, GuestView};

/// 128-bit digest over a guest's full observable state: page count, linear
/// memory, and every typed global (type tag plus bit pattern).
///
/// Two guests with equal digests are bitwise-identical for rollback
/// purposes; NaN payloads and signed zeros are distinguished.
#[must_use]
pub fn state_digest(guest: &dyn GuestView) -> u128 {
    let mut hasher = Xxh3::new();
    hasher.update(&guest.page_count().to_le_bytes());
    hasher.update(guest.memory());
    let mut index = 0u32;
    while let Some(value) = guest.global(index) {
        hasher.update(&[value.ty() as u8]);
        hasher.update(&value.to_bits().to_le_bytes());
        index += 1;
    }
    hasher.digest128()
}

/// [`state_digest`] over the guest owned by an engine.
#[must_use]
pub fn engine_digest(engine: &Engine) -> u128 {
    state_digest(engine)
}
