use std::io::Cursor;

use murmur3::murmur3_32;

/// Stable 32-bit bucketing hash: MurmurHash3 (x86, 32-bit) with seed 0.
///
/// The output depends only on the input bytes, never on platform or process
/// state. Changing it reshuffles every rollout and variant assignment.
pub fn stable_hash(input: &str) -> u32 {
    // Reading from an in-memory cursor cannot fail.
    murmur3_32(&mut Cursor::new(input.as_bytes()), 0).unwrap_or(0)
}

/// Hash of a flag key and an identity string, in that order.
pub fn bucket_hash(flag_key: &str, identity: &str) -> u32 {
    let mut input = String::with_capacity(flag_key.len() + identity.len());
    input.push_str(flag_key);
    input.push_str(identity);
    stable_hash(&input)
}

/// Consistent percentage rollout.
/// The same identity always lands in the same bucket for a given flag.
pub fn in_rollout(flag_key: &str, identity: &str, percentage: u8) -> bool {
    if percentage == 0 {
        return false;
    }
    if percentage >= 100 {
        return true;
    }

    // Map hash to 0-99 range
    let bucket = bucket_hash(flag_key, identity) % 100;
    bucket < percentage as u32
}
