/// Compute a non-zero 32-bit FNV-1a hash over an iterator of byte slices.
///
/// Used to derive deterministic `comm_id` values that all members of a
/// split agree on. Zero is reserved for the root communicator, so a zero
/// hash maps to 1.
pub(super) fn fnv1a_comm_id<I, S>(parts: I) -> u32
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut h: u64 = 0xcbf29ce484222325; // FNV-1a offset basis
    for part in parts {
        for &b in part.as_ref() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
    }
    let id = ((h >> 32) ^ h) as u32;
    if id == 0 { 1 } else { id }
}
