//! Alignment arithmetic and content hashing.

/// Page granularity of the host container mapping.
pub const PAGE_SIZE: u32 = 4096;

/// Round `value` up to the next multiple of `align` (a power of two).
///
/// Returns `None` when the result does not fit in `u32`.
///
/// # Examples
/// ```
/// use kiln_core::utils::align_up;
/// assert_eq!(align_up(13, 8), Some(16));
/// assert_eq!(align_up(16, 8), Some(16));
/// assert_eq!(align_up(u32::MAX, 8), None);
/// ```
#[inline]
pub fn align_up(value: u32, align: u32) -> Option<u32> {
    debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

#[inline]
pub fn is_aligned(value: u32, align: u32) -> bool {
    value & (align - 1) == 0
}

/// 64-bit FNV-1a over `bytes`.
///
/// Stable across builds and platforms; used as the content hash of the
/// deduplication stores.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Descriptor hash used by type lookup tables (`h = h * 31 + byte`).
pub fn modified_utf8_hash(descriptor: &str) -> u32 {
    descriptor
        .bytes()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(b as u32))
}
