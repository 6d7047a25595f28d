use crate::utils::{align_up, fnv1a64, is_aligned, modified_utf8_hash};

#[test]
fn align_up_rounds_to_power_of_two() {
    assert_eq!(align_up(0, 16), Some(0));
    assert_eq!(align_up(1, 16), Some(16));
    assert_eq!(align_up(4095, 4096), Some(4096));
    assert_eq!(align_up(4097, 4096), Some(8192));
}

#[test]
fn align_up_reports_overflow() {
    assert_eq!(align_up(u32::MAX - 2, 4), None);
    assert_eq!(align_up(u32::MAX - 3, 4), Some(u32::MAX - 3));
}

#[test]
fn is_aligned_checks_low_bits() {
    assert!(is_aligned(32, 16));
    assert!(!is_aligned(33, 16));
    assert!(is_aligned(7, 1));
}

#[test]
fn fnv1a64_known_vectors() {
    assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
    assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
    assert_ne!(fnv1a64(b"ab"), fnv1a64(b"ba"));
}

#[test]
fn descriptor_hash_is_java_style() {
    assert_eq!(modified_utf8_hash(""), 0);
    assert_eq!(modified_utf8_hash("A"), 65);
    assert_eq!(modified_utf8_hash("AB"), 65 * 31 + 66);
}
