use super::*;

#[test]
fn empty_store_layout() {
    let store = KeyValueStore::new();
    let bytes = store.serialize();

    assert_eq!(store.deterministic_len(), 1);
    assert_eq!(bytes[0], 0);
    assert_eq!(bytes.len(), store.serialized_size());
    // Non-deterministic fields are always present.
    assert_eq!(&bytes[1..15], b"apex-versions\0");
}

#[test]
fn deterministic_entries_sorted() {
    let mut store = KeyValueStore::new();
    store.insert("debuggable", "false").unwrap();
    store.insert("class-path", "app.kdx").unwrap();

    let bytes = store.serialize();
    let prefix = &bytes[..store.deterministic_len()];
    assert_eq!(prefix, b"class-path\0app.kdx\0debuggable\0false\0\0");
}

#[test]
fn size_ignores_non_deterministic_values() {
    let mut a = KeyValueStore::new();
    let mut b = KeyValueStore::new();
    a.insert("dex2oat-cmdline", "x").unwrap();
    b.insert("dex2oat-cmdline", "a much longer command line").unwrap();

    assert_eq!(a.serialized_size(), b.serialized_size());
    assert_eq!(a.serialize().len(), b.serialize().len());
    assert_ne!(a.serialize(), b.serialize());
}

#[test]
fn unknown_key_rejected() {
    let mut store = KeyValueStore::new();
    let err = store.insert("favorite-color", "blue").unwrap_err();
    assert_eq!(err, KeyValueError::UnknownKey("favorite-color".into()));
}

#[test]
fn embedded_nul_rejected() {
    let mut store = KeyValueStore::new();
    let err = store.insert("class-path", "a\0b").unwrap_err();
    assert_eq!(err, KeyValueError::EmbeddedNul("class-path".into()));
}

#[test]
fn overlong_value_rejected() {
    let mut store = KeyValueStore::new();
    let err = store.insert("dex2oat-host", "h".repeat(65)).unwrap_err();
    assert_eq!(
        err,
        KeyValueError::ValueTooLong {
            key: "dex2oat-host".into(),
            len: 65,
            max: 64,
        }
    );
    store.insert("dex2oat-host", "h".repeat(64)).unwrap();
}

#[test]
fn parse_roundtrip() {
    let mut store = KeyValueStore::new();
    store.insert("compilation-reason", "install").unwrap();
    store.insert("requires-image", "true").unwrap();
    store.insert("apex-versions", "/1/2").unwrap();

    let parsed = KeyValueStore::parse(&store.serialize()).unwrap();
    assert_eq!(parsed, store);
    assert_eq!(parsed.get("apex-versions"), Some("/1/2"));
    assert_eq!(parsed.get("dex2oat-cmdline"), None);
}

#[test]
fn parse_rejects_non_deterministic_key_in_prefix() {
    let bytes = b"dex2oat-host\0box\0\0";
    assert_eq!(
        KeyValueStore::parse(bytes),
        Err(KeyValueError::UnknownKey("dex2oat-host".into()))
    );
}

#[test]
fn parse_rejects_truncation() {
    let store = KeyValueStore::new();
    let bytes = store.serialize();
    let err = KeyValueStore::parse(&bytes[..bytes.len() - 10]).unwrap_err();
    assert!(matches!(err, KeyValueError::Malformed(_)));
}

#[test]
fn key_partitions() {
    assert!(is_deterministic_key("boot-classpath-checksums"));
    assert!(!is_deterministic_key("dex2oat-cmdline"));
    assert_eq!(DETERMINISTIC_KEYS.len(), 7);
    assert_eq!(NON_DETERMINISTIC_KEYS.len(), 3);
}
