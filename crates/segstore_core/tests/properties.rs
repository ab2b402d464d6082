//! Property tests for the cursor protocol.

use proptest::prelude::*;
use segstore_core::{Config, CoreError, MemoryBackend, MemoryMedium, Store};

fn open(medium: &MemoryMedium, config: Config) -> Store {
    Store::open_with_backend(Box::new(MemoryBackend::new(medium)), config).unwrap()
}

fn drain(store: &mut Store, chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        let n = store.consume(&mut buf).unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Everything appended, with saves in between, reads back in order.
    #[test]
    fn append_consume_round_trip(
        chunks in prop::collection::vec((prop::collection::vec(any::<u8>(), 0..32), any::<bool>()), 0..24),
        read_chunk in 1usize..17,
    ) {
        let medium = MemoryMedium::new();
        let mut store = open(&medium, Config::default());
        let mut expected = Vec::new();
        for (bytes, save) in &chunks {
            store.append(bytes).unwrap();
            expected.extend_from_slice(bytes);
            if *save {
                let _ = store.save().unwrap();
            }
        }
        store.close().unwrap();

        let mut store = open(&medium, Config::default());
        prop_assert_eq!(drain(&mut store, read_chunk), expected);
    }

    /// Unread bytes are folded forward exactly once whatever the copy buffer.
    #[test]
    fn fold_is_independent_of_buffer_size(
        head in prop::collection::vec(any::<u8>(), 0..16),
        middle in prop::collection::vec(any::<u8>(), 0..64),
        tail in prop::collection::vec(any::<u8>(), 0..16),
        read_fraction in 0.0f64..=1.0,
        buffer in 1usize..80,
    ) {
        let medium = MemoryMedium::new();
        let mut store = open(&medium, Config::default().copy_buffer_size(buffer));
        store.append(&head).unwrap();
        let first = store.save().unwrap();
        store.append(&middle).unwrap();
        let second = store.save().unwrap();
        store.append(&tail).unwrap();

        store.resume(first).unwrap();
        let k = ((middle.len() as f64) * read_fraction) as usize;
        let mut consumed = vec![0u8; k];
        store.consume_exact(&mut consumed).unwrap();
        prop_assert_eq!(&consumed[..], &middle[..k]);

        store.resume(second).unwrap();
        prop_assert_eq!(drain(&mut store, 7), tail);
        store.close().unwrap();

        let mut store = open(&medium, Config::default());
        prop_assert_eq!(drain(&mut store, 5), middle[k..].to_vec());
    }

    /// Redeeming a token this store never minted fails and changes nothing.
    #[test]
    fn foreign_token_mutates_nothing(
        id in 1_000i64..,
        before_resume in prop::collection::vec(any::<u8>(), 1..16),
    ) {
        let mut store = Store::open_in_memory().unwrap();
        store.append(b"sealed").unwrap();
        let token = store.save().unwrap();
        store.append(&before_resume).unwrap();
        store.resume(token).unwrap();

        let segments = store.segments().unwrap();
        let stats = store.stats().snapshot();
        let foreign = store.decode_token(&id.to_le_bytes()).unwrap();
        let result = store.resume(foreign);
        let is_unknown_token = matches!(result, Err(CoreError::UnknownToken { .. }));
        prop_assert!(is_unknown_token);
        prop_assert_eq!(store.segments().unwrap(), segments);
        prop_assert_eq!(store.stats().snapshot(), stats);
        prop_assert_eq!(drain(&mut store, 4), before_resume);
    }
}
