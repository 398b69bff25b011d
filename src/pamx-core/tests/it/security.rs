//! Property-based tests for secret comparison and masking.

use proptest::prelude::*;

use pamx_core::security::MASKED;
use pamx_core::{constant_time_eq, mask_secret};

/// Strategy for arbitrary byte arrays.
fn byte_array() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    /// Reflexivity: any array equals itself.
    #[test]
    fn constant_time_reflexive(data in byte_array()) {
        prop_assert!(constant_time_eq(&data, &data));
    }

    /// Agrees with ordinary equality.
    #[test]
    fn constant_time_matches_eq(a in byte_array(), b in byte_array()) {
        prop_assert_eq!(constant_time_eq(&a, &b), a == b);
    }

    /// Flipping any single bit breaks equality.
    #[test]
    fn constant_time_detects_bit_flip(
        data in prop::collection::vec(any::<u8>(), 1..256),
        idx in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut other = data.clone();
        let i = idx.index(other.len());
        other[i] ^= 1 << bit;
        prop_assert!(!constant_time_eq(&data, &other));
    }

    /// Masked output never depends on the secret.
    #[test]
    fn mask_hides_secret(secret in ".{1,64}") {
        prop_assert_eq!(mask_secret(&secret, false), MASKED);
        prop_assert_eq!(mask_secret(&secret, true), secret.as_str());
    }
}
