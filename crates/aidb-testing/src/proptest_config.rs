//! Shared proptest configuration
//!
//! ```rust,ignore
//! proptest! {
//!     #![proptest_config(aidb_testing::proptest_config::auto_config())]
//!
//!     #[test]
//!     fn my_property(x in 0..100i32) { /* ... */ }
//! }
//! ```
//!
//! `PROPTEST_CASES` controls thoroughness: 64 for PR checks, thousands
//! for nightly runs.

use proptest::prelude::*;

/// Cases from `PROPTEST_CASES`, 256 when unset
pub fn auto_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(256);

    ProptestConfig {
        cases,
        ..ProptestConfig::default()
    }
}

/// For properties whose cases drive a live session: each case costs a
/// handshake, so keep the count small.
pub fn session_config() -> ProptestConfig {
    ProptestConfig {
        cases: 32,
        max_shrink_iters: 64,
        ..ProptestConfig::default()
    }
}
