//! Shared proptest configuration so every suite runs with the same budget.

use proptest::test_runner::Config;

/// Default property-test configuration for LatticeDB crates.
pub fn proptest_config() -> Config {
    Config {
        cases: 64,
        max_shrink_iters: 1024,
        ..Config::default()
    }
}

/// A smaller budget for properties that drive whole datastore transactions.
pub fn proptest_config_heavy() -> Config {
    Config {
        cases: 16,
        max_shrink_iters: 256,
        ..Config::default()
    }
}
