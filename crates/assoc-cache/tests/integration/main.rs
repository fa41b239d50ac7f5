// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod concurrency;
pub mod invalidation;
pub mod sizing;

pub use utils::*;
