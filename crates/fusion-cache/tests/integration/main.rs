// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod configuration;
pub mod shared_store;
pub mod utils;

pub use utils::*;
