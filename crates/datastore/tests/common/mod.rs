pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{name_row, stores};
