#[macro_use]
pub(crate) mod macros;

pub(crate) mod data_structures;
pub(crate) mod error;
pub(crate) mod ids;
pub(crate) mod setup;
pub(crate) mod utils;

pub use data_structures::{Map, Set};
