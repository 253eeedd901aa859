// tether-ffi: #[repr(C)] types, handle types, ABI table definition.
// No external dependencies beyond the flag constants. This crate is the
// complete Rust <-> engine contract.

pub mod handles;
pub mod error;
pub mod types;
pub mod callbacks;
pub mod registration;
pub mod api_table;
pub mod contract_tests;

pub use handles::*;
pub use error::*;
pub use types::*;
pub use callbacks::*;
pub use registration::*;
pub use api_table::*;
pub use tether_flags::*;
