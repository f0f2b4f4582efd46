#![forbid(unsafe_code)]

//! Core data types shared by the gridlet spreadsheet kernel and its
//! front-ends: cell positions and ranges over a fixed 65536×65536 grid,
//! cell values, and per-column display metadata.
//!
//! Everything here is plain data. The evaluation engine, the spatial
//! indexes, and the undo log live in `gridlet-engine`.

mod address;
mod column;
mod value;

pub use address::{AddressParseError, Pos, Positions, Range, MAX_COORD};
pub use column::Column;
pub use value::{ErrorKind, Value};
