//! Input/output helpers.
//!
//! - table readers/writers (`table`)
//! - keyed directory ingest (`ingest`)
//! - stage hand-off tables (`export`)
//! - fit-curve JSON read/write (`curve`)

pub mod curve;
pub mod export;
pub mod ingest;
pub mod table;

pub use curve::*;
pub use export::*;
pub use ingest::*;
pub use table::*;
