//! Signal transforms applied before any fitting: background removal,
//! frequency-to-field re-indexing, numerical differentiation and peak
//! windowing.

pub mod background;
pub mod derivative;
pub mod reindex;
pub mod window;

pub use background::*;
pub use derivative::*;
pub use reindex::*;
pub use window::*;
