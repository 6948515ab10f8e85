pub mod asn;
pub mod result;
pub mod stats;
pub mod target;

pub use asn::*;
pub use result::*;
pub use stats::*;
pub use target::*;
