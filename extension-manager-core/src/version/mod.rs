//! Version parsing, ordering and host compatibility ranges.

mod number;
mod range;

pub use number::Version;
pub use range::VersionRange;
