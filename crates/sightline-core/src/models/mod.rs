//! Data models for Sightline

mod cicd;
mod filter;
mod issue;
mod result;
mod scan;
mod scm;

pub use cicd::*;
pub use filter::*;
pub use issue::*;
pub use result::*;
pub use scan::*;
pub use scm::*;
