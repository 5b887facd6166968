//! Configuration types and helpers.

mod defaults;
mod podlease;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use podlease::*;
