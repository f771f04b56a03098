// Type definitions for the manuscript review backend

pub mod ledger;
pub mod manuscript;
pub mod region;
pub mod workflow;

pub use ledger::*;
pub use manuscript::*;
pub use region::*;
pub use workflow::*;
