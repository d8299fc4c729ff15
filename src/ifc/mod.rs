//! IFC (STEP physical file) support.
//!
//! Only as much of the format is understood as is needed to pull element
//! names, property sets and material names out of a file.

pub mod index;
pub mod parser;

pub use index::{ElementInfo, PropertyIndex, BUILDING_ELEMENT_TYPES};
pub use parser::{EntityTable, IfcEntity};
