mod accountant;
mod capacity;

pub use accountant::*;
pub use capacity::*;
