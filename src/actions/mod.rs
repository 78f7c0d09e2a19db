mod config;
mod plan;
mod run;

pub use config::*;
pub use plan::*;
pub use run::*;
