mod build;
mod emulated;
mod exec;
mod kernel;
mod namespace;
mod platform;
mod sandbox_struct;
mod teardown;

pub use emulated::*;
pub use kernel::*;
pub use namespace::*;
pub use platform::*;
pub use sandbox_struct::*;
