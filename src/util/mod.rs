mod expand_tilde;
mod mkdir;
mod mount;
mod mounts;
mod output;
mod signals;
mod statvfs;

pub use expand_tilde::*;
pub use mkdir::*;
pub use mount::*;
pub use mounts::*;
pub use output::*;
pub use signals::*;
pub use statvfs::*;
