//! VM sessions and execution.

mod error;
mod load;
mod path;
pub(crate) mod protected;
mod session;

pub use error::{ErrorKind, VmError};
pub use path::StringPath;
pub use session::Vm;
