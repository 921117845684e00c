pub mod dirs;
pub mod files;
pub mod registry;
pub mod session;

pub use files::{ProjectFiles, WriteMode};
pub use registry::{FileRegistry, ProjectRegistry};
pub use session::{SessionStore, Sessions};
