//! Binding registry: which table each interface classifies against.

mod registry;
mod types;

pub use registry::{BindingRegistry, SHOW_INTERFACES_HEADER};
pub use types::{BindingError, BindingStats, InterfaceBinding};
