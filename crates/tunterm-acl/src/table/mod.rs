//! Table manager: one classify table per tunterm ACL, redirect sessions
//! replaced a whole batch at a time.

mod manager;
mod types;

pub use manager::TableManager;
pub use types::{RedirectSession, SessionAction, TableError, TableManagerStats, TunTermRule};
