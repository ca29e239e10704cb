//! Classification store - masked exact-match tables keyed on packet bytes.
//!
//! This is the host's generic classifier as the redirect engine uses it:
//! every table has a fixed geometry (a number of 16-byte vectors to skip
//! from the start of the packet data, a match window of one or two vectors
//! and a mask over that window), and every session maps one masked window
//! value to a [`ClassifyEntry`].
//!
//! ```text
//! packet data:  | skip_n_vectors * 16 | match_n_vectors * 16 | ...
//!                                      └─ & mask ─> MatchKey ─> ClassifyEntry
//! ```
//!
//! [`ClassifyMain`] is an ordinary owned value: the table manager owns one,
//! tests build their own, and dataplane snapshots hold clones.

mod store;
mod types;

pub use store::{ClassifyError, ClassifyMain, ClassifyTable};
pub use types::{
    ClassifyAction, ClassifyEntry, ClassifyGeometry, MatchKey, MAX_MATCH_BYTES, VECTOR_SIZE,
};
