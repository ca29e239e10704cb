//! Route path resolution.
//!
//! Each tunterm rule names its redirect target as a route path descriptor
//! (egress interface plus next hop). The table manager hands descriptors to
//! a [`RoutePathResolver`] and stores the resolved [`ForwardingPath`]s on the
//! session; the adjacency they contribute becomes the classify metadata the
//! dataplane writes into redirected packets.

mod adjacency;
mod types;

pub use adjacency::AdjacencyTable;
pub use types::{ForwardingPath, PathError, RoutePathDescriptor, RoutePathResolver};
