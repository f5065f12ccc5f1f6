//! Domain layer: forest topology, values and routes
//!
//! This layer never calls embedder code; it only computes and stores.

pub mod error;
pub mod forest;
pub mod node;
pub mod route;
pub mod value;

pub use error::{ForestError, ForestResult};
pub use forest::{Ancestors, Attached, Descendants, Detached, Forest, Lifecycle, TreeChange, TreeId};
pub use node::{Event, HandlerId, NodeKey, OwnerType, Property};
pub use route::{Route, Strategy};
pub use value::{ObjectType, Value, ValueKind};
