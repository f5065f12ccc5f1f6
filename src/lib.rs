//! Host-independent tree runtime
//!
//! A [`Runtime`] keeps a forest of parent/child relations between embedder
//! nodes, a store of inheritable properties and a router that dispatches
//! events along routes computed from the forest.
//!
//! ```
//! use functree::{EventArgs, PropertyMetadata, Runtime, Strategy, ValueKind};
//!
//! struct Widget;
//!
//! let mut rt: Runtime<u32> = Runtime::new();
//! let color = rt
//!     .register_property::<Widget>("Color", ValueKind::Text, PropertyMetadata::new().inherits())
//!     .unwrap();
//! rt.attach(2, 1).unwrap();
//! rt.set_value(color, 1, "red").unwrap();
//! assert_eq!(rt.get_value(color, 2).as_text(), Some("red"));
//!
//! let click = rt.register_event::<Widget>("Click", Strategy::Bubble).unwrap();
//! rt.add_handler(click, 1, |_, _, args| {
//!     args.set_handled(true);
//!     Ok(())
//! })
//! .unwrap();
//! let mut args = EventArgs::new(click, 2);
//! rt.raise(&mut args).unwrap();
//! assert!(args.handled());
//! ```

pub mod application;
pub mod config;
pub mod domain;
pub mod util;

pub use application::{
    EventArgs, EventDescriptor, EventError, PropertyChange, PropertyError, PropertyMetadata, Runtime, RuntimeError,
    RuntimeResult, TraceContext,
};
pub use config::Settings;
pub use domain::{
    Event, Forest, ForestError, HandlerId, NodeKey, ObjectType, OwnerType, Property, Route, Strategy, TreeChange,
    TreeId, Value, ValueKind,
};
