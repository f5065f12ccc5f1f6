//! Application layer: property store, event router and the runtime that fires callbacks

pub mod error;
pub mod events;
pub mod properties;
pub mod runtime;
pub mod tracer;

pub use error::{EventError, PropertyError, RuntimeError, RuntimeResult};
pub use events::{EventArgs, EventDescriptor, EventHandler, EventRouter};
pub use properties::{
    ChangeCallback, CoerceCallback, PropertyChange, PropertyDescriptor, PropertyMetadata, PropertyStore,
    ValidateCallback,
};
pub use runtime::{LifecycleCallback, Runtime, TreeListener};
pub use tracer::{TraceCallback, TraceContext, TracePoint, Tracer};
