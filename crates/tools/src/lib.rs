//! Tool registry and built-in catalogue.
//!
//! - [`schema`] — parameter schemas, validation, JSON-schema rendering
//! - [`registry`] — descriptors, resolution, timed invocation
//! - [`catalogue`] — the controller tools (`ha_control`, `ha_automation`,
//!   `ha_config`, `ha_template`, `ha_events`)

pub mod catalogue;
pub mod registry;
pub mod schema;

pub use catalogue::register_builtin;
pub use registry::{Invocation, ProgressSink, Resolved, ToolContext, ToolDescriptor, ToolHandler, ToolRegistry};
pub use schema::{ObjectSchema, ParamSchema, ParamSpec, ParamType, SchemaError};
