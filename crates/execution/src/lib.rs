//! Host execution contracts the lowering pass operates on.
//!
//! Architecture role:
//! - stage and pipeline contracts of the host engine
//! - instantiated host expression objects
//! - connector and pipeline-adapter registries
//! - accelerator device handles (memory resource, stream, columns, scalars)
//!
//! Key modules:
//! - [`stage`]
//! - [`pipeline`]
//! - [`host_expr`]
//! - [`adapter`]
//! - [`device`]

pub mod adapter;
pub mod connector;
pub mod device;
pub mod host_expr;
pub mod pipeline;
pub mod stage;

// Re-export only what you want at the crate root (no globs).
pub use adapter::{AdapterRegistry, PipelineAdapter, global_adapter_registry};
pub use connector::{Connector, ConnectorRegistry, global_connector_registry};
pub use device::{
    ColumnOrView, DeviceContext, DeviceMemoryResource, DeviceScalar, DeviceStream,
    MemoryResourceMode, create_memory_resource,
};
pub use host_expr::{HostExpr, HostExprKind, LITERAL_NAME};
pub use pipeline::Pipeline;
pub use stage::{HostStage, Stage, StageKind};
