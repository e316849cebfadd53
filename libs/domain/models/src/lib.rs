//! Shared domain entities for the orchestration kernel.
//!
//! Single source of truth for the types that cross component boundaries
//! (Store, LifecycleManager, Scheduler, CommandBus, API handlers). Nothing
//! in this crate owns mutable state — it only defines the shapes other
//! crates operate on.

pub mod command;
pub mod errors;
pub mod event;
pub mod liveness;
pub mod node;
pub mod transition;
pub mod vm;

pub use command::{CommandOutcome, CommandType, PendingCommand};
pub use errors::InvalidTransition;
pub use event::{Event, EventSeverity};
pub use liveness::LivenessState;
pub use node::{GpuSpec, Node, NodeCapacity, NodeReputation, NodeStatus, PricingSchedule, ResourceQuantity};
pub use transition::{TransitionContext, TransitionSource};
pub use vm::{NetworkConfig, Vm, VmBilling, VmSpec, VmStatus, VmType};
