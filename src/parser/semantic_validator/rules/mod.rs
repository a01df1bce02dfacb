//! Validation Rules
//!
//! Each file in this module contains one validation rule:
//!
//! - `unknown_action.rs` - Nodes whose action is not an available capability
//! - `nested_activation.rs` - Capability calls that did not become nodes
//! - `value_rebinding.rs` - Node outputs overwritten by plain values
//! - `forward_reference.rs` - Arguments naming a call further down the module
//! - `opaque_reference.rs` - Node outputs read inside untracked expressions
//! - `unused_output.rs` - Node outputs bound to a variable nobody reads
//! - `empty_workflow.rs` - Modules that compile to no nodes at all

mod empty_workflow;
mod forward_reference;
mod nested_activation;
mod opaque_reference;
mod unknown_action;
mod unused_output;
mod value_rebinding;

pub use empty_workflow::EmptyWorkflowRule;
pub use forward_reference::ForwardReferenceRule;
pub use nested_activation::NestedActivationRule;
pub use opaque_reference::OpaqueReferenceRule;
pub use unknown_action::UnknownActionRule;
pub use unused_output::UnusedOutputRule;
pub use value_rebinding::ValueRebindingRule;
