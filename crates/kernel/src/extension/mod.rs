//! Extension identity and static description.
//!
//! This module defines:
//! - Case-insensitive extension identifiers
//! - Immutable extension descriptors with declared activation events
//! - Incremental catalog deltas

mod descriptor;
mod id;

pub use descriptor::{
    ExtensionDescriptor, ExtensionsDelta, STARTUP_FINISHED_EVENT, WILDCARD_EVENT,
    WORKSPACE_CONTAINS_PREFIX,
};
pub use id::ExtensionId;
