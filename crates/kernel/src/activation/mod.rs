//! Extension activation.
//!
//! This module holds:
//! - The per-extension activation records and their timings
//! - The disposable bags modules fill during activation
//! - The activator that serializes, memoizes, and orders activation

mod activator;
mod disposable;
mod record;

pub use activator::ExtensionActivator;
pub use disposable::{Disposable, DisposableStore};
pub(crate) use record::ActivationRecord;
pub use record::{ActivatedExtension, ActivationReason, ActivationTimes};
