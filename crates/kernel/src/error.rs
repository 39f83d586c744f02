//! Kernel error types.
//!
//! Activation failures are captured on the extension's activation record and
//! cloned out to every caller that joins the same attempt, so all variants
//! are `Clone` and carry their context as owned data.

use thiserror::Error;

use crate::extension::ExtensionId;

/// Errors surfaced by the extension kernel.
#[derive(Debug, Clone, Error)]
pub enum KernelError {
    /// The requested id is not in the owned catalog. Tolerated at the public
    /// boundary (the request is ignored); a hard failure only when raised
    /// while resolving another extension's dependency.
    #[error("unknown extension '{id}'")]
    UnknownExtension { id: ExtensionId },

    /// A declared dependency cannot be resolved: absent from the owned
    /// catalog, or closing a dependency cycle. Fails the dependent; the
    /// dependency's own record is unaffected.
    #[error("extension '{dependent}': dependency '{missing}' cannot be resolved")]
    MissingExtensionDependency {
        dependent: ExtensionId,
        missing: ExtensionId,
    },

    /// The module's load or activate step failed. Captured on the record,
    /// re-surfaced only to callers that query it.
    #[error("extension '{id}': activation failed: {details}")]
    ActivationFailed { id: ExtensionId, details: String },

    /// `get_activated_extension` was called for anything but an `Activated`
    /// record.
    #[error("extension '{id}' is not activated")]
    NotActivated { id: ExtensionId },

    /// A deactivation hook failed. Logged per extension, never propagated
    /// out of the shutdown path.
    #[error("extension '{id}': deactivation failed: {details}")]
    Deactivation { id: ExtensionId, details: String },

    /// The kernel was asked to start twice. Restart is not a supported
    /// transition.
    #[error("extension host already started")]
    AlreadyStarted,
}

impl KernelError {
    /// The dependency id attached to a dependency-resolution failure.
    pub fn missing_dependency(&self) -> Option<&ExtensionId> {
        match self {
            Self::MissingExtensionDependency { missing, .. } => Some(missing),
            _ => None,
        }
    }
}

/// Result type alias using KernelError.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_extension() {
        let err = KernelError::MissingExtensionDependency {
            dependent: ExtensionId::new("a.ext"),
            missing: ExtensionId::new("b.ext"),
        };
        let msg = err.to_string();
        assert!(msg.contains("a.ext"));
        assert!(msg.contains("b.ext"));
        assert_eq!(err.missing_dependency(), Some(&ExtensionId::new("B.EXT")));
    }

    #[test]
    fn only_dependency_failures_carry_a_missing_id() {
        let err = KernelError::ActivationFailed {
            id: ExtensionId::new("a.ext"),
            details: "boom".into(),
        };
        assert!(err.missing_dependency().is_none());
    }
}
