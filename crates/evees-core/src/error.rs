use std::fmt;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    EntityNotFound,
    PerspectiveNotFound,
    RemoteNotFound,
    StoreNotFound,
    BehaviorNotFound,
    HashMismatch,
    InvalidSignature,
    AmbiguousChild,
    MultipleAuthorities,
    CycleDetected,
    MergeConflict,
    PreconditionFailed,
    SerializationFailed,
    InvalidCid,
    TaskFailed,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::EntityNotFound => "E2001",
            Self::PerspectiveNotFound => "E2002",
            Self::RemoteNotFound => "E2003",
            Self::StoreNotFound => "E2004",
            Self::BehaviorNotFound => "E2005",
            Self::HashMismatch => "E3001",
            Self::InvalidSignature => "E3002",
            Self::AmbiguousChild => "E3003",
            Self::MultipleAuthorities => "E3004",
            Self::CycleDetected => "E3005",
            Self::MergeConflict => "E3006",
            Self::PreconditionFailed => "E4001",
            Self::SerializationFailed => "E5001",
            Self::InvalidCid => "E5002",
            Self::TaskFailed => "E9001",
        }
    }

    /// Short human-facing summary for logs.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::EntityNotFound => "Entity not found",
            Self::PerspectiveNotFound => "Perspective not found",
            Self::RemoteNotFound => "Remote not found",
            Self::StoreNotFound => "CAS store not found",
            Self::BehaviorNotFound => "Behavior not found",
            Self::HashMismatch => "Entity hash mismatch",
            Self::InvalidSignature => "Invalid signature",
            Self::AmbiguousChild => "Ambiguous child index",
            Self::MultipleAuthorities => "Mutation spans more than one authority",
            Self::CycleDetected => "Perspective cycle detected",
            Self::MergeConflict => "Merge conflict",
            Self::PreconditionFailed => "Precondition failed",
            Self::SerializationFailed => "Serialization failed",
            Self::InvalidCid => "Invalid content identifier",
            Self::TaskFailed => "Background task failed",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::EntityNotFound | Self::PerspectiveNotFound => None,
            Self::RemoteNotFound | Self::StoreNotFound => {
                Some("Register the remote/store on the Evees service before using it.")
            }
            Self::BehaviorNotFound => Some("Register a pattern that recognizes this object."),
            Self::HashMismatch => Some("Discard the entity; its content does not match its id."),
            Self::InvalidSignature => Some("Re-sign the payload with the expected key."),
            Self::AmbiguousChild => Some("Address the child by index instead of by id."),
            Self::MultipleAuthorities => {
                Some("Split the proposal so each one targets a single remote.")
            }
            Self::CycleDetected => Some("Remove the child link that closes the cycle."),
            Self::MergeConflict => Some("Both sides must hold data of the same pattern."),
            Self::PreconditionFailed | Self::SerializationFailed | Self::InvalidCid => None,
            Self::TaskFailed => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The two ways a capability lookup can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorNotFoundKind {
    /// No registered pattern recognizes the object at all.
    NoBehaviors,
    /// The object is recognized, but none of its patterns implement the
    /// requested capability.
    MissingBehavior,
}

/// Errors produced by the evees core.
#[derive(Debug, thiserror::Error)]
pub enum EveesError {
    /// An entity, perspective, remote or store lookup failed.
    #[error("{what} {id} not found")]
    NotFound {
        /// What kind of thing was looked up.
        what: &'static str,
        /// The key that was looked up.
        id: String,
    },

    /// A capability lookup on an object failed.
    #[error("{message}")]
    BehaviorNotFound {
        /// Whether the object had no behaviors or just not this one.
        kind: BehaviorNotFoundKind,
        /// Human readable description.
        message: String,
    },

    /// The id claimed by an entity is not the id of its content.
    #[error("entity hash mismatch: claimed={claimed} computed={computed}")]
    HashMismatch {
        /// The id the entity arrived with.
        claimed: String,
        /// The id recomputed from the entity object.
        computed: String,
    },

    /// A signed entity failed signature verification.
    #[error("invalid signature on entity {0}")]
    InvalidSignature(String),

    /// More than one child with the same id was found under a parent.
    #[error("more than one child with id {child_id} found in {perspective_id}")]
    AmbiguousChild {
        /// The parent perspective.
        perspective_id: String,
        /// The duplicated child id.
        child_id: String,
    },

    /// A proposal or merge touched perspectives owned by different remotes.
    #[error("mutation spans more than one authority: {0:?}")]
    MultipleAuthorities(Vec<String>),

    /// A perspective graph walk came back to a perspective on its own path.
    #[error("perspective cycle detected at {0}")]
    CycleDetected(String),

    /// The two sides of a merge cannot be reconciled.
    #[error("merge conflict: {0}")]
    Conflict(String),

    /// An operation was invoked in a state where it cannot proceed.
    #[error("{0}")]
    Precondition(String),

    /// Entity payloads could not be (de)serialized.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A content identifier could not be built or parsed.
    #[error("invalid cid: {0}")]
    Cid(String),

    /// A spawned background task panicked or was cancelled unexpectedly.
    #[error("background task failed: {0}")]
    Task(String),
}

impl EveesError {
    /// Shorthand for a [`EveesError::NotFound`].
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            id: id.into(),
        }
    }

    /// Return the machine-readable error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { what, .. } => match *what {
                "perspective" => ErrorCode::PerspectiveNotFound,
                "remote" => ErrorCode::RemoteNotFound,
                "store" => ErrorCode::StoreNotFound,
                _ => ErrorCode::EntityNotFound,
            },
            Self::BehaviorNotFound { .. } => ErrorCode::BehaviorNotFound,
            Self::HashMismatch { .. } => ErrorCode::HashMismatch,
            Self::InvalidSignature(_) => ErrorCode::InvalidSignature,
            Self::AmbiguousChild { .. } => ErrorCode::AmbiguousChild,
            Self::MultipleAuthorities(_) => ErrorCode::MultipleAuthorities,
            Self::CycleDetected(_) => ErrorCode::CycleDetected,
            Self::Conflict(_) => ErrorCode::MergeConflict,
            Self::Precondition(_) => ErrorCode::PreconditionFailed,
            Self::Serialize(_) => ErrorCode::SerializationFailed,
            Self::Cid(_) => ErrorCode::InvalidCid,
            Self::Task(_) => ErrorCode::TaskFailed,
        }
    }

    /// True for the tagged capability-lookup failure that soft checks catch.
    #[must_use]
    pub const fn is_behavior_not_found(&self) -> bool {
        matches!(self, Self::BehaviorNotFound { .. })
    }
}

/// Result alias used across the crate.
pub type Result<T, E = EveesError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::EntityNotFound,
            ErrorCode::PerspectiveNotFound,
            ErrorCode::RemoteNotFound,
            ErrorCode::StoreNotFound,
            ErrorCode::BehaviorNotFound,
            ErrorCode::HashMismatch,
            ErrorCode::InvalidSignature,
            ErrorCode::AmbiguousChild,
            ErrorCode::MultipleAuthorities,
            ErrorCode::CycleDetected,
            ErrorCode::MergeConflict,
            ErrorCode::PreconditionFailed,
            ErrorCode::SerializationFailed,
            ErrorCode::InvalidCid,
            ErrorCode::TaskFailed,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::HashMismatch.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn not_found_maps_to_specific_codes() {
        assert_eq!(
            EveesError::not_found("remote", "local").code(),
            ErrorCode::RemoteNotFound
        );
        assert_eq!(
            EveesError::not_found("perspective", "zb2").code(),
            ErrorCode::PerspectiveNotFound
        );
        assert_eq!(
            EveesError::not_found("entity", "zb2").code(),
            ErrorCode::EntityNotFound
        );
    }

    #[test]
    fn behavior_not_found_is_tagged() {
        let err = EveesError::BehaviorNotFound {
            kind: BehaviorNotFoundKind::MissingBehavior,
            message: "Behavior children not found".into(),
        };
        assert!(err.is_behavior_not_found());
        assert!(!EveesError::Precondition("base not defined".into()).is_behavior_not_found());
    }
}
