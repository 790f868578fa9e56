use std::fmt;

use crate::lock::LockError;
use crate::store::StoreError;

/// Machine-readable error codes for operators and scripted runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalid,
    ValidationFailed,
    UnresolvedIdentity,
    AmbiguousIdentity,
    UnmappedComponent,
    UploadFailed,
    AttachmentInconsistency,
    AuthenticationFailed,
    StoreRequestFailed,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigInvalid => "E1001",
            Self::ValidationFailed => "E2001",
            Self::UnresolvedIdentity => "E2002",
            Self::AmbiguousIdentity => "E2003",
            Self::UnmappedComponent => "E2004",
            Self::UploadFailed => "E3001",
            Self::AttachmentInconsistency => "E3002",
            Self::AuthenticationFailed => "E4001",
            Self::StoreRequestFailed => "E4002",
            Self::LockContention => "E5001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigInvalid => "Invalid configuration",
            Self::ValidationFailed => "Missing required field",
            Self::UnresolvedIdentity => "No destination account for source user",
            Self::AmbiguousIdentity => "Several destination accounts match source user",
            Self::UnmappedComponent => "No label mapping for component",
            Self::UploadFailed => "Attachment upload failed",
            Self::AttachmentInconsistency => "Comment references an unknown attachment",
            Self::AuthenticationFailed => "Source tracker login failed",
            Self::StoreRequestFailed => "Remote request failed",
            Self::LockContention => "Elevation lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigInvalid => Some("Fix defaults.yml in the config directory and retry."),
            Self::ValidationFailed => None,
            Self::UnresolvedIdentity => Some(
                "Add the user to user_mappings.yml or configure gitlab_misc_user as a fallback.",
            ),
            Self::AmbiguousIdentity => {
                Some("Add the right GitLab username to user_mappings.yml manually.")
            }
            Self::UnmappedComponent => Some(
                "Add the component to component_mappings.yml or enable component_mapping_auto.",
            ),
            Self::UploadFailed => Some("Check the attachment on the source tracker and retry."),
            Self::AttachmentInconsistency => {
                Some("The source export is incomplete; re-fetch the bug including attachments.")
            }
            Self::AuthenticationFailed => Some("Check bugzilla_user and the password or API key."),
            Self::StoreRequestFailed => Some("Check connectivity and token permissions."),
            Self::LockContention => {
                Some("Another bugferry process is elevating the same account; retry later.")
            }
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Every failure the migration engine can report.
///
/// All variants are fatal to the bug being migrated; the orchestrator wraps
/// them in [`MigrationError::Bug`] so the offending bug id is reported.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// A required issue or comment field is empty.
    #[error("missing value for required field `{field}` on {entity}")]
    Validation { entity: &'static str, field: &'static str },

    /// No destination account matched and no fallback account is configured.
    #[error("no destination account found for source user `{identity}`")]
    UnresolvedIdentity { identity: String },

    /// More than one destination account matched; the resolver never guesses.
    #[error(
        "found more than one destination account for `{identity}`: {}",
        .candidates.join(", ")
    )]
    AmbiguousIdentity {
        identity: String,
        candidates: Vec<String>,
    },

    /// Component has no label mapping and auto-mapping is disabled.
    #[error("no component mapping found for `{component}`")]
    UnmappedComponent { component: String },

    /// Attachment payload was empty or the destination rejected the upload.
    #[error("upload of attachment {attachment_id} (`{filename}`) failed: {reason}")]
    Upload {
        attachment_id: u64,
        filename: String,
        reason: String,
    },

    /// A comment claims an attachment that the bug record does not carry.
    #[error("comment {comment_index} references attachment {attachment_id}, which is not part of the bug")]
    AttachmentInconsistency {
        comment_index: usize,
        attachment_id: u64,
    },

    /// Login to the source tracker exhausted its attempt budget.
    #[error("failed to log in as `{user}` after {attempts} attempts")]
    Authentication { user: String, attempts: u32 },

    /// Configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A collaborator (source tracker, destination, directory, mapping file) failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The per-account elevation lock could not be taken.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Failure while migrating a specific bug.
    #[error("bug {bug_id}: {source}")]
    Bug {
        bug_id: u64,
        #[source]
        source: Box<MigrationError>,
    },
}

impl MigrationError {
    /// Attach the offending bug id to this error, unless it already carries one.
    #[must_use]
    pub fn for_bug(self, bug_id: u64) -> Self {
        match self {
            Self::Bug { .. } => self,
            other => Self::Bug {
                bug_id,
                source: Box::new(other),
            },
        }
    }

    /// Machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationFailed,
            Self::UnresolvedIdentity { .. } => ErrorCode::UnresolvedIdentity,
            Self::AmbiguousIdentity { .. } => ErrorCode::AmbiguousIdentity,
            Self::UnmappedComponent { .. } => ErrorCode::UnmappedComponent,
            Self::Upload { .. } => ErrorCode::UploadFailed,
            Self::AttachmentInconsistency { .. } => ErrorCode::AttachmentInconsistency,
            Self::Authentication { .. } => ErrorCode::AuthenticationFailed,
            Self::Config(_) => ErrorCode::ConfigInvalid,
            Self::Store(_) => ErrorCode::StoreRequestFailed,
            Self::Lock(err) => err.code(),
            Self::Bug { source, .. } => source.code(),
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

pub type Result<T, E = MigrationError> = std::result::Result<T, E>;
