use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnowUtilsError {
    #[error("not initialized: run 'snow-utils init'")]
    NotInitialized,

    #[error("manifest corrupt at {path} (line {line}): {reason}; fix the file by hand, it is never repaired automatically")]
    ManifestCorrupt {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("instance {skill}:{key} already exists and is not REMOVED; replay it, delete it, or pick a different name")]
    DuplicateInstanceKey { skill: String, key: String },

    #[error("instance not found: {skill}:{key}")]
    UnknownInstance { skill: String, key: String },

    #[error("step '{step}' not found on instance {skill}:{key}")]
    UnknownStep {
        skill: String,
        key: String,
        step: String,
    },

    #[error("unknown resource family '{0}': run 'snow-utils skills' to list the available ones")]
    UnknownSkill(String),

    #[error("invalid transition for {instance} from {from} to {to}: {reason}")]
    InvalidTransition {
        instance: String,
        from: String,
        to: String,
        reason: String,
    },

    #[error("admin role for '{skill}' is already '{existing}', refusing to change it to '{requested}'; pass --override or use role '{existing}'")]
    AdminRoleConflict {
        skill: String,
        existing: String,
        requested: String,
    },

    #[error("step '{step}' failed for {instance}: {cause}; run 'snow-utils resume {instance}' once the cause is fixed")]
    ProvisioningFailed {
        instance: String,
        step: String,
        cause: String,
    },

    #[error("{0} is shared infrastructure and is never deleted")]
    ProtectedResource(String),

    #[error("{instance} is {status}, rotate needs COMPLETE; resume or replay it first")]
    NotComplete { instance: String, status: String },

    #[error("export needs every instance COMPLETE, found: {}", .0.join(", "))]
    NotAllComplete(Vec<String>),

    #[error("not a portable manifest, every instance must be REMOVED but found: {}; write one with 'snow-utils export'", .0.join(", "))]
    NotPortable(Vec<String>),

    #[error("cannot determine the identity prefix to adapt from: {0}; edit the marked fields by hand")]
    AmbiguousIdentity(String),

    #[error("invalid status '{0}': expected IN_PROGRESS, COMPLETE, REMOVED, PENDING or DONE")]
    InvalidStatus(String),

    #[error("missing required field '{field}' for {skill}")]
    MissingField { skill: String, field: String },

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("refusing to write the manifest after {op}, it would not parse back: {reason}")]
    Unencodable { op: String, reason: String },

    #[error("invalid instance key '{0}': must start with a letter or digit and contain only letters, digits, '_' or '-'")]
    InvalidInstanceKey(String),

    #[error("verification of {instance} failed after {attempts} attempt(s): {detail}")]
    VerificationFailed {
        instance: String,
        attempts: u32,
        detail: String,
    },

    #[error("replay-all blocked, every instance must be REMOVED: {}", .0.join("; "))]
    BatchBlocked(Vec<String>),

    #[error("replay-all stopped at {instance} after {completed} completed instance(s): {cause}")]
    BatchFailed {
        instance: String,
        completed: usize,
        cause: Box<SnowUtilsError>,
    },

    #[error("cancelled by operator")]
    Cancelled,

    #[error("manifest lock unavailable: {0}")]
    Lock(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SnowUtilsError>;
