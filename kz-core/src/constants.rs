// Annotation keys carried on tracked objects and their parents
pub const TRACE_ANNOTATION_KEY: &str = "kausality.io/trace";
pub const TRACE_LABEL_ANNOTATION_PREFIX: &str = "kausality.io/trace-";
pub const MODE_ANNOTATION_KEY: &str = "kausality.io/mode";
pub const CONTROLLERS_ANNOTATION_KEY: &str = "kausality.io/controllers";
pub const UPDATERS_ANNOTATION_KEY: &str = "kausality.io/updaters";
pub const PHASE_ANNOTATION_KEY: &str = "kausality.io/phase";
pub const APPROVALS_ANNOTATION_KEY: &str = "kausality.io/approvals";
pub const REJECTIONS_ANNOTATION_KEY: &str = "kausality.io/rejections";
pub const FREEZE_ANNOTATION_KEY: &str = "kausality.io/freeze";
pub const SNOOZE_ANNOTATION_KEY: &str = "kausality.io/snooze";

// Wildcard accepted in approval/rejection child fields and policy resources
pub const MATCH_ANY: &str = "*";

pub const STATUS_SUBRESOURCE: &str = "status";

// controllers/updaters sets: 5-char base36 hashes, at most 5 entries (FIFO)
pub const USER_HASH_LEN: usize = 5;
pub const USER_HASH_SET_CAP: usize = 5;

// Env vars
pub const POD_NAMESPACE_ENV_VAR: &str = "POD_NAMESPACE";

// Defaults
pub const WEBHOOK_PORT: &str = "8443";
pub const OBSERVER_PORT: &str = "8080";
pub const DEFAULT_POLICY_REFRESH_SECONDS: u64 = 30;

// Timing
pub const PARENT_FETCH_TIMEOUT_SECONDS: u64 = 5;
pub const DISPATCH_MAX_ATTEMPTS: usize = 3;
pub const DISPATCH_BACKOFF_SECONDS: u64 = 1;
pub const DEDUP_EXPIRY_SECONDS: i64 = 86400;
