//! System-wide constants for the ClaimVault engine.

/// Default lifetime of an issued claim, in seconds.
pub const DEFAULT_CLAIM_TTL_SECS: i64 = 15 * 60;

/// Upper bound for the configurable claim lifetime, in seconds.
pub const MAX_CLAIM_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Default clock-skew tolerance applied to claim expiry, in seconds.
pub const DEFAULT_CLOCK_SKEW_TOLERANCE_SECS: i64 = 30;

/// Upper bound for the configurable clock-skew tolerance, in seconds.
pub const MAX_CLOCK_SKEW_TOLERANCE_SECS: i64 = 300;

/// Default bound on how long issuance waits for the ledger write, in milliseconds.
pub const DEFAULT_PERSIST_TIMEOUT_MS: u64 = 5_000;

/// Default grace window after expiry before an unused claim may be purged, in seconds.
pub const DEFAULT_GC_GRACE_SECS: i64 = 24 * 60 * 60;

/// Upper bound for the configurable purge grace window, in seconds.
pub const MAX_GC_GRACE_SECS: i64 = 365 * 24 * 60 * 60;

/// Default age after which a consumed record with no outcome is listed for
/// reconciliation, in seconds.
pub const DEFAULT_RECONCILE_STALE_AFTER_SECS: i64 = 5 * 60;

/// Upper bound for the configurable in-flight staleness cutoff, in seconds.
pub const MAX_RECONCILE_STALE_AFTER_SECS: i64 = 7 * 24 * 60 * 60;

/// Default sliding window for the conflict monitor, in milliseconds.
pub const DEFAULT_CONFLICT_WINDOW_MS: u64 = 60_000;

/// Default number of conflicts per subject inside the window before alerting.
pub const DEFAULT_CONFLICT_ALERT_THRESHOLD: usize = 20;

/// Default SQLite busy timeout for ledger connections, in milliseconds.
pub const DEFAULT_LEDGER_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Maximum subject length in characters.
pub const MAX_SUBJECT_LEN: usize = 128;

/// Maximum action type length in characters.
pub const MAX_ACTION_TYPE_LEN: usize = 64;

/// Maximum number of hex digits in an external transaction hash.
pub const MAX_TX_HASH_DIGITS: usize = 128;

/// Maximum length of a token amount's decimal text.
///
/// Bounds request size only. Amounts are held as canonical digit strings,
/// so precision is not limited by any fixed-width type.
pub const MAX_AMOUNT_DIGITS: usize = 256;

/// Domain tag prefixed to every claim signing digest.
pub const CLAIM_DIGEST_TAG: &[u8] = b"claimvault:claim:v1:";

/// Default application name folded into the signing domain.
pub const DEFAULT_APP_NAME: &str = "claimvault";

/// Default network identifier folded into the signing domain.
pub const DEFAULT_NETWORK_ID: &str = "devnet";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "ClaimVault";
