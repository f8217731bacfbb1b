//! Cross-cutting, shared constants.
//!
//! Key namespaces are defined here so the hashing scheme and the reserved
//! prefixes can be checked against each other in one place.

use std::time::Duration;

/// Default prefix mixed into every logical name before hashing.
pub const DEFAULT_KEY_PREFIX: &str = "tagcache_";

/// Number of hex characters in a physical key (128 bits).
pub const PHYSICAL_KEY_HEX_LEN: usize = 32;

/// Prefix of reserved tag-index keys. Physical keys are lowercase hex, so a
/// colon can never appear in one.
pub const TAG_INDEX_PREFIX: &str = "tag::";

/// Reserved key listing every tag that currently has an index.
pub const TAG_REGISTRY_KEY: &str = "tag::*registry";

/// Logical-name prefix of smart-cache shadow copies.
pub const SMART_SHADOW_PREFIX: &str = "smart-shadow:";

/// Extra lifetime given to a smart-cache shadow copy.
pub const SMART_SHADOW_EXTRA_TTL: Duration = Duration::from_secs(60);

/// Default "one in N" odds of sweeping expired entries at construction.
pub const DEFAULT_SWEEP_ODDS: u32 = 50;

/// Default period of the background janitor.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Default per-command timeout for the distributed-memory backend.
pub const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 250;

/// Default max entry count of the process-local backend.
pub const DEFAULT_LOCAL_CAPACITY: u64 = 100_000;

/// Upper bound for hashed sub-directory levels of the file backend.
pub const MAX_DIRECTORY_LEVEL: u8 = 8;

/// Separator used when joining ids into a composite (solid) cache name.
pub const SOLID_ID_SEPARATOR: &str = ",";
