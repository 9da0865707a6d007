//! This module contains constants and configuration parameters used by the codec
//! and its registry adapters.

use std::time::Duration;

/// The magic byte that starts every single-schema message.
pub const MAGIC_BYTE: u8 = 0;
/// Length of the single-schema message header: magic byte plus a big-endian `u32` schema ID.
pub const HEADER_LEN: usize = 5;
/// Upper bound on the number of symbols discovered when probing an enumeration type.
pub const MAX_ENUM_SYMBOLS: i64 = 250;
/// Whether map entries are written in key order. Rust maps have no stable
/// iteration order, so this keeps encoded output deterministic.
pub const SORT_MAP_KEYS: bool = true;
/// Deepest nesting of records, union branches, array items and map values
/// that decoding or encoding follows before failing. Every level is a native
/// stack frame, so this bounds stack use for recursive schemas.
pub const MAX_DEPTH: usize = 256;
/// Upper bound on the item count of one array or map block whose items take
/// no bytes on the wire, such as an array of `null`.
pub const MAX_EMPTY_ITEMS: i64 = 1 << 20;
/// Namespace given to fixed types synthesized for byte arrays.
pub const FIXED_NAMESPACE: &str = "rust";

/// Delay before the first registry retry.
pub const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(1);
/// Cap on the delay between two registry retries.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(1);
/// Total time budget for retrying one registry call.
pub const RETRY_MAX_ELAPSED: Duration = Duration::from_secs(5);
