//! Expiration evaluation for cached records.

use chrono::Utc;

use crate::policy::Policy;
use crate::record::{Record, Timestamp};

/// Whether `record` has outlived `policy` right now.
pub fn has_expired<T: Send + 'static>(record: &Record<T>, policy: &Policy<T>) -> bool {
    has_expired_at(record, policy, Utc::now())
}

/// Whether `record` has outlived `policy` at `now`.
///
/// Non-expirable policies never expire. Otherwise a record is expired once
/// its age reaches the ttl, so a zero ttl expires on the first check.
pub fn has_expired_at<T: Send + 'static>(
    record: &Record<T>,
    policy: &Policy<T>,
    now: Timestamp,
) -> bool {
    if !policy.is_expirable() {
        return false;
    }
    record.age_at(now) >= policy.ttl()
}
