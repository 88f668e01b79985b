//! Hub configuration.

use std::time::Duration;

/// Default bound on a single delivery attempt.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do when a peer registers under an identity that is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// The newer registration wins; the previous handle is detached.
    #[default]
    Replace,
    /// The registration is refused with `HubError::DuplicateIdentity`.
    Reject,
}

/// Tunables for [`BroadcastHub`](crate::hub::BroadcastHub).
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// A delivery that has not completed within this bound counts as failed.
    pub delivery_timeout: Duration,

    /// Resolution for duplicate identities.
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

impl HubConfig {
    /// Set the per-delivery timeout
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Set the duplicate identity policy
    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }
}
