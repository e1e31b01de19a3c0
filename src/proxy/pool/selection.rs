use crate::constants::{is_core_model, QUOTA_FLOOR_FRACTION};
use crate::models::{Account, AccountStatus};

/// Whether the account still has room for the requested model. Falls back
/// to the core-model quotas when the specific model is unknown; accounts
/// with no quota data at all are given the benefit of the doubt.
pub(crate) fn quota_allows(account: &Account, model: &str) -> bool {
    let Some(subscription) = account.subscription.as_ref() else {
        return true;
    };
    if subscription.models.is_empty() {
        return true;
    }
    if let Some(quota) = subscription.models.get(model) {
        return quota.remaining_fraction > QUOTA_FLOOR_FRACTION;
    }
    let mut saw_core = false;
    for (name, quota) in &subscription.models {
        if is_core_model(name) {
            saw_core = true;
            if quota.remaining_fraction > QUOTA_FLOOR_FRACTION {
                return true;
            }
        }
    }
    !saw_core
}

fn tier(account: &Account, model: &str) -> u8 {
    match account.status {
        AccountStatus::Ok if quota_allows(account, model) => 0,
        AccountStatus::Unknown => 1,
        AccountStatus::Limited | AccountStatus::Ok => 2,
        AccountStatus::Error => 3,
    }
}

/// Selection policy: healthy accounts with quota first, then unknown, then
/// limited ones; least-recently-used inside each tier.
pub(crate) fn select_index(accounts: &[Account], model: &str) -> Option<usize> {
    accounts
        .iter()
        .enumerate()
        .filter(|(_, a)| a.enabled && !a.is_invalid)
        .min_by_key(|(_, a)| (tier(a, model), a.last_used.unwrap_or(0)))
        .map(|(idx, _)| idx)
}

/// Stats rollup: an enabled account is active when it reports ok and still
/// has usable core-model quota (any model's quota when no core model is
/// reported).
pub(crate) fn is_active(account: &Account) -> bool {
    if account.is_invalid || account.status != AccountStatus::Ok {
        return false;
    }
    let Some(subscription) = account.subscription.as_ref() else {
        return true;
    };
    if subscription.models.is_empty() {
        return true;
    }
    let mut saw_core = false;
    for (name, quota) in &subscription.models {
        if is_core_model(name) {
            saw_core = true;
            if quota.remaining_fraction > QUOTA_FLOOR_FRACTION {
                return true;
            }
        }
    }
    if saw_core {
        return false;
    }
    subscription
        .models
        .values()
        .any(|quota| quota.remaining_fraction > QUOTA_FLOOR_FRACTION)
}
