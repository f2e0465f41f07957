//! Policies Data

use tariff::{DiscountTerms, PolicyBounds, PolicyScope, PolicyWindow, PricePolicy};

/// New Policy Data
#[derive(Debug, Clone)]
pub struct NewPolicy {
    pub name: String,
    pub policy: PricePolicy,
}

/// Policy Update Data
///
/// Absent fields keep their stored value. `used` is never patched; it only
/// moves through usage increments.
#[derive(Debug, Clone, Default)]
pub struct PolicyPatch {
    pub name: Option<String>,
    pub terms: Option<DiscountTerms>,
    pub scope: Option<PolicyScope>,
    pub window: Option<PolicyWindow>,
    pub bounds: Option<PolicyBounds>,
    pub priority: Option<u8>,
    pub active: Option<bool>,
    pub exclusive: Option<bool>,
    pub max_total_uses: Option<Option<u32>>,
    pub max_uses_per_user: Option<Option<u32>>,
}

impl PolicyPatch {
    /// Merge this patch into a stored policy, returning the patched pair.
    pub(crate) fn apply(self, name: &mut String, policy: &mut PricePolicy) {
        if let Some(new_name) = self.name {
            *name = new_name;
        }
        if let Some(terms) = self.terms {
            policy.terms = terms;
        }
        if let Some(scope) = self.scope {
            policy.scope = scope;
        }
        if let Some(window) = self.window {
            policy.window = window;
        }
        if let Some(bounds) = self.bounds {
            policy.bounds = bounds;
        }
        if let Some(priority) = self.priority {
            policy.priority = priority;
        }
        if let Some(active) = self.active {
            policy.active = active;
        }
        if let Some(exclusive) = self.exclusive {
            policy.exclusive = exclusive;
        }
        if let Some(max_total) = self.max_total_uses {
            policy.usage.max_total = max_total;
        }
        if let Some(max_per_user) = self.max_uses_per_user {
            policy.usage.max_per_user = max_per_user;
        }
    }
}
