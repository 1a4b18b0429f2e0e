use std::fmt;

/// The fixed, enumerated set of cache keys
///
/// Every user-scoped view model the client caches has exactly one key here.
/// Keeping the set closed bounds the store size, which is what makes lazy
/// eviction sufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Subscription,
    UserProfile,
    Rewards,
    Bloodwork,
    MealPlans,
    ScanHistory,
}

impl CacheKey {
    pub const ALL: [CacheKey; 6] = [
        CacheKey::Subscription,
        CacheKey::UserProfile,
        CacheKey::Rewards,
        CacheKey::Bloodwork,
        CacheKey::MealPlans,
        CacheKey::ScanHistory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKey::Subscription => "SUBSCRIPTION",
            CacheKey::UserProfile => "USER_PROFILE",
            CacheKey::Rewards => "REWARDS",
            CacheKey::Bloodwork => "BLOODWORK",
            CacheKey::MealPlans => "MEAL_PLANS",
            CacheKey::ScanHistory => "SCAN_HISTORY",
        }
    }

    /// Keys purged on sign-out
    pub fn user_scoped() -> Vec<&'static str> {
        Self::ALL.iter().map(CacheKey::as_str).collect()
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browser-local state removed alongside the user-scoped cache keys on sign-out
pub const SIGNOUT_COMPANION_KEYS: [&str; 4] = [
    "auth_token",
    "refresh_token",
    "referral_code",
    "referral_tracked",
];
