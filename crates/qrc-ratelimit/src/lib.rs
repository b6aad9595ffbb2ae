pub mod limiter;
pub mod rules;
pub mod store;

pub use limiter::{RateLimitDecision, RateLimiter};
pub use rules::{RateRule, ResolvedRule, RuleSet};
pub use store::{SqliteWindowStore, WindowStore, WindowStoreError};
