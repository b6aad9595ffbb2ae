pub mod paths;
pub mod quota;
pub mod rate_limit;
pub mod service;

pub use paths::ConfigPaths;
pub use quota::QuotaSettings;
pub use rate_limit::{RateLimitSettings, RouteLimitSettings};
pub use service::ServiceConfig;
