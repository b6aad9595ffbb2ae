use std::time::Duration;

/// Infrastructure failure talking to the ledger store. Always retryable;
/// never a statement about limits.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Store write abandoned after the caller's deadline")]
    DeadlineExceeded,
    #[error("Store connection lock poisoned")]
    Poisoned,
    #[error("Store task failed: {0}")]
    Task(String),
    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn error_code(&self) -> &'static str {
        match self {
            StoreError::Sqlite(_) => "STORE_SQLITE",
            StoreError::Timeout(_) => "STORE_TIMEOUT",
            StoreError::DeadlineExceeded => "STORE_DEADLINE",
            StoreError::Poisoned => "STORE_POISONED",
            StoreError::Task(_) => "STORE_TASK",
            StoreError::Corrupt(_) => "STORE_CORRUPT",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),
    #[error("Quota store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl QuotaError {
    pub fn error_code(&self) -> &'static str {
        match self {
            QuotaError::AccountNotFound(_) => "account_not_found",
            QuotaError::UnknownPlan(_) => "unknown_plan",
            QuotaError::StoreUnavailable(_) => "quota_unavailable",
        }
    }
}
