pub mod accounts;
pub mod error;
pub mod gate;
pub mod kind;
pub mod ledger;
pub mod migrations;
pub mod period;
pub mod plans;
pub mod store;

pub use accounts::AccountDirectory;
pub use error::{QuotaError, StoreError};
pub use gate::{
    FailMode, QuotaDecision, QuotaDenial, QuotaGate, QuotaUsage, UsageLine, UsageReport,
};
pub use kind::{ResourceKind, Scope, UnknownResourceKind};
pub use ledger::QuotaLedger;
pub use period::BillingPeriod;
pub use plans::{Plan, PlanCatalog, PlanLimits};
pub use store::{Account, AccountStore, GuardedIncrement, LedgerStore, QuotaPeriod, QuotaStore};
