pub mod ledger_entry;
pub mod ledger_log;
pub mod redemption_code;
pub mod tenant_balance;

pub use ledger_entry::{
    fifo_order, EntryStatus, EntryUpdate, ExpiryChange, NewLedgerEntry, QuotaLedgerEntry,
};
pub use ledger_log::{AuditLogEntry, LogType, TopUpRecord};
pub use redemption_code::{
    CodeStatus, NewRedemptionCode, RedeemResult, RedemptionCode, MAX_VALIDITY_PERIOD_SECS,
};
pub use tenant_balance::{BalanceSummary, TenantBalance};
