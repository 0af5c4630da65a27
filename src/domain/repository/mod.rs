pub mod ledger_repository;
pub mod redemption_repository;

pub use ledger_repository::{LedgerStore, LedgerTransaction};
pub use redemption_repository::{RedemptionCodeRepository, TenantAccountRepository};
