pub mod ledger_memory;
pub mod ledger_postgres;
pub mod redemption_postgres;
pub mod tenant_account_postgres;

pub use ledger_memory::InMemoryLedgerStore;
pub use ledger_postgres::LedgerPostgresRepository;
pub use redemption_postgres::RedemptionCodePostgresRepository;
pub use tenant_account_postgres::TenantAccountPostgresRepository;
