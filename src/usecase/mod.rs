pub mod adjust_entry;
pub mod check_rate_limit;
pub mod consume_quota;
pub mod create_redemption_codes;
mod deadline;
pub mod disable_redemption_code;
pub mod get_balance_summary;
pub mod list_active_entries;
pub mod list_ledger_entries;
pub mod purge_invalid_codes;
pub mod redeem_code;
pub mod sweep_expired;

pub use adjust_entry::{AdjustEntryError, AdjustEntryInput, AdjustEntryUseCase};
pub use check_rate_limit::{CheckRateLimitError, CheckRateLimitInput, CheckRateLimitUseCase};
pub use consume_quota::{
    ConsumeQuotaError, ConsumeQuotaInput, ConsumeQuotaOutput, ConsumeQuotaUseCase,
};
pub use create_redemption_codes::{
    CreateRedemptionCodesError, CreateRedemptionCodesInput, CreateRedemptionCodesUseCase,
};
pub use disable_redemption_code::{DisableRedemptionCodeError, DisableRedemptionCodeUseCase};
pub use get_balance_summary::{GetBalanceSummaryError, GetBalanceSummaryUseCase};
pub use list_active_entries::{ListActiveEntriesError, ListActiveEntriesUseCase};
pub use list_ledger_entries::{
    ListLedgerEntriesError, ListLedgerEntriesInput, ListLedgerEntriesOutput,
    ListLedgerEntriesUseCase,
};
pub use purge_invalid_codes::{PurgeInvalidCodesError, PurgeInvalidCodesUseCase};
pub use redeem_code::{
    PlanActivator, RedeemCodeError, RedeemCodeInput, RedeemCodeUseCase, UnsupportedPlanActivator,
};
pub use sweep_expired::{SweepExpiredError, SweepExpiredUseCase, SweepOutput};
