use jiff::Timestamp;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    AccountCode, AgentId, Allocation, Currency, EntryKind, EntrySide,
    GroupId, LedgerEntryId, MemberId, PaymentId, PaymentKind, PaymentMethod,
    PaymentStatus, Period, PeriodDebtStatus, Role, UserId,
};

/// A posted (or replayed) payment as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub kind: PaymentKind,
    pub status: PaymentStatus,
    pub member_id: MemberId,
    pub group_id: GroupId,
    pub agent_id: AgentId,
    pub agent_user_id: UserId,
    pub amount: Decimal,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub channel: Option<String>,
    pub notes: Option<String>,
    pub external_ref: Option<String>,
    pub created_at: Timestamp,
    pub posted_at: Option<Timestamp>,
    pub allocations: Vec<Allocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub payment_id: PaymentId,
    pub serial_number: i64,
    pub year: i16,
    pub qr_payload: String,
    pub pdf_uri: Option<String>,
    pub pdf_failed: bool,
    pub voided: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentPosted {
    pub ok: bool,
    /// True when an idempotency-key hit returned the original payment.
    pub replayed: bool,
    pub payment: Payment,
    pub receipt: Receipt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentList {
    pub ok: bool,
    pub payments: Vec<Payment>,
}

/// One billing period of a member's debt state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRow {
    pub period: Period,
    pub charge: Decimal,
    pub paid: Decimal,
    pub balance: Decimal,
    pub status: PeriodDebtStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtTotals {
    pub charge: Decimal,
    pub paid: Decimal,
    pub balance: Decimal,
    /// Past-or-current periods with a positive balance.
    pub arrears_months: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtSummary {
    pub now_period: Period,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtState {
    pub ok: bool,
    pub member_id: MemberId,
    pub periods: Vec<PeriodRow>,
    pub grand_totals: DebtTotals,
    pub summary: DebtSummary,
}

/// A raw double-entry line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub payment_id: PaymentId,
    pub owner_user_id: Option<UserId>,
    pub kind: EntryKind,
    pub side: EntrySide,
    pub account_code: AccountCode,
    pub amount: Decimal,
    pub currency: Currency,
    pub posted_at: Timestamp,
    pub from_user_label: String,
    pub to_user_label: String,
    pub from_account_code: AccountCode,
    pub to_account_code: AccountCode,
    pub agent_id: Option<AgentId>,
    pub member_group_id: Option<GroupId>,
    pub channel: Option<String>,
    pub plan: Option<String>,
    pub note: Option<String>,
}

/// One pair posted by a cash movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashMovement {
    pub payment_id: PaymentId,
    pub source_account: AccountCode,
    pub destination_account: AccountCode,
    pub currency: Currency,
    pub amount: Decimal,
    /// True when an identical movement was already on the books and the
    /// pair was not re-posted.
    pub replayed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashMoveResult {
    pub ok: bool,
    pub movements: Vec<CashMovement>,
    pub total_moved: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionReport {
    pub ok: bool,
    pub agent_user_id: UserId,
    pub period: Period,
    pub currency: Currency,
    /// Σ active-member effective fees × base rate.
    pub expected: Decimal,
    /// Σ allocation × effective (decayed) rate over the agent's
    /// collections for the period.
    pub earned: Decimal,
    /// Already paid out via `COMISION_COBRADOR` debits.
    pub paid: Decimal,
    /// Collections that contributed to `earned`.
    pub payments: u32,
}

/// Per-currency activity of one cash box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxBalance {
    pub account_code: AccountCode,
    pub currency: Currency,
    pub debits: Decimal,
    pub credits: Decimal,
    pub balance: Decimal,
    pub last_movement: Option<Timestamp>,
    pub payment_count: i64,
}

/// Identifies who a box row belongs to: a user, or a global account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxOwner {
    pub user_id: Option<UserId>,
    pub display_name: Option<String>,
    pub role: Option<Role>,
    /// Set for virtual rows like `CAJA_CHICA` / `CAJA_GRANDE`.
    pub global_account: Option<AccountCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxRow {
    pub owner: BoxOwner,
    pub boxes: Vec<BoxBalance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxesList {
    pub ok: bool,
    pub rows: Vec<BoxRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementTotals {
    pub debits: Decimal,
    pub credits: Decimal,
    pub balance: Decimal,
    pub last_movement: Option<Timestamp>,
    pub payment_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementDetail {
    pub ok: bool,
    pub entries: Vec<LedgerEntry>,
    pub totals: MovementTotals,
}

/// Per-currency totals of a ledger slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyTotals {
    pub currency: Currency,
    pub debits: Decimal,
    pub credits: Decimal,
    pub net: Decimal,
    pub lines: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTail {
    pub ok: bool,
    pub entries: Vec<LedgerEntry>,
    pub totals: Vec<CurrencyTotals>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberCancelled {
    pub ok: bool,
    pub member_id: MemberId,
    /// The dependent promoted to titular, when the titular left.
    pub promoted_member_id: Option<MemberId>,
}

/// Structured error body: `{ok: false, code, message, context?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}
