use jiff::Timestamp;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    AccountCode, Actor, AgentId, AllocationStrategy, Currency, GroupId,
    IdempotencyKey, MemberId, PaymentMethod, PaymentStatus, Period, Role,
    UserId,
};

pub const NOTES_MAX_LEN: usize = 500;
pub const CHANNEL_MAX_LEN: usize = 50;
pub const EXTERNAL_REF_MAX_LEN: usize = 100;

/// One line of a manual allocation breakdown. The period arrives as free
/// text so an unparseable value surfaces as a structured validation error
/// instead of a deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub period: String,
    pub amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePayment {
    pub actor: Actor,
    pub member_id: MemberId,
    /// Cross-check against the member's stored group id, when supplied.
    pub member_legacy_group_id: Option<GroupId>,
    /// Absent means: total due up to now (auto) or the effective fee
    /// (manual).
    pub amount: Option<Decimal>,
    pub method: PaymentMethod,
    pub notes: Option<String>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub channel: Option<String>,
    /// Informational only; allocation is driven by the debt state.
    pub intended_period: Option<Period>,
    pub external_ref: Option<String>,
    /// Geo / device / IP blob recorded verbatim on the payment.
    pub meta: Option<serde_json::Value>,
    pub strategy: AllocationStrategy,
    pub breakdown: Option<Vec<BreakdownEntry>>,
    /// Overrides `posted_at` for collections captured offline.
    pub collected_at: Option<Timestamp>,
}

/// Sort keys accepted by the payment list. Anything else is rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSortKey {
    PostedAt,
    CreatedAt,
    Amount,
    GroupId,
    Method,
    Status,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListPayments {
    pub actor_user_id: UserId,
    pub actor_role: Role,
    pub actor_agent_id: Option<AgentId>,
    pub date_from: Option<Timestamp>,
    pub date_to: Option<Timestamp>,
    pub member_id: Option<MemberId>,
    pub method: Option<PaymentMethod>,
    pub status: Option<PaymentStatus>,
    /// Free text: receipt serial, member name, external ref, or a numeric
    /// group id.
    pub q: Option<String>,
    pub sort: Option<PaymentSortKey>,
    pub dir: Option<SortDir>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListPayments {
    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.actor_user_id,
            role: self.actor_role,
            agent_id: self.actor_agent_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelMember {
    pub actor: Actor,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DebtQuery {
    pub from: Option<Period>,
    pub to: Option<Period>,
    pub include_future: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Arqueo {
    pub actor: Actor,
    pub agent_user_id: UserId,
    /// Defaults to `[CAJA_COBRADOR, A_RENDIR_COBRADOR]`.
    pub accounts: Option<Vec<AccountCode>>,
    pub date_from: Option<Timestamp>,
    pub date_to: Option<Timestamp>,
    /// Defaults to `CAJA_ADMIN`; `CAJA_COBRADOR` is rejected.
    pub destination_account: Option<AccountCode>,
    /// Balances under this threshold are left in place.
    pub min_amount: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PettyDeposit {
    pub actor: Actor,
    /// The admin whose `CAJA_ADMIN` is emptied. Defaults to the actor.
    pub admin_user_id: Option<UserId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VaultIngress {
    pub actor: Actor,
    pub currency: Option<Currency>,
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub move_all: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VaultEgress {
    pub actor: Actor,
    pub currency: Option<Currency>,
    pub amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommissionPayout {
    pub actor: Actor,
    pub agent_user_id: UserId,
    pub period: Period,
    pub amount: Decimal,
    pub currency: Option<Currency>,
    /// Defaults by the actor's role: admin pays from `CAJA_ADMIN`,
    /// super-admin from `CAJA_GRANDE`.
    pub source_account: Option<AccountCode>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommissionReportQuery {
    pub actor_user_id: UserId,
    pub actor_role: Role,
    pub actor_agent_id: Option<AgentId>,
    pub agent_user_id: UserId,
    pub period: Period,
    pub currency: Option<Currency>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxOrderMode {
    Balance,
    Hierarchy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BoxesQuery {
    pub actor_user_id: UserId,
    pub actor_role: Role,
    pub actor_agent_id: Option<AgentId>,
    /// Restrict rows to one role.
    pub role: Option<Role>,
    /// Substring match on username / display name.
    pub q: Option<String>,
    pub date_from: Option<Timestamp>,
    pub date_to: Option<Timestamp>,
    pub order_mode: Option<BoxOrderMode>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MovementDetailQuery {
    pub actor_user_id: UserId,
    pub actor_role: Role,
    pub actor_agent_id: Option<AgentId>,
    pub account: Option<AccountCode>,
    pub currency: Option<Currency>,
    pub date_from: Option<Timestamp>,
    pub date_to: Option<Timestamp>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LedgerEntriesQuery {
    pub actor_user_id: UserId,
    pub actor_role: Role,
    pub actor_agent_id: Option<AgentId>,
    pub account: Option<AccountCode>,
    pub currency: Option<Currency>,
    pub agent_id: Option<AgentId>,
    pub date_from: Option<Timestamp>,
    pub date_to: Option<Timestamp>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
