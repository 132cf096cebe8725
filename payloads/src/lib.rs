pub mod api_client;
pub mod requests;
pub mod responses;

pub use api_client::ApiClient;

use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Nullable timestamp column wrapper so sqlx row mapping can go through
/// `try_from` the same way non-null columns do.
#[cfg(feature = "use-sqlx")]
#[derive(Debug, Clone, sqlx::Type)]
#[sqlx(transparent)]
pub struct OptionalTimestamp(pub Option<jiff_sqlx::Timestamp>);

#[cfg(feature = "use-sqlx")]
impl TryFrom<OptionalTimestamp> for Option<jiff::Timestamp> {
    type Error =
        <jiff::Timestamp as TryFrom<jiff_sqlx::Timestamp>>::Error;

    fn try_from(value: OptionalTimestamp) -> Result<Self, Self::Error> {
        value.0.map(jiff::Timestamp::try_from).transpose()
    }
}

/// Id type wrappers help ensure we don't mix up ids for different tables.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct UserId(pub Uuid);

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct MemberId(pub Uuid);

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct PaymentId(pub Uuid);

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct LedgerEntryId(pub Uuid);

/// Legacy numeric id of a member group (the "policy number").
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Serialize,
    Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct GroupId(pub i64);

/// Legacy numeric id of a collection agent ("cobrador").
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Serialize,
    Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct AgentId(pub i64);

/// Caller-supplied token guaranteeing at-most-once payment creation.
/// Normalized (trimmed) before use; the server generates one when absent.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn normalized(&self) -> Self {
        Self(self.0.trim().to_string())
    }
}

/// Currency tag carried on every amount. No FX conversion anywhere.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct Currency(pub String);

impl Currency {
    pub fn ars() -> Self {
        Self("ARS".into())
    }
}

/// A billing month, `YYYY-MM`, in the plan's civil timezone.
///
/// Totally ordered lexicographically, which coincides with chronological
/// order because the format is zero-padded.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Serialize,
    Deserialize,
)]
#[serde(try_from = "String", into = "String")]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct Period(String);

impl Period {
    /// Strict `YYYY-MM` parse; months outside 01-12 are rejected.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let bytes = text.as_bytes();
        if bytes.len() != 7 || bytes[4] != b'-' {
            return None;
        }
        if !bytes[..4].iter().all(u8::is_ascii_digit)
            || !bytes[5..].iter().all(u8::is_ascii_digit)
        {
            return None;
        }
        let month: u8 = text[5..].parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }
        Some(Self(text.to_string()))
    }

    pub fn from_parts(year: i16, month: u8) -> Option<Self> {
        if !(1..=12).contains(&month) || year < 0 {
            return None;
        }
        Some(Self(format!("{year:04}-{month:02}")))
    }

    pub fn year(&self) -> i16 {
        self.0[..4].parse().unwrap()
    }

    pub fn month(&self) -> u8 {
        self.0[5..].parse().unwrap()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Signed month count from `self` to `other`.
    pub fn months_between(&self, other: &Period) -> i32 {
        (other.year() as i32 - self.year() as i32) * 12
            + (other.month() as i32 - self.month() as i32)
    }

    /// The next billing month.
    pub fn succ(&self) -> Period {
        let (year, month) = if self.month() == 12 {
            (self.year() + 1, 1)
        } else {
            (self.year(), self.month() + 1)
        };
        Period::from_parts(year, month)
            .expect("month arithmetic stays in range")
    }

    /// Inclusive ascending range `[self ..= to]`. Empty when `to < self`.
    pub fn range_to(&self, to: &Period) -> Vec<Period> {
        let mut out = Vec::new();
        let mut cur = self.clone();
        while cur <= *to {
            out.push(cur.clone());
            cur = cur.succ();
        }
        out
    }
}

impl TryFrom<String> for Period {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Period::parse(&value).ok_or_else(|| {
            format!("invalid period '{value}', expected YYYY-MM")
        })
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.0
    }
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::parse(s)
            .ok_or_else(|| format!("invalid period '{s}', expected YYYY-MM"))
    }
}

/// System role of a cash-box-holding user.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(
    feature = "use-sqlx",
    derive(sqlx::Type),
    sqlx(type_name = "user_role", rename_all = "snake_case")
)]
pub enum Role {
    Agent,
    Admin,
    SuperAdmin,
}

/// Member position within the family group.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(
    feature = "use-sqlx",
    derive(sqlx::Type),
    sqlx(type_name = "member_role", rename_all = "snake_case")
)]
pub enum MemberRole {
    Titular,
    Dependent,
    Other,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(
    feature = "use-sqlx",
    derive(sqlx::Type),
    sqlx(type_name = "payment_kind", rename_all = "snake_case")
)]
pub enum PaymentKind {
    Payment,
    Refund,
    Reversal,
    Adjustment,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(
    feature = "use-sqlx",
    derive(sqlx::Type),
    sqlx(type_name = "payment_status", rename_all = "snake_case")
)]
pub enum PaymentStatus {
    Draft,
    Posted,
    Settled,
    Reversed,
}

/// Collection method. Deserialized case-insensitively because field-agent
/// devices have historically sent both `cash` and `CASH`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(
    feature = "use-sqlx",
    derive(sqlx::Type),
    sqlx(type_name = "payment_method", rename_all = "lowercase")
)]
pub enum PaymentMethod {
    Cash,
    Transfer,
    Card,
    Qr,
    Other,
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cash" => Ok(Self::Cash),
            "transfer" => Ok(Self::Transfer),
            "card" => Ok(Self::Card),
            "qr" => Ok(Self::Qr),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown payment method '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for PaymentMethod {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Side of a ledger leg. Every posting is a balanced debit/credit pair.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(
    feature = "use-sqlx",
    derive(sqlx::Type),
    sqlx(type_name = "entry_side", rename_all = "lowercase")
)]
pub enum EntrySide {
    Debit,
    Credit,
}

/// What produced a ledger pair.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(
    feature = "use-sqlx",
    derive(sqlx::Type),
    sqlx(type_name = "entry_kind", rename_all = "snake_case")
)]
pub enum EntryKind {
    Payment,
    Arqueo,
    PettyDeposit,
    VaultIngress,
    VaultEgress,
    CommissionPayout,
    Adjustment,
    Reversal,
}

/// Closed set of ledger account codes. Balances are always derived from
/// entries; accounts themselves store nothing.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(
    feature = "use-sqlx",
    derive(sqlx::Type),
    sqlx(type_name = "account_code", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum AccountCode {
    /// Agent's cash box: collected dues they still hold.
    CajaCobrador,
    /// Amounts an agent owes the administration.
    ARendirCobrador,
    /// Administrator's cash box.
    CajaAdmin,
    /// Global petty-cash pool.
    CajaChica,
    /// Global grand vault.
    CajaGrande,
    /// Super-admin wallet.
    CajaSuperadmin,
    /// Dues revenue.
    IngresosCuotas,
    /// Commission expense / payout account.
    ComisionCobrador,
    /// Bank placeholder.
    Banco,
    /// Virtual wallet placeholder.
    BilleteraVirtual,
}

/// How an incoming amount is split across due periods.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStrategy {
    Auto,
    Manual,
}

/// Period settlement state recorded on an allocation.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(
    feature = "use-sqlx",
    derive(sqlx::Type),
    sqlx(type_name = "allocation_status", rename_all = "lowercase")
)]
pub enum AllocationStatus {
    Paid,
    Partial,
}

/// Debt state of a single billing period.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PeriodDebtStatus {
    Paid,
    Partial,
    Due,
}

/// The user acting on a request. Role resolution happens at the session
/// boundary outside this system; the core receives the capability
/// explicitly instead of reading ambient session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
    pub agent_id: Option<AgentId>,
}

impl Actor {
    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }

    pub fn is_ge_admin(&self) -> bool {
        matches!(self.role, Role::Admin | Role::SuperAdmin)
    }
}

/// Portion of a payment applied to one billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub period: Period,
    pub amount_applied: Decimal,
    pub status_after: AllocationStatus,
}
