//! The account catalog.
//!
//! The chart of accounts is a closed set; balances are always derived from
//! ledger entries. An account is either per-user (each holder has their own
//! balance, keyed by `owner_user_id`) or global (one shared balance, owner
//! is always null).

use payloads::{AccountCode, Role};

pub struct AccountMeta {
    pub code: AccountCode,
    pub label: &'static str,
    /// Global accounts are never bound to a user for balance semantics.
    pub global: bool,
}

pub const CATALOG: &[AccountMeta] = &[
    AccountMeta {
        code: AccountCode::CajaCobrador,
        label: "Caja cobrador",
        global: false,
    },
    AccountMeta {
        code: AccountCode::ARendirCobrador,
        label: "A rendir cobrador",
        global: false,
    },
    AccountMeta {
        code: AccountCode::CajaAdmin,
        label: "Caja administración",
        global: false,
    },
    AccountMeta {
        code: AccountCode::CajaChica,
        label: "Caja chica",
        global: true,
    },
    AccountMeta {
        code: AccountCode::CajaGrande,
        label: "Caja grande",
        global: true,
    },
    AccountMeta {
        code: AccountCode::CajaSuperadmin,
        label: "Billetera superadmin",
        global: false,
    },
    AccountMeta {
        code: AccountCode::IngresosCuotas,
        label: "Ingresos por cuotas",
        global: true,
    },
    AccountMeta {
        code: AccountCode::ComisionCobrador,
        label: "Comisión cobrador",
        global: false,
    },
    AccountMeta {
        code: AccountCode::Banco,
        label: "Banco",
        global: true,
    },
    AccountMeta {
        code: AccountCode::BilleteraVirtual,
        label: "Billetera virtual",
        global: true,
    },
];

pub fn meta(code: AccountCode) -> &'static AccountMeta {
    CATALOG
        .iter()
        .find(|m| m.code == code)
        .expect("catalog covers every account code")
}

pub fn is_global(code: AccountCode) -> bool {
    meta(code).global
}

/// The cash box a role collects into by default.
pub fn default_cash_account(role: Role) -> AccountCode {
    match role {
        Role::Agent => AccountCode::CajaCobrador,
        Role::Admin => AccountCode::CajaAdmin,
        Role::SuperAdmin => AccountCode::CajaSuperadmin,
    }
}

/// The global accounts surfaced as virtual rows in box listings.
pub const GLOBAL_BOX_ACCOUNTS: &[AccountCode] = &[
    AccountCode::CajaChica,
    AccountCode::CajaGrande,
    AccountCode::Banco,
    AccountCode::BilleteraVirtual,
];
