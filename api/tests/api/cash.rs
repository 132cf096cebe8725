use payloads::{
    AccountCode, Actor, AllocationStrategy, Currency, GroupId, MemberId,
    PaymentMethod, requests,
};
use reqwest::StatusCode;
use rust_decimal::{Decimal, dec};
use test_helpers::{TestApp, assert_error_code, assert_status_code, spawn_app};

async fn collect(
    app: &TestApp,
    actor: &Actor,
    member: MemberId,
    amount: Decimal,
) -> anyhow::Result<()> {
    let request = requests::CreatePayment {
        actor: actor.clone(),
        member_id: member,
        member_legacy_group_id: None,
        amount: Some(amount),
        method: PaymentMethod::Cash,
        notes: None,
        idempotency_key: None,
        channel: None,
        intended_period: None,
        external_ref: None,
        meta: None,
        strategy: AllocationStrategy::Auto,
        breakdown: None,
        collected_at: None,
    };
    app.client.post_payment(&request).await?;
    Ok(())
}

fn arqueo_request(actor: &Actor, agent: &Actor) -> requests::Arqueo {
    requests::Arqueo {
        actor: actor.clone(),
        agent_user_id: agent.user_id,
        accounts: None,
        date_from: None,
        date_to: None,
        destination_account: None,
        min_amount: None,
    }
}

#[tokio::test]
async fn arqueo_moves_the_agent_box_to_the_admin() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    let member = app
        .seed_titular(GroupId(300), "2024-02", dec!(1000))
        .await?;
    collect(&app, &staff.agent, member, dec!(2000)).await?;

    let ars = Currency::ars();
    assert_eq!(
        app.box_balance(
            Some(&staff.agent.user_id),
            AccountCode::CajaCobrador,
            &ars
        )
        .await?,
        dec!(2000)
    );

    let result = app
        .client
        .arqueo(&arqueo_request(&staff.admin, &staff.agent))
        .await?;

    assert!(result.ok);
    assert_eq!(result.movements.len(), 1);
    assert_eq!(result.total_moved, dec!(2000));
    assert_eq!(
        result.movements[0].source_account,
        AccountCode::CajaCobrador
    );
    assert_eq!(
        result.movements[0].destination_account,
        AccountCode::CajaAdmin
    );

    // round-trip: agent box drained, admin box grew by the same amount
    assert_eq!(
        app.box_balance(
            Some(&staff.agent.user_id),
            AccountCode::CajaCobrador,
            &ars
        )
        .await?,
        dec!(0)
    );
    assert_eq!(
        app.box_balance(
            Some(&staff.admin.user_id),
            AccountCode::CajaAdmin,
            &ars
        )
        .await?,
        dec!(2000)
    );

    Ok(())
}

#[tokio::test]
async fn arqueo_requires_admin_and_a_real_agent() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;

    let result = app
        .client
        .arqueo(&arqueo_request(&staff.agent, &staff.agent))
        .await;
    assert_status_code(result, StatusCode::FORBIDDEN);

    // sweeping an admin "as an agent" is refused
    let result = app
        .client
        .arqueo(&arqueo_request(&staff.super_admin, &staff.admin))
        .await;
    assert_status_code(result, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn arqueo_destination_cannot_be_an_agent_box() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;

    let mut request = arqueo_request(&staff.admin, &staff.agent);
    request.destination_account = Some(AccountCode::CajaCobrador);
    let result = app.client.arqueo(&request).await;
    assert_error_code(result, StatusCode::BAD_REQUEST, "INVALID_ACCOUNT");

    Ok(())
}

#[tokio::test]
async fn arqueo_min_amount_leaves_small_balances() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    let member = app
        .seed_titular(GroupId(301), "2024-03", dec!(300))
        .await?;
    collect(&app, &staff.agent, member, dec!(300)).await?;

    let mut request = arqueo_request(&staff.admin, &staff.agent);
    request.min_amount = Some(dec!(500));
    let result = app.client.arqueo(&request).await?;

    assert!(result.movements.is_empty());
    assert_eq!(
        app.box_balance(
            Some(&staff.agent.user_id),
            AccountCode::CajaCobrador,
            &Currency::ars()
        )
        .await?,
        dec!(300)
    );

    Ok(())
}

#[tokio::test]
async fn petty_deposit_empties_the_admin_box() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    let member = app
        .seed_titular(GroupId(302), "2024-02", dec!(1000))
        .await?;
    collect(&app, &staff.agent, member, dec!(2000)).await?;
    app.client
        .arqueo(&arqueo_request(&staff.admin, &staff.agent))
        .await?;

    let result = app
        .client
        .petty_deposit(&requests::PettyDeposit {
            actor: staff.admin.clone(),
            admin_user_id: None,
        })
        .await?;

    assert_eq!(result.total_moved, dec!(2000));
    let ars = Currency::ars();
    assert_eq!(
        app.box_balance(
            Some(&staff.admin.user_id),
            AccountCode::CajaAdmin,
            &ars
        )
        .await?,
        dec!(0)
    );
    // petty cash is global: the balance ignores owners
    assert_eq!(
        app.box_balance(None, AccountCode::CajaChica, &ars).await?,
        dec!(2000)
    );

    Ok(())
}

#[tokio::test]
async fn petty_deposit_is_owner_or_super_admin_only() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    let other_admin = app
        .create_user("berta", payloads::Role::Admin, None)
        .await?;

    // an admin cannot empty another admin's box
    let result = app
        .client
        .petty_deposit(&requests::PettyDeposit {
            actor: staff.admin.clone(),
            admin_user_id: Some(other_admin),
        })
        .await;
    assert_status_code(result, StatusCode::FORBIDDEN);

    // a super-admin can
    app.client
        .petty_deposit(&requests::PettyDeposit {
            actor: staff.super_admin.clone(),
            admin_user_id: Some(other_admin),
        })
        .await?;

    Ok(())
}

async fn fill_petty_cash(
    app: &TestApp,
    staff: &test_helpers::Staff,
    group: i64,
    amount: Decimal,
) -> anyhow::Result<()> {
    let member = app
        .seed_titular(GroupId(group), "2024-01", amount / dec!(3))
        .await?;
    collect(app, &staff.agent, member, amount).await?;
    app.client
        .arqueo(&arqueo_request(&staff.admin, &staff.agent))
        .await?;
    app.client
        .petty_deposit(&requests::PettyDeposit {
            actor: staff.admin.clone(),
            admin_user_id: None,
        })
        .await?;
    Ok(())
}

#[tokio::test]
async fn vault_ingress_drains_petty_cash() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    fill_petty_cash(&app, &staff, 303, dec!(3000)).await?;

    let result = app
        .client
        .vault_ingress(&requests::VaultIngress {
            actor: staff.super_admin.clone(),
            currency: None,
            amount: Some(dec!(1200)),
            move_all: false,
        })
        .await?;

    assert_eq!(result.total_moved, dec!(1200));
    let ars = Currency::ars();
    assert_eq!(
        app.box_balance(None, AccountCode::CajaGrande, &ars).await?,
        dec!(1200)
    );
    assert_eq!(
        app.box_balance(None, AccountCode::CajaChica, &ars).await?,
        dec!(1800)
    );

    // asking for more than is pooled is refused up front
    let result = app
        .client
        .vault_ingress(&requests::VaultIngress {
            actor: staff.super_admin.clone(),
            currency: None,
            amount: Some(dec!(99999)),
            move_all: false,
        })
        .await;
    assert_error_code(result, StatusCode::CONFLICT, "INSUFFICIENT_FUNDS");

    Ok(())
}

#[tokio::test]
async fn vault_ingress_is_super_admin_only() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;

    let result = app
        .client
        .vault_ingress(&requests::VaultIngress {
            actor: staff.admin.clone(),
            currency: None,
            amount: None,
            move_all: true,
        })
        .await;
    assert_status_code(result, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn vault_egress_fills_the_super_admin_wallet() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    fill_petty_cash(&app, &staff, 304, dec!(3000)).await?;
    app.client
        .vault_ingress(&requests::VaultIngress {
            actor: staff.super_admin.clone(),
            currency: None,
            amount: None,
            move_all: true,
        })
        .await?;

    let result = app
        .client
        .vault_egress(&requests::VaultEgress {
            actor: staff.super_admin.clone(),
            currency: None,
            amount: dec!(1000),
        })
        .await?;

    assert_eq!(result.total_moved, dec!(1000));
    let ars = Currency::ars();
    assert_eq!(
        app.box_balance(
            Some(&staff.super_admin.user_id),
            AccountCode::CajaSuperadmin,
            &ars
        )
        .await?,
        dec!(1000)
    );
    assert_eq!(
        app.box_balance(None, AccountCode::CajaGrande, &ars).await?,
        dec!(2000)
    );

    // identical egress inside the dedup window replays instead of
    // double-posting
    let replay = app
        .client
        .vault_egress(&requests::VaultEgress {
            actor: staff.super_admin.clone(),
            currency: None,
            amount: dec!(1000),
        })
        .await?;
    assert!(replay.movements[0].replayed);
    assert_eq!(replay.total_moved, dec!(0));
    assert_eq!(
        app.box_balance(None, AccountCode::CajaGrande, &ars).await?,
        dec!(2000)
    );

    // draining beyond the vault is refused
    let result = app
        .client
        .vault_egress(&requests::VaultEgress {
            actor: staff.super_admin.clone(),
            currency: None,
            amount: dec!(50000),
        })
        .await;
    assert_error_code(result, StatusCode::CONFLICT, "INSUFFICIENT_FUNDS");

    Ok(())
}

#[tokio::test]
async fn commission_payout_and_report() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    app.set_commission_config(
        &staff.agent.user_id,
        dec!(0.05),
        7,
        dec!(0.1),
    )
    .await?;
    let member = app
        .seed_titular(GroupId(305), "2024-03", dec!(1000))
        .await?;
    collect(&app, &staff.agent, member, dec!(1000)).await?;

    // ten days pass before the commission run
    app.time_source.advance(jiff::Span::new().hours(10 * 24));

    let period: payloads::Period = "2024-03".parse().unwrap();
    let report = app
        .client
        .commission_report(&requests::CommissionReportQuery {
            actor_user_id: staff.admin.user_id,
            actor_role: staff.admin.role,
            actor_agent_id: None,
            agent_user_id: staff.agent.user_id,
            period: period.clone(),
            currency: None,
        })
        .await?;

    // 3 days past grace at 10%/day decay: 5% * 0.7 = 3.5% of 1000
    assert_eq!(report.earned, dec!(35.00));
    assert_eq!(report.expected, dec!(50.00));
    assert_eq!(report.paid, dec!(0));
    assert_eq!(report.payments, 1);

    // fund the admin box, then pay out
    app.client
        .arqueo(&arqueo_request(&staff.admin, &staff.agent))
        .await?;
    let payout = app
        .client
        .commission_payout(&requests::CommissionPayout {
            actor: staff.admin.clone(),
            agent_user_id: staff.agent.user_id,
            period: period.clone(),
            amount: dec!(35),
            currency: None,
            source_account: None,
        })
        .await?;
    assert_eq!(payout.total_moved, dec!(35));

    let report = app
        .client
        .commission_report(&requests::CommissionReportQuery {
            actor_user_id: staff.admin.user_id,
            actor_role: staff.admin.role,
            actor_agent_id: None,
            agent_user_id: staff.agent.user_id,
            period,
            currency: None,
        })
        .await?;
    assert_eq!(report.paid, dec!(35.00));

    let ars = Currency::ars();
    assert_eq!(
        app.box_balance(
            Some(&staff.agent.user_id),
            AccountCode::ComisionCobrador,
            &ars
        )
        .await?,
        dec!(35)
    );
    assert_eq!(
        app.box_balance(
            Some(&staff.admin.user_id),
            AccountCode::CajaAdmin,
            &ars
        )
        .await?,
        dec!(965)
    );

    Ok(())
}

#[tokio::test]
async fn commission_payout_needs_funds_and_rank() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;

    // an agent cannot pay themselves
    let result = app
        .client
        .commission_payout(&requests::CommissionPayout {
            actor: staff.agent.clone(),
            agent_user_id: staff.agent.user_id,
            period: "2024-03".parse().unwrap(),
            amount: dec!(10),
            currency: None,
            source_account: None,
        })
        .await;
    assert_status_code(result, StatusCode::FORBIDDEN);

    // an empty source box refuses the payout
    let result = app
        .client
        .commission_payout(&requests::CommissionPayout {
            actor: staff.admin.clone(),
            agent_user_id: staff.agent.user_id,
            period: "2024-03".parse().unwrap(),
            amount: dec!(10),
            currency: None,
            source_account: None,
        })
        .await;
    assert_error_code(result, StatusCode::CONFLICT, "INSUFFICIENT_FUNDS");

    Ok(())
}
