use payloads::{
    AccountCode, Actor, AllocationStrategy, EntrySide, GroupId,
    PaymentMethod, Role, requests,
};
use reqwest::StatusCode;
use rust_decimal::dec;
use test_helpers::{TestApp, assert_status_code, spawn_app};

fn boxes_query(actor: &Actor) -> requests::BoxesQuery {
    requests::BoxesQuery {
        actor_user_id: actor.user_id,
        actor_role: actor.role,
        actor_agent_id: actor.agent_id,
        role: None,
        q: None,
        date_from: None,
        date_to: None,
        order_mode: None,
        limit: None,
        offset: None,
    }
}

fn detail_query(actor: &Actor) -> requests::MovementDetailQuery {
    requests::MovementDetailQuery {
        actor_user_id: actor.user_id,
        actor_role: actor.role,
        actor_agent_id: actor.agent_id,
        account: None,
        currency: None,
        date_from: None,
        date_to: None,
        limit: None,
        offset: None,
    }
}

fn entries_query(actor: &Actor) -> requests::LedgerEntriesQuery {
    requests::LedgerEntriesQuery {
        actor_user_id: actor.user_id,
        actor_role: actor.role,
        actor_agent_id: actor.agent_id,
        account: None,
        currency: None,
        agent_id: None,
        date_from: None,
        date_to: None,
        limit: None,
        offset: None,
    }
}

/// Post one collection, sweep it to the admin, pool it, and move it into
/// the vault: every box in the chain ends up with activity.
async fn run_full_chain(
    app: &TestApp,
    staff: &test_helpers::Staff,
) -> anyhow::Result<()> {
    let member = app
        .seed_titular(GroupId(400), "2024-02", dec!(1000))
        .await?;
    let request = requests::CreatePayment {
        actor: staff.agent.clone(),
        member_id: member,
        member_legacy_group_id: None,
        amount: Some(dec!(2000)),
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
    app.client
        .arqueo(&requests::Arqueo {
            actor: staff.admin.clone(),
            agent_user_id: staff.agent.user_id,
            accounts: None,
            date_from: None,
            date_to: None,
            destination_account: None,
            min_amount: None,
        })
        .await?;
    app.client
        .petty_deposit(&requests::PettyDeposit {
            actor: staff.admin.clone(),
            admin_user_id: None,
        })
        .await?;
    app.client
        .vault_ingress(&requests::VaultIngress {
            actor: staff.super_admin.clone(),
            currency: None,
            amount: None,
            move_all: true,
        })
        .await?;
    Ok(())
}

#[tokio::test]
async fn super_admin_sees_globals_and_everyone() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    run_full_chain(&app, &staff).await?;

    let mut query = boxes_query(&staff.super_admin);
    query.order_mode = Some(requests::BoxOrderMode::Hierarchy);
    let list = app.client.boxes(&query).await?;

    // hierarchy: global rows lead
    assert_eq!(
        list.rows[0].owner.global_account,
        Some(AccountCode::CajaChica)
    );
    assert_eq!(
        list.rows[1].owner.global_account,
        Some(AccountCode::CajaGrande)
    );

    let user_rows: Vec<&payloads::responses::BoxRow> =
        list.rows.iter().filter(|r| r.owner.user_id.is_some()).collect();
    assert_eq!(user_rows.len(), 3);

    // the vault kept everything the chain pushed into it
    let grande = &list.rows[1].boxes[0];
    assert_eq!(grande.balance, dec!(2000));
    assert_eq!(grande.currency, payloads::Currency::ars());

    // the agent's box shows the collection and the sweep
    let agent_row = list
        .rows
        .iter()
        .find(|r| r.owner.user_id == Some(staff.agent.user_id))
        .unwrap();
    let agent_box = agent_row
        .boxes
        .iter()
        .find(|b| b.account_code == AccountCode::CajaCobrador)
        .unwrap();
    assert_eq!(agent_box.debits, dec!(2000));
    assert_eq!(agent_box.credits, dec!(2000));
    assert_eq!(agent_box.balance, dec!(0));

    Ok(())
}

#[tokio::test]
async fn admin_sees_agents_only_and_agents_nothing() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    run_full_chain(&app, &staff).await?;

    let list = app.client.boxes(&boxes_query(&staff.admin)).await?;
    assert!(list.rows.iter().all(|r| r.owner.role == Some(Role::Agent)));
    assert!(list.rows.iter().all(|r| r.owner.global_account.is_none()));

    let result = app.client.boxes(&boxes_query(&staff.agent)).await;
    assert_status_code(result, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn movement_detail_for_a_global_account() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    run_full_chain(&app, &staff).await?;

    let detail = app
        .client
        .box_detail("GLOBAL:CAJA_CHICA", &detail_query(&staff.super_admin))
        .await?;

    // one debit (deposit) and one credit (vault drain), net zero
    assert_eq!(detail.totals.debits, dec!(2000));
    assert_eq!(detail.totals.credits, dec!(2000));
    assert_eq!(detail.totals.balance, dec!(0));
    assert!(detail.entries.len() >= 2);

    Ok(())
}

#[tokio::test]
async fn admins_never_see_vault_credits_nor_the_wallet() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    run_full_chain(&app, &staff).await?;
    // drain part of the vault into the wallet so a CAJA_GRANDE credit and
    // CAJA_SUPERADMIN debit exist
    app.client
        .vault_egress(&requests::VaultEgress {
            actor: staff.super_admin.clone(),
            currency: None,
            amount: dec!(500),
        })
        .await?;

    let detail = app
        .client
        .box_detail("GLOBAL:CAJA_GRANDE", &detail_query(&staff.admin))
        .await?;
    assert!(
        detail
            .entries
            .iter()
            .all(|e| e.side == EntrySide::Debit),
        "credit legs on the vault are hidden from admins"
    );

    let tail = app.client.ledger_entries(&entries_query(&staff.admin)).await?;
    assert!(tail.entries.iter().all(|e| {
        e.account_code != AccountCode::CajaSuperadmin
            && !(e.account_code == AccountCode::CajaGrande
                && e.side == EntrySide::Credit)
    }));

    // the super-admin sees both sides
    let detail = app
        .client
        .box_detail("GLOBAL:CAJA_GRANDE", &detail_query(&staff.super_admin))
        .await?;
    assert!(detail.entries.iter().any(|e| e.side == EntrySide::Credit));

    Ok(())
}

#[tokio::test]
async fn agents_see_their_own_boxes_only() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    run_full_chain(&app, &staff).await?;

    let own = app
        .client
        .box_detail(
            &staff.agent.user_id.to_string(),
            &detail_query(&staff.agent),
        )
        .await?;
    assert!(!own.entries.is_empty());
    assert!(own.entries.iter().all(|e| {
        matches!(
            e.account_code,
            AccountCode::CajaCobrador
                | AccountCode::ARendirCobrador
                | AccountCode::ComisionCobrador
        )
    }));

    let result = app
        .client
        .box_detail(
            &staff.admin.user_id.to_string(),
            &detail_query(&staff.agent),
        )
        .await;
    assert_status_code(result, StatusCode::FORBIDDEN);

    let result = app
        .client
        .ledger_entries(&entries_query(&staff.agent))
        .await;
    assert_status_code(result, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn ledger_tail_totals_balance_per_currency() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    run_full_chain(&app, &staff).await?;

    let tail = app
        .client
        .ledger_entries(&entries_query(&staff.super_admin))
        .await?;

    assert_eq!(tail.totals.len(), 1);
    let totals = &tail.totals[0];
    assert_eq!(totals.currency, payloads::Currency::ars());
    // every pair is balanced, so the slice nets to zero
    assert_eq!(totals.net, dec!(0));
    assert_eq!(totals.debits, totals.credits);
    assert_eq!(totals.lines, tail.entries.len() as i64);

    Ok(())
}
