use payloads::{
    AccountCode, Actor, AllocationStrategy, EntrySide, GroupId, MemberId,
    PaymentMethod,
    requests::{self, BreakdownEntry},
};
use reqwest::StatusCode;
use rust_decimal::{Decimal, dec};
use test_helpers::{assert_error_code, assert_status_code, spawn_app};

fn payment_request(
    actor: &Actor,
    member_id: MemberId,
) -> requests::CreatePayment {
    requests::CreatePayment {
        actor: actor.clone(),
        member_id,
        member_legacy_group_id: None,
        amount: None,
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
    }
}

fn list_request(actor: &Actor) -> requests::ListPayments {
    requests::ListPayments {
        actor_user_id: actor.user_id,
        actor_role: actor.role,
        actor_agent_id: actor.agent_id,
        date_from: None,
        date_to: None,
        member_id: None,
        method: None,
        status: None,
        q: None,
        sort: None,
        dir: None,
        limit: None,
        offset: None,
    }
}

#[tokio::test]
async fn fresh_member_on_time_payment() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    // joined January, fee 1000, now is March: three periods due
    let member = app
        .seed_titular(GroupId(100), "2024-01", dec!(1000))
        .await?;

    let mut request = payment_request(&staff.agent, member);
    request.amount = Some(dec!(1000));
    let posted = app.client.post_payment(&request).await?;

    assert!(posted.ok);
    assert!(!posted.replayed);
    assert_eq!(posted.payment.amount, dec!(1000));
    // FIFO lands on the oldest due period
    assert_eq!(posted.payment.allocations.len(), 1);
    assert_eq!(posted.payment.allocations[0].period.as_str(), "2024-01");
    assert_eq!(posted.payment.allocations[0].amount_applied, dec!(1000));
    assert_eq!(posted.receipt.serial_number, 1);
    assert_eq!(posted.receipt.year, 2024);
    assert!(posted.receipt.pdf_uri.as_deref().unwrap().starts_with("mock://"));
    assert!(!posted.receipt.pdf_failed);

    // the pair balances: one debit, one credit, same amount
    let net: Option<Decimal> = sqlx::query_scalar(
        r#"
        SELECT SUM(CASE WHEN side = 'debit' THEN amount ELSE -amount END)
        FROM ledger_entries WHERE payment_id = $1
        "#,
    )
    .bind(posted.payment.id)
    .fetch_one(&app.db_pool)
    .await?;
    assert_eq!(net, Some(Decimal::ZERO));

    // debit leg lands on the agent box first, revenue credit second
    let entries = api::store::ledger::entries_for_payment(
        &app.db_pool,
        &posted.payment.id,
    )
    .await?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].side, EntrySide::Debit);
    assert_eq!(entries[0].account_code, AccountCode::CajaCobrador);
    assert_eq!(entries[1].side, EntrySide::Credit);
    assert_eq!(entries[1].account_code, AccountCode::IngresosCuotas);

    assert_eq!(app.outbox_topics().await?, vec!["payment.posted"]);

    Ok(())
}

#[tokio::test]
async fn auto_amount_sweeps_everything_due() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    let member = app
        .seed_titular(GroupId(101), "2024-01", dec!(1000))
        .await?;

    // amount omitted with auto strategy: pay the whole outstanding balance
    let request = payment_request(&staff.agent, member);
    let posted = app.client.post_payment(&request).await?;

    assert_eq!(posted.payment.amount, dec!(3000));
    let periods: Vec<&str> = posted
        .payment
        .allocations
        .iter()
        .map(|a| a.period.as_str())
        .collect();
    assert_eq!(periods, ["2024-01", "2024-02", "2024-03"]);
    for allocation in &posted.payment.allocations {
        assert_eq!(allocation.amount_applied, dec!(1000));
    }

    Ok(())
}

#[tokio::test]
async fn manual_overpay_is_rejected() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    let member = app
        .seed_titular(GroupId(102), "2024-03", dec!(1000))
        .await?;

    let mut request = payment_request(&staff.agent, member);
    request.strategy = AllocationStrategy::Manual;
    request.amount = Some(dec!(1500));
    request.breakdown = Some(vec![BreakdownEntry {
        period: "2024-03".into(),
        amount: dec!(1500),
    }]);

    let result = app.client.post_payment(&request).await;
    assert_error_code(result, StatusCode::CONFLICT, "OVERPAY_PERIOD");

    // nothing was written
    let payments: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM payments")
            .fetch_one(&app.db_pool)
            .await?;
    assert_eq!(payments, 0);

    Ok(())
}

#[tokio::test]
async fn manual_breakdown_with_fifo_fallback() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    let member = app
        .seed_titular(GroupId(103), "2024-01", dec!(1000))
        .await?;

    // 600 pinned on February, the remaining 1400 falls back to FIFO
    let mut request = payment_request(&staff.agent, member);
    request.strategy = AllocationStrategy::Manual;
    request.amount = Some(dec!(2000));
    request.breakdown = Some(vec![BreakdownEntry {
        period: "2024-02".into(),
        amount: dec!(600),
    }]);

    let posted = app.client.post_payment(&request).await?;
    let split: Vec<(&str, Decimal)> = posted
        .payment
        .allocations
        .iter()
        .map(|a| (a.period.as_str(), a.amount_applied))
        .collect();
    assert_eq!(
        split,
        [("2024-01", dec!(1000)), ("2024-02", dec!(1000))]
    );

    Ok(())
}

#[tokio::test]
async fn idempotent_replay_returns_the_original() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    let member = app
        .seed_titular(GroupId(104), "2024-03", dec!(1000))
        .await?;

    let mut request = payment_request(&staff.agent, member);
    request.idempotency_key =
        Some(payloads::IdempotencyKey("terminal-423-000017".into()));

    let first = app.client.post_payment(&request).await?;
    let second = app.client.post_payment(&request).await?;

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.payment.id, second.payment.id);
    assert_eq!(
        first.receipt.serial_number,
        second.receipt.serial_number
    );
    // exactly one pair on the books
    assert!(
        api::store::ledger::exists(&app.db_pool, &first.payment.id).await?
    );
    assert_eq!(app.ledger_rows_for_payment(&first.payment.id).await?, 2);

    Ok(())
}

#[tokio::test]
async fn arrears_cutoff_blocks_posting() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    // joined October 2023: six unpaid months by March 2024
    let member = app
        .seed_titular(GroupId(105), "2023-10", dec!(1000))
        .await?;

    let request = payment_request(&staff.agent, member);
    let result = app.client.post_payment(&request).await;
    assert_error_code(result, StatusCode::CONFLICT, "ARREARS_CUTOFF");

    // balance and ledger unchanged
    let entries: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM ledger_entries")
            .fetch_one(&app.db_pool)
            .await?;
    assert_eq!(entries, 0);

    Ok(())
}

#[tokio::test]
async fn up_to_date_client_cannot_pay_again() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    let member = app
        .seed_titular(GroupId(106), "2024-03", dec!(1000))
        .await?;

    let request = payment_request(&staff.agent, member);
    app.client.post_payment(&request).await?;

    let again = payment_request(&staff.agent, member);
    let result = app.client.post_payment(&again).await;
    assert_error_code(result, StatusCode::CONFLICT, "CLIENT_UP_TO_DATE");

    Ok(())
}

#[tokio::test]
async fn agent_cannot_collect_outside_portfolio() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    let member = app
        .seed_titular(GroupId(107), "2024-03", dec!(1000))
        .await?;

    let mut foreign_agent = staff.agent.clone();
    foreign_agent.agent_id = Some(payloads::AgentId(99));

    let request = payment_request(&foreign_agent, member);
    let result = app.client.post_payment(&request).await;
    assert_error_code(result, StatusCode::FORBIDDEN, "OUT_OF_SCOPE");

    Ok(())
}

#[tokio::test]
async fn group_cross_check_must_match() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    let member = app
        .seed_titular(GroupId(108), "2024-03", dec!(1000))
        .await?;

    let mut request = payment_request(&staff.agent, member);
    request.member_legacy_group_id = Some(GroupId(999));

    let result = app.client.post_payment(&request).await;
    assert_status_code(result, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn receipt_serials_are_monotonic_within_a_year() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    let first_member = app
        .seed_titular(GroupId(109), "2024-03", dec!(1000))
        .await?;
    let second_member = app
        .seed_titular(GroupId(110), "2024-03", dec!(1500))
        .await?;

    let first = app
        .client
        .post_payment(&payment_request(&staff.agent, first_member))
        .await?;
    let second = app
        .client
        .post_payment(&payment_request(&staff.agent, second_member))
        .await?;

    assert_eq!(first.receipt.serial_number, 1);
    assert_eq!(second.receipt.serial_number, 2);

    Ok(())
}

#[tokio::test]
async fn concurrent_posts_cannot_overpay_a_period() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    let member = app
        .seed_titular(GroupId(111), "2024-03", dec!(1000))
        .await?;

    let mut a = payment_request(&staff.agent, member);
    a.amount = Some(dec!(1000));
    a.idempotency_key = Some(payloads::IdempotencyKey("race-a".into()));
    let mut b = payment_request(&staff.agent, member);
    b.amount = Some(dec!(1000));
    b.idempotency_key = Some(payloads::IdempotencyKey("race-b".into()));

    let (first, second) =
        tokio::join!(app.client.post_payment(&a), app.client.post_payment(&b));

    let successes =
        [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one of the two posts may commit");
    for result in [first, second] {
        if let Err(error) = result {
            assert_eq!(
                error.status(),
                Some(StatusCode::CONFLICT),
                "the loser must fail with a 409"
            );
        }
    }

    // the period was not overdrawn
    let paid: Option<Decimal> = sqlx::query_scalar(
        "SELECT SUM(amount_applied) FROM allocations WHERE member_id = $1",
    )
    .bind(member)
    .fetch_one(&app.db_pool)
    .await?;
    assert_eq!(paid, Some(dec!(1000)));

    Ok(())
}

#[tokio::test]
async fn list_filters_and_free_text_search() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let staff = app.seed_staff().await?;
    let member = app
        .seed_titular(GroupId(112), "2024-02", dec!(1000))
        .await?;

    let mut request = payment_request(&staff.agent, member);
    request.method = PaymentMethod::Transfer;
    request.external_ref = Some("MP-5544".into());
    app.client.post_payment(&request).await?;

    let mut by_method = list_request(&staff.agent);
    by_method.method = Some(PaymentMethod::Transfer);
    let listed = app.client.list_payments(&by_method).await?;
    assert_eq!(listed.payments.len(), 1);
    assert_eq!(listed.payments[0].method, PaymentMethod::Transfer);

    let mut by_name = list_request(&staff.agent);
    by_name.q = Some("Quiroga".into());
    assert_eq!(app.client.list_payments(&by_name).await?.payments.len(), 1);

    let mut by_ref = list_request(&staff.agent);
    by_ref.q = Some("MP-5544".into());
    assert_eq!(app.client.list_payments(&by_ref).await?.payments.len(), 1);

    let mut by_group = list_request(&staff.agent);
    by_group.q = Some("112".into());
    assert_eq!(app.client.list_payments(&by_group).await?.payments.len(), 1);

    let mut no_match = list_request(&staff.agent);
    no_match.q = Some("nadie".into());
    assert!(app.client.list_payments(&no_match).await?.payments.is_empty());

    Ok(())
}
