#[cfg(test)]
mod integration_tests {
    use crate::handlers::accounts::AccountResponse;
    use crate::handlers::audit_logs::AuditLogResponse;
    use crate::handlers::budgets::{BudgetRequest, BudgetResponse};
    use crate::handlers::reports::SummaryResponse;
    use crate::handlers::sync::StaleMarkerResponse;
    use crate::handlers::transactions::{
        CreateTransactionRequest, TransactionResponse, UpdateStatusRequest,
    };
    use crate::handlers::{USER_EMAIL_HEADER, USER_ID_HEADER};
    use crate::schemas::{ApiResponse, HealthResponse, MutationResponse, SweepResponse, SyncResponse};
    use crate::test_utils::test_utils::{TestApp, setup_test_app, setup_test_server};
    use axum::http::{HeaderName, HeaderValue, StatusCode};
    use axum_test::TestServer;
    use chrono::NaiveDate;
    use model::{Account, paths, store::LedgerStore};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn transaction(
        entity_id: Option<&str>,
        kind: &str,
        amount: &str,
        category: &str,
        status: Option<&str>,
    ) -> CreateTransactionRequest {
        CreateTransactionRequest {
            entity_id: entity_id.map(str::to_string),
            kind: kind.to_string(),
            amount: dec(amount),
            category: category.to_string(),
            status: status.map(str::to_string),
            description: None,
            reference: None,
        }
    }

    fn budget(amount: &str) -> BudgetRequest {
        BudgetRequest {
            name: "Lab supplies".to_string(),
            category: "supplies".to_string(),
            amount: dec(amount),
            period: "yearly".to_string(),
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2100, 12, 31).unwrap(),
        }
    }

    /// Posts a transaction and returns its id.
    async fn record(server: &TestServer, request: &CreateTransactionRequest) -> String {
        let response = server.post("/api/v1/transactions").json(request).await;
        if response.status_code() != StatusCode::CREATED {
            panic!("Expected 201 Created, got {}: {}", response.status_code(), response.text());
        }
        let body: MutationResponse = response.json();
        assert!(body.success);
        body.id.expect("created transaction has an id")
    }

    async fn primary_account(server: &TestServer, entity_id: &str) -> AccountResponse {
        let response = server.get(&format!("/api/v1/accounts/{entity_id}")).await;
        response.assert_status(StatusCode::OK);
        let body: ApiResponse<AccountResponse> = response.json();
        body.data
    }

    async fn secondary_account(app: &TestApp, entity_id: &str) -> Option<Account> {
        app.state.reconciler.secondary_account(entity_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let response = server.get("/health").await;

        response.assert_status(StatusCode::OK);
        let body: HealthResponse = response.json();
        assert_eq!(body.status, "healthy");
        assert_eq!(body.accounting, "connected");
    }

    #[tokio::test]
    async fn test_health_degraded_when_accounting_store_is_down() {
        let app = setup_test_server().await;
        app.secondary.set_offline(true);

        let response = app.server.get("/health").await;

        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: HealthResponse = response.json();
        assert_eq!(body.status, "degraded");
        assert_eq!(body.primary, "connected");
        assert_eq!(body.accounting, "disconnected");
    }

    #[tokio::test]
    async fn test_charge_reaches_both_stores() {
        let app = setup_test_server().await;

        record(
            &app.server,
            &transaction(Some("student-1"), "expense", "150.00", "tuition", Some("approved")),
        )
        .await;

        let account = primary_account(&app.server, "student-1").await;
        assert_eq!(account.total_charged, dec("150.00"));
        assert_eq!(account.total_paid, Decimal::ZERO);
        assert_eq!(account.balance, dec("150.00"));

        let mirrored = secondary_account(&app, "student-1").await.unwrap();
        assert_eq!(mirrored.balance(), dec("150.00"));
        assert_eq!(mirrored.version(), account.version);
    }

    #[tokio::test]
    async fn test_fee_payment_end_to_end() {
        let app = setup_test_server().await;

        record(
            &app.server,
            &transaction(Some("student-0"), "fee_payment", "150.00", "tuition", Some("approved")),
        )
        .await;

        let account = primary_account(&app.server, "student-0").await;
        assert_eq!(account.total_paid, dec("150.00"));
        assert_eq!(account.total_charged, Decimal::ZERO);
        assert_eq!(account.balance, dec("-150.00"));

        let mirrored = secondary_account(&app, "student-0").await.unwrap();
        assert_eq!(mirrored.total_paid(), dec("150.00"));
        assert_eq!(mirrored.balance(), dec("-150.00"));
    }

    #[tokio::test]
    async fn test_payment_can_leave_a_credit() {
        let app = setup_test_server().await;

        record(
            &app.server,
            &transaction(Some("student-2"), "expense", "150.00", "tuition", Some("approved")),
        )
        .await;
        record(
            &app.server,
            &transaction(Some("student-2"), "fee_payment", "300.00", "tuition", Some("completed")),
        )
        .await;

        let account = primary_account(&app.server, "student-2").await;
        assert_eq!(account.balance, dec("-150.00"));
        assert_eq!(
            secondary_account(&app, "student-2").await.unwrap().balance(),
            dec("-150.00")
        );
    }

    #[tokio::test]
    async fn test_invalid_transactions_are_rejected() {
        let app = setup_test_server().await;

        let zero = transaction(Some("student-3"), "expense", "0", "tuition", None);
        app.server
            .post("/api/v1/transactions")
            .json(&zero)
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let fractional = transaction(Some("student-3"), "expense", "10.005", "tuition", None);
        app.server
            .post("/api/v1/transactions")
            .json(&fractional)
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let unknown_type = transaction(Some("student-3"), "refund", "10.00", "tuition", None);
        app.server
            .post("/api/v1/transactions")
            .json(&unknown_type)
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        // Nothing was written
        app.server
            .get("/api/v1/accounts/student-3")
            .await
            .assert_status(StatusCode::NOT_FOUND);
        assert!(app.secondary.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_amounts_are_rejected() {
        let app = setup_test_server().await;

        let huge = transaction(
            Some("student-10"),
            "fee_payment",
            "50000000000000000000000000000",
            "tuition",
            Some("completed"),
        );
        for _ in 0..2 {
            app.server
                .post("/api/v1/transactions")
                .json(&huge)
                .await
                .assert_status(StatusCode::BAD_REQUEST);
        }
        let just_over = transaction(
            Some("student-10"),
            "fee_payment",
            "1000000000000.01",
            "tuition",
            Some("completed"),
        );
        app.server
            .post("/api/v1/transactions")
            .json(&just_over)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        app.server
            .get("/api/v1/accounts/student-10")
            .await
            .assert_status(StatusCode::NOT_FOUND);

        // The largest accepted amount still records twice without overflow
        let cap = transaction(
            Some("student-10"),
            "fee_payment",
            "1000000000000.00",
            "tuition",
            Some("completed"),
        );
        record(&app.server, &cap).await;
        record(&app.server, &cap).await;
        let account = primary_account(&app.server, "student-10").await;
        assert_eq!(account.total_paid, dec("2000000000000.00"));
    }

    #[tokio::test]
    async fn test_recording_writes_create_audit_entry() {
        let app = setup_test_server().await;

        let response = app
            .server
            .post("/api/v1/transactions")
            .add_header(
                HeaderName::from_static(USER_ID_HEADER),
                HeaderValue::from_static("clerk-2"),
            )
            .json(&transaction(Some("student-11"), "expense", "45.50", "books", Some("approved")))
            .await;
        response.assert_status(StatusCode::CREATED);
        let id = response.json::<MutationResponse>().id.unwrap();

        let response = app
            .server
            .get("/api/v1/audit-logs?entity=transaction&action=create")
            .await;
        response.assert_status(StatusCode::OK);
        let body: ApiResponse<Vec<AuditLogResponse>> = response.json();
        assert_eq!(body.data.len(), 1);
        assert_eq!(body.data[0].entity, "transaction");
        assert_eq!(body.data[0].entity_id, id);
        assert_eq!(body.data[0].user_id, "clerk-2");
        assert_eq!(body.data[0].details["amount"], "45.50");
        assert_eq!(body.data[0].details["entityId"], "student-11");
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_no_audit_entry() {
        let app = setup_test_server().await;
        app.primary.fail_next_commits(1);

        app.server
            .post("/api/v1/transactions")
            .json(&transaction(Some("student-12"), "expense", "10.00", "books", None))
            .await
            .assert_status(StatusCode::SERVICE_UNAVAILABLE);

        let response = app.server.get("/api/v1/audit-logs?entity=transaction").await;
        let body: ApiResponse<Vec<AuditLogResponse>> = response.json();
        assert!(body.data.is_empty());
        assert!(app.primary.is_empty());
    }

    #[tokio::test]
    async fn test_pending_transaction_counts_after_approval() {
        let app = setup_test_server().await;

        let id = record(
            &app.server,
            &transaction(Some("student-4"), "expense", "80.00", "books", None),
        )
        .await;
        assert_eq!(primary_account(&app.server, "student-4").await.balance, Decimal::ZERO);

        let response = app
            .server
            .put(&format!("/api/v1/transactions/{id}/status"))
            .add_header(
                HeaderName::from_static(USER_ID_HEADER),
                HeaderValue::from_static("bursar-1"),
            )
            .add_header(
                HeaderName::from_static(USER_EMAIL_HEADER),
                HeaderValue::from_static("bursar@school.test"),
            )
            .json(&UpdateStatusRequest {
                status: "approved".to_string(),
            })
            .await;
        response.assert_status(StatusCode::OK);

        let account = primary_account(&app.server, "student-4").await;
        assert_eq!(account.balance, dec("80.00"));
        assert_eq!(
            secondary_account(&app, "student-4").await.unwrap().balance(),
            dec("80.00")
        );

        // A second approval is refused and does not charge twice
        app.server
            .put(&format!("/api/v1/transactions/{id}/status"))
            .json(&UpdateStatusRequest {
                status: "approved".to_string(),
            })
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(primary_account(&app.server, "student-4").await.balance, dec("80.00"));

        let response = app.server.get("/api/v1/audit-logs?action=approve").await;
        response.assert_status(StatusCode::OK);
        let body: ApiResponse<Vec<AuditLogResponse>> = response.json();
        assert_eq!(body.data.len(), 1);
        assert_eq!(body.data[0].entity_id, id);
        assert_eq!(body.data[0].user_id, "bursar-1");
        assert_eq!(body.data[0].user_email.as_deref(), Some("bursar@school.test"));
    }

    #[tokio::test]
    async fn test_status_update_errors() {
        let app = setup_test_server().await;
        let id = record(
            &app.server,
            &transaction(Some("student-5"), "expense", "20.00", "books", None),
        )
        .await;

        app.server
            .put(&format!("/api/v1/transactions/{id}/status"))
            .json(&UpdateStatusRequest {
                status: "lost".to_string(),
            })
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        app.server
            .put(&format!("/api/v1/transactions/{}/status", uuid::Uuid::new_v4()))
            .json(&UpdateStatusRequest {
                status: "approved".to_string(),
            })
            .await
            .assert_status(StatusCode::NOT_FOUND);

        app.server
            .put(&format!("/api/v1/transactions/{id}/status"))
            .json(&UpdateStatusRequest {
                status: "rejected".to_string(),
            })
            .await
            .assert_status(StatusCode::OK);
        assert_eq!(primary_account(&app.server, "student-5").await.balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_transactions_cannot_be_deleted() {
        let app = setup_test_server().await;
        let id = record(
            &app.server,
            &transaction(None, "income", "500.00", "grants", Some("approved")),
        )
        .await;

        let response = app.server.delete(&format!("/api/v1/transactions/{id}")).await;
        response.assert_status(StatusCode::CONFLICT);
        let body: MutationResponse = response.json();
        assert!(!body.success);

        app.server
            .get(&format!("/api/v1/transactions/{id}"))
            .await
            .assert_status(StatusCode::OK);
    }

    #[tokio::test]
    async fn test_transaction_filters() {
        let app = setup_test_server().await;
        record(
            &app.server,
            &transaction(Some("student-6"), "expense", "100.00", "tuition", Some("approved")),
        )
        .await;
        record(
            &app.server,
            &transaction(Some("student-6"), "fee_payment", "40.00", "tuition", Some("completed")),
        )
        .await;
        record(
            &app.server,
            &transaction(None, "expense", "12.50", "supplies", Some("approved")),
        )
        .await;

        let response = app.server.get("/api/v1/accounts/student-6/transactions").await;
        response.assert_status(StatusCode::OK);
        let body: ApiResponse<Vec<TransactionResponse>> = response.json();
        assert_eq!(body.data.len(), 2);

        let response = app.server.get("/api/v1/expenses").await;
        let body: ApiResponse<Vec<TransactionResponse>> = response.json();
        assert_eq!(body.data.len(), 2);
        assert!(body.data.iter().all(|t| t.kind == "expense"));

        let response = app.server.get("/api/v1/transactions?search=SUPPL").await;
        let body: ApiResponse<Vec<TransactionResponse>> = response.json();
        assert_eq!(body.data.len(), 1);
        assert_eq!(body.data[0].category, "supplies");

        let response = app.server.get("/api/v1/transactions?type=fee_payment").await;
        let body: ApiResponse<Vec<TransactionResponse>> = response.json();
        assert_eq!(body.data.len(), 1);

        app.server
            .get("/api/v1/transactions?status=lost")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        app.server
            .get("/api/v1/transactions?start_date=2024-05-01&end_date=2024-04-01")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_accounts_with_search() {
        let app = setup_test_server().await;
        for entity in ["student-a", "student-b", "staff-c"] {
            record(
                &app.server,
                &transaction(Some(entity), "expense", "10.00", "tuition", Some("approved")),
            )
            .await;
        }

        let response = app.server.get("/api/v1/accounts").await;
        let body: ApiResponse<Vec<AccountResponse>> = response.json();
        assert_eq!(body.data.len(), 3);

        let response = app.server.get("/api/v1/accounts?search=STUDENT").await;
        let body: ApiResponse<Vec<AccountResponse>> = response.json();
        assert_eq!(body.data.len(), 2);
    }

    #[tokio::test]
    async fn test_budget_lifecycle_and_utilization() {
        let app = setup_test_server().await;

        let response = app.server.post("/api/v1/budgets").json(&budget("1000.00")).await;
        response.assert_status(StatusCode::CREATED);
        let budget_id = response.json::<MutationResponse>().id.unwrap();

        record(
            &app.server,
            &transaction(None, "expense", "250.00", "supplies", Some("approved")),
        )
        .await;
        record(
            &app.server,
            &transaction(None, "expense", "999.00", "supplies", None),
        )
        .await;

        let response = app.server.get("/api/v1/budgets").await;
        response.assert_status(StatusCode::OK);
        let body: ApiResponse<Vec<BudgetResponse>> = response.json();
        assert_eq!(body.data.len(), 1);
        assert_eq!(body.data[0].spent, dec("250.00"));
        assert_eq!(body.data[0].remaining, dec("750.00"));
        assert_eq!(body.data[0].utilization_percent, dec("25"));

        app.server
            .put(&format!("/api/v1/budgets/{budget_id}"))
            .json(&budget("500.00"))
            .await
            .assert_status(StatusCode::OK);
        let response = app.server.get(&format!("/api/v1/budgets/{budget_id}")).await;
        let body: ApiResponse<BudgetResponse> = response.json();
        assert_eq!(body.data.amount, dec("500.00"));
        assert_eq!(body.data.utilization_percent, dec("50"));

        app.server
            .delete(&format!("/api/v1/budgets/{budget_id}"))
            .await
            .assert_status(StatusCode::OK);
        app.server
            .get(&format!("/api/v1/budgets/{budget_id}"))
            .await
            .assert_status(StatusCode::NOT_FOUND);

        let response = app.server.get("/api/v1/audit-logs?entity=budget").await;
        let body: ApiResponse<Vec<AuditLogResponse>> = response.json();
        let actions: Vec<&str> = body.data.iter().map(|entry| entry.action.as_str()).collect();
        assert_eq!(actions.len(), 3);
        assert!(actions.contains(&"create"));
        assert!(actions.contains(&"update"));
        assert!(actions.contains(&"delete"));
    }

    #[tokio::test]
    async fn test_invalid_budget_is_rejected() {
        let app = setup_test_server().await;

        let mut inverted = budget("100.00");
        inverted.start_date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        inverted.end_date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        app.server
            .post("/api/v1/budgets")
            .json(&inverted)
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let mut weekly = budget("100.00");
        weekly.period = "weekly".to_string();
        app.server
            .post("/api/v1/budgets")
            .json(&weekly)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_summary_report() {
        let app = setup_test_server().await;
        record(&app.server, &transaction(None, "income", "1000.00", "grants", Some("approved"))).await;
        record(&app.server, &transaction(None, "expense", "400.00", "supplies", Some("approved"))).await;
        record(&app.server, &transaction(None, "expense", "999.00", "supplies", None)).await;

        let response = app.server.get("/api/v1/reports/summary").await;
        response.assert_status(StatusCode::OK);
        let body: ApiResponse<SummaryResponse> = response.json();
        assert_eq!(body.data.net, dec("600.00"));
        assert_eq!(body.data.transaction_count, 3);
        assert_eq!(body.data.counts["pending"], 1);
        assert_eq!(body.data.counts["approved"], 2);

        // A new transaction invalidates the cached summary
        record(&app.server, &transaction(None, "income", "50.00", "grants", Some("approved"))).await;
        let body: ApiResponse<SummaryResponse> =
            app.server.get("/api/v1/reports/summary").await.json();
        assert_eq!(body.data.net, dec("650.00"));
    }

    #[tokio::test]
    async fn test_deferred_sync_is_repaired_by_sweep() {
        let app = setup_test_server().await;
        app.secondary.set_offline(true);

        let response = app
            .server
            .post("/api/v1/transactions")
            .json(&transaction(Some("student-7"), "expense", "150.00", "tuition", Some("approved")))
            .await;
        // The primary commit stands even though the accounting store is down
        response.assert_status(StatusCode::CREATED);
        let body: MutationResponse = response.json();
        assert!(body.message.contains("deferred"));
        assert_eq!(primary_account(&app.server, "student-7").await.balance, dec("150.00"));

        let response = app.server.get("/api/v1/sync/stale").await;
        let body: ApiResponse<Vec<StaleMarkerResponse>> = response.json();
        assert_eq!(body.data.len(), 1);
        assert_eq!(body.data[0].entity_id, "student-7");

        app.secondary.set_offline(false);
        let response = app.server.post("/api/v1/sync/reconcile").await;
        response.assert_status(StatusCode::OK);
        let body: ApiResponse<SweepResponse> = response.json();
        assert_eq!(body.data.checked, 1);
        assert_eq!(body.data.repaired, 1);

        assert_eq!(
            secondary_account(&app, "student-7").await.unwrap().balance(),
            dec("150.00")
        );
        let body: ApiResponse<Vec<StaleMarkerResponse>> =
            app.server.get("/api/v1/sync/stale").await.json();
        assert!(body.data.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_overwrites_diverged_secondary() {
        let app = setup_test_server().await;
        record(
            &app.server,
            &transaction(Some("student-8"), "expense", "500.00", "tuition", Some("approved")),
        )
        .await;

        // Someone edited the accounting copy by hand
        let tampered = Account::with_totals("student-8", dec("200.00"), Decimal::ZERO, chrono::Utc::now())
            .with_version(1);
        app.state
            .secondary
            .set(&paths::account("student-8"), serde_json::to_value(&tampered).unwrap())
            .await
            .unwrap();

        let response = app.server.post("/api/v1/sync/reconcile/student-8").await;
        response.assert_status(StatusCode::OK);
        let body: ApiResponse<SyncResponse> = response.json();
        assert_eq!(body.data.outcome, "repaired");
        assert_eq!(
            secondary_account(&app, "student-8").await.unwrap().balance(),
            dec("500.00")
        );
        // The primary copy was never touched
        assert_eq!(primary_account(&app.server, "student-8").await.balance, dec("500.00"));

        let body: ApiResponse<SyncResponse> =
            app.server.post("/api/v1/sync/reconcile/student-8").await.json();
        assert_eq!(body.data.outcome, "in_sync");

        app.server
            .post("/api/v1/sync/reconcile/nobody")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rebuild_repairs_aggregate_from_log() {
        let app = setup_test_server().await;
        record(
            &app.server,
            &transaction(Some("student-9"), "expense", "120.00", "tuition", Some("approved")),
        )
        .await;
        record(
            &app.server,
            &transaction(Some("student-9"), "fee_payment", "20.00", "tuition", Some("approved")),
        )
        .await;

        let body: ApiResponse<SyncResponse> =
            app.server.post("/api/v1/sync/rebuild/student-9").await.json();
        assert_eq!(body.data.outcome, "consistent");

        let drifted = Account::with_totals("student-9", dec("999.00"), Decimal::ZERO, chrono::Utc::now());
        app.state
            .primary
            .set(&paths::account("student-9"), serde_json::to_value(&drifted).unwrap())
            .await
            .unwrap();

        let response = app.server.post("/api/v1/sync/rebuild/student-9").await;
        response.assert_status(StatusCode::OK);
        let body: ApiResponse<SyncResponse> = response.json();
        assert_eq!(body.data.outcome, "rewritten");
        assert_eq!(body.data.secondary, Some(compute::SecondaryStatus::Synced));

        assert_eq!(primary_account(&app.server, "student-9").await.balance, dec("100.00"));
        assert_eq!(
            secondary_account(&app, "student-9").await.unwrap().balance(),
            dec("100.00")
        );
    }

    #[tokio::test]
    async fn test_openapi_document_lists_routes() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let response = server.get("/api-docs/openapi.json").await;
        response.assert_status(StatusCode::OK);
        let document: serde_json::Value = response.json();
        let paths = document["paths"].as_object().unwrap();
        for path in [
            "/health",
            "/api/v1/transactions",
            "/api/v1/transactions/{transaction_id}/status",
            "/api/v1/budgets/{budget_id}",
            "/api/v1/sync/reconcile/{entity_id}",
        ] {
            assert!(paths.contains_key(path), "missing {path}");
        }
    }
}
