use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde_json::{Value, json};

use escrowdesk_api::app::{AppServices, router_for, services::build_services};
use escrowdesk_api::config::ApiConfig;
use escrowdesk_auth::{Principal, RoleKind, TokenService};
use escrowdesk_core::UserId;

const SECRET: &str = "test-secret";
const ADMIN_EMAIL: &str = "admin@escrow.test";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory stores, ephemeral port.
        let config = ApiConfig::new(SECRET).with_bootstrap_admin(ADMIN_EMAIL);
        let services = Arc::new(build_services(&config).await.expect("services"));
        let app = router_for(services.clone(), &config);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            services,
            handle,
        }
    }

    async fn post(&self, token: Option<&str>, path: &str, body: Value) -> (StatusCode, Value) {
        let mut req = self.client.post(format!("{}{path}", self.base_url)).json(&body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, token: Option<&str>, path: &str) -> (StatusCode, Value) {
        let mut req = self.client.get(format!("{}{path}", self.base_url));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    /// Register, then wait for the users projection so a session can be issued.
    async fn sign_up(&self, display_id: &str, email: &str, roles: &[&str]) -> (String, String) {
        let (status, body) = self
            .post(
                None,
                "/users",
                json!({
                    "display_id": display_id,
                    "email": email,
                    "password_hash": "argon2id$v=19$stub",
                    "roles": roles,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "sign-up failed: {body}");
        let user_id = body["user_id"].as_str().unwrap().to_string();

        let token = self.session_eventually(display_id).await;
        (user_id, token)
    }

    async fn session_eventually(&self, display_id: &str) -> String {
        // Read side is eventually consistent with the command path.
        for _ in 0..100 {
            let (status, body) = self
                .post(None, "/session", json!({ "display_id": display_id }))
                .await;
            if status == StatusCode::OK {
                return body["token"].as_str().unwrap().to_string();
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("user {display_id} never became visible to /session");
    }

    async fn register_company(&self, token: &str, name: &str) -> String {
        let (status, body) = self.post(Some(token), "/companies", json!({ "name": name })).await;
        assert_eq!(status, StatusCode::CREATED, "company registration failed: {body}");
        body["company_id"].as_str().unwrap().to_string()
    }

    async fn companies_eventually(&self, token: &str, count: usize) {
        for _ in 0..100 {
            let (status, body) = self.get(Some(token), "/companies").await;
            if status == StatusCode::OK && body.as_array().map(Vec::len) == Some(count) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("directory never reached {count} companies");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        self.services.shutdown();
    }
}

struct Trade {
    buyer_id: String,
    buyer: String,
    seller: String,
    contract_id: String,
}

/// Buyer and seller with their own companies, and a full-payment contract
/// created by the buyer naming the seller.
async fn open_trade(srv: &TestServer) -> Trade {
    let (buyer_id, buyer) = srv.sign_up("USR-B", "buyer@escrow.test", &["buyer"]).await;
    let (seller_id, seller) = srv.sign_up("USR-S", "seller@escrow.test", &["seller"]).await;
    srv.register_company(&buyer, "Buyer Pvt Ltd").await;
    srv.register_company(&seller, "Seller Pvt Ltd").await;
    srv.companies_eventually(&buyer, 2).await;

    let now = Utc::now();
    let (status, body) = srv
        .post(
            Some(&buyer),
            "/contracts",
            json!({
                "name": "Copper wire",
                "counterparty": { "kind": "user", "id": seller_id },
                "base_amount": 100_000,
                "payment_mode": "full_payment",
                "agreement_mode": "bilateral",
                "planned_start": now + ChronoDuration::days(1),
                "planned_end": now + ChronoDuration::days(30),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "contract creation failed: {body}");
    assert_eq!(body["status"], "created");
    assert_eq!(body["creator_party"], "buyer");

    Trade {
        buyer_id,
        buyer,
        seller,
        contract_id: body["contract_id"].as_str().unwrap().to_string(),
    }
}

/// Agree on both sides, fund the escrow and start execution.
async fn start_trade(srv: &TestServer, trade: &Trade) {
    let contract = format!("/contracts/{}", trade.contract_id);
    for token in [&trade.buyer, &trade.seller] {
        let (status, body) = srv.post(Some(token), &format!("{contract}/agree"), json!({})).await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }
    let (status, body) = srv.post(Some(&trade.buyer), &format!("{contract}/deposit"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let (status, body) = srv.post(Some(&trade.buyer), &format!("{contract}/start"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

/// Create a transaction on the trade and drive it to `successful`.
async fn settled_transaction(
    srv: &TestServer,
    trade: &Trade,
    admin: &str,
    kind: &str,
    amount: i64,
) -> String {
    let (status, body) = srv
        .post(
            Some(&trade.buyer),
            "/transactions",
            json!({ "contract_id": trade.contract_id, "kind": kind, "amount": amount }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let tx = body["transaction_id"].as_str().unwrap().to_string();

    for step in ["queue", "submit"] {
        let (status, body) = srv
            .post(Some(&trade.buyer), &format!("/transactions/{tx}/{step}"), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK, "{step}: {body}");
    }
    let (status, body) = srv.post(Some(admin), &format!("/transactions/{tx}/approve"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let (status, body) = srv
        .post(Some(admin), &format!("/transactions/{tx}/complete"), json!({ "reference": "UTR-1" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "successful");
    tx
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let (status, _) = srv.get(None, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = srv.get(None, "/whoami").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");

    let forged = TokenService::new("other-secret")
        .issue(&Principal::new(UserId::new(), "USR-X", vec![]), Utc::now())
        .unwrap();
    let (status, _) = srv.get(Some(&forged), "/whoami").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_identifies_the_registered_user() {
    let srv = TestServer::spawn().await;
    let (user_id, token) = srv.sign_up("USR-1", "one@escrow.test", &["buyer"]).await;

    let (status, body) = srv.get(Some(&token), "/whoami").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], user_id.as_str());
    assert_eq!(body["display_id"], "USR-1");
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "buyer"));

    let (status, body) = srv.post(None, "/session", json!({ "display_id": "USR-404" })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "{body}");
}

#[tokio::test]
async fn admin_role_is_reserved_for_the_bootstrap_email() {
    let srv = TestServer::spawn().await;

    let (status, body) = srv
        .post(
            None,
            "/users",
            json!({
                "display_id": "USR-EVIL",
                "email": "evil@escrow.test",
                "password_hash": "x",
                "roles": ["admin"],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

    let (_, token) = srv.sign_up("USR-ADMIN", ADMIN_EMAIL, &[]).await;
    let (_, body) = srv.get(Some(&token), "/whoami").await;
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "admin"));
}

#[tokio::test]
async fn claimed_roles_do_not_grant_privileges() {
    let srv = TestServer::spawn().await;
    let (user_id, _) = srv.sign_up("USR-BASIC", "basic@escrow.test", &["basic_user"]).await;

    // Validly signed, but claims a role the store never granted.
    let principal = Principal::new(user_id.parse().unwrap(), "USR-BASIC", vec![RoleKind::Admin]);
    let token = TokenService::new(SECRET).issue(&principal, Utc::now()).unwrap();

    let (status, body) = srv
        .post(Some(&token), "/contracts", json!({
            "name": "Nope",
            "counterparty": { "kind": "user", "id": UserId::new() },
            "base_amount": 1_000,
            "payment_mode": "full_payment",
            "planned_start": Utc::now(),
            "planned_end": Utc::now(),
        }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(body["error"], "forbidden");

    let (status, body) = srv.get(Some(&token), "/authz/explain?action=contract.create").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["granted"], false);
    assert_eq!(body["roles"], json!(["basic_user"]));
}

#[tokio::test]
async fn execution_waits_for_agreement_and_escrow() {
    let srv = TestServer::spawn().await;
    let trade = open_trade(&srv).await;
    let contract = format!("/contracts/{}", trade.contract_id);

    let (status, body) = srv.post(Some(&trade.buyer), &format!("{contract}/start"), json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert_eq!(body["error"], "guard_violation");
    assert_eq!(body["guard"], "buyer_agreed");

    for token in [&trade.buyer, &trade.seller] {
        let (status, body) = srv.post(Some(token), &format!("{contract}/agree"), json!({})).await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    let (status, body) = srv.post(Some(&trade.buyer), &format!("{contract}/start"), json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["guard"], "buyer_paid_escrow_amount");

    // The seller cannot act for the buyer side.
    let (status, body) = srv
        .post(Some(&trade.seller), &format!("{contract}/deposit"), json!({ "party": "buyer" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["guard"], "party_member");
}

#[tokio::test]
async fn full_payment_contract_runs_to_close() {
    let srv = TestServer::spawn().await;
    let trade = open_trade(&srv).await;
    let (_, admin) = srv.sign_up("USR-ADMIN", ADMIN_EMAIL, &[]).await;
    let contract = format!("/contracts/{}", trade.contract_id);

    for token in [&trade.buyer, &trade.seller] {
        let (status, _) = srv.post(Some(token), &format!("{contract}/agree"), json!({})).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = srv.post(Some(&trade.buyer), &format!("{contract}/deposit"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["checklist"]["buyer_paid_escrow_amount"], true);

    let (status, body) = srv.post(Some(&trade.buyer), &format!("{contract}/start"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "in_progress");

    let (status, body) = srv
        .post(
            Some(&trade.buyer),
            "/transactions",
            json!({
                "contract_id": trade.contract_id,
                "kind": "full_release",
                "amount": 100_000,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let tx = body["transaction_id"].as_str().unwrap().to_string();

    // Releasing against an unsettled transaction is refused.
    let (status, body) = srv
        .post(Some(&trade.buyer), &format!("{contract}/release"), json!({ "transaction_id": tx }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["guard"], "transaction_successful");

    for step in ["queue", "submit"] {
        let (status, body) = srv
            .post(Some(&trade.buyer), &format!("/transactions/{tx}/{step}"), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK, "{step}: {body}");
    }
    let (status, _) = srv
        .post(Some(&trade.buyer), &format!("/transactions/{tx}/approve"), json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = srv.post(Some(&admin), &format!("/transactions/{tx}/approve"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let (status, body) = srv
        .post(
            Some(&admin),
            &format!("/transactions/{tx}/complete"),
            json!({ "reference": "UTR-0042" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "successful");

    let (status, body) = srv
        .post(Some(&trade.buyer), &format!("{contract}/release"), json!({ "transaction_id": tx }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["checklist"]["full_payment_released"], true);

    let (status, body) = srv.post(Some(&trade.seller), &format!("{contract}/close"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "closed");
    assert_eq!(body["checklist"]["closed"], true);

    let (status, body) = srv.get(Some(&trade.seller), &contract).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "closed");
}

#[tokio::test]
async fn release_needs_a_full_release_of_the_base_amount() {
    let srv = TestServer::spawn().await;
    let trade = open_trade(&srv).await;
    let (_, admin) = srv.sign_up("USR-ADMIN", ADMIN_EMAIL, &[]).await;
    let contract = format!("/contracts/{}", trade.contract_id);
    start_trade(&srv, &trade).await;

    let refund = settled_transaction(&srv, &trade, &admin, "refund", 1).await;
    let (status, body) = srv
        .post(Some(&trade.buyer), &format!("{contract}/release"), json!({ "transaction_id": refund }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert_eq!(body["guard"], "transaction_kind");

    let short = settled_transaction(&srv, &trade, &admin, "full_release", 99_999).await;
    let (status, body) = srv
        .post(Some(&trade.buyer), &format!("{contract}/release"), json!({ "transaction_id": short }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert_eq!(body["guard"], "transaction_amount");

    let (status, body) = srv.post(Some(&trade.seller), &format!("{contract}/close"), json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert_eq!(body["guard"], "execution_complete");

    let (_, body) = srv.get(Some(&trade.buyer), &contract).await;
    assert_eq!(body["status"], "in_progress");
    assert_eq!(body["checklist"]["full_payment_released"], false);
}

#[tokio::test]
async fn new_affiliation_applies_to_existing_sessions() {
    let srv = TestServer::spawn().await;
    let trade = open_trade(&srv).await;
    let contract = format!("/contracts/{}", trade.contract_id);

    // A session issued while the buyer still represents Buyer Pvt Ltd.
    let session = srv.session_eventually("USR-B").await;
    let (_, whoami) = srv.get(Some(&session), "/whoami").await;
    assert!(whoami["company_id"].is_string(), "{whoami}");

    let (_, other) = srv.sign_up("USR-O", "other@escrow.test", &["basic_user"]).await;
    let other_company = srv.register_company(&other, "Other Traders").await;
    let (status, body) = srv
        .post(
            Some(&session),
            &format!("/users/{}/company", trade.buyer_id),
            json!({ "company_id": other_company }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["company_id"], other_company.as_str());

    let (status, body) = srv.post(Some(&session), &format!("{contract}/agree"), json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert_eq!(body["guard"], "party_member");
}
