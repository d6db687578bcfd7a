mod misc {
    use actix_web::{body::MessageBody, test, test::TestRequest, App};

    use crate::routes::health;

    #[actix_web::test]
    async fn health_endpoint() {
        let app = test::init_service(App::new().service(health)).await;
        let req = TestRequest::get().uri("/health").to_request();
        let (_req, res) = test::call_service(&app, req).await.into_parts();
        let status = res.status();
        let body = res.into_body().try_into_bytes().unwrap();
        assert!(status.is_success());
        assert_eq!(body, "👍️\n");
    }
}

mod webhooks {
    use actix_web::{
        dev::{Service, ServiceResponse},
        test,
        test::TestRequest,
        web,
        App,
        Error,
    };
    use chrono::Utc;
    use log::*;
    use payhook_common::{Money, Secret};
    use payhook_engine::{
        db_types::{NewOrder, OrderId, PaymentStatus, SubscriptionStatus},
        test_utils::prepare_env::{prepare_test_env, random_db_path},
        ReconcilerApi,
        ReconcilerDatabase,
        SqliteDatabase,
    };
    use serde_json::Value;
    use sqlx::{migrate::MigrateDatabase, Sqlite};

    use crate::{
        config::{ProviderConfig, ServerConfig},
        helpers::{hmac_sha256_base64, hmac_sha256_hex},
        providers::paygate,
        routes::{PaygateCallbackRoute, PsifiWebhookRoute, StripeWebhookRoute},
    };

    const STRIPE_SECRET: &str = "whsec_stripe_test";
    const PSIFI_SECRET: &str = "whsec_dGVzdC1zZWNyZXQtYnl0ZXM=";
    const NONCE_SECRET: &str = "nonce-test-secret";

    fn test_config() -> ServerConfig {
        ServerConfig {
            providers: ProviderConfig {
                stripe_webhook_secret: Some(Secret::new(STRIPE_SECRET.to_string())),
                psifi_webhook_secret: Some(Secret::new(PSIFI_SECRET.to_string())),
                paygate_nonce_secret: Some(Secret::new(NONCE_SECRET.to_string())),
            },
            ..ServerConfig::default()
        }
    }

    async fn setup() -> SqliteDatabase {
        let url = random_db_path();
        prepare_test_env(&url).await;
        SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
    }

    async fn tear_down(mut db: SqliteDatabase) {
        let url = db.url().to_string();
        if let Err(e) = db.close().await {
            error!("🚀️ Failed to close database: {e}");
        }
        Sqlite::drop_database(&url).await.unwrap();
    }

    async fn build_app(
        db: SqliteDatabase,
    ) -> impl Service<actix_http::Request, Response = ServiceResponse, Error = Error> {
        let api = ReconcilerApi::new(db);
        test::init_service(
            App::new()
                .app_data(web::Data::new(api))
                .app_data(web::Data::new(test_config()))
                .service(StripeWebhookRoute::<SqliteDatabase>::new())
                .service(PsifiWebhookRoute::<SqliteDatabase>::new())
                .service(PaygateCallbackRoute::<SqliteDatabase>::new()),
        )
        .await
    }

    fn stripe_sig(body: &str) -> String {
        let ts = Utc::now().timestamp();
        let payload = format!("{ts}.{body}");
        let sig = hmac_sha256_hex(STRIPE_SECRET.as_bytes(), payload.as_bytes()).unwrap();
        format!("t={ts},v1={sig}")
    }

    fn svix_headers(body: &str, msg_id: &str) -> (String, String, String) {
        let ts = Utc::now().timestamp().to_string();
        let key = base64::decode(PSIFI_SECRET.strip_prefix("whsec_").unwrap()).unwrap();
        let payload = format!("{msg_id}.{ts}.{body}");
        let sig = hmac_sha256_base64(&key, payload.as_bytes()).unwrap();
        (msg_id.to_string(), ts, format!("v1,{sig}"))
    }

    fn psifi_request(body: &'static str, msg_id: &str) -> TestRequest {
        let (id, ts, sig) = svix_headers(body, msg_id);
        TestRequest::post()
            .uri("/webhook/psifi")
            .insert_header(("svix-id", id))
            .insert_header(("svix-timestamp", ts))
            .insert_header(("svix-signature", sig))
            .set_payload(body)
    }

    const PSIFI_PAID_BODY: &str = r#"{
        "event": "payment.updated",
        "id": "txn_001",
        "order": {
            "externalId": "550e8400-e29b-41d4-a716-446655440000-pl-1700000000",
            "status": "complete",
            "totalAmount": 15000
        }
    }"#;

    #[actix_web::test]
    async fn psifi_deliver_and_redeliver_marks_paid_exactly_once() {
        let db = setup().await;
        let api = ReconcilerApi::new(db.clone());
        let order_id = OrderId::from("550e8400-e29b-41d4-a716-446655440000");
        let order = NewOrder::new(order_id.clone(), Money::from_major(150)).with_commission(Money::from_major(15));
        api.register_order(order).await.unwrap();

        let app = build_app(db.clone()).await;
        let res = test::call_service(&app, psifi_request(PSIFI_PAID_BODY, "msg_1").to_request()).await;
        assert!(res.status().is_success());
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["received"], true);
        assert_eq!(body["action"], "processed");

        let order = api.fetch_order(&order_id).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.amount_paid, Some(Money::from_cents(15000)));
        assert_eq!(order.payment_method.as_deref(), Some("psifi"));
        assert_eq!(order.provider_transaction_id.as_deref(), Some("txn_001"));

        // The provider redelivers the same event with a fresh Svix envelope.
        let res = test::call_service(&app, psifi_request(PSIFI_PAID_BODY, "msg_2").to_request()).await;
        assert!(res.status().is_success());
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["action"], "already_paid");

        tear_down(db).await;
    }

    #[actix_web::test]
    async fn psifi_tampered_body_is_unauthorized() {
        let db = setup().await;
        let app = build_app(db.clone()).await;
        let (id, ts, sig) = svix_headers(PSIFI_PAID_BODY, "msg_1");
        let req = TestRequest::post()
            .uri("/webhook/psifi")
            .insert_header(("svix-id", id))
            .insert_header(("svix-timestamp", ts))
            .insert_header(("svix-signature", sig))
            .set_payload(r#"{"status":"complete","metadata":{"order_id":"evil"}}"#)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status().as_u16(), 401);
        tear_down(db).await;
    }

    #[actix_web::test]
    async fn psifi_replayed_timestamp_is_unauthorized() {
        let db = setup().await;
        let app = build_app(db.clone()).await;
        let ts = (Utc::now().timestamp() - 400).to_string();
        let key = base64::decode(PSIFI_SECRET.strip_prefix("whsec_").unwrap()).unwrap();
        let payload = format!("msg_1.{ts}.{PSIFI_PAID_BODY}");
        let sig = format!("v1,{}", hmac_sha256_base64(&key, payload.as_bytes()).unwrap());
        let req = TestRequest::post()
            .uri("/webhook/psifi")
            .insert_header(("svix-id", "msg_1"))
            .insert_header(("svix-timestamp", ts))
            .insert_header(("svix-signature", sig))
            .set_payload(PSIFI_PAID_BODY)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status().as_u16(), 401);
        tear_down(db).await;
    }

    #[actix_web::test]
    async fn psifi_missing_headers_are_unauthorized() {
        let db = setup().await;
        let app = build_app(db.clone()).await;
        let req = TestRequest::post().uri("/webhook/psifi").set_payload(PSIFI_PAID_BODY).to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status().as_u16(), 401);
        tear_down(db).await;
    }

    #[actix_web::test]
    async fn psifi_event_without_order_id_is_acknowledged() {
        let db = setup().await;
        let app = build_app(db.clone()).await;
        let body = r#"{"event":"payment.updated","id":"txn_9","status":"complete"}"#;
        let res = test::call_service(&app, psifi_request(body, "msg_1").to_request()).await;
        assert!(res.status().is_success());
        let ack: Value = test::read_body_json(res).await;
        assert_eq!(ack["action"], "skipped_no_order_id");
        tear_down(db).await;
    }

    #[actix_web::test]
    async fn paygate_callback_full_flow() {
        let db = setup().await;
        let api = ReconcilerApi::new(db.clone());
        let order_id = "661f9511-f3ac-52e5-b827-557766551111";
        let order = NewOrder::new(OrderId::from(order_id), Money::from_major(100));
        api.register_order(order).await.unwrap();
        let nonce = paygate::derive_nonce(order_id, NONCE_SECRET).unwrap();

        let app = build_app(db.clone()).await;

        // Wrong nonce is forbidden.
        let uri = format!("/callback/paygate365?order_id={order_id}&nonce=00000000000000000000000000000000");
        let res = test::call_service(&app, TestRequest::get().uri(&uri).to_request()).await;
        assert_eq!(res.status().as_u16(), 403);

        // One cent below the 60% threshold is rejected but acknowledged.
        let uri = format!("/callback/paygate365?order_id={order_id}&nonce={nonce}&txid_out=tx-1&value_coin=59.99");
        let res = test::call_service(&app, TestRequest::get().uri(&uri).to_request()).await;
        assert!(res.status().is_success());
        let ack: Value = test::read_body_json(res).await;
        assert_eq!(ack["message"], "below_threshold");
        let order = api.fetch_order(&OrderId::from(order_id)).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Unpaid);
        assert!(order.notes.as_deref().unwrap_or_default().contains("$59.99"));

        // Exactly 60% is accepted.
        let uri = format!("/callback/paygate365?order_id={order_id}&nonce={nonce}&txid_out=tx-2&value_coin=60.00");
        let res = test::call_service(&app, TestRequest::get().uri(&uri).to_request()).await;
        assert!(res.status().is_success());
        let ack: Value = test::read_body_json(res).await;
        assert_eq!(ack["message"], "Order marked as paid");
        let order = api.fetch_order(&OrderId::from(order_id)).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.amount_paid, Some(Money::from_cents(6000)));

        // Replayed callback is absorbed by the idempotency gate.
        let res = test::call_service(&app, TestRequest::get().uri(&uri).to_request()).await;
        let ack: Value = test::read_body_json(res).await;
        assert_eq!(ack["message"], "already_paid");

        tear_down(db).await;
    }

    #[actix_web::test]
    async fn paygate_unknown_order_is_acknowledged() {
        let db = setup().await;
        let app = build_app(db.clone()).await;
        let nonce = paygate::derive_nonce("no-such-order", NONCE_SECRET).unwrap();
        let uri = format!("/callback/paygate365?order_id=no-such-order&nonce={nonce}&value_coin=10.00");
        let res = test::call_service(&app, TestRequest::get().uri(&uri).to_request()).await;
        assert!(res.status().is_success());
        let ack: Value = test::read_body_json(res).await;
        assert_eq!(ack["message"], "order_not_found");
        tear_down(db).await;
    }

    fn checkout_body(event_id: &str) -> String {
        format!(
            r#"{{
            "id": "{event_id}",
            "type": "checkout.session.completed",
            "data": {{ "object": {{
                "mode": "subscription",
                "customer": "cus_77",
                "subscription": "sub_77",
                "created": 1767225600,
                "amount_total": 4999,
                "metadata": {{ "org_id": "org-earth", "plan_id": "pro", "billing_period": "monthly" }}
            }}}}
        }}"#
        )
    }

    #[actix_web::test]
    async fn stripe_checkout_then_duplicate_then_cancel() {
        let db = setup().await;
        let app = build_app(db.clone()).await;

        let body = checkout_body("evt_1");
        let req = TestRequest::post()
            .uri("/webhook/stripe")
            .insert_header(("stripe-signature", stripe_sig(&body)))
            .set_payload(body.clone())
            .to_request();
        let res = test::call_service(&app, req).await;
        assert!(res.status().is_success());
        let ack: Value = test::read_body_json(res).await;
        assert_eq!(ack["received"], true);
        assert_eq!(ack.get("duplicate"), None);

        let sub = db.fetch_subscription_for_org("org-earth").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.stripe_subscription_id.as_deref(), Some("sub_77"));

        // Same event id again: detected by the billing audit log.
        let req = TestRequest::post()
            .uri("/webhook/stripe")
            .insert_header(("stripe-signature", stripe_sig(&body)))
            .set_payload(body)
            .to_request();
        let res = test::call_service(&app, req).await;
        let ack: Value = test::read_body_json(res).await;
        assert_eq!(ack["duplicate"], true);

        let cancel = r#"{"id":"evt_2","type":"customer.subscription.deleted","data":{"object":{"id":"sub_77"}}}"#;
        let req = TestRequest::post()
            .uri("/webhook/stripe")
            .insert_header(("stripe-signature", stripe_sig(cancel)))
            .set_payload(cancel)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert!(res.status().is_success());
        let sub = db.fetch_subscription_for_org("org-earth").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);

        tear_down(db).await;
    }

    #[actix_web::test]
    async fn stripe_bad_signature_is_unauthorized() {
        let db = setup().await;
        let app = build_app(db.clone()).await;
        let body = checkout_body("evt_1");
        let ts = Utc::now().timestamp();
        let req = TestRequest::post()
            .uri("/webhook/stripe")
            .insert_header(("stripe-signature", format!("t={ts},v1=deadbeef")))
            .set_payload(body)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status().as_u16(), 401);
        tear_down(db).await;
    }

    #[actix_web::test]
    async fn stripe_malformed_json_is_bad_request() {
        let db = setup().await;
        let app = build_app(db.clone()).await;
        let body = "not json at all";
        let req = TestRequest::post()
            .uri("/webhook/stripe")
            .insert_header(("stripe-signature", stripe_sig(body)))
            .set_payload(body)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status().as_u16(), 400);
        tear_down(db).await;
    }
}

mod dispatch {
    use std::sync::{Arc, Mutex};

    use log::*;
    use payhook_common::Money;
    use payhook_engine::{
        db_types::{NewOrder, OrderId, OutboxStatus},
        events::{PaidOrderSummary, PaymentEvent, PaymentProvider},
        test_utils::prepare_env::{prepare_test_env, random_db_path},
        ReconcilerApi,
        ReconcilerDatabase,
        SqliteDatabase,
    };
    use sqlx::{migrate::MigrateDatabase, Sqlite};

    use crate::dispatch_worker::{drain_outbox, Notifier, NotifyError};

    /// Records every notification instead of making HTTP calls. Set `fail_sms` to make SMS dispatch fail.
    #[derive(Clone, Default)]
    struct RecordingNotifier {
        partner_calls: Arc<Mutex<Vec<(String, Money)>>>,
        sms_calls: Arc<Mutex<Vec<String>>>,
        fail_sms: bool,
    }

    impl Notifier for RecordingNotifier {
        async fn notify_partner(&self, summary: &PaidOrderSummary, commission: Money) -> Result<(), NotifyError> {
            self.partner_calls.lock().unwrap().push((summary.order_id.as_str().to_string(), commission));
            Ok(())
        }

        async fn send_operator_sms(&self, summary: &PaidOrderSummary) -> Result<(), NotifyError> {
            if self.fail_sms {
                return Err(NotifyError::ErrorResponse(500));
            }
            self.sms_calls.lock().unwrap().push(summary.order_id.as_str().to_string());
            Ok(())
        }
    }

    async fn setup_paid_order(order_id: &str, commission: Money) -> ReconcilerApi<SqliteDatabase> {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
        let api = ReconcilerApi::new(db);
        let order = NewOrder::new(OrderId::from(order_id), Money::from_major(100)).with_commission(commission);
        api.register_order(order).await.unwrap();
        let event = PaymentEvent::success(PaymentProvider::PsiFi, OrderId::from(order_id))
            .with_paid_amount(Money::from_major(100))
            .with_transaction_id("tx-1");
        api.process_payment_event(event).await.unwrap();
        api
    }

    async fn tear_down(mut api: ReconcilerApi<SqliteDatabase>) {
        let url = api.db().url().to_string();
        if let Err(e) = api.db_mut().close().await {
            error!("🚀️ Failed to close database: {e}");
        }
        Sqlite::drop_database(&url).await.unwrap();
    }

    #[tokio::test]
    async fn drain_dispatches_commission_and_sms_once() {
        let api = setup_paid_order("order-disp-1", Money::from_major(10)).await;
        let notifier = RecordingNotifier::default();

        let dispatched = drain_outbox(api.db(), &notifier).await.unwrap();
        assert_eq!(dispatched, 2);
        assert_eq!(notifier.partner_calls.lock().unwrap().as_slice(), &[("order-disp-1".to_string(), Money::from_major(10))]);
        assert_eq!(notifier.sms_calls.lock().unwrap().as_slice(), &["order-disp-1".to_string()]);

        // A second pass finds nothing pending.
        let dispatched = drain_outbox(api.db(), &notifier).await.unwrap();
        assert_eq!(dispatched, 0);
        assert_eq!(notifier.partner_calls.lock().unwrap().len(), 1);

        let entries = api.db().fetch_outbox_for_order(&OrderId::from("order-disp-1")).await.unwrap();
        assert!(entries.iter().all(|e| e.status == OutboxStatus::Sent));
        tear_down(api).await;
    }

    #[tokio::test]
    async fn failed_sms_is_recorded_and_not_retried() {
        let api = setup_paid_order("order-disp-2", Money::default()).await;
        let notifier = RecordingNotifier { fail_sms: true, ..RecordingNotifier::default() };

        drain_outbox(api.db(), &notifier).await.unwrap();
        let entries = api.db().fetch_outbox_for_order(&OrderId::from("order-disp-2")).await.unwrap();
        let sms = entries.iter().find(|e| e.status == OutboxStatus::Failed).expect("Expected a failed entry");
        assert!(sms.error.as_deref().unwrap_or_default().contains("500"));

        // Failed entries stay failed. The worker does not pick them up again.
        let dispatched = drain_outbox(api.db(), &notifier).await.unwrap();
        assert_eq!(dispatched, 0);
        tear_down(api).await;
    }
}
