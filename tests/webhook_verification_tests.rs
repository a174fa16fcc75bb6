use http::HeaderMap;
use paygate_backend::payments::provider::PaymentProvider;
use paygate_backend::payments::providers::NowPaymentsProvider;
use paygate_backend::payments::signing::sign_payload;
use paygate_backend::payments::types::{PaymentStatus, ProviderConfig};
use serde_json::json;
use std::time::Duration;

async fn provider(ipn_secret: Option<&str>) -> NowPaymentsProvider {
    let provider = NowPaymentsProvider::new(Duration::from_secs(5)).expect("client builds");
    provider
        .initialize(ProviderConfig {
            api_key: "test-key".to_string(),
            api_secret: None,
            webhook_secret: ipn_secret.map(|s| s.to_string()),
            sandbox_mode: true,
        })
        .await
        .expect("initialize succeeds");
    provider
}

fn ipn_body() -> serde_json::Value {
    json!({
        "payment_id": 5077125051_i64,
        "payment_status": "finished",
        "pay_address": "TNDFkiSmBQorNFacb3735q8MnT3hGLtFFE",
        "price_amount": 170,
        "price_currency": "usd",
        "pay_amount": 165.652609,
        "actually_paid": "165.652609",
        "pay_currency": "usdttrc20",
        "order_id": "order-1234"
    })
}

#[tokio::test]
async fn correctly_signed_ipn_is_accepted() {
    let provider = provider(Some("ipn-secret")).await;
    let payload = ipn_body();
    let body = serde_json::to_vec(&payload).expect("serializes");
    let signature = sign_payload(&payload, "ipn-secret").expect("signing succeeds");

    let mut headers = HeaderMap::new();
    headers.insert("x-nowpayments-sig", signature.parse().unwrap());

    let verification = provider
        .verify_webhook(&body, &headers)
        .await
        .expect("verification runs");
    assert!(verification.valid);
    assert_eq!(verification.signature_valid, Some(true));

    let event = verification.event.expect("event extracted");
    assert_eq!(event.external_id.as_deref(), Some("5077125051"));
    assert_eq!(event.status, Some(PaymentStatus::Finished));
}

#[tokio::test]
async fn wrong_signature_is_rejected_without_digest_leak() {
    let provider = provider(Some("ipn-secret")).await;
    let payload = ipn_body();
    let body = serde_json::to_vec(&payload).expect("serializes");
    let signature = sign_payload(&payload, "wrong-secret").expect("signing succeeds");

    let mut headers = HeaderMap::new();
    headers.insert("x-nowpayments-sig", signature.parse().unwrap());

    let verification = provider
        .verify_webhook(&body, &headers)
        .await
        .expect("verification runs");
    assert!(!verification.valid);
    assert_eq!(verification.signature_valid, Some(false));
    let error = verification.error.expect("error message set");
    assert!(!error.contains(&signature));
}

#[tokio::test]
async fn missing_signature_header_is_rejected() {
    let provider = provider(Some("ipn-secret")).await;
    let body = serde_json::to_vec(&ipn_body()).expect("serializes");

    let verification = provider
        .verify_webhook(&body, &HeaderMap::new())
        .await
        .expect("verification runs");
    assert!(!verification.valid);
    assert_eq!(verification.signature_valid, Some(false));
}

#[tokio::test]
async fn missing_secret_skips_crypto_but_flags_it() {
    let provider = provider(None).await;
    let body = serde_json::to_vec(&ipn_body()).expect("serializes");

    let verification = provider
        .verify_webhook(&body, &HeaderMap::new())
        .await
        .expect("verification runs");
    assert!(verification.valid);
    assert_eq!(verification.signature_valid, None);
    assert!(verification.event.is_some());
}

#[tokio::test]
async fn unparseable_body_fails_closed() {
    let provider = provider(Some("ipn-secret")).await;
    let mut headers = HeaderMap::new();
    headers.insert("x-nowpayments-sig", "deadbeef".parse().unwrap());

    let verification = provider
        .verify_webhook(b"{\"unterminated", &headers)
        .await
        .expect("verification runs");
    assert!(!verification.valid);
    assert!(verification.event.is_none());
}
