use paygate_backend::payments::signing::{canonical_json, sign_payload, verify_signature};
use serde_json::json;

#[test]
fn canonical_json_sorts_keys_at_every_depth() {
    let payload = json!({
        "z": 1,
        "a": {"c": [3, 2, 1], "b": {"y": true, "x": false}},
        "m": "mid"
    });

    assert_eq!(
        canonical_json(&payload),
        r#"{"a":{"b":{"x":false,"y":true},"c":[3,2,1]},"m":"mid","z":1}"#
    );
}

#[test]
fn signature_is_stable_under_key_reordering() {
    let first = json!({"payment_id": 1, "payment_status": "finished", "pay_amount": "10"});
    let second = json!({"pay_amount": "10", "payment_status": "finished", "payment_id": 1});

    let sig_first = sign_payload(&first, "secret").expect("signing succeeds");
    let sig_second = sign_payload(&second, "secret").expect("signing succeeds");
    assert_eq!(sig_first, sig_second);
    // HMAC-SHA512 hex digest
    assert_eq!(sig_first.len(), 128);
}

#[test]
fn signed_payload_verifies_and_tampering_is_detected() {
    let payload = json!({"payment_id": "9001", "payment_status": "confirmed"});
    let body = serde_json::to_vec(&payload).expect("serializes");
    let signature = sign_payload(&payload, "ipn-secret").expect("signing succeeds");

    assert!(verify_signature(&body, "ipn-secret", &signature));
    assert!(!verify_signature(&body, "other-secret", &signature));

    let tampered = serde_json::to_vec(&json!({
        "payment_id": "9001",
        "payment_status": "finished"
    }))
    .expect("serializes");
    assert!(!verify_signature(&tampered, "ipn-secret", &signature));
}

#[test]
fn malformed_body_never_verifies() {
    let payload = json!({"payment_id": "1"});
    let signature = sign_payload(&payload, "secret").expect("signing succeeds");

    assert!(!verify_signature(b"not json at all", "secret", &signature));
    assert!(!verify_signature(b"", "secret", &signature));
}
