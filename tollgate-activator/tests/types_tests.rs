use std::collections::BTreeMap;
use tollgate_activator::*;
use tollgate_license::DeviceInfo;

#[test]
fn activation_request_omits_missing_credential() {
    let req = ActivationRequest {
        product_id: "prod-7f3a".into(),
        license_key: "KEY".into(),
        fingerprint: "fp".into(),
        metadata: BTreeMap::new(),
        meter_attributes: Vec::new(),
        app_version: None,
        device: DeviceInfo::collect(),
        user_credential: None,
    };
    let json = serde_json::to_value(&req).unwrap();
    assert!(json.get("user_credential").is_none());
    assert_eq!(json["license_key"], "KEY");
    assert!(json["device"].is_object());
}

#[test]
fn activation_request_carries_credential() {
    let req = ActivationRequest {
        product_id: "prod-7f3a".into(),
        license_key: "KEY".into(),
        fingerprint: "fp".into(),
        metadata: BTreeMap::new(),
        meter_attributes: Vec::new(),
        app_version: Some("1.0".into()),
        device: DeviceInfo::collect(),
        user_credential: Some(UserCredential {
            email: "a@example.com".into(),
            password: "pw".into(),
        }),
    };
    let json = serde_json::to_string(&req).unwrap();
    let back: ActivationRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(back, req);
}

#[test]
fn sync_request_defaults_optional_fields() {
    let req: SyncRequest = serde_json::from_value(serde_json::json!({
        "product_id": "prod-7f3a",
        "activation_id": "act-1",
        "fingerprint": "fp",
    }))
    .unwrap();
    assert!(req.meter_attributes.is_empty());
    assert!(req.app_version.is_none());
}

#[test]
fn error_body_tolerates_partial_json() {
    let body: ErrorBody = serde_json::from_str(r#"{ "message": "nope" }"#).unwrap();
    assert_eq!(body.code, "");
    assert_eq!(body.message, "nope");
}

#[test]
fn token_response_requires_token() {
    assert!(serde_json::from_str::<TokenResponse>("{}").is_err());
    let resp: TokenResponse = serde_json::from_str(r#"{ "token": "p.s" }"#).unwrap();
    assert_eq!(resp.token, "p.s");
}
