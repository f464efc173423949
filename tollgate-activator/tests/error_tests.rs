use tollgate_activator::{ActivatorError, TransportError};
use tollgate_license::{ErrorKind, LicenseError};

#[test]
fn transport_error_display() {
    assert_eq!(TransportError::Timeout.to_string(), "request timed out");
    assert_eq!(
        TransportError::Server(502).to_string(),
        "server error (HTTP 502)"
    );
    assert_eq!(
        TransportError::Dns("no such host".into()).to_string(),
        "DNS resolution failed: no such host"
    );
    assert_eq!(
        TransportError::ActivationLimitReached.to_string(),
        "activation limit reached"
    );
}

#[test]
fn network_classification() {
    let network = [
        TransportError::Timeout,
        TransportError::Dns("x".into()),
        TransportError::Tls("x".into()),
        TransportError::Connect("x".into()),
        TransportError::RateLimited,
        TransportError::Server(500),
    ];
    for err in network {
        assert!(err.is_network(), "{err:?}");
    }

    let refusals = [
        TransportError::AuthenticationFailed,
        TransportError::CountryRestricted,
        TransportError::IpMismatch,
        TransportError::ActivationNotFound,
        TransportError::ActivationLimitReached,
        TransportError::Revoked,
        TransportError::Rejected("x".into()),
    ];
    for err in refusals {
        assert!(!err.is_network(), "{err:?}");
    }
}

#[test]
fn activator_error_wraps_transport() {
    let err: ActivatorError = TransportError::RateLimited.into();
    assert_eq!(err.to_string(), "server request failed: rate limited by server");
    assert!(err.is_network());
    assert!(err.is_rate_limited());
    assert!(err.as_license().is_none());
}

#[test]
fn license_errors_pass_through() {
    let err: ActivatorError = LicenseError::LicenseKeyNotSet.into();
    assert_eq!(err.to_string(), "license key not set");
    assert!(!err.is_network());
    assert_eq!(err.as_license().map(LicenseError::kind), Some(ErrorKind::Usage));
}

#[test]
fn config_and_io_errors() {
    let err = ActivatorError::Config("request_timeout_secs must be positive".into());
    assert_eq!(
        err.to_string(),
        "invalid configuration: request_timeout_secs must be positive"
    );

    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: ActivatorError = io.into();
    assert!(matches!(err, ActivatorError::Io(_)));
    assert_eq!(err.to_string(), "file error: denied");
}

#[test]
fn scheduler_stopped_display() {
    assert_eq!(
        ActivatorError::SchedulerStopped.to_string(),
        "sync scheduler not running"
    );
}
