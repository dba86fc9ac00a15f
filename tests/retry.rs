//! Retry and reconnect behaviour.

mod common;

use common::{connect, count, settings, supply_mock, supply_type};
use daq_features::{
    Driver, DriverError, MockTransport, NodeType, ScpiProtocol, TransportError, Value,
};
use std::sync::Arc;

async fn scpi_driver(node_type: Arc<NodeType>, retries: u32) -> (Driver, MockTransport) {
    let mock = supply_mock();
    let driver = Driver::builder(node_type)
        .name("ps3")
        .transport(mock.clone())
        .protocol(ScpiProtocol::default())
        .settings(settings(retries))
        .build()
        .unwrap();
    driver.initialize().await.unwrap();
    mock.clear_log();
    (driver, mock)
}

#[tokio::test]
async fn test_transient_failures_within_budget_succeed() {
    let (driver, mock) = connect(2).await;
    mock.fail_next(2);

    assert_eq!(
        driver.get("idn").await.unwrap(),
        Value::from("ACME,PS3,1234,1.07")
    );
    assert_eq!(mock.opens(), 3);
    assert_eq!(count(&mock, "query:*IDN?"), 3);
}

#[tokio::test]
async fn test_exhausted_budget_reports_every_cause() {
    let (driver, mock) = connect(2).await;
    mock.fail_next(3);

    let err = driver.get("idn").await.unwrap_err();
    match &err {
        DriverError::CommunicationFailed { attribute, causes } => {
            assert_eq!(attribute, "idn");
            assert_eq!(causes.len(), 3);
            assert!(causes
                .iter()
                .all(|c| matches!(c, DriverError::Transport(TransportError::Link(_)))));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(mock.opens(), 3);
    assert_eq!(driver.cached("idn"), None);
}

#[tokio::test]
async fn test_failed_reopen_is_terminal() {
    let (driver, mock) = connect(5).await;
    mock.fail_next(1);
    mock.fail_reopen(1);

    let err = driver.get("idn").await.unwrap_err();
    assert_eq!(err.causes().len(), 2);
    assert!(!driver.is_connected().await);

    driver.reopen_connection().await.unwrap();
    assert!(driver.is_connected().await);
    assert!(driver.get("idn").await.is_ok());
}

#[tokio::test]
async fn test_failed_set_leaves_cache_untouched() {
    let (driver, mock) = connect(1).await;
    let output = driver.channels("outputs").unwrap().resolve(2).await.unwrap();
    assert_eq!(output.get("current").await.unwrap(), Value::Float(1.0));

    mock.fail_next(2);
    let err = output.set("current", 2.0).await.unwrap_err();
    assert!(matches!(err, DriverError::CommunicationFailed { .. }));
    assert_eq!(output.cached("current"), Some(Value::Float(1.0)));

    output.set("current", 2.0).await.unwrap();
    assert_eq!(output.cached("current"), Some(Value::Float(2.0)));
}

#[tokio::test]
async fn test_invalid_response_is_not_retried() {
    let (driver, mock) = connect(3).await;
    mock.set_response("VOLT2?", "overload");
    let output = driver.channels("outputs").unwrap().resolve(2).await.unwrap();

    assert!(matches!(
        output.get("voltage").await,
        Err(DriverError::InvalidResponse { .. })
    ));
    assert_eq!(mock.opens(), 1);
}

#[tokio::test]
async fn test_feature_retries_override_default() {
    let patient = NodeType::extend(&supply_type(), "ps3-patient")
        .reconfigure("idn", |f| f.retries(3))
        .build()
        .unwrap();
    let (driver, mock) = common::connect_type(patient, 0).await;
    mock.fail_next(3);

    assert!(driver.get("idn").await.is_ok());
    assert!(matches!(
        driver.get("mode").await,
        Ok(Value::Str(_))
    ));
}

#[tokio::test]
async fn test_device_error_is_retried_then_reported() {
    let (driver, mock) = scpi_driver(supply_type(), 1).await;
    mock.set_response("SYST:ERR?", "-222,\"Data out of range\"");

    let err = driver.set("mode", "PULSED").await.unwrap_err();
    let causes = err.causes();
    assert_eq!(causes.len(), 2);
    assert!(causes
        .iter()
        .all(|c| matches!(c, DriverError::OperationFailed { .. })));
    assert_eq!(count(&mock, "write:MODE PULSED"), 2);
    assert_eq!(driver.cached("mode"), None);
}

#[tokio::test]
async fn test_device_error_opt_out_fails_immediately() {
    let strict = NodeType::extend(&supply_type(), "ps3-strict")
        .reconfigure("mode", |f| f.retry_on_operation_failure(false))
        .build()
        .unwrap();
    let (driver, mock) = scpi_driver(strict, 3).await;
    mock.set_response("SYST:ERR?", "-222,\"Data out of range\"");

    match driver.set("mode", "PULSED").await.unwrap_err() {
        DriverError::OperationFailed { attribute, details } => {
            assert_eq!(attribute, "mode");
            assert!(details.contains("Data out of range"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(count(&mock, "write:MODE PULSED"), 1);
    assert_eq!(mock.opens(), 1);
}

#[tokio::test]
async fn test_clean_error_queue_passes() {
    let (driver, mock) = scpi_driver(supply_type(), 0).await;

    driver.set("mode", "PULSED").await.unwrap();
    assert_eq!(count(&mock, "query:SYST:ERR?"), 1);
    assert_eq!(driver.cached("mode"), Some(Value::from("PULSED")));
}
