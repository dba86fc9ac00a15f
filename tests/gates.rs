//! Options and checks gates.

mod common;

use common::{connect, connect_type, count, supply_type};
use daq_features::{DriverError, Feature, Gate, NodeType, Value};

#[tokio::test]
async fn test_available_option_grants_access() {
    let (driver, mock) = connect(0).await;

    driver.set("tracking", true).await.unwrap();
    assert_eq!(count(&mock, "write:TRACK 1"), 1);
    assert_eq!(driver.get("tracking").await.unwrap(), Value::Bool(true));
}

#[tokio::test]
async fn test_missing_option_denies_access_without_io() {
    let (driver, mock) = connect(0).await;

    let err = driver.get("remote_sense").await.unwrap_err();
    match err {
        DriverError::AccessDenied { attribute, .. } => assert_eq!(attribute, "remote_sense"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(
        driver.set("remote_sense", true).await,
        Err(DriverError::AccessDenied { .. })
    ));
    assert_eq!(count(&mock, "query:SENS?"), 0);
    assert_eq!(mock.writes(), 0);
}

#[tokio::test]
async fn test_options_are_evaluated_once_per_node() {
    let (driver, mock) = connect(0).await;

    assert!(driver.get("remote_sense").await.is_err());

    // The option shows up later and the cache is dropped: the verdict stands.
    mock.set_response("*OPT?", "3");
    driver.clear_cache();
    assert!(matches!(
        driver.get("remote_sense").await,
        Err(DriverError::AccessDenied { .. })
    ));
    assert_eq!(count(&mock, "query:*OPT?"), 1);

    driver.get("tracking").await.unwrap();
    assert_eq!(count(&mock, "query:*OPT?"), 2);
}

#[tokio::test]
async fn test_checks_are_evaluated_on_every_access() {
    let (driver, mock) = connect(0).await;
    let trigger = driver.subsystem("trigger").unwrap();

    let err = trigger.set("delay", 0.5).await.unwrap_err();
    assert!(matches!(err, DriverError::PreconditionFailed { .. }));
    assert_eq!(count(&mock, "write:TRIG:DEL 0.5"), 0);

    trigger.set("source", "BUS").await.unwrap();
    trigger.set("delay", 0.5).await.unwrap();
    assert_eq!(trigger.get("delay").await.unwrap(), Value::Float(0.5));

    trigger.set("source", "IMM").await.unwrap();
    assert!(matches!(
        trigger.get("delay").await,
        Err(DriverError::PreconditionFailed { .. })
    ));
}

#[tokio::test]
async fn test_failed_precondition_is_not_retried() {
    let (driver, mock) = connect(3).await;

    let err = driver.set("trigger.delay", 1.0).await.unwrap_err();
    assert!(matches!(err, DriverError::PreconditionFailed { .. }));
    assert_eq!(mock.opens(), 1);
}

#[tokio::test]
async fn test_node_checks_guard_every_attribute() {
    let locked = NodeType::extend(&supply_type(), "ps3-locked")
        .checks(Gate::feature_equals("trigger.source", "BUS"))
        .build()
        .unwrap();
    let (driver, _mock) = connect_type(locked, 0).await;

    assert!(matches!(
        driver.get("idn").await,
        Err(DriverError::PreconditionFailed { .. })
    ));
    driver.set("trigger.source", "BUS").await.unwrap();
    assert_eq!(
        driver.get("idn").await.unwrap(),
        Value::from("ACME,PS3,1234,1.07")
    );
}

#[tokio::test]
async fn test_self_referencing_gate_is_a_configuration_error() {
    let looping = NodeType::extend(&supply_type(), "ps3-loop")
        .feature(
            Feature::new("level")
                .getter("LEV?")
                .float()
                .checks(Gate::feature_equals("level", 1.0)),
        )
        .build()
        .unwrap();
    let (driver, mock) = connect_type(looping, 0).await;

    assert!(matches!(
        driver.get("level").await,
        Err(DriverError::Configuration(_))
    ));
    assert_eq!(count(&mock, "query:LEV?"), 0);
}

#[tokio::test]
async fn test_custom_gate_on_set_value() {
    let guarded = NodeType::extend(&supply_type(), "ps3-guarded")
        .reconfigure("mode", |f| {
            f.checks(Gate::value("pulsed mode locked", |value| {
                value != &Value::from("PULSED")
            }))
        })
        .build()
        .unwrap();
    let (driver, _mock) = connect_type(guarded, 0).await;

    driver.set("mode", "CW").await.unwrap();
    assert!(matches!(
        driver.set("mode", "PULSED").await,
        Err(DriverError::PreconditionFailed { .. })
    ));
}

#[tokio::test]
async fn test_node_checks_may_read_their_own_node() {
    let gated = NodeType::extend(&supply_type(), "ps3-cw-only")
        .checks(Gate::feature_equals("mode", "CW"))
        .build()
        .unwrap();
    let (driver, mock) = connect_type(gated, 0).await;

    assert_eq!(
        driver.get("idn").await.unwrap(),
        Value::from("ACME,PS3,1234,1.07")
    );
    assert_eq!(driver.get("mode").await.unwrap(), Value::from("CW"));

    driver.set("mode", "PULSED").await.unwrap();
    driver.clear_cache();
    assert!(matches!(
        driver.get("idn").await,
        Err(DriverError::PreconditionFailed { .. })
    ));
    assert_eq!(count(&mock, "query:MODE?"), 2);
}

#[tokio::test]
async fn test_availability_is_checked_before_the_value() {
    let (driver, mock) = connect(0).await;

    // Not a boolean, but the instrument lacks the option in the first place.
    assert!(matches!(
        driver.set("remote_sense", "maybe").await,
        Err(DriverError::AccessDenied { .. })
    ));
    assert!(matches!(
        driver.set("trigger.delay", 7200.0).await,
        Err(DriverError::PreconditionFailed { .. })
    ));
    assert_eq!(mock.writes(), 0);
}
