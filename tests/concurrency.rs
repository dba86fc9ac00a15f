//! Several callers sharing one driver.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{settings, supply_mock, supply_type};
use daq_features::{Driver, DriverError, MockTransport, ScpiProtocol, Value};

async fn slow_scpi_driver(retries: u32) -> (Driver, MockTransport) {
    let mock = supply_mock().with_latency(Duration::from_millis(2));
    let driver = Driver::builder(supply_type())
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

/// Each channel sets its current four times, all channels at once.
async fn hammer_currents(driver: &Driver) {
    let outputs = driver.channels("outputs").unwrap();
    let mut tasks = Vec::new();
    for ch in 1..=3 {
        let output = outputs.resolve(ch).await.unwrap();
        tasks.push(tokio::spawn(async move {
            for step in 1..=4 {
                output.set("current", f64::from(step) * 0.5).await?;
                output.get("enabled").await?;
            }
            Ok::<_, DriverError>(())
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_never_interleave() {
    let (driver, mock) = slow_scpi_driver(0).await;
    hammer_currents(&driver).await;

    let log = mock.call_log();
    let writes: Vec<usize> = (0..log.len())
        .filter(|&i| log[i].starts_with("write:"))
        .collect();
    assert_eq!(writes.len(), 12);
    for i in writes {
        // A set and its error check are one exchange as far as other callers go.
        assert_eq!(log[i + 1], "query:SYST:ERR?", "interleaved at {i}: {log:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reconnect_is_not_interleaved() {
    let (driver, mock) = slow_scpi_driver(1).await;
    mock.fail_next(1);
    hammer_currents(&driver).await;

    let log = mock.call_log();
    let close = log.iter().position(|e| e == "close").unwrap();
    assert_eq!(log.iter().filter(|e| *e == "close").count(), 1);
    // Failed exchange, reconnect, then the same caller again before anyone else.
    assert!(log[close - 1].starts_with("write:CURR"), "{log:?}");
    assert_eq!(log[close + 1], "open");
    assert_eq!(log[close + 2], log[close - 1]);
    assert_eq!(log[close + 3], "query:SYST:ERR?");
    assert_eq!(mock.opens(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dependents_are_gone_when_the_new_value_shows() {
    let (driver, mock) = slow_scpi_driver(0).await;
    let first = driver.channels("outputs").unwrap().resolve(1).await.unwrap();
    let root = driver.node().clone();

    let done = Arc::new(AtomicBool::new(false));
    let stale_sightings = Arc::new(AtomicUsize::new(0));
    let watcher = {
        let done = done.clone();
        let stale_sightings = stale_sightings.clone();
        let first = first.clone();
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                let all_on = root.cached("all_outputs") == Some(Value::Bool(true));
                if all_on && first.cached("enabled") == Some(Value::Bool(false)) {
                    stale_sightings.fetch_add(1, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
            }
        })
    };

    for _ in 0..5 {
        driver.set("all_outputs", false).await.unwrap();
        mock.set_response("OUTP1?", "0");
        assert_eq!(first.get("enabled").await.unwrap(), Value::Bool(false));

        driver.set("all_outputs", true).await.unwrap();
        assert_eq!(first.cached("enabled"), None);
    }
    done.store(true, Ordering::SeqCst);
    watcher.await.unwrap();
    assert_eq!(stale_sightings.load(Ordering::SeqCst), 0);
}
