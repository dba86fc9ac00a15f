//! Simulated triple-output bench supply shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use daq_features::{
    Action, CallOutcome, ChannelIds, ChannelSpec, Driver, Feature, FloatLimits, Gate, Job,
    Limits, MockTransport, NodeType, PipelineSettings, Value,
};

pub fn settings(retries: u32) -> PipelineSettings {
    PipelineSettings {
        default_retries: retries,
        reopen_delay_ms: 0,
        job_poll_interval_ms: 5,
        job_timeout_ms: 1_000,
        ..PipelineSettings::default()
    }
}

/// Instrument state as the mock reports it right after power-up.
pub fn supply_mock() -> MockTransport {
    let mock = MockTransport::new()
        .with_response("*IDN?", "ACME,PS3,1234,1.07")
        // TRACKING installed, REMOTE_SENSE not.
        .with_response("*OPT?", "1")
        .with_response("MODE?", "CW")
        .with_response("TRACK?", "0")
        .with_response("OUTP:ALL?", "0")
        .with_response("TRIG:SOUR?", "IMM")
        .with_response("TRIG:DEL?", "0")
        .with_response("*OPC?", "0")
        .with_response("TST:RES?", "PASS")
        .with_response("SYST:ERR?", "+0,\"No error\"");
    for ch in 1..=3 {
        mock.set_response(&format!("VOLT{ch}?"), "0");
        mock.set_response(&format!("CURR{ch}?"), "1");
        mock.set_response(&format!("OUTP{ch}?"), "0");
        mock.set_response(&format!("VMAX{ch}?"), if ch == 1 { "6" } else { "25" });
        mock.set_response(&format!("RANG{ch}?"), "LOW");
    }
    mock
}

fn apply_action() -> Action {
    Action::new("apply", |mut scope, args| {
        Box::pin(async move {
            let voltage = args.require("voltage")?.clone();
            let current = args.require("current")?.clone();
            scope
                .write(&format!("APPL{{ch_id}} {voltage},{current}"))
                .await?;
            Ok(CallOutcome::done())
        })
    })
    .limits("voltage", "output")
    .limits("current", FloatLimits::range(0.0, 5.0).unwrap())
    .discard(["voltage", "current"])
}

fn self_test_action() -> Action {
    Action::new("self_test", |mut scope, _args| {
        Box::pin(async move {
            scope.write("*TST").await?;
            let job = Job::new(scope.node(), "self_test", Duration::from_millis(10), |mut scope| {
                Box::pin(async move { Ok(scope.query("*OPC?").await? == "1") })
            })
            .with_result(|mut scope| {
                Box::pin(async move { Ok(Value::Str(scope.query("TST:RES?").await?)) })
            })
            .with_cancel(|mut scope| Box::pin(async move { scope.write("ABOR").await }));
            Ok(CallOutcome::Pending(job))
        })
    })
}

pub fn supply_type() -> Arc<NodeType> {
    NodeType::builder("ps3")
        .feature(Feature::new("idn").getter("*IDN?").str())
        .feature(
            Feature::new("options")
                .getter("*OPT?")
                .register(["TRACKING", "REMOTE_SENSE"]),
        )
        .feature(
            Feature::new("mode")
                .getter("MODE?")
                .setter("MODE {value}")
                .str()
                .values(["CW", "PULSED"]),
        )
        .feature(
            Feature::new("tracking")
                .getter("TRACK?")
                .setter("TRACK {value}")
                .boolean()
                .options(Gate::option("options", "TRACKING")),
        )
        .feature(
            Feature::new("remote_sense")
                .getter("SENS?")
                .setter("SENS {value}")
                .boolean()
                .options(Gate::option("options", "REMOTE_SENSE")),
        )
        .feature(
            Feature::new("all_outputs")
                .getter("OUTP:ALL?")
                .setter("OUTP:ALL {value}")
                .boolean()
                .discard(["outputs.enabled"]),
        )
        .subsystem("trigger", |t| {
            t.feature(
                Feature::new("source")
                    .getter("TRIG:SOUR?")
                    .setter("TRIG:SOUR {value}")
                    .str()
                    .values(["IMM", "BUS"]),
            )
            .feature(
                Feature::new("delay")
                    .getter("TRIG:DEL?")
                    .setter("TRIG:DEL {value}")
                    .float()
                    .limits(FloatLimits::range(0.0, 3600.0).unwrap())
                    .checks(Gate::feature_equals("source", "BUS")),
            )
        })
        .channels(
            "outputs",
            ChannelSpec::new(ChannelIds::fixed([1, 2, 3])).alias(1, "A"),
            |c| {
                c.feature(
                    Feature::new("voltage")
                        .getter("VOLT{ch_id}?")
                        .setter("VOLT{ch_id} {value}")
                        .unit("V")
                        .limits("output"),
                )
                .feature(
                    Feature::new("current")
                        .getter("CURR{ch_id}?")
                        .setter("CURR{ch_id} {value}")
                        .unit("A")
                        .limits(FloatLimits::range(0.0, 5.0).unwrap()),
                )
                .feature(
                    Feature::new("enabled")
                        .getter("OUTP{ch_id}?")
                        .setter("OUTP{ch_id} {value}")
                        .boolean()
                        .discard([".all_outputs"]),
                )
                .feature(Feature::alias("on", "enabled"))
                .feature(Feature::new("max_voltage").getter("VMAX{ch_id}?").float())
                .feature(
                    Feature::new("range")
                        .getter("RANG{ch_id}?")
                        .setter("RANG{ch_id} {value}")
                        .str()
                        .values(["LOW", "HIGH"])
                        .discard(["max_voltage"])
                        .discard_limits(["output"]),
                )
                .limits("output", |mut scope| {
                    Box::pin(async move {
                        let max = scope.get("max_voltage").await?.as_f64().unwrap_or(0.0);
                        Ok(Limits::Float(FloatLimits::range(0.0, max)?))
                    })
                })
                .action(apply_action())
            },
        )
        .action(self_test_action())
        .build()
        .unwrap()
}

/// Initialized driver over a fresh supply mock; the mock handle shares its state.
pub async fn connect(retries: u32) -> (Driver, MockTransport) {
    connect_type(supply_type(), retries).await
}

pub async fn connect_type(node_type: Arc<NodeType>, retries: u32) -> (Driver, MockTransport) {
    let mock = supply_mock();
    let driver = Driver::builder(node_type)
        .name("ps3")
        .transport(mock.clone())
        .settings(settings(retries))
        .build()
        .unwrap();
    driver.initialize().await.unwrap();
    mock.clear_log();
    (driver, mock)
}

/// Number of logged exchanges equal to `entry` (e.g. `"query:VMAX1?"`).
pub fn count(mock: &MockTransport, entry: &str) -> usize {
    mock.call_log().iter().filter(|e| *e == entry).count()
}
