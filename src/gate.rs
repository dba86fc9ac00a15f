//! Options and checks gates.
//!
//! A [`Gate`] is a labelled async predicate over live node state. The same type
//! serves both gate classes; what differs is how the pipeline evaluates them:
//!
//! - **options**: evaluated at most once per (node instance, attribute), the
//!   outcome memoised whatever it was. A false options gate is `AccessDenied`.
//! - **checks**: evaluated on every access. A false checks gate is
//!   `PreconditionFailed`.
//!
//! Several gates on one attribute are ANDed in declaration order and evaluation
//! stops at the first false one. Errors raised while evaluating are propagated and
//! never memoised.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::error::{DriverError, DriverResult};
use crate::node::Node;
use crate::pipeline::action::ActionArgs;
use crate::pipeline::scope::{Session, StepScope};
use crate::value::Value;

/// What the gated access is about to do.
#[derive(Debug, Clone, Copy)]
pub enum GateInput<'a> {
    /// Options evaluation, independent of any particular access.
    Access,
    Get,
    Set(&'a Value),
    Call(&'a ActionArgs),
}

/// Predicate signature of a gate.
pub type GateFn =
    dyn for<'a> Fn(StepScope<'a>, GateInput<'a>) -> BoxFuture<'a, DriverResult<bool>> + Send + Sync;

/// A labelled predicate.
#[derive(Clone)]
pub struct Gate {
    label: String,
    predicate: Arc<GateFn>,
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate").field("label", &self.label).finish()
    }
}

impl Gate {
    pub fn new<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: for<'a> Fn(StepScope<'a>, GateInput<'a>) -> BoxFuture<'a, DriverResult<bool>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Passes when the feature at `path` currently reads `expected`.
    pub fn feature_equals(path: &str, expected: impl Into<Value>) -> Self {
        Self::feature_in(path, [expected.into()])
    }

    /// Passes when the feature at `path` reads one of `allowed`.
    pub fn feature_in<I>(path: &str, allowed: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let allowed: Arc<Vec<Value>> = Arc::new(allowed.into_iter().collect());
        let rendered: Vec<String> = allowed.iter().map(ToString::to_string).collect();
        let label = format!("{path} in [{}]", rendered.join(", "));
        let path = path.to_string();
        Self::new(label, move |mut scope, _input| {
            let path = path.clone();
            let allowed = allowed.clone();
            Box::pin(async move {
                let current = scope.get(&path).await?;
                Ok(allowed.iter().any(|v| v.equivalent(&current)))
            })
        })
    }

    /// Passes when the record or register read from `path` has `key` set.
    ///
    /// Typical use is an installed-options report queried once per session.
    pub fn option(path: &str, key: &str) -> Self {
        let label = format!("{key} in {path}");
        let path = path.to_string();
        let key = key.to_string();
        Self::new(label, move |mut scope, _input| {
            let path = path.clone();
            let key = key.clone();
            Box::pin(async move {
                let report = scope.get(&path).await?;
                Ok(matches!(report.field(&key), Some(Value::Bool(true))))
            })
        })
    }

    /// Checks the value being set; other accesses pass.
    pub fn value<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        Self::new(label, move |_scope, input| {
            let ok = match input {
                GateInput::Set(value) => predicate(value),
                _ => true,
            };
            Box::pin(futures::future::ready(Ok(ok)))
        })
    }

    /// Checks one named call argument; other accesses pass.
    pub fn arg<F>(label: impl Into<String>, name: &str, predicate: F) -> Self
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        let name = name.to_string();
        Self::new(label, move |_scope, input| {
            let ok = match input {
                GateInput::Call(args) => predicate(args.get(&name)),
                _ => true,
            };
            Box::pin(futures::future::ready(Ok(ok)))
        })
    }
}

/// Memoised options outcomes of one node instance.
///
/// `None` records a pass, `Some(label)` the gate that denied access.
#[derive(Debug, Default)]
pub struct OptionsMemo {
    outcomes: Mutex<HashMap<String, Option<String>>>,
}

impl OptionsMemo {
    pub fn get(&self, attribute: &str) -> Option<Option<String>> {
        self.outcomes.lock().get(attribute).cloned()
    }

    fn record(&self, attribute: &str, outcome: Option<String>) {
        self.outcomes.lock().insert(attribute.to_string(), outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn first_failing<'g>(
    gates: &[&'g Gate],
    scope: &mut StepScope<'_>,
    input: GateInput<'_>,
) -> DriverResult<Option<&'g Gate>> {
    for gate in gates {
        let passed = (gate.predicate)(scope.reborrow(), input).await?;
        trace!(gate = %gate.label, passed, "gate evaluated");
        if !passed {
            return Ok(Some(*gate));
        }
    }
    Ok(None)
}

/// Evaluate the options gates of `attribute` on `node`, once per node instance.
pub(crate) async fn ensure_options(
    node: &Node,
    session: &mut Session,
    attribute: &str,
    gates: &[&Gate],
) -> DriverResult<()> {
    if gates.is_empty() {
        return Ok(());
    }
    let outcome = match node.options_memo().get(attribute) {
        Some(outcome) => outcome,
        None => {
            let key = format!("{}::options::{attribute}", node.path());
            session.enter_gate(key.clone())?;
            let result = {
                let mut scope = StepScope::new(node, session);
                first_failing(gates, &mut scope, GateInput::Access).await
            };
            session.exit_gate(&key);
            let outcome = result?.map(|gate| gate.label.clone());
            node.options_memo().record(attribute, outcome.clone());
            outcome
        }
    };
    match outcome {
        None => Ok(()),
        Some(gate) => Err(DriverError::AccessDenied {
            node: node.path().to_string(),
            attribute: attribute.to_string(),
            gate,
        }),
    }
}

/// Evaluate the node-level checks of `node` for an access to `attribute`.
///
/// Reads issued while these gates run skip them, so a node gate may inspect the
/// node's own features.
pub(crate) async fn run_node_checks(
    node: &Node,
    session: &mut Session,
    attribute: &str,
    input: GateInput<'_>,
) -> DriverResult<()> {
    let gates: Vec<&Gate> = node.node_type().checks().iter().collect();
    if gates.is_empty() {
        return Ok(());
    }
    let key = format!("{}::checks", node.path());
    if session.gate_active(&key) {
        trace!(node = %node.path(), attribute, "inside node checks, skipped");
        return Ok(());
    }
    evaluate_checks(node, session, key, attribute, &gates, input).await
}

/// Evaluate checks gates of `attribute` on `node`. Never memoised.
pub(crate) async fn run_checks(
    node: &Node,
    session: &mut Session,
    attribute: &str,
    gates: &[&Gate],
    input: GateInput<'_>,
) -> DriverResult<()> {
    if gates.is_empty() {
        return Ok(());
    }
    let key = format!("{}::checks::{attribute}", node.path());
    evaluate_checks(node, session, key, attribute, gates, input).await
}

async fn evaluate_checks(
    node: &Node,
    session: &mut Session,
    key: String,
    attribute: &str,
    gates: &[&Gate],
    input: GateInput<'_>,
) -> DriverResult<()> {
    session.enter_gate(key.clone())?;
    let result = {
        let mut scope = StepScope::new(node, session);
        first_failing(gates, &mut scope, input).await
    };
    session.exit_gate(&key);
    match result? {
        None => Ok(()),
        Some(gate) => Err(DriverError::PreconditionFailed {
            node: node.path().to_string(),
            attribute: attribute.to_string(),
            gate: gate.label.clone(),
        }),
    }
}

/// Every gate guarding one access to `attribute`: node and ancestor access options,
/// the attribute's options, node checks, then the attribute's own checks.
pub(crate) async fn admit(
    node: &Node,
    session: &mut Session,
    attribute: &str,
    options: &[Gate],
    checks: &[Gate],
    input: GateInput<'_>,
) -> DriverResult<()> {
    node.ensure_access(session).await?;
    let options: Vec<&Gate> = options.iter().collect();
    ensure_options(node, session, attribute, &options).await?;
    run_node_checks(node, session, attribute, input).await?;
    let checks: Vec<&Gate> = checks.iter().collect();
    run_checks(node, session, attribute, &checks, input).await
}
