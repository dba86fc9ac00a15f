//! Actions: validated, gated operations on a node.
//!
//! An action wraps an async function receiving a [`StepScope`] and its named
//! arguments. Arguments may be restricted per name to a value set or to limits;
//! the call runs `pre_call → call → post_call` with the same gating and retry
//! rules as features, but nothing is cached. Long-running device operations return
//! [`CallOutcome::Pending`] with a [`Job`].

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{DriverError, DriverResult};
use crate::error_recovery::{RetryPolicy, RetryState};
use crate::gate::{admit, Gate, GateInput};
use crate::node::Node;
use crate::pipeline::job::{Job, WaitOptions};
use crate::pipeline::scope::{Session, StepScope};
use crate::pipeline::steps::{step, sync_step, Splice, StepChain, StepFn};
use crate::validate::{LimitsSpec, RegisterLayout};
use crate::value::Value;

/// Named call arguments, in the order they were given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionArgs {
    entries: Vec<(String, Value)>,
}

impl ActionArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Argument `name`, or `InvalidArgument` if the caller left it out.
    pub fn require(&self, name: &str) -> DriverResult<&Value> {
        self.get(name)
            .ok_or_else(|| DriverError::invalid_argument(name, "missing argument"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What an action call produced.
pub enum CallOutcome {
    Done(Value),
    /// The device is still working; the job yields the result later.
    Pending(Job),
}

impl fmt::Debug for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallOutcome::Done(value) => f.debug_tuple("Done").field(value).finish(),
            CallOutcome::Pending(job) => f.debug_tuple("Pending").field(job).finish(),
        }
    }
}

impl CallOutcome {
    /// Completed call without a result.
    pub fn done() -> Self {
        CallOutcome::Done(Value::Null)
    }

    pub fn value(value: impl Into<Value>) -> Self {
        CallOutcome::Done(value.into())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, CallOutcome::Pending(_))
    }

    /// The result of a completed call; `None` for a pending job.
    pub fn into_value(self) -> Option<Value> {
        match self {
            CallOutcome::Done(value) => Some(value),
            CallOutcome::Pending(_) => None,
        }
    }

    /// The result, waiting for the job first if the call is pending.
    pub async fn wait(self, options: WaitOptions) -> DriverResult<Value> {
        match self {
            CallOutcome::Done(value) => Ok(value),
            CallOutcome::Pending(job) => job.wait(options).await,
        }
    }
}

/// Body of an action.
pub type ActionFn =
    dyn for<'a> Fn(StepScope<'a>, ActionArgs) -> BoxFuture<'a, DriverResult<CallOutcome>> + Send + Sync;

/// The customizable stages of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStage {
    PreCall,
    PostCall,
}

#[derive(Clone)]
enum Customization {
    PreCall(Splice, String, Arc<StepFn<ActionArgs>>),
    PostCall(Splice, String, Arc<StepFn<Value>>),
    Remove(ActionStage, String),
}

/// Declaration of an action.
#[derive(Clone)]
pub struct Action {
    name: String,
    func: Arc<ActionFn>,
    pub(crate) options: Vec<Gate>,
    pub(crate) checks: Vec<Gate>,
    values: BTreeMap<String, Vec<Value>>,
    limits: BTreeMap<String, LimitsSpec>,
    retries: Option<u32>,
    retry_operation_failures: bool,
    register: Option<Vec<String>>,
    discard: Vec<String>,
    customizations: Vec<Customization>,
}

impl Action {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: for<'a> Fn(StepScope<'a>, ActionArgs) -> BoxFuture<'a, DriverResult<CallOutcome>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.to_string(),
            func: Arc::new(func),
            options: Vec::new(),
            checks: Vec::new(),
            values: BTreeMap::new(),
            limits: BTreeMap::new(),
            retries: None,
            retry_operation_failures: true,
            register: None,
            discard: Vec::new(),
            customizations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Restrict argument `arg` to an enumerated set.
    pub fn values<I, V>(mut self, arg: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.values
            .insert(arg.to_string(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn limits(mut self, arg: &str, limits: impl Into<LimitsSpec>) -> Self {
        self.limits.insert(arg.to_string(), limits.into());
        self
    }

    pub fn options(mut self, gate: Gate) -> Self {
        self.options.push(gate);
        self
    }

    pub fn checks(mut self, gate: Gate) -> Self {
        self.checks.push(gate);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retry_on_operation_failure(mut self, retry: bool) -> Self {
        self.retry_operation_failures = retry;
        self
    }

    /// Decode an integer result as bit flags.
    pub fn register<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.register = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Features invalidated by a successful call.
    pub fn discard<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.discard.extend(features.into_iter().map(Into::into));
        self
    }

    pub fn customize_pre_call(mut self, splice: Splice, name: &str, f: Arc<StepFn<ActionArgs>>) -> Self {
        self.customizations
            .push(Customization::PreCall(splice, name.to_string(), f));
        self
    }

    pub fn customize_post_call(mut self, splice: Splice, name: &str, f: Arc<StepFn<Value>>) -> Self {
        self.customizations
            .push(Customization::PostCall(splice, name.to_string(), f));
        self
    }

    pub fn remove_step(mut self, stage: ActionStage, name: &str) -> Self {
        self.customizations
            .push(Customization::Remove(stage, name.to_string()));
        self
    }

    pub(crate) fn build(self) -> DriverResult<ActionDescriptor> {
        ActionDescriptor::build(self)
    }
}

/// An action with its step chains installed.
pub struct ActionDescriptor {
    config: Action,
    pre_call: StepChain<ActionArgs>,
    post_call: StepChain<Value>,
}

impl ActionDescriptor {
    fn build(config: Action) -> DriverResult<Self> {
        let name = config.name.clone();
        let configuration =
            |e: DriverError| DriverError::Configuration(format!("action '{name}': {e}"));

        let mut pre_call = StepChain::new();
        pre_call.append(
            "values_limits",
            validate_args_step(config.values.clone(), config.limits.clone()),
        );

        let mut post_call = StepChain::new();
        if let Some(names) = config.register.clone() {
            let layout = RegisterLayout::new(names).map_err(configuration)?;
            let attribute = name.clone();
            post_call.append(
                "register",
                sync_step(move |raw: Value| layout.decode_response(&attribute, &raw)),
            );
        }

        let mut descriptor = Self {
            pre_call,
            post_call,
            config,
        };
        for customization in descriptor.config.customizations.clone() {
            let result = match customization {
                Customization::PreCall(splice, step, f) => {
                    descriptor.pre_call.splice(&splice, &step, f)
                }
                Customization::PostCall(splice, step, f) => {
                    descriptor.post_call.splice(&splice, &step, f)
                }
                Customization::Remove(ActionStage::PreCall, step) => {
                    descriptor.pre_call.remove(&step)
                }
                Customization::Remove(ActionStage::PostCall, step) => {
                    descriptor.post_call.remove(&step)
                }
            };
            result.map_err(configuration)?;
        }
        Ok(descriptor)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &Action {
        &self.config
    }

    pub fn step_names(&self, stage: ActionStage) -> Vec<&str> {
        match stage {
            ActionStage::PreCall => self.pre_call.names(),
            ActionStage::PostCall => self.post_call.names(),
        }
    }

    pub(crate) async fn invoke(&self, node: &Node, session: &mut Session, args: ActionArgs) -> DriverResult<CallOutcome> {
        admit(
            node,
            session,
            self.name(),
            &self.config.options,
            &self.config.checks,
            GateInput::Call(&args),
        )
        .await?;

        let policy = RetryPolicy {
            retries: self
                .config
                .retries
                .unwrap_or(session.root().settings.default_retries),
            retry_operation_failures: self.config.retry_operation_failures,
        };
        let mut retry = RetryState::new(self.name(), policy);
        let outcome = loop {
            match self.call_sequence(node, session, args.clone()).await {
                Ok(outcome) => break outcome,
                Err(err) => retry.on_failure(session, err).await?,
            }
        };

        let discard: Vec<&str> = self.config.discard.iter().map(String::as_str).collect();
        node.discard(&discard);
        debug!(node = %node.path(), action = self.name(), pending = outcome.is_pending(), "action called");
        Ok(outcome)
    }

    async fn call_sequence(&self, node: &Node, session: &mut Session, args: ActionArgs) -> DriverResult<CallOutcome> {
        let mut scope = StepScope::new(node, session);
        let args = self.pre_call.run(&mut scope, args).await?;
        let outcome = (self.config.func)(scope.reborrow(), args).await?;
        match outcome {
            CallOutcome::Done(value) => Ok(CallOutcome::Done(
                self.post_call.run(&mut scope, value).await?,
            )),
            CallOutcome::Pending(job) => Ok(CallOutcome::Pending(
                job.with_post_call(self.post_call.clone()),
            )),
        }
    }
}

fn validate_args_step(
    values: BTreeMap<String, Vec<Value>>,
    limits: BTreeMap<String, LimitsSpec>,
) -> Arc<StepFn<ActionArgs>> {
    let values = Arc::new(values);
    let limits = Arc::new(limits);
    step(move |mut scope, mut args: ActionArgs| {
        let values = values.clone();
        let limits = limits.clone();
        Box::pin(async move {
            for (arg, allowed) in values.iter() {
                let Some(value) = args.get(arg) else {
                    continue;
                };
                // The declared spelling replaces the caller's, e.g. 1 becomes 1.0.
                match allowed.iter().find(|v| v.equivalent(value)) {
                    Some(declared) => {
                        let declared = declared.clone();
                        args.insert(arg, declared);
                    }
                    None => {
                        let rendered: Vec<String> =
                            allowed.iter().map(|v| format!("'{v}'")).collect();
                        return Err(DriverError::invalid_argument(
                            arg,
                            format!(
                                "allowed values are [{}], '{value}' not allowed",
                                rendered.join(", ")
                            ),
                        ));
                    }
                }
            }
            for (arg, spec) in limits.iter() {
                let Some(value) = args.get(arg).cloned() else {
                    continue;
                };
                let checked = match spec {
                    LimitsSpec::Static(l) => l.check(arg, &value)?,
                    LimitsSpec::Named(name) => scope.limits(name).await?.check(arg, &value)?,
                };
                args.insert(arg, checked);
            }
            Ok(args)
        })
    })
}
