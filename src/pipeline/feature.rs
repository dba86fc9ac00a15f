//! Features: cached, validated get/set attributes.
//!
//! A [`Feature`] is the declaration (a cloneable builder kept by the node type so
//! derived types can reconfigure it); a [`FeatureDescriptor`] is the built form with
//! its step chains installed.
//!
//! ```ignore
//! let voltage = Feature::new("voltage")
//!     .getter("VOLT?")
//!     .setter("VOLT {value}")
//!     .float()
//!     .limits(FloatLimits::range(0.0, 6.0)?)
//!     .discard(["current_limit"]);
//! ```

use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::PipelineSettings;
use crate::error::{DriverError, DriverResult};
use crate::error_recovery::{RetryPolicy, RetryState};
use crate::gate::{admit, Gate, GateInput};
use crate::node::Node;
use crate::pipeline::scope::{Session, StepScope};
use crate::pipeline::settings::FeatureSettings;
use crate::pipeline::steps::{step, sync_step, Splice, StepChain, StepFn};
use crate::pipeline::{FeatureRequest, SetOutcome};
use crate::validate::{Extractor, LimitsSpec, Mapping, RegisterLayout, Unit, ValueKind, ValueSpec};
use crate::value::Value;

/// Replacement for the `get` stage.
pub type GetFn =
    dyn for<'a> Fn(StepScope<'a>, FeatureRequest) -> BoxFuture<'a, DriverResult<Value>> + Send + Sync;

/// Replacement for the `set` stage; returns the device acknowledgement if any.
pub type SetFn = dyn for<'a> Fn(StepScope<'a>, FeatureRequest) -> BoxFuture<'a, DriverResult<Option<String>>>
    + Send
    + Sync;

/// The customizable stages of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureStage {
    PreGet,
    PostGet,
    PreSet,
    PostSet,
}

#[derive(Clone)]
enum Customization {
    PreGet(Splice, String, Arc<StepFn<FeatureRequest>>),
    PostGet(Splice, String, Arc<StepFn<Value>>),
    PreSet(Splice, String, Arc<StepFn<Value>>),
    PostSet(Splice, String, Arc<StepFn<SetOutcome>>),
    Remove(FeatureStage, String),
}

/// Declaration of a feature.
#[derive(Clone)]
pub struct Feature {
    name: String,
    getter: Option<String>,
    setter: Option<String>,
    custom_get: Option<Arc<GetFn>>,
    custom_set: Option<Arc<SetFn>>,
    kind: ValueKind,
    values: Vec<Value>,
    mapping: Option<Mapping>,
    limits: Option<LimitsSpec>,
    register: Option<Vec<String>>,
    aliases: Vec<(String, bool)>,
    extract: Option<String>,
    unit: Option<String>,
    pub(crate) options: Vec<Gate>,
    pub(crate) checks: Vec<Gate>,
    retries: Option<u32>,
    retry_operation_failures: bool,
    discard: Vec<String>,
    discard_limits: Vec<String>,
    cacheable: bool,
    check_operation: bool,
    customizations: Vec<Customization>,
}

impl Feature {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            getter: None,
            setter: None,
            custom_get: None,
            custom_set: None,
            kind: ValueKind::Any,
            values: Vec::new(),
            mapping: None,
            limits: None,
            register: None,
            aliases: Vec::new(),
            extract: None,
            unit: None,
            options: Vec::new(),
            checks: Vec::new(),
            retries: None,
            retry_operation_failures: true,
            discard: Vec::new(),
            discard_limits: Vec::new(),
            cacheable: true,
            check_operation: true,
            customizations: Vec::new(),
        }
    }

    /// A feature forwarding reads and writes to the feature at `target`.
    ///
    /// Aliases are never cached and skip the operation check; the target does both.
    pub fn alias(name: &str, target: &str) -> Self {
        let get_target = target.to_string();
        let set_target = target.to_string();
        Self::new(name)
            .custom_get(move |mut scope, _request| {
                let target = get_target.clone();
                Box::pin(async move { scope.get(&target).await })
            })
            .custom_set(move |mut scope, request| {
                let target = set_target.clone();
                Box::pin(async move {
                    scope
                        .set(&target, request.value.unwrap_or_default())
                        .await
                        .map(|_| None)
                })
            })
            .uncached()
            .skip_operation_check()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn getter_template(&self) -> Option<&str> {
        self.getter.as_deref()
    }

    pub fn setter_template(&self) -> Option<&str> {
        self.setter.as_deref()
    }

    /// Query template for reads.
    pub fn getter(mut self, template: &str) -> Self {
        self.getter = Some(template.to_string());
        self
    }

    /// Command template for writes; `{value}` receives the wire value.
    pub fn setter(mut self, template: &str) -> Self {
        self.setter = Some(template.to_string());
        self
    }

    pub fn custom_get<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(StepScope<'a>, FeatureRequest) -> BoxFuture<'a, DriverResult<Value>>
            + Send
            + Sync
            + 'static,
    {
        self.custom_get = Some(Arc::new(f));
        self
    }

    pub fn custom_set<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(StepScope<'a>, FeatureRequest) -> BoxFuture<'a, DriverResult<Option<String>>>
            + Send
            + Sync
            + 'static,
    {
        self.custom_set = Some(Arc::new(f));
        self
    }

    pub fn kind(mut self, kind: ValueKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn str(self) -> Self {
        self.kind(ValueKind::Str)
    }

    pub fn int(self) -> Self {
        self.kind(ValueKind::Int)
    }

    pub fn float(self) -> Self {
        self.kind(ValueKind::Float)
    }

    pub fn boolean(self) -> Self {
        self.kind(ValueKind::Bool)
    }

    /// Decode the answer as bit flags; `names[i]` labels bit `i`.
    pub fn register<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.register = Some(names.into_iter().map(Into::into).collect());
        self.kind = ValueKind::Register;
        self
    }

    /// Restrict user values to an enumerated set.
    pub fn values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn mapping(mut self, mapping: Mapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    pub fn limits(mut self, limits: impl Into<LimitsSpec>) -> Self {
        self.limits = Some(limits.into());
        self
    }

    /// Pattern locating the value inside the raw answer, e.g. `"VOLT {}V"`.
    pub fn extract(mut self, pattern: &str) -> Self {
        self.extract = Some(pattern.to_string());
        self
    }

    /// Unit of a float feature; sets accept prefixed quantities such as `"250 mV"`.
    pub fn unit(mut self, symbol: &str) -> Self {
        self.unit = Some(symbol.to_string());
        self.kind = ValueKind::Float;
        self
    }

    /// Alternate spellings accepted for true/false.
    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        self.aliases
            .extend(aliases.into_iter().map(|(s, b)| (s.into(), b)));
        self
    }

    /// Features invalidated by a successful set (`x`, `.x`, `sub.x`, `channels.x`).
    pub fn discard<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.discard.extend(features.into_iter().map(Into::into));
        self
    }

    /// Named limits invalidated by a successful set.
    pub fn discard_limits<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.discard_limits.extend(names.into_iter().map(Into::into));
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

    /// Additional attempts after a transport failure; defaults to the driver setting.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retry_on_operation_failure(mut self, retry: bool) -> Self {
        self.retry_operation_failures = retry;
        self
    }

    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }

    pub fn skip_operation_check(mut self) -> Self {
        self.check_operation = false;
        self
    }

    pub fn customize_pre_get(mut self, splice: Splice, name: &str, f: Arc<StepFn<FeatureRequest>>) -> Self {
        self.customizations
            .push(Customization::PreGet(splice, name.to_string(), f));
        self
    }

    pub fn customize_post_get(mut self, splice: Splice, name: &str, f: Arc<StepFn<Value>>) -> Self {
        self.customizations
            .push(Customization::PostGet(splice, name.to_string(), f));
        self
    }

    pub fn customize_pre_set(mut self, splice: Splice, name: &str, f: Arc<StepFn<Value>>) -> Self {
        self.customizations
            .push(Customization::PreSet(splice, name.to_string(), f));
        self
    }

    pub fn customize_post_set(mut self, splice: Splice, name: &str, f: Arc<StepFn<SetOutcome>>) -> Self {
        self.customizations
            .push(Customization::PostSet(splice, name.to_string(), f));
        self
    }

    pub fn remove_step(mut self, stage: FeatureStage, name: &str) -> Self {
        self.customizations
            .push(Customization::Remove(stage, name.to_string()));
        self
    }

    pub(crate) fn build(self) -> DriverResult<FeatureDescriptor> {
        FeatureDescriptor::build(self)
    }
}

/// A feature with its step chains installed.
pub struct FeatureDescriptor {
    config: Feature,
    spec: Arc<ValueSpec>,
    pre_get: StepChain<FeatureRequest>,
    post_get: StepChain<Value>,
    pre_set: StepChain<Value>,
    post_set: StepChain<SetOutcome>,
}

impl FeatureDescriptor {
    fn build(config: Feature) -> DriverResult<Self> {
        let name = config.name.clone();
        let configuration = |e: DriverError| {
            DriverError::Configuration(format!("feature '{name}': {e}"))
        };

        let mut spec = ValueSpec {
            kind: config.kind,
            values: Vec::new(),
            mapping: config.mapping.clone(),
            limits: config.limits.clone(),
            register: config
                .register
                .clone()
                .map(RegisterLayout::new)
                .transpose()
                .map_err(configuration)?,
            aliases: config.aliases.clone(),
            extract: config
                .extract
                .as_deref()
                .map(Extractor::new)
                .transpose()
                .map_err(configuration)?,
            unit: config
                .unit
                .as_deref()
                .map(Unit::new)
                .transpose()
                .map_err(configuration)?,
        };
        if spec.unit.is_some() && spec.kind != ValueKind::Float {
            return Err(configuration(DriverError::Configuration(
                "only float features carry a unit".to_string(),
            )));
        }
        spec.values = config
            .values
            .iter()
            .cloned()
            .map(|v| spec.canonicalize(&name, v))
            .collect::<DriverResult<_>>()
            .map_err(configuration)?;
        let spec = Arc::new(spec);

        let pre_get = StepChain::new();

        let mut post_get = StepChain::new();
        if spec.extract.is_some() {
            post_get.append("extract", extract_step(&name, &spec));
        }
        if spec.mapping.is_some() {
            post_get.append("reverse_map", reverse_map_step(&name, &spec));
        }
        if let Some(layout) = &spec.register {
            let layout = layout.clone();
            let attribute = name.clone();
            post_get.append(
                "register",
                sync_step(move |raw: Value| layout.decode_response(&attribute, &raw)),
            );
        } else if spec.mapping.is_none() {
            let spec = spec.clone();
            let attribute = name.clone();
            post_get.append(
                "cast",
                sync_step(move |raw: Value| spec.cast_response(&attribute, raw)),
            );
        }

        let mut pre_set = StepChain::new();
        pre_set.append("validate", validate_step(&name, &spec));
        if let Some(mapping) = &spec.mapping {
            let mapping = mapping.clone();
            let attribute = name.clone();
            pre_set.append(
                "map",
                sync_step(move |value: Value| mapping.to_wire(&attribute, &value)),
            );
        } else if spec.kind == ValueKind::Bool {
            pre_set.append(
                "map",
                sync_step(|value: Value| {
                    Ok(match value {
                        Value::Bool(b) => Value::Int(i64::from(b)),
                        other => other,
                    })
                }),
            );
        }
        if let Some(layout) = &spec.register {
            let layout = layout.clone();
            let attribute = name.clone();
            pre_set.append(
                "register",
                sync_step(move |value: Value| match &value {
                    Value::Flags(flags) => {
                        let raw = layout.encode(&attribute, flags)?;
                        i64::try_from(raw).map(Value::Int).map_err(|_| {
                            DriverError::invalid_argument(&attribute, "register value overflows")
                        })
                    }
                    _ => Ok(value),
                }),
            );
        }

        let mut post_set = StepChain::new();
        if config.check_operation {
            post_set.append("check_operation", check_operation_step());
        }

        let mut descriptor = Self {
            spec,
            pre_get,
            post_get,
            pre_set,
            post_set,
            config,
        };
        for customization in descriptor.config.customizations.clone() {
            descriptor.apply(customization).map_err(configuration)?;
        }
        Ok(descriptor)
    }

    fn apply(&mut self, customization: Customization) -> DriverResult<()> {
        match customization {
            Customization::PreGet(splice, name, f) => self.pre_get.splice(&splice, &name, f),
            Customization::PostGet(splice, name, f) => self.post_get.splice(&splice, &name, f),
            Customization::PreSet(splice, name, f) => self.pre_set.splice(&splice, &name, f),
            Customization::PostSet(splice, name, f) => self.post_set.splice(&splice, &name, f),
            Customization::Remove(stage, name) => match stage {
                FeatureStage::PreGet => self.pre_get.remove(&name),
                FeatureStage::PostGet => self.post_get.remove(&name),
                FeatureStage::PreSet => self.pre_set.remove(&name),
                FeatureStage::PostSet => self.post_set.remove(&name),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The declaration this descriptor was built from.
    pub fn config(&self) -> &Feature {
        &self.config
    }

    pub fn readable(&self) -> bool {
        self.config.getter.is_some() || self.config.custom_get.is_some()
    }

    pub fn settable(&self) -> bool {
        self.config.setter.is_some() || self.config.custom_set.is_some()
    }

    pub fn is_cacheable(&self) -> bool {
        self.config.cacheable
    }

    pub fn unit(&self) -> Option<&Unit> {
        self.spec.unit.as_ref()
    }

    /// Settings as declared, before any runtime override.
    pub fn declared_settings(&self, defaults: &PipelineSettings) -> FeatureSettings {
        FeatureSettings {
            caching: self.config.cacheable,
            retries: self.config.retries.unwrap_or(defaults.default_retries),
            retry_on_operation_failure: self.config.retry_operation_failures,
        }
    }

    /// Step names of one stage, in execution order.
    pub fn step_names(&self, stage: FeatureStage) -> Vec<&str> {
        match stage {
            FeatureStage::PreGet => self.pre_get.names(),
            FeatureStage::PostGet => self.post_get.names(),
            FeatureStage::PreSet => self.pre_set.names(),
            FeatureStage::PostSet => self.post_set.names(),
        }
    }

    fn retry_policy(settings: &FeatureSettings) -> RetryPolicy {
        RetryPolicy {
            retries: settings.retries,
            retry_operation_failures: settings.retry_on_operation_failure,
        }
    }

    async fn gate(&self, node: &Node, session: &mut Session, input: GateInput<'_>) -> DriverResult<()> {
        admit(
            node,
            session,
            self.name(),
            &self.config.options,
            &self.config.checks,
            input,
        )
        .await
    }

    pub(crate) async fn read(&self, node: &Node, session: &mut Session) -> DriverResult<Value> {
        if !self.readable() {
            return Err(DriverError::NotReadable(self.name().to_string()));
        }
        self.gate(node, session, GateInput::Get).await?;

        let settings = node.feature_settings(self);
        let use_cache = settings.caching && session.root().settings.caching_allowed;
        if use_cache {
            if let Some(value) = node.cache().get(self.name()) {
                trace!(node = %node.path(), feature = self.name(), "cache hit");
                return Ok(value);
            }
        }

        let mut retry = RetryState::new(self.name(), Self::retry_policy(&settings));
        let value = loop {
            match self.get_sequence(node, session).await {
                Ok(value) => break value,
                Err(err) => retry.on_failure(session, err).await?,
            }
        };

        if use_cache {
            node.cache().store(self.name(), value.clone());
        }
        debug!(node = %node.path(), feature = self.name(), %value, "feature read");
        Ok(value)
    }

    async fn get_sequence(&self, node: &Node, session: &mut Session) -> DriverResult<Value> {
        let mut scope = StepScope::new(node, session);
        let template = self.config.getter.as_deref().unwrap_or_default();
        let request = FeatureRequest::get(self.name(), template);
        let request = self.pre_get.run(&mut scope, request).await?;
        let raw = match &self.config.custom_get {
            Some(get) => get(scope.reborrow(), request).await?,
            None => Value::Str(node.default_get_feature(scope.session(), request).await?),
        };
        self.post_get.run(&mut scope, raw).await
    }

    pub(crate) async fn write(&self, node: &Node, session: &mut Session, value: Value) -> DriverResult<()> {
        if !self.settable() {
            return Err(DriverError::NotSettable(self.name().to_string()));
        }
        self.gate(node, session, GateInput::Set(&value)).await?;
        let value = self.spec.canonicalize(self.name(), value)?;

        let settings = node.feature_settings(self);
        let use_cache = settings.caching && session.root().settings.caching_allowed;
        if use_cache && node.cache().get(self.name()).as_ref() == Some(&value) {
            trace!(node = %node.path(), feature = self.name(), "value unchanged, set skipped");
            return Ok(());
        }

        let mut retry = RetryState::new(self.name(), Self::retry_policy(&settings));
        loop {
            match self.set_sequence(node, session, value.clone()).await {
                Ok(()) => break,
                Err(err) => retry.on_failure(session, err).await?,
            }
        }

        // Other nodes drop their dependents first, so the new value never shows next
        // to a stale one. Same-node dependents go in the same update as the value.
        let (local, remote): (Vec<&str>, Vec<&str>) = self
            .config
            .discard
            .iter()
            .map(String::as_str)
            .partition(|path| !path.contains('.'));
        node.discard(&remote);
        node.discard_limits(self.config.discard_limits.iter().map(String::as_str));
        debug!(node = %node.path(), feature = self.name(), %value, "feature set");
        if use_cache {
            node.cache().commit_set(self.name(), value, local);
        } else {
            node.cache().invalidate(local);
        }
        Ok(())
    }

    async fn set_sequence(&self, node: &Node, session: &mut Session, value: Value) -> DriverResult<()> {
        let mut scope = StepScope::new(node, session);
        let native = self.pre_set.run(&mut scope, value.clone()).await?;
        let template = self.config.setter.as_deref().unwrap_or_default();
        let request = FeatureRequest::set(self.name(), template, native.clone());
        let ack = match &self.config.custom_set {
            Some(set) => set(scope.reborrow(), request).await?,
            None => node.default_set_feature(scope.session(), request).await?,
        };
        let outcome = SetOutcome {
            feature: self.name().to_string(),
            value,
            native,
            ack,
        };
        self.post_set.run(&mut scope, outcome).await?;
        Ok(())
    }
}

fn extract_step(attribute: &str, spec: &Arc<ValueSpec>) -> Arc<StepFn<Value>> {
    let spec = spec.clone();
    let attribute = attribute.to_string();
    sync_step(move |raw: Value| match (&spec.extract, &raw) {
        (Some(extractor), Value::Str(text)) => extractor.extract(&attribute, text).map(Value::Str),
        _ => Ok(raw),
    })
}

fn reverse_map_step(attribute: &str, spec: &Arc<ValueSpec>) -> Arc<StepFn<Value>> {
    let spec = spec.clone();
    let attribute = attribute.to_string();
    sync_step(move |raw: Value| {
        let raw = match raw {
            Value::Str(text) => Value::Str(text.trim().to_string()),
            other => other,
        };
        match &spec.mapping {
            Some(mapping) => mapping.from_wire(&attribute, &raw),
            None => Ok(raw),
        }
    })
}

fn validate_step(attribute: &str, spec: &Arc<ValueSpec>) -> Arc<StepFn<Value>> {
    let spec = spec.clone();
    let attribute = attribute.to_string();
    step(move |mut scope, value: Value| {
        let spec = spec.clone();
        let attribute = attribute.clone();
        Box::pin(async move {
            spec.check_values(&attribute, &value)?;
            match &spec.limits {
                None => Ok(value),
                Some(LimitsSpec::Static(limits)) => limits.check(&attribute, &value),
                Some(LimitsSpec::Named(name)) => {
                    let limits = scope.limits(name).await?;
                    limits.check(&attribute, &value)
                }
            }
        })
    })
}

fn check_operation_step() -> Arc<StepFn<SetOutcome>> {
    step(|mut scope, outcome: SetOutcome| {
        Box::pin(async move {
            let (node, session) = scope.split();
            let status = node.default_check_operation(session, &outcome).await?;
            if status.ok {
                Ok(outcome)
            } else {
                Err(DriverError::OperationFailed {
                    details: format!("could not set to {} ({})", outcome.value, status.details),
                    attribute: outcome.feature,
                })
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::FloatLimits;

    #[test]
    fn test_internal_steps_follow_configuration() {
        let f = Feature::new("output")
            .getter("OUTP?")
            .setter("OUTP {value}")
            .boolean()
            .build()
            .unwrap();
        assert_eq!(f.step_names(FeatureStage::PostGet), ["cast"]);
        assert_eq!(f.step_names(FeatureStage::PreSet), ["validate", "map"]);
        assert_eq!(f.step_names(FeatureStage::PostSet), ["check_operation"]);

        let f = Feature::new("mode")
            .getter("MODE?")
            .extract("MODE {}")
            .mapping(Mapping::symmetric([("Auto", "AUTO")]))
            .build()
            .unwrap();
        assert_eq!(f.step_names(FeatureStage::PostGet), ["extract", "reverse_map"]);
        assert!(f.readable());
        assert!(!f.settable());
    }

    #[test]
    fn test_customizations_are_spliced_by_name() {
        let f = Feature::new("voltage")
            .getter("VOLT?")
            .setter("VOLT {value}")
            .float()
            .limits(FloatLimits::range(0.0, 6.0).unwrap())
            .customize_post_get(Splice::After("cast".into()), "round", sync_step(Ok))
            .customize_pre_set(Splice::Prepend, "log", sync_step(Ok))
            .remove_step(FeatureStage::PostSet, "check_operation")
            .build()
            .unwrap();
        assert_eq!(f.step_names(FeatureStage::PostGet), ["cast", "round"]);
        assert_eq!(f.step_names(FeatureStage::PreSet), ["log", "validate"]);
        assert!(f.step_names(FeatureStage::PostSet).is_empty());
    }

    #[test]
    fn test_bad_customization_fails_build() {
        let result = Feature::new("voltage")
            .getter("VOLT?")
            .customize_post_get(Splice::Before("extract".into()), "x", sync_step(Ok))
            .build();
        assert!(matches!(result, Err(DriverError::Configuration(_))));
    }

    #[test]
    fn test_unit_makes_a_float_feature() {
        let f = Feature::new("frequency")
            .getter("FREQ?")
            .setter("FREQ {value}")
            .unit("Hz")
            .build()
            .unwrap();
        assert_eq!(f.unit().map(Unit::symbol), Some("Hz"));
        assert_eq!(
            f.spec.canonicalize("frequency", Value::from("2 kHz")).unwrap(),
            Value::Float(2000.0)
        );
        assert!(Feature::new("bad").unit("Hz").str().build().is_err());
    }

    #[test]
    fn test_declared_settings() {
        let defaults = PipelineSettings::default();
        let f = Feature::new("idn").getter("*IDN?").uncached().retries(4).build().unwrap();
        let settings = f.declared_settings(&defaults);
        assert!(!settings.caching);
        assert_eq!(settings.retries, 4);
        assert!(settings.retry_on_operation_failure);
    }

    #[test]
    fn test_values_are_canonicalized_at_build() {
        let f = Feature::new("range")
            .setter("RANG {value}")
            .float()
            .values([1, 10])
            .build()
            .unwrap();
        assert_eq!(f.spec.values, vec![Value::Float(1.0), Value::Float(10.0)]);
        assert!(Feature::new("bad").int().values(["x"]).build().is_err());
    }
}
