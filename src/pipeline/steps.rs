//! Named step chains.
//!
//! Each stage of a feature or action runs an ordered list of named steps. Internal
//! steps (`extract`, `cast`, `validate`, `check_operation`, ...) are installed when a
//! descriptor is built; callers splice their own steps relative to them by name.

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

use crate::error::{DriverError, DriverResult};
use crate::pipeline::scope::StepScope;

/// An async pipeline step transforming a `T`.
pub type StepFn<T> =
    dyn for<'a> Fn(StepScope<'a>, T) -> BoxFuture<'a, DriverResult<T>> + Send + Sync;

/// Wrap a closure as a step.
///
/// ```ignore
/// let halve = step(|_scope, v: Value| Box::pin(async move {
///     Ok(Value::Float(v.as_f64().unwrap_or_default() / 2.0))
/// }));
/// ```
pub fn step<T, F>(f: F) -> Arc<StepFn<T>>
where
    F: for<'a> Fn(StepScope<'a>, T) -> BoxFuture<'a, DriverResult<T>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a synchronous conversion as a step.
pub fn sync_step<T, F>(f: F) -> Arc<StepFn<T>>
where
    T: Send + 'static,
    F: Fn(T) -> DriverResult<T> + Send + Sync + 'static,
{
    step(move |_scope, input| {
        let output = f(input);
        Box::pin(futures::future::ready(output))
    })
}

/// Position of a new step relative to the existing chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Splice {
    Prepend,
    Append,
    Before(String),
    After(String),
    /// Take the place of the named step.
    Replace(String),
}

/// Ordered list of named steps.
pub struct StepChain<T> {
    steps: Vec<(String, Arc<StepFn<T>>)>,
}

impl<T> Clone for StepChain<T> {
    fn clone(&self) -> Self {
        Self {
            steps: self.steps.clone(),
        }
    }
}

impl<T> Default for StepChain<T> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<T: Send + 'static> fmt::Debug for StepChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl<T: Send + 'static> StepChain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|(n, _)| n == name)
    }

    fn anchor(&self, name: &str) -> DriverResult<usize> {
        self.position(name).ok_or_else(|| {
            DriverError::Configuration(format!(
                "no step named '{name}' in chain {:?}",
                self.names()
            ))
        })
    }

    // A re-added name replaces its previous occurrence.
    fn drop_existing(&mut self, name: &str) {
        if let Some(index) = self.position(name) {
            self.steps.remove(index);
        }
    }

    pub fn append(&mut self, name: &str, f: Arc<StepFn<T>>) {
        self.drop_existing(name);
        self.steps.push((name.to_string(), f));
    }

    pub fn prepend(&mut self, name: &str, f: Arc<StepFn<T>>) {
        self.drop_existing(name);
        self.steps.insert(0, (name.to_string(), f));
    }

    pub fn insert_before(&mut self, anchor: &str, name: &str, f: Arc<StepFn<T>>) -> DriverResult<()> {
        self.anchor(anchor)?;
        self.drop_existing(name);
        let index = self.anchor(anchor)?;
        self.steps.insert(index, (name.to_string(), f));
        Ok(())
    }

    pub fn insert_after(&mut self, anchor: &str, name: &str, f: Arc<StepFn<T>>) -> DriverResult<()> {
        self.anchor(anchor)?;
        self.drop_existing(name);
        let index = self.anchor(anchor)?;
        self.steps.insert(index + 1, (name.to_string(), f));
        Ok(())
    }

    pub fn replace(&mut self, target: &str, name: &str, f: Arc<StepFn<T>>) -> DriverResult<()> {
        let index = self.anchor(target)?;
        self.steps[index] = (name.to_string(), f);
        // Keep names unique if the replacement reuses another step's name.
        let duplicate = self
            .steps
            .iter()
            .enumerate()
            .position(|(i, (n, _))| i != index && n == name);
        if let Some(dup) = duplicate {
            self.steps.remove(dup);
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> DriverResult<()> {
        let index = self.anchor(name)?;
        self.steps.remove(index);
        Ok(())
    }

    pub fn splice(&mut self, splice: &Splice, name: &str, f: Arc<StepFn<T>>) -> DriverResult<()> {
        match splice {
            Splice::Prepend => {
                self.prepend(name, f);
                Ok(())
            }
            Splice::Append => {
                self.append(name, f);
                Ok(())
            }
            Splice::Before(anchor) => self.insert_before(anchor, name, f),
            Splice::After(anchor) => self.insert_after(anchor, name, f),
            Splice::Replace(target) => self.replace(target, name, f),
        }
    }

    /// Run every step in order, feeding each output into the next step.
    pub async fn run(&self, scope: &mut StepScope<'_>, input: T) -> DriverResult<T> {
        let mut value = input;
        for (_, f) in &self.steps {
            value = f(scope.reborrow(), value).await?;
        }
        Ok(value)
    }
}
