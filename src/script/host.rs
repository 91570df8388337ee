//! The script host contract and its single implementation.

use std::sync::Arc;

use tracing::debug;

use super::capability::CapabilityFactory;
use super::context::ContextFactory;
use super::executor::{ExecutionLimits, ExecutionReport, ScriptExecutor};
use super::params::ParameterSet;
use super::scope::{Dimensions, Namespace, ScopeManager};
use super::source::{PathSource, ProvidedSource, ScriptSourceResolver};
use crate::{HostError, Result};

/// Lifecycle of a script instance.
///
/// `Unconfigured -> Configured -> Scoped -> Executing -> Completed | Failed`.
/// A completed or failed instance may execute again. Attaching a namespace
/// while `Unconfigured` is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    Unconfigured,
    Configured,
    Scoped,
    Executing,
    Completed,
    Failed,
}

/// What callers drive: configure, attach a namespace, execute.
pub trait ScriptHost {
    /// Set the data-source factory handed to scripts.
    fn configure(&mut self, capability: Arc<dyn CapabilityFactory>) -> Result<()>;

    /// Attach the namespace scripts run in, replacing any previous one.
    ///
    /// Fails with [`HostError::Configuration`] before [`ScriptHost::configure`].
    fn set_scope(&mut self, namespace: Box<dyn Namespace>) -> Result<()>;

    /// Evaluate the script with fresh parameters.
    fn execute(&mut self, params: Option<&ParameterSet>) -> Result<ExecutionReport>;

    fn state(&self) -> ScriptState;
}

/// A script instance whose source comes from `R`.
pub struct Script<R> {
    source: R,
    scopes: ScopeManager,
    executor: ScriptExecutor,
    state: ScriptState,
}

/// Script read through a [`super::source::SourceProvider`].
pub type ReaderScript = Script<ProvidedSource>;

/// Script read from a file relative to a base path.
pub type PathScript = Script<PathSource>;

impl<R: ScriptSourceResolver> Script<R> {
    pub fn new(factory: Arc<ContextFactory>, source: R) -> Self {
        Self {
            source,
            scopes: ScopeManager::new(Arc::clone(&factory)),
            executor: ScriptExecutor::new(factory),
            state: ScriptState::Unconfigured,
        }
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.executor.set_limits(limits);
        self
    }

    /// Bind `dimensions = { width, height }` next to the capability.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.scopes
            .set_dimensions(Some(Dimensions { width, height }));
        self
    }

    pub fn source(&self) -> &R {
        &self.source
    }

    pub fn namespace(&self) -> Option<&dyn Namespace> {
        self.scopes.namespace()
    }

    /// Read a binding left in the namespace by the last evaluation.
    pub fn lookup_json(&self, name: &str) -> Result<serde_json::Value> {
        self.namespace()
            .ok_or_else(|| HostError::Configuration("no namespace attached".to_string()))?
            .lookup_json(name)
    }
}

impl<R: ScriptSourceResolver> ScriptHost for Script<R> {
    fn configure(&mut self, capability: Arc<dyn CapabilityFactory>) -> Result<()> {
        self.scopes.configure(capability)?;
        self.state = match self.state {
            ScriptState::Unconfigured | ScriptState::Configured => ScriptState::Configured,
            _ => ScriptState::Scoped,
        };
        Ok(())
    }

    fn set_scope(&mut self, namespace: Box<dyn Namespace>) -> Result<()> {
        if self.state == ScriptState::Unconfigured {
            return Err(HostError::Configuration(format!(
                "set_scope called on unconfigured script '{}'",
                self.source.identifier()
            )));
        }

        self.scopes
            .attach_scope(namespace, self.source.base_path())?;
        self.executor.invalidate();
        self.state = ScriptState::Scoped;
        Ok(())
    }

    fn execute(&mut self, params: Option<&ParameterSet>) -> Result<ExecutionReport> {
        let namespace = self.scopes.namespace().ok_or_else(|| {
            HostError::Configuration(format!(
                "execute called on '{}' without a namespace",
                self.source.identifier()
            ))
        })?;

        self.state = ScriptState::Executing;
        let result = self.executor.run(namespace, &self.source, params);
        self.state = match &result {
            Ok(_) => ScriptState::Completed,
            Err(e) => {
                debug!(source = %self.source.identifier(), "execution failed: {}", e);
                ScriptState::Failed
            }
        };
        result
    }

    fn state(&self) -> ScriptState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::capability::UserDataCapability;
    use crate::script::context::EngineSettings;
    use crate::script::scope::Scope;
    use crate::script::source::{MemoryProvider, SourceProvider};
    use mlua::UserData;
    use serde_json::json;

    #[derive(Clone)]
    struct NullFactory;

    impl UserData for NullFactory {}

    fn reader_script(factory: &Arc<ContextFactory>, text: &str) -> ReaderScript {
        let provider: Arc<dyn SourceProvider> =
            Arc::new(MemoryProvider::new().with_script("chart.lua", text));
        Script::new(Arc::clone(factory), ProvidedSource::new("chart.lua", provider))
    }

    fn scope(factory: &Arc<ContextFactory>) -> Box<dyn Namespace> {
        Box::new(Scope::new(&factory.enter().unwrap()).unwrap())
    }

    #[test]
    fn test_state_transitions() {
        let factory = ContextFactory::new(EngineSettings::default());
        let mut script = reader_script(&factory, "ok = true");
        assert_eq!(script.state(), ScriptState::Unconfigured);

        script.configure(Arc::new(UserDataCapability::new(NullFactory))).unwrap();
        assert_eq!(script.state(), ScriptState::Configured);

        script.set_scope(scope(&factory)).unwrap();
        assert_eq!(script.state(), ScriptState::Scoped);

        script.execute(None).unwrap();
        assert_eq!(script.state(), ScriptState::Completed);

        script.execute(None).unwrap();
        assert_eq!(script.state(), ScriptState::Completed);

        script.configure(Arc::new(UserDataCapability::new(NullFactory))).unwrap();
        assert_eq!(script.state(), ScriptState::Scoped);
    }

    #[test]
    fn test_failed_then_completed() {
        let factory = ContextFactory::new(EngineSettings::default());
        let mut script = reader_script(&factory, "if params.fail then error('asked to') end");
        script.configure(Arc::new(UserDataCapability::new(NullFactory))).unwrap();
        script.set_scope(scope(&factory)).unwrap();

        let fail = json!({ "fail": true }).as_object().cloned().unwrap();
        assert!(script.execute(Some(&fail)).is_err());
        assert_eq!(script.state(), ScriptState::Failed);

        script.execute(None).unwrap();
        assert_eq!(script.state(), ScriptState::Completed);
    }

    #[test]
    fn test_set_scope_before_configure_rejected() {
        let factory = ContextFactory::new(EngineSettings::default());
        let mut script = reader_script(&factory, "");

        let err = script.set_scope(scope(&factory)).unwrap_err();
        assert!(matches!(err, HostError::Configuration(_)));
        assert_eq!(script.state(), ScriptState::Unconfigured);
        assert!(script.namespace().is_none());
    }

    #[test]
    fn test_execute_without_scope_rejected() {
        let factory = ContextFactory::new(EngineSettings::default());
        let mut script = reader_script(&factory, "");
        script.configure(Arc::new(UserDataCapability::new(NullFactory))).unwrap();

        let err = script.execute(None).unwrap_err();
        assert!(matches!(err, HostError::Configuration(_)));
        assert_eq!(script.state(), ScriptState::Configured);
    }

    #[test]
    fn test_set_scope_replaces_namespace() {
        let factory = ContextFactory::new(EngineSettings::default());
        let mut script = reader_script(&factory, "marker = (marker or 0) + 1");
        script.configure(Arc::new(UserDataCapability::new(NullFactory))).unwrap();

        script.set_scope(scope(&factory)).unwrap();
        script.execute(None).unwrap();
        script.execute(None).unwrap();
        assert_eq!(script.lookup_json("marker").unwrap(), json!(2));

        script.set_scope(scope(&factory)).unwrap();
        script.execute(None).unwrap();
        assert_eq!(script.lookup_json("marker").unwrap(), json!(1));
    }

    #[test]
    fn test_lookup_without_namespace() {
        let factory = ContextFactory::new(EngineSettings::default());
        let script = reader_script(&factory, "");
        assert!(matches!(
            script.lookup_json("x"),
            Err(HostError::Configuration(_))
        ));
    }
}
