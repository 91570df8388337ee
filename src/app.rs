//! Application wiring.
//!
//! Turns a [`Config`] into the shared pieces every script instance needs and
//! hands out instances reading from the configured scripts directory.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::logging;
use crate::script::{
    ContextFactory, DirectoryProvider, ExecutionLimits, ProvidedSource, ReaderScript, Script,
    SourceProvider,
};
use crate::Result;

/// Shared state of a configured script host.
pub struct Application {
    /// Host configuration.
    config: Arc<Config>,
    /// Factory for per-thread execution contexts.
    factory: Arc<ContextFactory>,
    /// Script files under `[scripts] path`.
    provider: Arc<DirectoryProvider>,
    /// Limits applied to every script instance.
    limits: ExecutionLimits,
}

impl Application {
    /// Build the application from a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let factory = ContextFactory::from_config(&config.engine);
        let provider = Arc::new(DirectoryProvider::from_config(&config.scripts));
        let limits = ExecutionLimits::from(&config.limits);

        Ok(Self {
            config: Arc::new(config),
            factory,
            provider,
            limits,
        })
    }

    /// Load `path` with environment overrides, install logging, and build.
    ///
    /// Installs the global tracing subscriber, so call it once per process.
    pub fn start<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::load_with_env(path)?;
        config.validate()?;
        logging::init(&config.logging)?;

        let app = Self::new(config)?;
        info!(
            scripts = %app.provider.root().display(),
            mode = ?app.factory.settings().mode,
            "script host started"
        );
        Ok(app)
    }

    /// Get the configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Get the context factory.
    pub fn factory(&self) -> &Arc<ContextFactory> {
        &self.factory
    }

    /// Get the scripts directory provider.
    pub fn provider(&self) -> &Arc<DirectoryProvider> {
        &self.provider
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Create an unconfigured script instance for `id` under the scripts
    /// directory, carrying the configured limits.
    pub fn create_script(&self, id: &str) -> ReaderScript {
        let provider: Arc<dyn SourceProvider> = self.provider.clone();
        Script::new(Arc::clone(&self.factory), ProvidedSource::new(id, provider))
            .with_limits(self.limits.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionMode;
    use crate::script::{Scope, ScriptHost, UserDataCapability};
    use crate::HostError;
    use mlua::UserData;
    use std::time::Duration;

    #[derive(Clone)]
    struct NullSources;

    impl UserData for NullSources {}

    fn config_for(dir: &Path) -> Config {
        let mut config = Config::default();
        config.scripts.path = dir.to_string_lossy().into_owned();
        config
    }

    #[test]
    fn test_new_wires_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path());
        config.engine.mode = ExecutionMode::Compiled;
        config.limits.max_execution_secs = 3;

        let app = Application::new(config).unwrap();

        assert_eq!(app.provider().root(), dir.path());
        assert_eq!(app.factory().settings().mode, ExecutionMode::Compiled);
        assert_eq!(app.limits().max_duration, Some(Duration::from_secs(3)));
        assert_eq!(app.config().limits.max_execution_secs, 3);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = Config::default();
        config.scripts.path = String::new();
        assert!(matches!(
            Application::new(config),
            Err(HostError::Settings(_))
        ));
    }

    #[test]
    fn test_create_script_runs_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sales")).unwrap();
        std::fs::write(dir.path().join("sales/bar.lua"), "total = params.a + params.b").unwrap();

        let app = Application::new(config_for(dir.path())).unwrap();
        let mut script = app.create_script("sales/bar.lua");
        script
            .configure(Arc::new(UserDataCapability::new(NullSources)))
            .unwrap();
        let context = app.factory().enter().unwrap();
        script
            .set_scope(Box::new(Scope::new(&context).unwrap()))
            .unwrap();

        let params = serde_json::json!({ "a": 2, "b": 3 });
        script.execute(params.as_object()).unwrap();
        assert_eq!(script.lookup_json("total").unwrap(), serde_json::json!(5));
    }
}
