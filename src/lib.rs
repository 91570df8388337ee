//! charthost - embeddable host for report and chart definition scripts.
//!
//! Runs Lua chart scripts in per-instance namespaces with a host-supplied
//! data-source factory and per-invocation parameters.

pub mod app;
pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod script;

pub use app::Application;
pub use config::{Config, ExecutionMode, LanguageVersion};
pub use error::{HostError, Result};
pub use export::{Exporter, JsonExporter, TableModel};
pub use script::{
    CapabilityFactory, ContextFactory, DirectoryProvider, EngineSettings, ExecutionLimits,
    ExecutionReport, LibraryScope, MemoryProvider, Namespace, ParameterSet, PathScript,
    PathSource, ProvidedSource, ReaderScript, Scope, Script, ScriptHost, ScriptSourceResolver,
    ScriptState, SourceProvider, SourceReader, UserDataCapability,
};
