//! Script host module for evaluating chart definition scripts.
//!
//! Scripts are Lua chunks evaluated in a per-instance namespace. The host
//! binds the data-source factory as `datasourceFactory` and the invocation
//! parameters as `params`; everything else a script leaves in its namespace
//! is readable by the caller afterwards.

pub mod capability;
pub mod context;
pub mod executor;
pub mod host;
pub mod params;
pub mod scope;
pub mod source;

pub use capability::{CapabilityFactory, UserDataCapability, DATASOURCE_FACTORY};
pub use context::{ContextFactory, EngineSettings, ExecutionContext};
pub use executor::{ExecutionLimits, ExecutionReport, ScriptExecutor};
pub use host::{PathScript, ReaderScript, Script, ScriptHost, ScriptState};
pub use params::{ParameterBinder, ParameterSet, PARAMS};
pub use scope::{BasePathAware, Dimensions, LibraryScope, Namespace, Scope, ScopeManager};
pub use source::{
    DirectoryProvider, MemoryProvider, PathSource, ProvidedSource, ScriptSourceResolver,
    SourceProvider, SourceReader,
};
