//! Namespaces and the scope manager that binds host capabilities into them.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use mlua::{ChunkMode, Function, LuaSerdeExt, Table, Value};
use tracing::debug;
use uuid::Uuid;

use super::capability::{CapabilityFactory, DATASOURCE_FACTORY};
use super::context::{ContextFactory, ExecutionContext};
use super::source::resolve_within;
use crate::{HostError, Result};

/// Binding name of the render dimensions table.
pub const DIMENSIONS: &str = "dimensions";

/// Binding name of the base path in a [`LibraryScope`].
pub const BASE_PATH: &str = "basePath";

const INCLUDE_SHIM: &str = r#"
local env, compile = ...
return function(relative)
    return compile(relative, env)()
end
"#;

/// An isolated set of name bindings evaluated chunks see as `_ENV`.
pub trait Namespace {
    fn id(&self) -> Uuid;

    /// Context the namespace was created in.
    fn context(&self) -> &ExecutionContext;

    /// Environment table handed to evaluated chunks.
    fn environment(&self) -> &Table;

    /// Bind `value` under `name`, replacing any previous binding.
    fn bind(&self, name: &str, value: Value) -> Result<()> {
        self.environment()
            .raw_set(name, value)
            .map_err(|e| HostError::Engine(format!("failed to bind '{name}': {e}")))
    }

    /// Look up a binding made by the host or by a script.
    fn lookup(&self, name: &str) -> Result<Value> {
        self.environment()
            .raw_get(name)
            .map_err(|e| HostError::Engine(format!("failed to read '{name}': {e}")))
    }

    /// Look up a binding and convert it to JSON.
    fn lookup_json(&self, name: &str) -> Result<serde_json::Value> {
        let value = self.lookup(name)?;
        self.context()
            .lua()
            .from_value(value)
            .map_err(|e| HostError::Engine(format!("'{name}' is not convertible: {e}")))
    }

    /// Base path support, if this namespace has any.
    fn as_base_path_aware(&self) -> Option<&dyn BasePathAware> {
        None
    }
}

/// A namespace that can resolve library scripts relative to a base path.
pub trait BasePathAware {
    fn set_base_path(&self, path: Option<&Path>) -> Result<()>;
    fn base_path(&self) -> Option<PathBuf>;
}

/// Plain namespace.
pub struct Scope {
    id: Uuid,
    context: ExecutionContext,
    env: Table,
}

impl Scope {
    pub fn new(context: &ExecutionContext) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            context: context.clone(),
            env: context.new_environment()?,
        })
    }
}

impl Namespace for Scope {
    fn id(&self) -> Uuid {
        self.id
    }

    fn context(&self) -> &ExecutionContext {
        &self.context
    }

    fn environment(&self) -> &Table {
        &self.env
    }
}

/// Namespace with a base path and an `include(relative)` function.
///
/// `include` evaluates a file under the base path in this same namespace and
/// returns whatever the included chunk returns. Absolute paths and `..` are
/// rejected.
pub struct LibraryScope {
    id: Uuid,
    context: ExecutionContext,
    env: Table,
    base_path: Rc<RefCell<Option<PathBuf>>>,
}

impl LibraryScope {
    pub fn new(context: &ExecutionContext) -> Result<Self> {
        let env = context.new_environment()?;
        let base_path: Rc<RefCell<Option<PathBuf>>> = Rc::new(RefCell::new(None));

        let lua = context.lua();
        let compile_base = Rc::clone(&base_path);
        let compile = lua.create_function(move |lua, (relative, env): (String, Table)| {
            let base = compile_base.borrow().clone().ok_or_else(|| {
                mlua::Error::RuntimeError("include: no base path set".to_string())
            })?;
            let path = resolve_within(&base, &relative).map_err(mlua::Error::external)?;
            let text = fs::read_to_string(&path).map_err(mlua::Error::external)?;
            lua.load(text)
                .set_name(format!("@{relative}"))
                .set_mode(ChunkMode::Text)
                .set_environment(env)
                .into_function()
        })?;
        let include: Function = lua
            .load(INCLUDE_SHIM)
            .set_name("=include")
            .call((env.clone(), compile))?;
        env.raw_set("include", include)?;

        Ok(Self {
            id: Uuid::new_v4(),
            context: context.clone(),
            env,
            base_path,
        })
    }
}

impl Namespace for LibraryScope {
    fn id(&self) -> Uuid {
        self.id
    }

    fn context(&self) -> &ExecutionContext {
        &self.context
    }

    fn environment(&self) -> &Table {
        &self.env
    }

    fn as_base_path_aware(&self) -> Option<&dyn BasePathAware> {
        Some(self)
    }
}

impl BasePathAware for LibraryScope {
    fn set_base_path(&self, path: Option<&Path>) -> Result<()> {
        *self.base_path.borrow_mut() = path.map(Path::to_path_buf);
        let value = match path {
            Some(path) => Value::String(
                self.context
                    .lua()
                    .create_string(path.to_string_lossy().as_bytes())?,
            ),
            None => Value::Nil,
        };
        self.bind(BASE_PATH, value)
    }

    fn base_path(&self) -> Option<PathBuf> {
        self.base_path.borrow().clone()
    }
}

/// Render dimensions handed to chart scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Owns the namespace of one script instance and injects host capabilities.
pub struct ScopeManager {
    factory: Arc<ContextFactory>,
    capability: Option<Arc<dyn CapabilityFactory>>,
    dimensions: Option<Dimensions>,
    namespace: Option<Box<dyn Namespace>>,
}

impl ScopeManager {
    pub fn new(factory: Arc<ContextFactory>) -> Self {
        Self {
            factory,
            capability: None,
            dimensions: None,
            namespace: None,
        }
    }

    pub fn set_dimensions(&mut self, dimensions: Option<Dimensions>) {
        self.dimensions = dimensions;
    }

    pub fn is_configured(&self) -> bool {
        self.capability.is_some()
    }

    pub fn namespace(&self) -> Option<&dyn Namespace> {
        self.namespace.as_deref()
    }

    /// Store the capability factory.
    ///
    /// An already attached namespace gets the new handle immediately. If
    /// that fails, the previous factory and handle stay in place.
    pub fn configure(&mut self, capability: Arc<dyn CapabilityFactory>) -> Result<()> {
        if let Some(namespace) = self.namespace.as_deref() {
            let _context = self.factory.enter()?;
            self.inject(capability.as_ref(), namespace)?;
        }
        self.capability = Some(capability);
        Ok(())
    }

    /// Attach `namespace`, replacing the current one.
    ///
    /// Fails with [`HostError::Configuration`] when no capability factory has
    /// been configured or when the namespace belongs to another context. On
    /// failure the previous namespace stays attached.
    pub fn attach_scope(
        &mut self,
        namespace: Box<dyn Namespace>,
        base_path: Option<&Path>,
    ) -> Result<()> {
        let capability = self.capability.clone().ok_or_else(|| {
            HostError::Configuration(
                "scope attached before a capability factory was configured".to_string(),
            )
        })?;

        let context = self.factory.enter()?;
        if namespace.context().id() != context.id() {
            return Err(HostError::Configuration(
                "namespace belongs to a different execution context".to_string(),
            ));
        }

        if let Some(aware) = namespace.as_base_path_aware() {
            aware.set_base_path(base_path)?;
        }
        self.inject(capability.as_ref(), namespace.as_ref())?;

        debug!(namespace = %namespace.id(), "attached namespace");
        self.namespace = Some(namespace);
        Ok(())
    }

    /// Detach and return the current namespace.
    pub fn detach(&mut self) -> Option<Box<dyn Namespace>> {
        self.namespace.take()
    }

    fn inject(
        &self,
        capability: &dyn CapabilityFactory,
        namespace: &dyn Namespace,
    ) -> Result<()> {
        let lua = namespace.context().lua();
        let handle = capability
            .create_handle(lua)
            .map_err(|e| HostError::Engine(format!("failed to create capability handle: {e}")))?;
        namespace.bind(DATASOURCE_FACTORY, handle)?;

        if let Some(dimensions) = self.dimensions {
            let table = lua.create_table()?;
            table.set("width", dimensions.width)?;
            table.set("height", dimensions.height)?;
            namespace.bind(DIMENSIONS, Value::Table(table))?;
        }

        Ok(())
    }
}
