//! Execution contexts.
//!
//! A [`ContextFactory`] is shared between threads and carries the engine
//! settings. [`ContextFactory::enter`] hands out the calling thread's
//! [`ExecutionContext`], creating the underlying Lua state on first entry.
//! Entering again on the same thread returns the same context, so entry is
//! safe to repeat before every scope mutation or evaluation. Contexts are
//! `!Send`: a context, and every namespace created from it, stays on the
//! thread that entered it.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use mlua::{Lua, Table, Value};
use tracing::debug;
use uuid::Uuid;

use super::executor::LimitStack;
use crate::config::{EngineConfig, ExecutionMode, LanguageVersion};
use crate::{HostError, Result};

/// Globals removed when `restrict_stdlib` is set.
const RESTRICTED_GLOBALS: [&str; 9] = [
    "os",
    "io",
    "loadfile",
    "dofile",
    "load",
    "require",
    "package",
    "debug",
    "collectgarbage",
];

const LUA51_COMPAT: &str = r#"
unpack = unpack or table.unpack
loadstring = loadstring or load
table.getn = table.getn or function(t) return #t end
math.pow = math.pow or function(x, y) return x ^ y end
"#;

/// Engine settings shared by every context a factory creates.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub mode: ExecutionMode,
    pub language_version: LanguageVersion,
    pub restrict_stdlib: bool,
    /// Memory ceiling in bytes (0 = unlimited).
    pub max_memory: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            mode: config.mode,
            language_version: config.language_version,
            restrict_stdlib: config.restrict_stdlib,
            // Ceilings past the address space are as good as none.
            max_memory: config.max_memory_bytes().unwrap_or(usize::MAX),
        }
    }
}

thread_local! {
    static ENTERED: RefCell<HashMap<Uuid, Weak<ContextInner>>> = RefCell::new(HashMap::new());
}

/// Factory for per-thread execution contexts.
#[derive(Debug)]
pub struct ContextFactory {
    id: Uuid,
    settings: EngineSettings,
}

impl ContextFactory {
    /// Create a factory with the given settings.
    pub fn new(settings: EngineSettings) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            settings,
        })
    }

    /// Create a factory from the `[engine]` configuration section.
    pub fn from_config(config: &EngineConfig) -> Arc<Self> {
        Self::new(EngineSettings::from(config))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Enter the execution context for the calling thread.
    ///
    /// Returns the live context if this thread already entered one for this
    /// factory; otherwise creates it. The context is torn down once every
    /// handle (including namespaces created from it) is dropped.
    pub fn enter(&self) -> Result<ExecutionContext> {
        let live = ENTERED.with(|entered| entered.borrow().get(&self.id).and_then(Weak::upgrade));
        if let Some(inner) = live {
            return Ok(ExecutionContext { inner });
        }

        let inner = Rc::new(ContextInner::create(&self.settings)?);
        ENTERED.with(|entered| {
            let mut entered = entered.borrow_mut();
            entered.retain(|_, weak| weak.strong_count() > 0);
            entered.insert(self.id, Rc::downgrade(&inner));
        });
        debug!(
            factory = %self.id,
            context = %inner.id,
            thread = ?inner.thread,
            "entered new execution context"
        );

        Ok(ExecutionContext { inner })
    }
}

struct ContextInner {
    id: Uuid,
    lua: Lua,
    settings: EngineSettings,
    thread: ThreadId,
    compat_installed: Cell<bool>,
    limits: Rc<LimitStack>,
}

impl ContextInner {
    fn create(settings: &EngineSettings) -> Result<Self> {
        let lua = Lua::new();

        if settings.restrict_stdlib {
            restrict_globals(&lua)?;
        }

        if settings.max_memory > 0 {
            lua.set_memory_limit(settings.max_memory)
                .map_err(|e| HostError::Engine(format!("failed to set memory limit: {e}")))?;
        }

        Ok(Self {
            id: Uuid::new_v4(),
            lua,
            settings: settings.clone(),
            thread: thread::current().id(),
            compat_installed: Cell::new(false),
            limits: Rc::default(),
        })
    }
}

fn restrict_globals(lua: &Lua) -> Result<()> {
    let globals = lua.globals();
    for name in RESTRICTED_GLOBALS {
        globals
            .set(name, Value::Nil)
            .map_err(|e| HostError::Engine(format!("failed to disable {name}: {e}")))?;
    }
    Ok(())
}

/// Handle to the Lua state entered by the current thread.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Rc<ContextInner>,
}

impl ExecutionContext {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn lua(&self) -> &Lua {
        &self.inner.lua
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    /// Thread that entered this context.
    pub fn thread(&self) -> ThreadId {
        self.inner.thread
    }

    /// Limits of the evaluations currently running in this context.
    pub(crate) fn limit_stack(&self) -> &Rc<LimitStack> {
        &self.inner.limits
    }

    /// Install the globals required by the configured language version.
    ///
    /// Runs at most once per context.
    pub fn apply_language_version(&self) -> Result<()> {
        match self.inner.settings.language_version {
            LanguageVersion::Lua54 => Ok(()),
            LanguageVersion::Lua51Compat => {
                if self.inner.compat_installed.get() {
                    return Ok(());
                }
                self.inner
                    .lua
                    .load(LUA51_COMPAT)
                    .set_name("=compat")
                    .exec()
                    .map_err(|e| HostError::Engine(format!("failed to install compat: {e}")))?;
                self.inner.compat_installed.set(true);
                Ok(())
            }
        }
    }

    /// Create an empty environment table.
    ///
    /// Reads fall through to the context globals; writes stay in the table.
    pub fn new_environment(&self) -> Result<Table> {
        let lua = &self.inner.lua;
        let env = lua.create_table()?;
        let meta = lua.create_table()?;
        meta.set("__index", lua.globals())?;
        env.set_metatable(Some(meta));
        Ok(env)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.inner.id)
            .field("thread", &self.inner.thread)
            .field("settings", &self.inner.settings)
            .finish()
    }
}
