//! Script evaluation with resource limits.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use mlua::{ChunkMode, Function, HookTriggers, Lua, LuaSerdeExt, Value, VmState};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::context::{ContextFactory, ExecutionContext};
use super::params::{ParameterBinder, ParameterSet};
use super::scope::Namespace;
use super::source::ScriptSourceResolver;
use crate::config::{ExecutionMode, LimitsConfig};
use crate::{HostError, Result};

/// Instructions between two limit checks.
const HOOK_INTERVAL: u32 = 1000;

const NO_VIOLATION: u8 = 0;
const INSTRUCTION_VIOLATION: u8 = 1;
const TIME_VIOLATION: u8 = 2;

/// Limits applied to a single evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Maximum number of instructions (0 = unlimited).
    pub max_instructions: u64,
    /// Maximum wall-clock time.
    pub max_duration: Option<Duration>,
}

impl From<&LimitsConfig> for ExecutionLimits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            max_instructions: config.max_instructions,
            max_duration: (config.max_execution_secs > 0)
                .then(|| Duration::from_secs(config.max_execution_secs)),
        }
    }
}

/// Outcome of a successful evaluation.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Identifier the source was resolved from.
    pub source_id: String,
    /// Label the chunk was tagged with.
    pub label: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Instructions executed, counted in steps of the hook interval.
    pub instructions_used: u64,
    /// Whether a previously compiled chunk was reused.
    pub reused_chunk: bool,
    /// Value returned by the chunk, when it has a JSON form.
    pub returned: Option<serde_json::Value>,
}

struct CompiledChunk {
    digest: String,
    namespace: Uuid,
    function: Function,
}

/// Runs one script source against a namespace.
pub struct ScriptExecutor {
    factory: Arc<ContextFactory>,
    limits: ExecutionLimits,
    compiled: Option<CompiledChunk>,
}

impl ScriptExecutor {
    pub fn new(factory: Arc<ContextFactory>) -> Self {
        Self {
            factory,
            limits: ExecutionLimits::default(),
            compiled: None,
        }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    pub fn set_limits(&mut self, limits: ExecutionLimits) {
        self.limits = limits;
    }

    /// Drop any cached chunk.
    pub fn invalidate(&mut self) {
        self.compiled = None;
    }

    /// Evaluate the text of `source` against `namespace`.
    ///
    /// Source read failures are logged and returned as
    /// [`HostError::SourceUnavailable`]; the namespace is left as it was
    /// apart from the fresh `params` binding. Engine failures are returned as
    /// [`HostError::Evaluation`], or as [`HostError::Timeout`] /
    /// [`HostError::LimitExceeded`] when a limit stopped the script.
    pub fn run<R>(
        &mut self,
        namespace: &dyn Namespace,
        source: &R,
        params: Option<&ParameterSet>,
    ) -> Result<ExecutionReport>
    where
        R: ScriptSourceResolver + ?Sized,
    {
        let context = self.factory.enter()?;
        if namespace.context().id() != context.id() {
            return Err(HostError::Configuration(
                "namespace belongs to a different execution context".to_string(),
            ));
        }

        let mode = context.settings().mode;
        context.apply_language_version()?;

        ParameterBinder::bind(namespace, params)?;

        let source_id = source.identifier().to_string();
        let (label, text) = match read_source(source) {
            Ok(read) => read,
            Err(cause) => {
                error!("Failed to read {}: {}", source_id, cause);
                return Err(HostError::SourceUnavailable { source_id, cause });
            }
        };

        debug!(source = %source_id, ?mode, "evaluating script");
        let started_at = Utc::now();
        let clock = Instant::now();

        let (function, reused_chunk) = self
            .prepare(&context, namespace, &label, &text, mode)
            .map_err(|e| HostError::Evaluation {
                source_id: source_id.clone(),
                message: e.to_string(),
            })?;

        let guard = LimitGuard::install(&context, &self.limits);
        let outcome = function.call::<Value>(());
        let (instructions_used, violation) = guard.usage();
        drop(guard);

        let value = outcome.map_err(|e| self.classify(&source_id, e, violation))?;
        let returned = returned_json(context.lua(), value, &source_id);
        let elapsed = clock.elapsed();

        info!(
            source = %source_id,
            elapsed_ms = elapsed.as_millis() as u64,
            instructions = instructions_used,
            "script evaluated"
        );

        Ok(ExecutionReport {
            source_id,
            label,
            started_at,
            elapsed,
            instructions_used,
            reused_chunk,
            returned,
        })
    }

    fn prepare(
        &mut self,
        context: &ExecutionContext,
        namespace: &dyn Namespace,
        label: &str,
        text: &str,
        mode: ExecutionMode,
    ) -> mlua::Result<(Function, bool)> {
        let load = || {
            context
                .lua()
                .load(text)
                .set_name(format!("@{label}"))
                .set_mode(ChunkMode::Text)
                .set_environment(namespace.environment().clone())
                .into_function()
        };

        match mode {
            ExecutionMode::Interpreted => {
                self.compiled = None;
                Ok((load()?, false))
            }
            ExecutionMode::Compiled => {
                let digest = digest(text);
                if let Some(chunk) = &self.compiled {
                    if chunk.digest == digest && chunk.namespace == namespace.id() {
                        return Ok((chunk.function.clone(), true));
                    }
                }
                let function = load()?;
                self.compiled = Some(CompiledChunk {
                    digest,
                    namespace: namespace.id(),
                    function: function.clone(),
                });
                Ok((function, false))
            }
        }
    }

    fn classify(&self, source_id: &str, e: mlua::Error, violation: u8) -> HostError {
        let source_id = source_id.to_string();
        match violation {
            TIME_VIOLATION => {
                warn!(source = %source_id, "script exceeded time limit");
                HostError::Timeout {
                    source_id,
                    limit: self.limits.max_duration.unwrap_or_default(),
                }
            }
            INSTRUCTION_VIOLATION => {
                warn!(source = %source_id, "script exceeded instruction limit");
                HostError::LimitExceeded {
                    source_id,
                    message: format!("more than {} instructions", self.limits.max_instructions),
                }
            }
            _ => match e {
                mlua::Error::MemoryError(message) => {
                    warn!(source = %source_id, "script exceeded memory limit");
                    HostError::LimitExceeded { source_id, message }
                }
                other => HostError::Evaluation {
                    source_id,
                    message: other.to_string(),
                },
            },
        }
    }
}

/// Open and fully read the source. The reader is released before returning.
fn read_source<R>(source: &R) -> std::io::Result<(String, String)>
where
    R: ScriptSourceResolver + ?Sized,
{
    let reader = source.open()?;
    let label = reader.label().to_string();
    let text = reader.into_text()?;
    Ok((label, text))
}

fn digest(text: &str) -> String {
    let hash = Sha256::digest(text.as_bytes());
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

fn returned_json(lua: &Lua, value: Value, source_id: &str) -> Option<serde_json::Value> {
    if value.is_nil() {
        return None;
    }
    match lua.from_value(value) {
        Ok(json) => Some(json),
        Err(e) => {
            debug!(source = %source_id, "return value has no JSON form: {}", e);
            None
        }
    }
}

/// Limits of one running evaluation.
struct ActiveLimit {
    max_instructions: u64,
    deadline: Option<Instant>,
    instructions: Cell<u64>,
    violation: Cell<u8>,
}

/// Limits of every evaluation running on one context, outermost first.
///
/// A Lua state has a single hook, so an evaluation started from inside a
/// host callback shares the hook with the one that called it. The hook
/// checks every entry; each guard removes only its own.
#[derive(Default)]
pub(crate) struct LimitStack {
    active: RefCell<Vec<Rc<ActiveLimit>>>,
}

impl LimitStack {
    /// Charge `step` instructions to every active evaluation.
    fn tick(&self, step: u64) -> mlua::Result<VmState> {
        let now = Instant::now();
        let mut hit = NO_VIOLATION;

        for limit in self.active.borrow().iter() {
            let current = limit.instructions.get() + step;
            limit.instructions.set(current);

            if limit.violation.get() == NO_VIOLATION {
                if limit.max_instructions > 0 && current > limit.max_instructions {
                    limit.violation.set(INSTRUCTION_VIOLATION);
                } else if limit.deadline.is_some_and(|deadline| now >= deadline) {
                    limit.violation.set(TIME_VIOLATION);
                }
            }
            if hit == NO_VIOLATION {
                hit = limit.violation.get();
            }
        }

        match hit {
            NO_VIOLATION => Ok(VmState::Continue),
            INSTRUCTION_VIOLATION => Err(mlua::Error::RuntimeError(
                "script exceeded instruction limit".to_string(),
            )),
            _ => Err(mlua::Error::RuntimeError(
                "script exceeded time limit".to_string(),
            )),
        }
    }

    fn depth(&self) -> usize {
        self.active.borrow().len()
    }
}

/// Registers [`ExecutionLimits`] on the context's hook; unregisters on drop.
struct LimitGuard<'a> {
    context: &'a ExecutionContext,
    limit: Rc<ActiveLimit>,
}

impl<'a> LimitGuard<'a> {
    fn install(context: &'a ExecutionContext, limits: &ExecutionLimits) -> Self {
        let limit = Rc::new(ActiveLimit {
            max_instructions: limits.max_instructions,
            deadline: limits.max_duration.map(|limit| Instant::now() + limit),
            instructions: Cell::new(0),
            violation: Cell::new(NO_VIOLATION),
        });

        let stack = context.limit_stack();
        stack.active.borrow_mut().push(Rc::clone(&limit));
        if stack.depth() == 1 {
            let hook_stack = Rc::clone(stack);
            context.lua().set_hook(
                HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
                move |_lua, _debug| hook_stack.tick(u64::from(HOOK_INTERVAL)),
            );
        }

        Self { context, limit }
    }

    fn usage(&self) -> (u64, u8) {
        (self.limit.instructions.get(), self.limit.violation.get())
    }
}

impl Drop for LimitGuard<'_> {
    fn drop(&mut self) {
        let stack = self.context.limit_stack();
        stack
            .active
            .borrow_mut()
            .retain(|limit| !Rc::ptr_eq(limit, &self.limit));
        if stack.depth() == 0 {
            let _ = self.context.lua().remove_hook();
        }
    }
}
