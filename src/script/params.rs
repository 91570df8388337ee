//! Per-invocation parameter binding.

use mlua::{LuaSerdeExt, SerializeOptions};
use tracing::debug;

use super::scope::Namespace;
use crate::Result;

/// Binding name of the invocation parameters.
pub const PARAMS: &str = "params";

/// Parameters supplied to a single invocation.
pub type ParameterSet = serde_json::Map<String, serde_json::Value>;

/// Binds a [`ParameterSet`] into a namespace as `params`.
pub struct ParameterBinder;

impl ParameterBinder {
    /// Bind `params`, replacing the previous binding wholesale.
    ///
    /// `None` binds an empty table so scripts can always index `params`.
    /// JSON `null` values become `nil`.
    pub fn bind(namespace: &dyn Namespace, params: Option<&ParameterSet>) -> Result<()> {
        let empty = ParameterSet::new();
        let params = params.unwrap_or(&empty);

        let options = SerializeOptions::new()
            .serialize_none_to_null(false)
            .serialize_unit_to_null(false);
        let value = namespace.context().lua().to_value_with(params, options)?;

        debug!(namespace = %namespace.id(), count = params.len(), "binding params");
        namespace.bind(PARAMS, value)
    }
}
