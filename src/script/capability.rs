//! Host capabilities injected into script namespaces.

use mlua::{Lua, UserData, Value};

/// Binding name of the data-source factory.
pub const DATASOURCE_FACTORY: &str = "datasourceFactory";

/// Produces the script-visible handle of a host-owned data-source factory.
///
/// The host never calls into the handle; it only binds whatever value this
/// returns under [`DATASOURCE_FACTORY`]. One factory is shared by every
/// script instance, across threads, so a fresh handle is created per
/// namespace.
pub trait CapabilityFactory: Send + Sync {
    fn create_handle(&self, lua: &Lua) -> mlua::Result<Value>;
}

/// Exposes a cloneable [`UserData`] value as a capability.
#[derive(Debug, Clone)]
pub struct UserDataCapability<T> {
    inner: T,
}

impl<T> UserDataCapability<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T> CapabilityFactory for UserDataCapability<T>
where
    T: UserData + Clone + Send + Sync + 'static,
{
    fn create_handle(&self, lua: &Lua) -> mlua::Result<Value> {
        lua.create_userdata(self.inner.clone()).map(Value::UserData)
    }
}
