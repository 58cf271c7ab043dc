//! The [`Service`] trait implemented by application logic.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use trellis_core::{ConfigTree, KeyConnections, Signal};

use super::base::Base;
use super::status::{Access, NotificationType};
use crate::data::{Object, ObjectPtr, downcast};
use crate::error::{DataError, ServiceError, ServiceResult};

/// Static auto-connections of a service, by binding key.
pub type KeyConnectionsMap = HashMap<String, KeyConnections>;

/// Builds the default object of a property key.
pub type PropertyDefault = Arc<dyn Fn() -> ObjectPtr + Send + Sync>;

// ─── Service ────────────────────────────────────────────────────────────────

/// Application logic driven by a [`Base`].
///
/// Every hook runs with exclusive access to the implementation. A slot of
/// the service run from one of its hooks on the same thread, such as the
/// slot of a property the hook modifies, runs once the hook returns; a
/// custom slot reports [`ServiceError::Deferred`] to that caller.
///
/// # Example
///
/// ```rust,ignore
/// struct Threshold { level: i64 }
///
/// impl Service for Threshold {
///     fn declare(&self, decls: &mut Declarations) {
///         decls.input("image", true, false);
///         decls.property("level", || Arc::new(Integer::new(3)));
///     }
///
///     fn updating(&mut self, ctx: &ServiceContext<'_>) -> ServiceResult<()> {
///         self.level = ctx.require::<Integer>("level")?.value();
///         Ok(())
///     }
/// }
/// ```
pub trait Service: Any + Send {
    /// Declares the data keys this service uses.
    fn declare(&self, _decls: &mut Declarations) {}

    /// Registers custom signals and slots, once, right after creation.
    fn init_com(&self, _base: &Base) {}

    fn configuring(&mut self, _ctx: &ServiceContext<'_>) -> ServiceResult<()> {
        Ok(())
    }

    /// Reads the service configuration tree.
    fn configuring_with(
        &mut self,
        _ctx: &ServiceContext<'_>,
        _config: &ConfigTree,
    ) -> ServiceResult<()> {
        Ok(())
    }

    fn starting(&mut self, ctx: &ServiceContext<'_>) -> ServiceResult<()>;

    fn stopping(&mut self, ctx: &ServiceContext<'_>) -> ServiceResult<()>;

    fn updating(&mut self, ctx: &ServiceContext<'_>) -> ServiceResult<()>;

    /// Reacts to the object at `key` being replaced while started.
    ///
    /// The default restarts the service in place.
    fn swapping(&mut self, ctx: &ServiceContext<'_>, _key: &str) -> ServiceResult<()> {
        self.stopping(ctx)?;
        self.starting(ctx)
    }

    /// Called when the property at `key` reports a modification.
    fn on_property_set(&mut self, _ctx: &ServiceContext<'_>, _key: &str) -> ServiceResult<()> {
        Ok(())
    }

    /// Signal/slot pairs connected for each auto-connected key.
    ///
    /// A group name applies to every member of the group.
    fn auto_connections(&self) -> KeyConnectionsMap {
        KeyConnectionsMap::new()
    }
}

// ─── Declarations ───────────────────────────────────────────────────────────

/// One declared data key.
#[derive(Clone)]
pub struct KeyDecl {
    pub key: String,
    pub access: Access,
    pub auto_connect: bool,
    pub optional: bool,
    /// Whether the key names a group of objects.
    pub group: bool,
    pub(crate) default: Option<PropertyDefault>,
}

impl KeyDecl {
    /// Whether the key holds a property with a default value.
    pub fn is_property(&self) -> bool {
        self.default.is_some()
    }
}

impl fmt::Debug for KeyDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDecl")
            .field("key", &self.key)
            .field("access", &self.access)
            .field("auto_connect", &self.auto_connect)
            .field("optional", &self.optional)
            .field("group", &self.group)
            .field("property", &self.is_property())
            .finish()
    }
}

/// The data keys a service declares.
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    keys: Vec<KeyDecl>,
}

impl Declarations {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, decl: KeyDecl) -> &mut Self {
        match self.keys.iter_mut().find(|k| k.key == decl.key) {
            Some(existing) => *existing = decl,
            None => self.keys.push(decl),
        }
        self
    }

    fn key(
        &mut self,
        key: &str,
        access: Access,
        auto_connect: bool,
        optional: bool,
        group: bool,
    ) -> &mut Self {
        self.push(KeyDecl {
            key: key.to_string(),
            access,
            auto_connect,
            optional,
            group,
            default: None,
        })
    }

    pub fn input(&mut self, key: &str, auto_connect: bool, optional: bool) -> &mut Self {
        self.key(key, Access::In, auto_connect, optional, false)
    }

    pub fn inout(&mut self, key: &str, auto_connect: bool, optional: bool) -> &mut Self {
        self.key(key, Access::InOut, auto_connect, optional, false)
    }

    /// Outputs are always optional.
    pub fn output(&mut self, key: &str) -> &mut Self {
        self.key(key, Access::Out, false, true, false)
    }

    /// Declares a group of keys named `key[0]`, `key[1]`, ...
    pub fn group(
        &mut self,
        key: &str,
        access: Access,
        auto_connect: bool,
        optional: bool,
    ) -> &mut Self {
        let optional = optional || access == Access::Out;
        self.key(key, access, auto_connect, optional, true)
    }

    /// Declares a property: an input auto-created from `default` when
    /// nothing is bound, and auto-connected to its own slot.
    pub fn property(
        &mut self,
        key: &str,
        default: impl Fn() -> ObjectPtr + Send + Sync + 'static,
    ) -> &mut Self {
        self.push(KeyDecl {
            key: key.to_string(),
            access: Access::In,
            auto_connect: true,
            optional: false,
            group: false,
            default: Some(Arc::new(default)),
        })
    }

    /// The declaration of `key`, falling back to its group for `group[index]`.
    pub fn get(&self, key: &str) -> Option<&KeyDecl> {
        self.keys
            .iter()
            .find(|k| k.key == key)
            .or_else(|| group_of(key).and_then(|g| self.keys.iter().find(|k| k.key == g)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyDecl> {
        self.keys.iter()
    }

    pub fn properties(&self) -> impl Iterator<Item = &KeyDecl> {
        self.keys.iter().filter(|k| k.is_property())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Key of member `index` of `group`.
pub fn group_key(group: &str, index: usize) -> String {
    format!("{group}[{index}]")
}

/// The group name of a `group[index]` key.
pub fn group_of(key: &str) -> Option<&str> {
    let open = key.rfind('[')?;
    let index = key[open + 1..].strip_suffix(']')?;
    (!index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())).then(|| &key[..open])
}

// ─── ServiceContext ─────────────────────────────────────────────────────────

/// What a hook can see of its own service.
pub struct ServiceContext<'a> {
    base: &'a Base,
}

impl<'a> ServiceContext<'a> {
    pub(crate) fn new(base: &'a Base) -> Self {
        Self { base }
    }

    pub fn id(&self) -> &str {
        self.base.id()
    }

    pub fn base(&self) -> &Base {
        self.base
    }

    /// The object bound at `key`.
    pub fn object(&self, key: &str) -> Option<ObjectPtr> {
        self.base.object(key)
    }

    /// The object bound at `key`, if it has type `T`.
    pub fn get<T: Object>(&self, key: &str) -> Option<Arc<T>> {
        self.object(key).and_then(|o| downcast::<T>(&o))
    }

    /// The object bound at `key`, which must exist and have type `T`.
    pub fn require<T: Object>(&self, key: &str) -> ServiceResult<Arc<T>> {
        let object = self.object(key).ok_or_else(|| ServiceError::UnknownKey {
            service: self.id().to_string(),
            key: key.to_string(),
        })?;
        let got = object.classname();
        downcast::<T>(&object).ok_or_else(|| {
            DataError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                got,
            }
            .into()
        })
    }

    /// Publishes (or clears) the output at `key`.
    pub fn set_output(&self, key: &str, object: Option<ObjectPtr>) {
        self.base.set_output(key, object);
    }

    /// A signal of this service.
    pub fn signal<A>(&self, key: &str) -> Option<Signal<A>>
    where
        A: Clone + Send + 'static,
    {
        self.base.typed_signal(key)
    }

    pub fn notify(&self, kind: NotificationType, message: impl Into<String>) {
        self.base.notify(kind, message);
    }
}

impl fmt::Debug for ServiceContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("service", &self.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Integer;

    #[test]
    fn test_group_of() {
        assert_eq!(group_of("g[0]"), Some("g"));
        assert_eq!(group_of("images[12]"), Some("images"));
        assert_eq!(group_of("g"), None);
        assert_eq!(group_of("g[]"), None);
        assert_eq!(group_of("g[x]"), None);
        assert_eq!(group_key("g", 3), "g[3]");
    }

    #[test]
    fn test_declarations_lookup() {
        let mut decls = Declarations::new();
        decls
            .input("image", true, false)
            .output("mesh")
            .group("views", Access::In, false, true)
            .property("level", || Arc::new(Integer::new(3)));

        assert_eq!(decls.len(), 4);
        assert!(decls.get("mesh").unwrap().optional);
        assert_eq!(decls.get("views[2]").unwrap().key, "views");
        assert!(decls.get("level").unwrap().is_property());
        assert!(decls.get("level").unwrap().auto_connect);
        assert_eq!(decls.properties().count(), 1);
        assert!(decls.get("missing").is_none());
    }

    #[test]
    fn test_redeclaring_replaces() {
        let mut decls = Declarations::new();
        decls.input("a", false, false).inout("a", true, true);
        assert_eq!(decls.len(), 1);
        assert_eq!(decls.get("a").unwrap().access, Access::InOut);
    }
}
