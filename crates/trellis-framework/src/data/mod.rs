//! Data objects shared between services.
//!
//! Every object exposes its signals; the generic [`MODIFIED_SIG`] signal is
//! what auto-connections listen to. Objects that can be built from a string
//! also implement [`Property`], which lets a service instantiate and
//! initialise them from its configuration.

mod factory;
mod scalar;

use std::any::Any;
use std::sync::Arc;

use trellis_core::HasSignals;

use crate::error::DataResult;

pub use factory::{DATA_REGISTRY, DataCtor, DataEntry, DataFactory};
pub use scalar::{Boolean, Integer, Real, Scalar, ScalarValue, Text};

/// Key of the zero-argument signal emitted when an object changes.
pub const MODIFIED_SIG: &str = "modified";

/// A shared data object.
pub trait Object: HasSignals + Any + Send + Sync {
    /// Registered class name, as used in configuration files.
    fn classname(&self) -> &'static str;

    /// The string-convertible view of this object, if it is a property.
    fn as_property(&self) -> Option<&dyn Property> {
        None
    }
}

/// An object whose value can be read from and written as a string.
pub trait Property: Object {
    /// Replaces the value with the parsed form of `value`.
    fn set_from_str(&self, value: &str) -> DataResult<()>;

    /// Current value in string form.
    fn value_string(&self) -> String;
}

/// Shared handle to any data object.
pub type ObjectPtr = Arc<dyn Object>;

/// Recovers the concrete type of a shared object.
pub fn downcast<T: Object>(object: &ObjectPtr) -> Option<Arc<T>> {
    let any: Arc<dyn Any + Send + Sync> = object.clone();
    any.downcast::<T>().ok()
}

/// Borrowing counterpart of [`downcast`].
pub fn downcast_ref<T: Object>(object: &dyn Object) -> Option<&T> {
    let any: &dyn Any = object;
    any.downcast_ref::<T>()
}
