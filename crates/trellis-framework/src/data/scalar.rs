//! Single-value properties.

use std::fmt::{self, Display};
use std::str::FromStr;

use parking_lot::RwLock;
use trellis_core::{HasSignals, Signal, Signals, parse_bool};

use super::{MODIFIED_SIG, Object, Property};
use crate::error::{DataError, DataResult};

/// A value type that can live in a [`Scalar`].
pub trait ScalarValue: Clone + Default + Display + Send + Sync + 'static {
    /// Class name of `Scalar<Self>`.
    const CLASSNAME: &'static str;

    fn parse(value: &str) -> Option<Self>;
}

impl ScalarValue for i64 {
    const CLASSNAME: &'static str = "Integer";

    fn parse(value: &str) -> Option<Self> {
        i64::from_str(value.trim()).ok()
    }
}

impl ScalarValue for f64 {
    const CLASSNAME: &'static str = "Real";

    fn parse(value: &str) -> Option<Self> {
        f64::from_str(value.trim()).ok()
    }
}

impl ScalarValue for bool {
    const CLASSNAME: &'static str = "Boolean";

    fn parse(value: &str) -> Option<Self> {
        parse_bool(value)
    }
}

impl ScalarValue for String {
    const CLASSNAME: &'static str = "String";

    fn parse(value: &str) -> Option<Self> {
        Some(value.to_string())
    }
}

/// A property holding one value of type `T`.
///
/// Setting the value does not notify anyone; emit the
/// [`modified`](Self::modified_signal) signal once changes are complete.
pub struct Scalar<T: ScalarValue> {
    value: RwLock<T>,
    signals: Signals,
    modified: Signal<()>,
}

pub type Integer = Scalar<i64>;
pub type Real = Scalar<f64>;
pub type Boolean = Scalar<bool>;
pub type Text = Scalar<String>;

impl<T: ScalarValue> Scalar<T> {
    pub fn new(value: T) -> Self {
        let signals = Signals::new();
        let modified = signals.new_signal::<()>(MODIFIED_SIG);
        Self {
            value: RwLock::new(value),
            signals,
            modified,
        }
    }

    pub fn value(&self) -> T {
        self.value.read().clone()
    }

    pub fn set_value(&self, value: T) {
        *self.value.write() = value;
    }

    /// The object's `modified` signal.
    pub fn modified_signal(&self) -> Signal<()> {
        self.modified.clone()
    }
}

impl<T: ScalarValue> Default for Scalar<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ScalarValue> HasSignals for Scalar<T> {
    fn signals(&self) -> &Signals {
        &self.signals
    }
}

impl<T: ScalarValue> Object for Scalar<T> {
    fn classname(&self) -> &'static str {
        T::CLASSNAME
    }

    fn as_property(&self) -> Option<&dyn Property> {
        Some(self)
    }
}

impl<T: ScalarValue> Property for Scalar<T> {
    fn set_from_str(&self, value: &str) -> DataResult<()> {
        let parsed = T::parse(value).ok_or_else(|| DataError::Parse {
            classname: T::CLASSNAME,
            value: value.to_string(),
        })?;
        self.set_value(parsed);
        Ok(())
    }

    fn value_string(&self) -> String {
        self.value.read().to_string()
    }
}

impl<T: ScalarValue> fmt::Debug for Scalar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(T::CLASSNAME)
            .field("value", &self.value_string())
            .finish()
    }
}
