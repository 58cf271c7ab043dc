//! Creation of data objects by class name.

use std::collections::HashMap;
use std::sync::Arc;

use linkme::distributed_slice;
use parking_lot::RwLock;
use tracing::debug;

use super::scalar::{Boolean, Integer, Real, Text};
use super::ObjectPtr;
use crate::error::{DataError, DataResult};

/// Constructor of a default-valued data object.
pub type DataCtor = fn() -> ObjectPtr;

/// One statically registered data type.
pub struct DataEntry {
    /// Class name used in configuration files.
    pub classname: &'static str,
    /// Builds a default instance.
    pub create: DataCtor,
}

/// Registry of data types contributed by any linked crate.
///
/// Use [`register_data!`](crate::register_data) to add an entry.
#[distributed_slice]
pub static DATA_REGISTRY: [DataEntry];

#[distributed_slice(DATA_REGISTRY)]
static INTEGER: DataEntry = DataEntry {
    classname: "Integer",
    create: || Arc::new(Integer::default()),
};

#[distributed_slice(DATA_REGISTRY)]
static REAL: DataEntry = DataEntry {
    classname: "Real",
    create: || Arc::new(Real::default()),
};

#[distributed_slice(DATA_REGISTRY)]
static BOOLEAN: DataEntry = DataEntry {
    classname: "Boolean",
    create: || Arc::new(Boolean::default()),
};

#[distributed_slice(DATA_REGISTRY)]
static TEXT: DataEntry = DataEntry {
    classname: "String",
    create: || Arc::new(Text::default()),
};

/// Builds data objects by class name.
pub struct DataFactory {
    ctors: RwLock<HashMap<String, DataCtor>>,
}

impl Default for DataFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DataFactory {
    /// A factory holding every statically registered type.
    pub fn new() -> Self {
        let ctors = DATA_REGISTRY
            .iter()
            .map(|entry| (entry.classname.to_string(), entry.create))
            .collect::<HashMap<_, _>>();
        debug!(count = ctors.len(), "Data factory initialised");
        Self {
            ctors: RwLock::new(ctors),
        }
    }

    /// Adds or replaces a type at runtime.
    pub fn register(&self, classname: impl Into<String>, create: DataCtor) {
        self.ctors.write().insert(classname.into(), create);
    }

    pub fn contains(&self, classname: &str) -> bool {
        self.ctors.read().contains_key(classname)
    }

    /// Builds a default instance of `classname`.
    pub fn create(&self, classname: &str) -> DataResult<ObjectPtr> {
        let ctor = self
            .ctors
            .read()
            .get(classname)
            .copied()
            .ok_or_else(|| DataError::UnknownType(classname.to_string()))?;
        Ok(ctor())
    }

    /// Sorted class names.
    pub fn classnames(&self) -> Vec<String> {
        let mut names: Vec<_> = self.ctors.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for DataFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFactory")
            .field("classnames", &self.classnames())
            .finish()
    }
}

/// Registers a data type with [`DATA_REGISTRY`].
///
/// ```rust,ignore
/// register_data!(MATRIX, "Matrix", || std::sync::Arc::new(Matrix::default()));
/// ```
#[macro_export]
macro_rules! register_data {
    ($name:ident, $classname:expr, $ctor:expr $(,)?) => {
        #[$crate::linkme::distributed_slice($crate::data::DATA_REGISTRY)]
        #[linkme(crate = $crate::linkme)]
        static $name: $crate::data::DataEntry = $crate::data::DataEntry {
            classname: $classname,
            create: $ctor,
        };
    };
}
