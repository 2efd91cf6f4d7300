//! Named, typed setting bindings.
//!
//! A service keeps its configurable values as ordinary fields and registers a
//! [`Binding`] per field: a pair of type-erased accessors that read the field
//! into a JSON value and write a JSON value back into it. The binding never
//! owns the value; it is handed the owning service each time it is used.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

type SaveFn = dyn Fn(&dyn Any) -> Result<Value> + Send + Sync;
type LoadFn = dyn Fn(&mut dyn Any, Value) -> Result<()> + Send + Sync;

/// Serialize/deserialize accessors for one named field.
#[derive(Clone)]
pub struct Binding {
    name: String,
    save: Arc<SaveFn>,
    load: Arc<LoadFn>,
}

impl Binding {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding").field("name", &self.name).finish()
    }
}

/// The ordered set of bindings exposed by one service or application.
///
/// Cloning is cheap: the accessors are shared.
#[derive(Clone, Debug, Default)]
pub struct Settings {
    bindings: Vec<Binding>,
}

impl Settings {
    pub const fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Bind `name` to the field of `S` reached by `get` / `get_mut`.
    ///
    /// Returns `false` (and logs a warning) if `name` is already bound.
    pub fn register<S, T, G, M>(&mut self, name: impl Into<String>, get: G, get_mut: M) -> bool
    where
        S: 'static,
        T: Serialize + DeserializeOwned + 'static,
        G: Fn(&S) -> &T + Send + Sync + 'static,
        M: Fn(&mut S) -> &mut T + Send + Sync + 'static,
    {
        let name = name.into();
        if self.contains(&name) {
            crate::log_warning!("setting {name:?} is already registered; ignoring");
            return false;
        }

        let save_name = name.clone();
        let save = move |target: &dyn Any| -> Result<Value> {
            let owner = target
                .downcast_ref::<S>()
                .ok_or_else(|| mismatch::<S>(&save_name))?;
            serde_json::to_value(get(owner))
                .with_context(|| format!("failed to serialize setting {save_name:?}"))
        };

        let load_name = name.clone();
        let load = move |target: &mut dyn Any, value: Value| -> Result<()> {
            let owner = target
                .downcast_mut::<S>()
                .ok_or_else(|| mismatch::<S>(&load_name))?;
            let parsed: T = serde_json::from_value(value).with_context(|| {
                format!(
                    "setting {load_name:?} expects a value of type {}",
                    type_name::<T>()
                )
            })?;
            *get_mut(owner) = parsed;
            Ok(())
        };

        self.bindings.push(Binding {
            name,
            save: Arc::new(save),
            load: Arc::new(load),
        });
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.iter().any(|b| b.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|b| b.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Read every bound field of `owner` into a JSON object.
    pub fn save(&self, owner: &dyn Any) -> Result<Value> {
        let mut object = Map::with_capacity(self.bindings.len());
        for binding in &self.bindings {
            object.insert(binding.name.clone(), (binding.save)(owner)?);
        }
        Ok(Value::Object(object))
    }

    /// Write the values in `blob` into the bound fields of `owner`.
    ///
    /// Keys missing from `blob` leave their field untouched, as do values
    /// that fail to deserialize. Every problem is returned so the caller can
    /// report it; the remaining bindings are still applied.
    pub fn load(&self, owner: &mut dyn Any, blob: &Value) -> Vec<anyhow::Error> {
        let Value::Object(object) = blob else {
            return vec![anyhow!("settings blob must be a JSON object")];
        };

        let mut errors = Vec::new();
        for binding in &self.bindings {
            if let Some(value) = object.get(&binding.name) {
                if let Err(err) = (binding.load)(owner, value.clone()) {
                    errors.push(err);
                }
            }
        }
        for key in object.keys() {
            if !self.contains(key) {
                errors.push(anyhow!("unknown setting {key:?} ignored"));
            }
        }
        errors
    }

    /// Like [`load`](Self::load) but fails on the first problem.
    pub fn load_strict(&self, owner: &mut dyn Any, blob: &Value) -> Result<()> {
        match self.load(owner, blob).into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn mismatch<S>(name: &str) -> anyhow::Error {
    anyhow!(
        "setting {name:?} is bound to {} but was applied to another type",
        type_name::<S>()
    )
}
