//! Method registry and registry loaders.
//!
//! A [`MethodRegistry`] maps method names to callables. Callables cannot be
//! moved across the worker boundary, so every worker builds its own registry
//! by calling a [`RegistryLoader`]: a plain function pointer that can be
//! copied to any thread. Loaders are looked up by name with [`resolve`].

mod builtin;

use crate::error::{Result, RpcError};
use crate::protocol::ErrorObject;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Result of a single method invocation.
pub type MethodResult = std::result::Result<Value, MethodError>;

/// A registered callable.
pub type Method = Box<dyn Fn(Value) -> MethodResult + Send + Sync + 'static>;

/// Reference to a registry, resolved into callables on the calling thread.
pub type RegistryLoader = fn() -> Result<MethodRegistry>;

/// Failure reported by a method. Becomes the `error` object of a Failure frame.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct MethodError {
    pub message: String,
    pub code: Option<i64>,
    pub data: Option<Value>,
}

impl MethodError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            data: None,
        }
    }

    /// Error for params the method cannot interpret (JSON-RPC -32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(-32602),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<MethodError> for ErrorObject {
    fn from(err: MethodError) -> Self {
        ErrorObject {
            message: err.message,
            code: err.code,
            data: err.data,
        }
    }
}

/// Name to callable mapping. Built once, read-only afterwards.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Method>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with_method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Value) -> MethodResult + Send + Sync + 'static,
    {
        self.register(name, method);
        self
    }

    /// Register a method, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, method: F)
    where
        F: Fn(Value) -> MethodResult + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Box::new(method));
    }

    /// Look up a method by name.
    pub fn lookup(&self, name: &str) -> Result<&Method> {
        self.methods.get(name).ok_or_else(|| RpcError::MethodNotFound {
            method: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.names())
            .finish()
    }
}

/// Names accepted by [`resolve`].
pub const AVAILABLE_REGISTRIES: &[&str] = &["builtin"];

/// Resolve a registry reference by name.
pub fn resolve(name: &str) -> Result<RegistryLoader> {
    match name {
        "builtin" => Ok(builtin::load),
        _ => Err(RpcError::Registry {
            message: format!(
                "unknown registry '{}', expected one of: {}",
                name,
                AVAILABLE_REGISTRIES.join(", ")
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doubling_registry() -> Result<MethodRegistry> {
        Ok(MethodRegistry::new().with_method("double", |params| {
            params
                .as_i64()
                .map(|n| json!(n * 2))
                .ok_or_else(|| MethodError::invalid_params("expected an integer"))
        }))
    }

    #[test]
    fn test_lookup_and_call() {
        let registry = doubling_registry().unwrap();
        let method = registry.lookup("double").unwrap();
        assert_eq!(method(json!(21)).unwrap(), json!(42));
        assert_eq!(method(json!("x")).unwrap_err().code, Some(-32602));
    }

    #[test]
    fn test_lookup_unknown_method() {
        let registry = doubling_registry().unwrap();
        let err = registry.lookup("triple").err().unwrap();
        assert!(matches!(err, RpcError::MethodNotFound { ref method } if method == "triple"));
    }

    #[test]
    fn test_loader_is_a_copyable_reference() {
        let loader: RegistryLoader = doubling_registry;
        let handle = std::thread::spawn(move || loader().unwrap().names().len());
        assert_eq!(handle.join().unwrap(), 1);
    }

    #[test]
    fn test_resolve() {
        let loader = resolve("builtin").unwrap();
        let registry = loader().unwrap();
        assert_eq!(registry.names(), vec!["echo", "helloworld", "sum"]);

        let err = resolve("nope").err().unwrap();
        assert!(err.to_string().contains("builtin"));
    }
}
