//! Method-name to handler mapping for inbound JSON-RPC requests.

use crate::error::{IceError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Handler for one method. Receives the positional params.
pub type MethodHandler = Box<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Result of looking up and running a handler.
#[derive(Debug)]
pub enum DispatchOutcome {
    Handled(Value),
    Failed(IceError),
    NotFound,
}

/// Registered inbound methods.
#[derive(Default)]
pub struct MethodRegistry {
    handlers: HashMap<String, MethodHandler>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same name.
    pub fn register<F>(&mut self, method: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.handlers.insert(method.into(), Box::new(handler));
        self
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Run the handler for `method`.
    ///
    /// `params` may be an array (positional), `null` (no params) or any other
    /// value, which is passed as a single positional argument.
    pub fn dispatch(&self, method: &str, params: &Value) -> DispatchOutcome {
        let Some(handler) = self.handlers.get(method) else {
            return DispatchOutcome::NotFound;
        };

        let result = match params {
            Value::Array(args) => handler(args),
            Value::Null => handler(&[]),
            other => handler(std::slice::from_ref(other)),
        };

        match result {
            Ok(value) => DispatchOutcome::Handled(value),
            Err(e) => DispatchOutcome::Failed(e),
        }
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.handlers.keys().collect();
        methods.sort();
        f.debug_struct("MethodRegistry")
            .field("methods", &methods)
            .finish()
    }
}

/// Positional string argument.
pub fn arg_str<'a>(args: &'a [Value], index: usize, method: &str) -> Result<&'a str> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_arg(method, index, "string"))
}

/// Positional unsigned integer argument. Numeric strings are accepted.
pub fn arg_u32(args: &[Value], index: usize, method: &str) -> Result<u32> {
    let value = args.get(index);
    value
        .and_then(Value::as_u64)
        .or_else(|| value.and_then(Value::as_str).and_then(|s| s.parse().ok()))
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| invalid_arg(method, index, "unsigned integer"))
}

/// Positional boolean argument.
pub fn arg_bool(args: &[Value], index: usize, method: &str) -> Result<bool> {
    args.get(index)
        .and_then(Value::as_bool)
        .ok_or_else(|| invalid_arg(method, index, "boolean"))
}

fn invalid_arg(method: &str, index: usize, expected: &str) -> IceError {
    IceError::Json {
        message: format!("{}: argument {} must be a {}", method, index, expected),
        source: None,
    }
}
