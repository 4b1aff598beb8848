//! Method dispatch table.
//!
//! Mirrors the registration surface an engine exposes to the daemon: each
//! wire-visible operation registers a handler under its method name, with
//! an optional usage string so a connected client can ask what operations
//! exist.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::error::MethodError;
use crate::rpc::message::Params;
use crate::task::Task;

/// What a method produces on success.
pub enum Outcome {
    /// An immediate result, sent back right away.
    Value(Value),
    /// A long-running operation. The engine starts the task and sends the
    /// response when it stops: result on ENDED, a task-failed error on
    /// FAILED, a task-canceled error on CANCELED.
    Task(Task),
}

impl From<Value> for Outcome {
    fn from(value: Value) -> Self {
        Outcome::Value(value)
    }
}

impl From<Task> for Outcome {
    fn from(task: Task) -> Self {
        Outcome::Task(task)
    }
}

pub type Handler = Arc<dyn Fn(Params) -> Result<Outcome, MethodError> + Send + Sync>;

struct Entry {
    usage: Option<String>,
    handler: Handler,
}

/// Name-to-handler table shared by the serving side of an engine.
#[derive(Default)]
pub struct MethodRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous handler.
    pub fn register<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Params) -> Result<Outcome, MethodError> + Send + Sync + 'static,
    {
        self.insert(name.into(), None, Arc::new(handler));
    }

    /// Register with a usage string reported by [`methods`](Self::methods).
    pub fn register_with_usage<F>(
        &self,
        name: impl Into<String>,
        usage: impl Into<String>,
        handler: F,
    ) where
        F: Fn(Params) -> Result<Outcome, MethodError> + Send + Sync + 'static,
    {
        self.insert(name.into(), Some(usage.into()), Arc::new(handler));
    }

    fn insert(&self, name: String, usage: Option<String>, handler: Handler) {
        tracing::debug!(method = %name, "registering method");
        let mut entries = self.lock();
        entries.insert(name, Entry { usage, handler });
    }

    /// Look up a handler by method name.
    pub fn lookup(&self, name: &str) -> Option<Handler> {
        self.lock().get(name).map(|entry| Arc::clone(&entry.handler))
    }

    /// Every registered method with its usage string, sorted by name.
    /// Backs a self-describing "list operations" method.
    pub fn methods(&self) -> Vec<(String, Option<String>)> {
        let entries = self.lock();
        let mut list: Vec<_> = entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.usage.clone()))
            .collect();
        list.sort();
        list
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_lookup() {
        let registry = MethodRegistry::new();
        registry.register("echo", |params: Params| {
            Ok(Outcome::Value(
                params.into_value().unwrap_or(Value::Null),
            ))
        });

        let handler = registry.lookup("echo").unwrap();
        match handler(Params::Positional(vec![json!(1)])).unwrap() {
            Outcome::Value(value) => assert_eq!(value, json!([1])),
            Outcome::Task(_) => panic!("expected immediate value"),
        }
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn test_replacing_a_handler() {
        let registry = MethodRegistry::new();
        registry.register("m", |_| Ok(Outcome::Value(json!(1))));
        registry.register("m", |_| Ok(Outcome::Value(json!(2))));
        let handler = registry.lookup("m").unwrap();
        match handler(Params::None).unwrap() {
            Outcome::Value(value) => assert_eq!(value, json!(2)),
            Outcome::Task(_) => panic!("expected immediate value"),
        }
    }

    #[test]
    fn test_methods_listing() {
        let registry = MethodRegistry::new();
        registry.register_with_usage("print", "print <file>", |_| {
            Ok(Outcome::Value(Value::Null))
        });
        registry.register("hello", |_| Ok(Outcome::Value(Value::Null)));
        assert_eq!(
            registry.methods(),
            vec![
                ("hello".to_string(), None),
                ("print".to_string(), Some("print <file>".to_string())),
            ]
        );
    }
}
