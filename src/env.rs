// ABOUTME: Scope-chain environment used by both the evaluator and the VM

use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug)]
pub struct Environment {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Environment>>,
}

impl Environment {
    /// Creates a new global environment with no parent.
    pub fn new() -> Rc<Self> {
        Rc::new(Environment {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    /// Creates a new child environment with a parent.
    pub fn with_parent(parent: Rc<Environment>) -> Rc<Self> {
        Rc::new(Environment {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent),
        })
    }

    /// Defines a binding in THIS scope (doesn't walk parent chain). Used for
    /// function parameters and fresh `def`s.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Looks up a name in this scope, then parent scopes recursively.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.bindings.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.get(name))
    }

    /// PyRaf's assignment rule: `x = value` mutates `x` in the nearest scope
    /// (innermost to outermost) that already defines it. If no scope defines
    /// it, a fresh binding is created in the CURRENT scope — unlike a
    /// Scheme-style `set!`, this is never an error.
    pub fn assign(self: &Rc<Self>, name: &str, value: Value) {
        if self.assign_existing(name, value.clone()) {
            return;
        }
        self.define(name, value);
    }

    fn assign_existing(&self, name: &str, value: Value) -> bool {
        if self.bindings.borrow().contains_key(name) {
            self.bindings.borrow_mut().insert(name.to_string(), value);
            return true;
        }
        match &self.parent {
            Some(parent) => parent.assign_existing(name, value),
            None => false,
        }
    }

    /// Bindings defined directly in this scope, not the parent chain. Used to
    /// splice a module's exports into an importing environment.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.bindings
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_and_get() {
        let env = Environment::new();
        env.define("x", Value::Number(42.0));
        assert!(matches!(env.get("x"), Some(Value::Number(n)) if n == 42.0));
    }

    #[test]
    fn undefined_name_is_none() {
        let env = Environment::new();
        assert!(env.get("undefined").is_none());
    }

    #[test]
    fn child_shadows_parent() {
        let parent = Environment::new();
        parent.define("x", Value::Number(1.0));
        let child = Environment::with_parent(parent);
        child.define("x", Value::Number(2.0));
        assert!(matches!(child.get("x"), Some(Value::Number(n)) if n == 2.0));
    }

    #[test]
    fn child_sees_parent_bindings() {
        let parent = Environment::new();
        parent.define("x", Value::Number(1.0));
        let child = Environment::with_parent(parent);
        assert!(matches!(child.get("x"), Some(Value::Number(n)) if n == 1.0));
    }

    #[test]
    fn assign_mutates_outer_scope_in_place() {
        let parent = Environment::new();
        parent.define("x", Value::Number(1.0));
        let child = Environment::with_parent(parent.clone());
        child.assign("x", Value::Number(2.0));
        assert!(matches!(parent.get("x"), Some(Value::Number(n)) if n == 2.0));
        // the child scope itself did not get its own copy
        assert!(child.bindings.borrow().get("x").is_none());
    }

    #[test]
    fn assign_creates_in_current_scope_when_absent_anywhere() {
        let env = Environment::new();
        env.assign("y", Value::Number(3.0));
        assert!(matches!(env.get("y"), Some(Value::Number(n)) if n == 3.0));
    }
}
