// ABOUTME: Tree-walking reference evaluator for PyRaf programs

use crate::ast::{Expr, LogicalOp, Stmt};
use crate::builtins;
use crate::config::DEFAULT_RECURSION_LIMIT;
use crate::env::Environment;
use crate::error::{ErrorKind, Frame, LoadError, PyRafError};
use crate::module::{read_source, ModuleCache};
use crate::parser::parse;
use crate::token::Span;
use crate::value::{apply_binary, apply_unary, expect_number, FuncBody, FuncObject, Value};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// What a statement does to control flow: either falls through, or unwinds
/// to the nearest call boundary carrying a return value.
enum Flow {
    Next,
    Return(Value),
}

pub struct Evaluator {
    pub globals: Rc<Environment>,
    modules: ModuleCache,
    call_stack: Vec<Frame>,
    recursion_limit: usize,
    base_dir: PathBuf,
}

impl Evaluator {
    pub fn new(base_dir: PathBuf, recursion_limit: usize) -> Self {
        let globals = Environment::new();
        builtins::register(&globals);
        Evaluator {
            globals,
            modules: ModuleCache::new(),
            call_stack: Vec::new(),
            recursion_limit,
            base_dir,
        }
    }

    /// Runs a whole program's statements against the global environment.
    pub fn run(&mut self, program: &[Stmt]) -> Result<(), PyRafError> {
        let globals = self.globals.clone();
        self.exec_block(program, &globals)?;
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[Stmt], env: &Rc<Environment>) -> Result<Flow, PyRafError> {
        for stmt in stmts {
            match self.exec_stmt(stmt, env)? {
                Flow::Next => {}
                ret @ Flow::Return(_) => return Ok(ret),
            }
        }
        Ok(Flow::Next)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &Rc<Environment>) -> Result<Flow, PyRafError> {
        match stmt {
            Stmt::Expr(expr, _) => {
                self.eval_expr(expr, env)?;
                Ok(Flow::Next)
            }
            Stmt::Def {
                name,
                params,
                body,
                span,
            } => {
                let func = Value::Function(Rc::new(FuncObject {
                    name: name.clone(),
                    params: params.clone(),
                    body: FuncBody::Ast(Rc::new(body.clone())),
                    env: env.clone(),
                    span: *span,
                }));
                // Bound via the same scoping rule as assignment (no separate
                // "definition" binding mode), so defs and the VM's STORE
                // opcode stay observably equivalent.
                env.assign(name, func);
                Ok(Flow::Next)
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                if self.eval_expr(cond, env)?.is_truthy() {
                    self.exec_block(then_branch, env)
                } else if let Some(else_branch) = else_branch {
                    self.exec_block(else_branch, env)
                } else {
                    Ok(Flow::Next)
                }
            }
            Stmt::While { cond, body, .. } => {
                while self.eval_expr(cond, env)?.is_truthy() {
                    match self.exec_block(body, env)? {
                        Flow::Next => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Next)
            }
            Stmt::Return { value, .. } => {
                let v = match value {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(v))
            }
            Stmt::Import { path, span } => {
                self.exec_import(path, *span)?;
                Ok(Flow::Next)
            }
            Stmt::Block(stmts, _) => self.exec_block(stmts, env),
        }
    }

    fn exec_import(&mut self, path: &str, span: Span) -> Result<(), PyRafError> {
        let candidate = ModuleCache::resolve(&self.base_dir, path);
        let canonical = ModuleCache::canonicalize(&candidate).map_err(|e| import_error(e, span))?;

        if let Some(module_env) = self.modules.get(&canonical) {
            splice(&self.globals, &module_env);
            return Ok(());
        }

        self.modules.begin(&canonical, span)?;

        let previous_base_dir = self.base_dir.clone();
        self.base_dir = canonical
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| previous_base_dir.clone());

        let result = self.load_and_run_module(&canonical, span);
        self.base_dir = previous_base_dir;

        let module_env = result?;
        self.modules.finish(&canonical, module_env.clone());
        splice(&self.globals, &module_env);
        Ok(())
    }

    fn load_and_run_module(&mut self, canonical: &Path, span: Span) -> Result<Rc<Environment>, PyRafError> {
        let source = read_source(canonical).map_err(|e| import_error(e, span))?;
        let program = parse(&source).map_err(|e| {
            PyRafError::new(
                ErrorKind::ImportError {
                    message: format!("error parsing '{}': {}", canonical.display(), e),
                },
                span,
            )
        })?;

        let module_env = Environment::new();
        builtins::register(&module_env);

        let previous_globals = self.globals.clone();
        self.globals = module_env.clone();
        let run_result = self.exec_block(&program, &module_env);
        self.globals = previous_globals;

        run_result?;
        Ok(module_env)
    }

    /// Evaluates a single expression against the global scope, for REPL
    /// result echoing.
    pub fn eval_top_expr(&mut self, expr: &Expr) -> Result<Value, PyRafError> {
        let globals = self.globals.clone();
        self.eval_expr(expr, &globals)
    }

    fn eval_expr(&mut self, expr: &Expr, env: &Rc<Environment>) -> Result<Value, PyRafError> {
        match expr {
            Expr::Number(n, _) => Ok(Value::Number(*n)),
            Expr::Str(s, _) => Ok(Value::str(s.clone())),
            Expr::Bool(b, _) => Ok(Value::Bool(*b)),
            Expr::Nil(_) => Ok(Value::Nil),
            Expr::List(items, _) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, env)?);
                }
                Ok(Value::list(values))
            }
            Expr::Ident(name, span) => env
                .get(name)
                .ok_or_else(|| self.fail(ErrorKind::NameError(name.clone()), *span)),
            Expr::Unary { op, expr, span } => {
                let value = self.eval_expr(expr, env)?;
                apply_unary(*op, value, *span).map_err(|e| self.rethrow(e))
            }
            Expr::Binary { op, lhs, rhs, span } => {
                let lhs = self.eval_expr(lhs, env)?;
                let rhs = self.eval_expr(rhs, env)?;
                apply_binary(*op, lhs, rhs, *span).map_err(|e| self.rethrow(e))
            }
            Expr::Logical { op, lhs, rhs, .. } => {
                let lhs_val = self.eval_expr(lhs, env)?;
                match op {
                    LogicalOp::And => {
                        if !lhs_val.is_truthy() {
                            Ok(lhs_val)
                        } else {
                            self.eval_expr(rhs, env)
                        }
                    }
                    LogicalOp::Or => {
                        if lhs_val.is_truthy() {
                            Ok(lhs_val)
                        } else {
                            self.eval_expr(rhs, env)
                        }
                    }
                }
            }
            Expr::Assign { name, value, .. } => {
                let v = self.eval_expr(value, env)?;
                env.assign(name, v.clone());
                Ok(v)
            }
            Expr::Index { target, index, span } => {
                let target = self.eval_expr(target, env)?;
                let index = self.eval_expr(index, env)?;
                index_list(&target, &index, *span).map_err(|e| self.rethrow(e))
            }
            Expr::Call { callee, args, span } => self.eval_call(callee, args, env, *span),
        }
    }

    fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        env: &Rc<Environment>,
        span: Span,
    ) -> Result<Value, PyRafError> {
        let callee_val = self.eval_expr(callee, env)?;
        let mut arg_vals = Vec::with_capacity(args.len());
        for arg in args {
            arg_vals.push(self.eval_expr(arg, env)?);
        }

        match callee_val {
            Value::Builtin(_, f) => f(&arg_vals, span).map_err(|e| self.rethrow(e)),
            Value::Function(func) => self.call_function(&func, arg_vals, span),
            other => Err(self.fail(
                ErrorKind::type_mismatch("call", "function", other.type_name(), 0),
                span,
            )),
        }
    }

    fn call_function(&mut self, func: &Rc<FuncObject>, args: Vec<Value>, span: Span) -> Result<Value, PyRafError> {
        if args.len() != func.params.len() {
            return Err(self.fail(
                ErrorKind::arity(&func.name, func.params.len().to_string(), args.len()),
                span,
            ));
        }
        if self.call_stack.len() >= self.recursion_limit {
            return Err(self.fail(
                ErrorKind::StackOverflow {
                    limit: self.recursion_limit,
                },
                span,
            ));
        }

        let call_env = Environment::with_parent(func.env.clone());
        for (param, arg) in func.params.iter().zip(args) {
            call_env.define(param.clone(), arg);
        }
        let body = match &func.body {
            FuncBody::Ast(body) => body.clone(),
            FuncBody::Bytecode(_) => {
                unreachable!("the evaluator only ever constructs AST-bodied functions")
            }
        };

        self.call_stack.push(Frame {
            function: func.name.clone(),
            span,
        });
        let result = self.exec_block(&body, &call_env);
        self.call_stack.pop();

        match result? {
            Flow::Return(v) => Ok(v),
            Flow::Next => Ok(Value::Nil),
        }
    }

    fn fail(&self, kind: ErrorKind, span: Span) -> PyRafError {
        PyRafError::new(kind, span).with_trace(self.call_stack.iter().rev().cloned().collect())
    }

    /// Attaches the current call-stack trace to an error that doesn't carry
    /// one yet, without overwriting a trace captured deeper in the call chain.
    fn rethrow(&self, mut e: PyRafError) -> PyRafError {
        if e.trace.is_empty() {
            e.trace = self.call_stack.iter().rev().cloned().collect();
        }
        e
    }
}

fn index_list(target: &Value, index: &Value, span: Span) -> Result<Value, PyRafError> {
    let list = match target {
        Value::List(items) => items,
        other => {
            return Err(PyRafError::new(
                ErrorKind::type_mismatch("index", "list", other.type_name(), 0),
                span,
            ))
        }
    };
    let idx = expect_number(index, "index", 1, span)?;
    if idx.fract() != 0.0 || idx < 0.0 {
        return Err(PyRafError::new(
            ErrorKind::IndexError {
                index: index.to_string(),
                len: list.borrow().len(),
            },
            span,
        ));
    }
    let idx = idx as usize;
    let items = list.borrow();
    items.get(idx).cloned().ok_or_else(|| {
        PyRafError::new(
            ErrorKind::IndexError {
                index: idx.to_string(),
                len: items.len(),
            },
            span,
        )
    })
}

fn splice(target: &Rc<Environment>, module_env: &Rc<Environment>) {
    for (name, value) in module_env.entries() {
        target.define(name, value);
    }
}

fn import_error(e: LoadError, span: Span) -> PyRafError {
    PyRafError::new(
        ErrorKind::ImportError {
            message: e.to_string(),
        },
        span,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn run_source(src: &str) -> Result<Evaluator, PyRafError> {
        let program = parse(src).unwrap();
        let mut eval = Evaluator::new(PathBuf::from("."), DEFAULT_RECURSION_LIMIT);
        eval.run(&program)?;
        Ok(eval)
    }

    #[test]
    fn arithmetic_and_comparison() {
        let eval = run_source("x = 3; y = 4; z = x + y == 7;").unwrap();
        assert!(matches!(eval.globals.get("z"), Some(Value::Bool(true))));
    }

    #[test]
    fn while_loop_accumulates() {
        let eval = run_source("i = 0; s = 0; while (i < 3) { s = s + i; i = i + 1; }").unwrap();
        assert!(matches!(eval.globals.get("s"), Some(Value::Number(n)) if n == 3.0));
    }

    #[test]
    fn closures_capture_defining_scope() {
        let eval = run_source(
            "def mk(x){ def add(y){ return x + y; } return add; } a = mk(5); r1 = a(3); r2 = a(10);",
        )
        .unwrap();
        assert!(matches!(eval.globals.get("r1"), Some(Value::Number(n)) if n == 8.0));
        assert!(matches!(eval.globals.get("r2"), Some(Value::Number(n)) if n == 15.0));
    }

    #[test]
    fn short_circuit_returns_operand_not_bool() {
        let eval = run_source("a = 0 or \"x\"; b = 1 and \"y\"; c = false or nil;").unwrap();
        assert!(matches!(eval.globals.get("a"), Some(Value::Str(s)) if *s == "x"));
        assert!(matches!(eval.globals.get("b"), Some(Value::Str(s)) if *s == "y"));
        assert!(matches!(eval.globals.get("c"), Some(Value::Nil)));
    }

    #[test]
    fn list_index_and_len() {
        let eval = run_source("l = [10, 20, 30]; a = l[0] + l[2]; n = len(l);").unwrap();
        assert!(matches!(eval.globals.get("a"), Some(Value::Number(n)) if n == 40.0));
        assert!(matches!(eval.globals.get("n"), Some(Value::Number(n)) if n == 3.0));
    }

    #[test]
    fn divide_by_zero_carries_stack_trace() {
        let program = parse("def f(){ return g(); } def g(){ return 1/0; } f();").unwrap();
        let mut eval = Evaluator::new(PathBuf::from("."), DEFAULT_RECURSION_LIMIT);
        let err = eval.run(&program).unwrap_err();
        assert_eq!(err.kind.label(), "DivideByZero");
        let names: Vec<_> = err.trace.iter().map(|f| f.function.as_str()).collect();
        assert_eq!(names, vec!["g", "f"]);
    }

    #[test]
    fn assignment_to_outer_scope_does_not_shadow() {
        let eval = run_source("x = 1; def bump(){ x = x + 1; } bump(); bump();").unwrap();
        assert!(matches!(eval.globals.get("x"), Some(Value::Number(n)) if n == 3.0));
    }

    #[test]
    fn arity_mismatch_is_arity_error() {
        let program = parse("def f(a){ return a; } f(1, 2);").unwrap();
        let mut eval = Evaluator::new(PathBuf::from("."), DEFAULT_RECURSION_LIMIT);
        let err = eval.run(&program).unwrap_err();
        assert_eq!(err.kind.label(), "ArityError");
    }

    #[test]
    fn undefined_name_is_name_error() {
        let program = parse("print(nope);").unwrap();
        let mut eval = Evaluator::new(PathBuf::from("."), DEFAULT_RECURSION_LIMIT);
        let err = eval.run(&program).unwrap_err();
        assert_eq!(err.kind.label(), "NameError");
    }

    #[test]
    fn nested_block_shares_enclosing_scope() {
        let eval = run_source("x = 0; while (x < 1) { { x = 1; } } y = x;").unwrap();
        assert!(matches!(eval.globals.get("y"), Some(Value::Number(n)) if n == 1.0));
    }

    #[test]
    fn recursion_limit_triggers_stack_overflow() {
        let program = parse("def rec(){ return rec(); } rec();").unwrap();
        let mut eval = Evaluator::new(PathBuf::from("."), 50);
        let err = eval.run(&program).unwrap_err();
        assert_eq!(err.kind.label(), "StackOverflow");
    }
}
