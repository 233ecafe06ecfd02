// ABOUTME: Stack machine that executes compiled chunks

use crate::bytecode::{Chunk, Constant, Instr};
use crate::builtins;
use crate::compiler::compile_program;
use crate::config::DEFAULT_RECURSION_LIMIT;
use crate::env::Environment;
use crate::error::{ErrorKind, Frame, LoadError, PyRafError};
use crate::module::{read_source, ModuleCache};
use crate::parser::parse;
use crate::token::Span;
use crate::value::{apply_binary, apply_unary, expect_number, FuncBody, FuncObject, Value};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::ast::{BinaryOp, UnaryOp};

struct ExecFrame {
    chunk: Rc<Chunk>,
    ip: usize,
    env: Rc<Environment>,
}

pub struct Vm {
    pub globals: Rc<Environment>,
    stack: Vec<Value>,
    frames: Vec<ExecFrame>,
    call_stack: Vec<Frame>,
    modules: ModuleCache,
    recursion_limit: usize,
    base_dir: PathBuf,
}

impl Vm {
    pub fn new(base_dir: PathBuf, recursion_limit: usize) -> Self {
        let globals = Environment::new();
        builtins::register(&globals);
        Vm {
            globals,
            stack: Vec::new(),
            frames: Vec::new(),
            call_stack: Vec::new(),
            modules: ModuleCache::new(),
            recursion_limit,
            base_dir,
        }
    }

    pub fn run(&mut self, chunk: Rc<Chunk>) -> Result<(), PyRafError> {
        let globals = self.globals.clone();
        self.frames.push(ExecFrame {
            chunk,
            ip: 0,
            env: globals,
        });
        self.execute().map(|_| ())
    }

    /// Runs a chunk that ends in an explicit `RETURN` (as produced by
    /// `compiler::compile_standalone_expr`) and yields the returned value,
    /// for REPL result echoing.
    pub fn run_for_value(&mut self, chunk: Rc<Chunk>) -> Result<Value, PyRafError> {
        let globals = self.globals.clone();
        self.frames.push(ExecFrame {
            chunk,
            ip: 0,
            env: globals,
        });
        Ok(self.execute()?.unwrap_or(Value::Nil))
    }

    fn current_constant(&self, k: u16) -> Constant {
        self.frames.last().unwrap().chunk.constants[k as usize].clone()
    }

    fn current_name(&self, n: u16) -> String {
        self.frames.last().unwrap().chunk.names[n as usize].clone()
    }

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("VM operand stack underflow")
    }

    fn fail(&self, kind: ErrorKind, span: Span) -> PyRafError {
        PyRafError::new(kind, span).with_trace(self.call_stack.iter().rev().cloned().collect())
    }

    /// Runs until the frame stack empties. Returns the value of a `RETURN`
    /// that emptied the frame stack directly (the outermost chunk returned),
    /// or `None` if it emptied by falling off the end of the code instead.
    fn execute(&mut self) -> Result<Option<Value>, PyRafError> {
        loop {
            if self.frames.is_empty() {
                return Ok(None);
            }
            let depth = self.frames.len() - 1;
            let ip = self.frames[depth].ip;
            if ip >= self.frames[depth].chunk.code.len() {
                // Top-level script fallthrough with no explicit RETURN.
                self.frames.pop();
                continue;
            }
            let chunk = self.frames[depth].chunk.clone();
            let instr = chunk.code[ip];
            let span = chunk.spans[ip];
            self.frames[depth].ip += 1;

            match self.step(instr, span)? {
                StepResult::Continue => {}
                StepResult::Returned(value) => {
                    self.frames.pop();
                    self.call_stack.pop();
                    if self.frames.is_empty() {
                        return Ok(Some(value));
                    }
                    self.push(value);
                }
            }
        }
    }

    fn step(&mut self, instr: Instr, span: Span) -> Result<StepResult, PyRafError> {
        match instr {
            Instr::Const(k) => {
                let value = match self.current_constant(k) {
                    Constant::Number(n) => Value::Number(n),
                    Constant::Str(s) => Value::str(s),
                    Constant::Bool(b) => Value::Bool(b),
                    Constant::Nil => Value::Nil,
                    Constant::Func(_) => unreachable!("function constants are only used by MAKE_FUNC"),
                };
                self.push(value);
            }
            Instr::Load(n) => {
                let name = self.current_name(n);
                let env = self.frames.last().unwrap().env.clone();
                let value = env
                    .get(&name)
                    .ok_or_else(|| self.fail(ErrorKind::NameError(name.clone()), span))?;
                self.push(value);
            }
            Instr::Store(n) => {
                let name = self.current_name(n);
                let value = self.pop();
                let env = self.frames.last().unwrap().env.clone();
                env.assign(&name, value);
            }
            Instr::Pop => {
                self.pop();
            }
            Instr::Neg => {
                let v = self.pop();
                self.push(apply_unary(UnaryOp::Neg, v, span).map_err(|e| self.rethrow(e))?);
            }
            Instr::Not => {
                let v = self.pop();
                self.push(apply_unary(UnaryOp::Not, v, span).map_err(|e| self.rethrow(e))?);
            }
            Instr::Add | Instr::Sub | Instr::Mul | Instr::Div | Instr::Mod | Instr::Eq | Instr::Ne
            | Instr::Lt | Instr::Le | Instr::Gt | Instr::Ge => {
                let rhs = self.pop();
                let lhs = self.pop();
                let op = binop_for(instr);
                self.push(apply_binary(op, lhs, rhs, span).map_err(|e| self.rethrow(e))?);
            }
            Instr::Jump(off) => {
                self.jump(off);
            }
            Instr::JumpIfFalse(off) => {
                let cond = self.pop();
                if !cond.is_truthy() {
                    self.jump(off);
                }
            }
            Instr::JumpIfFalseKeep(off) => {
                let keep = !self.stack.last().unwrap().is_truthy();
                if keep {
                    self.jump(off);
                }
            }
            Instr::JumpIfTrueKeep(off) => {
                let keep = self.stack.last().unwrap().is_truthy();
                if keep {
                    self.jump(off);
                }
            }
            Instr::BuildList(n) => {
                let n = n as usize;
                let len = self.stack.len();
                let items = self.stack.split_off(len - n);
                self.push(Value::list(items));
            }
            Instr::Index => {
                let index = self.pop();
                let target = self.pop();
                self.push(index_list(&target, &index, span).map_err(|e| self.rethrow(e))?);
            }
            Instr::MakeFunc(k) => {
                let descriptor = match self.current_constant(k) {
                    Constant::Func(d) => d,
                    _ => unreachable!("MAKE_FUNC constant must be a function descriptor"),
                };
                let env = self.frames.last().unwrap().env.clone();
                self.push(Value::Function(Rc::new(FuncObject {
                    name: descriptor.name.clone(),
                    params: descriptor.params.clone(),
                    body: FuncBody::Bytecode(descriptor.chunk.clone()),
                    env,
                    span,
                })));
            }
            Instr::Call(n) => {
                return self.call(n as usize, span);
            }
            Instr::Return => {
                let value = self.pop();
                return Ok(StepResult::Returned(value));
            }
            Instr::Import(k) => {
                let path = match self.current_constant(k) {
                    Constant::Str(s) => s,
                    _ => unreachable!("IMPORT constant must be a string"),
                };
                self.exec_import(&path, span)?;
            }
        }
        Ok(StepResult::Continue)
    }

    fn jump(&mut self, offset: i32) {
        let frame = self.frames.last_mut().unwrap();
        frame.ip = (frame.ip as i32 + offset) as usize;
    }

    fn rethrow(&self, mut e: PyRafError) -> PyRafError {
        if e.trace.is_empty() {
            e.trace = self.call_stack.iter().rev().cloned().collect();
        }
        e
    }

    fn call(&mut self, argc: usize, span: Span) -> Result<StepResult, PyRafError> {
        let len = self.stack.len();
        let args = self.stack.split_off(len - argc);
        let callee = self.pop();
        match callee {
            Value::Builtin(_, f) => {
                let result = f(&args, span).map_err(|e| self.rethrow(e))?;
                self.push(result);
                Ok(StepResult::Continue)
            }
            Value::Function(func) => {
                if args.len() != func.params.len() {
                    return Err(self.fail(
                        ErrorKind::arity(&func.name, func.params.len().to_string(), args.len()),
                        span,
                    ));
                }
                if self.frames.len() >= self.recursion_limit {
                    return Err(self.fail(
                        ErrorKind::StackOverflow {
                            limit: self.recursion_limit,
                        },
                        span,
                    ));
                }
                let chunk = match &func.body {
                    FuncBody::Bytecode(chunk) => chunk.clone(),
                    FuncBody::Ast(_) => unreachable!("the VM only ever constructs bytecode-bodied functions"),
                };
                let call_env = Environment::with_parent(func.env.clone());
                for (param, arg) in func.params.iter().zip(args) {
                    call_env.define(param.clone(), arg);
                }
                self.call_stack.push(Frame {
                    function: func.name.clone(),
                    span,
                });
                self.frames.push(ExecFrame {
                    chunk,
                    ip: 0,
                    env: call_env,
                });
                Ok(StepResult::Continue)
            }
            other => Err(self.fail(
                ErrorKind::type_mismatch("call", "function", other.type_name(), 0),
                span,
            )),
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
        let chunk = Rc::new(compile_program(&program));

        let module_env = Environment::new();
        builtins::register(&module_env);

        let previous_globals = self.globals.clone();
        self.globals = module_env.clone();
        self.frames.push(ExecFrame {
            chunk,
            ip: 0,
            env: module_env.clone(),
        });
        let run_result = self.execute();
        self.globals = previous_globals;

        run_result?;
        Ok(module_env)
    }
}

enum StepResult {
    Continue,
    Returned(Value),
}

fn binop_for(instr: Instr) -> BinaryOp {
    match instr {
        Instr::Add => BinaryOp::Add,
        Instr::Sub => BinaryOp::Sub,
        Instr::Mul => BinaryOp::Mul,
        Instr::Div => BinaryOp::Div,
        Instr::Mod => BinaryOp::Mod,
        Instr::Eq => BinaryOp::Eq,
        Instr::Ne => BinaryOp::NotEq,
        Instr::Lt => BinaryOp::Lt,
        Instr::Le => BinaryOp::Le,
        Instr::Gt => BinaryOp::Gt,
        Instr::Ge => BinaryOp::Ge,
        other => unreachable!("not a binary opcode: {other:?}"),
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

    fn run_source(src: &str) -> Result<Vm, PyRafError> {
        let program = parse(src).unwrap();
        let chunk = Rc::new(compile_program(&program));
        let mut vm = Vm::new(PathBuf::from("."), DEFAULT_RECURSION_LIMIT);
        vm.run(chunk)?;
        Ok(vm)
    }

    #[test]
    fn arithmetic_and_comparison() {
        let vm = run_source("x = 3; y = 4; z = x + y == 7;").unwrap();
        assert!(matches!(vm.globals.get("z"), Some(Value::Bool(true))));
    }

    #[test]
    fn while_loop_accumulates() {
        let vm = run_source("i = 0; s = 0; while (i < 3) { s = s + i; i = i + 1; }").unwrap();
        assert!(matches!(vm.globals.get("s"), Some(Value::Number(n)) if n == 3.0));
    }

    #[test]
    fn closures_capture_defining_scope() {
        let vm = run_source(
            "def mk(x){ def add(y){ return x + y; } return add; } a = mk(5); r1 = a(3); r2 = a(10);",
        )
        .unwrap();
        assert!(matches!(vm.globals.get("r1"), Some(Value::Number(n)) if n == 8.0));
        assert!(matches!(vm.globals.get("r2"), Some(Value::Number(n)) if n == 15.0));
    }

    #[test]
    fn short_circuit_returns_operand_not_bool() {
        let vm = run_source("a = 0 or \"x\"; b = 1 and \"y\"; c = false or nil;").unwrap();
        assert!(matches!(vm.globals.get("a"), Some(Value::Str(s)) if *s == "x"));
        assert!(matches!(vm.globals.get("b"), Some(Value::Str(s)) if *s == "y"));
        assert!(matches!(vm.globals.get("c"), Some(Value::Nil)));
    }

    #[test]
    fn list_index_and_len() {
        let vm = run_source("l = [10, 20, 30]; a = l[0] + l[2]; n = len(l);").unwrap();
        assert!(matches!(vm.globals.get("a"), Some(Value::Number(n)) if n == 40.0));
        assert!(matches!(vm.globals.get("n"), Some(Value::Number(n)) if n == 3.0));
    }

    #[test]
    fn divide_by_zero_carries_stack_trace() {
        let program = parse("def f(){ return g(); } def g(){ return 1/0; } f();").unwrap();
        let chunk = Rc::new(compile_program(&program));
        let mut vm = Vm::new(PathBuf::from("."), DEFAULT_RECURSION_LIMIT);
        let err = vm.run(chunk).unwrap_err();
        assert_eq!(err.kind.label(), "DivideByZero");
        let names: Vec<_> = err.trace.iter().map(|f| f.function.as_str()).collect();
        assert_eq!(names, vec!["g", "f"]);
    }

    #[test]
    fn assignment_to_outer_scope_does_not_shadow() {
        let vm = run_source("x = 1; def bump(){ x = x + 1; } bump(); bump();").unwrap();
        assert!(matches!(vm.globals.get("x"), Some(Value::Number(n)) if n == 3.0));
    }

    #[test]
    fn arity_mismatch_is_arity_error() {
        let program = parse("def f(a){ return a; } f(1, 2);").unwrap();
        let chunk = Rc::new(compile_program(&program));
        let mut vm = Vm::new(PathBuf::from("."), DEFAULT_RECURSION_LIMIT);
        let err = vm.run(chunk).unwrap_err();
        assert_eq!(err.kind.label(), "ArityError");
    }

    #[test]
    fn undefined_name_is_name_error() {
        let program = parse("print(nope);").unwrap();
        let chunk = Rc::new(compile_program(&program));
        let mut vm = Vm::new(PathBuf::from("."), DEFAULT_RECURSION_LIMIT);
        let err = vm.run(chunk).unwrap_err();
        assert_eq!(err.kind.label(), "NameError");
    }

    #[test]
    fn recursion_limit_triggers_stack_overflow() {
        let program = parse("def rec(){ return rec(); } rec();").unwrap();
        let chunk = Rc::new(compile_program(&program));
        let mut vm = Vm::new(PathBuf::from("."), 50);
        let err = vm.run(chunk).unwrap_err();
        assert_eq!(err.kind.label(), "StackOverflow");
    }

    #[test]
    fn evaluator_and_vm_agree_on_output() {
        use crate::eval::Evaluator;

        let src = "def fib(n){ if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); } r = fib(10);";
        let program = parse(src).unwrap();

        let mut evaluator = Evaluator::new(PathBuf::from("."), DEFAULT_RECURSION_LIMIT);
        evaluator.run(&program).unwrap();

        let chunk = Rc::new(compile_program(&program));
        let mut vm = Vm::new(PathBuf::from("."), DEFAULT_RECURSION_LIMIT);
        vm.run(chunk).unwrap();

        assert_eq!(
            evaluator.globals.get("r").unwrap().to_string(),
            vm.globals.get("r").unwrap().to_string()
        );
    }
}
