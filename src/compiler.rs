// ABOUTME: Lowers the AST into bytecode chunks executed by the VM

use crate::ast::{BinaryOp, Expr, LogicalOp, Stmt, UnaryOp};
use crate::bytecode::{Chunk, Constant, FuncDescriptor, Instr};
use crate::token::Span;
use std::rc::Rc;

pub fn compile_program(program: &[Stmt]) -> Chunk {
    let mut chunk = Chunk::new();
    for stmt in program {
        compile_stmt(&mut chunk, stmt);
    }
    chunk
}

fn compile_stmt(chunk: &mut Chunk, stmt: &Stmt) {
    match stmt {
        Stmt::Expr(expr, span) => {
            if let Expr::Assign { name, value, .. } = expr {
                compile_expr(chunk, value);
                let idx = chunk.add_name(name.clone());
                chunk.emit(Instr::Store(idx), *span);
            } else {
                compile_expr(chunk, expr);
                chunk.emit(Instr::Pop, *span);
            }
        }
        Stmt::Def {
            name,
            params,
            body,
            span,
        } => {
            let body_chunk = compile_function_body(body);
            let descriptor = Rc::new(FuncDescriptor {
                name: name.clone(),
                params: params.clone(),
                chunk: Rc::new(body_chunk),
            });
            let k = chunk.add_constant(Constant::Func(descriptor));
            chunk.emit(Instr::MakeFunc(k), *span);
            let idx = chunk.add_name(name.clone());
            chunk.emit(Instr::Store(idx), *span);
        }
        Stmt::If {
            cond,
            then_branch,
            else_branch,
            span,
        } => {
            compile_expr(chunk, cond);
            let jump_if_false = chunk.emit(Instr::JumpIfFalse(0), *span);
            for s in then_branch {
                compile_stmt(chunk, s);
            }
            if let Some(else_branch) = else_branch {
                let jump_over_else = chunk.emit(Instr::Jump(0), *span);
                chunk.patch_jump_to_here(jump_if_false);
                for s in else_branch {
                    compile_stmt(chunk, s);
                }
                chunk.patch_jump_to_here(jump_over_else);
            } else {
                chunk.patch_jump_to_here(jump_if_false);
            }
        }
        Stmt::While { cond, body, span } => {
            let loop_start = chunk.code.len();
            compile_expr(chunk, cond);
            let jump_if_false = chunk.emit(Instr::JumpIfFalse(0), *span);
            for s in body {
                compile_stmt(chunk, s);
            }
            let back = chunk.emit(Instr::Jump(0), *span);
            let offset = loop_start as i32 - back as i32 - 1;
            if let Instr::Jump(o) = &mut chunk.code[back] {
                *o = offset;
            }
            chunk.patch_jump_to_here(jump_if_false);
        }
        Stmt::Return { value, span } => {
            match value {
                Some(expr) => compile_expr(chunk, expr),
                None => {
                    let k = chunk.add_constant(Constant::Nil);
                    chunk.emit(Instr::Const(k), *span);
                }
            }
            chunk.emit(Instr::Return, *span);
        }
        Stmt::Import { path, span } => {
            let k = chunk.add_constant(Constant::Str(path.clone()));
            chunk.emit(Instr::Import(k), *span);
        }
        Stmt::Block(stmts, _) => {
            for s in stmts {
                compile_stmt(chunk, s);
            }
        }
    }
}

/// Compiles a function's body, always ending in an explicit `RETURN` so
/// fallthrough (no `return` statement reached) yields `nil`, matching the
/// evaluator's `Flow::Next -> Value::Nil` behavior.
fn compile_function_body(body: &[Stmt]) -> Chunk {
    let mut chunk = Chunk::new();
    for stmt in body {
        compile_stmt(&mut chunk, stmt);
    }
    let k = chunk.add_constant(Constant::Nil);
    chunk.emit(Instr::Const(k), Span::default());
    chunk.emit(Instr::Return, Span::default());
    chunk
}

fn compile_expr(chunk: &mut Chunk, expr: &Expr) {
    match expr {
        Expr::Number(n, span) => {
            let k = chunk.add_constant(Constant::Number(*n));
            chunk.emit(Instr::Const(k), *span);
        }
        Expr::Str(s, span) => {
            let k = chunk.add_constant(Constant::Str(s.clone()));
            chunk.emit(Instr::Const(k), *span);
        }
        Expr::Bool(b, span) => {
            let k = chunk.add_constant(Constant::Bool(*b));
            chunk.emit(Instr::Const(k), *span);
        }
        Expr::Nil(span) => {
            let k = chunk.add_constant(Constant::Nil);
            chunk.emit(Instr::Const(k), *span);
        }
        Expr::Ident(name, span) => {
            let idx = chunk.add_name(name.clone());
            chunk.emit(Instr::Load(idx), *span);
        }
        Expr::List(items, span) => {
            for item in items {
                compile_expr(chunk, item);
            }
            chunk.emit(Instr::BuildList(items.len() as u16), *span);
        }
        Expr::Unary { op, expr, span } => {
            compile_expr(chunk, expr);
            chunk.emit(
                match op {
                    UnaryOp::Neg => Instr::Neg,
                    UnaryOp::Not => Instr::Not,
                },
                *span,
            );
        }
        Expr::Binary { op, lhs, rhs, span } => {
            compile_expr(chunk, lhs);
            compile_expr(chunk, rhs);
            chunk.emit(binary_instr(*op), *span);
        }
        Expr::Logical { op, lhs, rhs, span } => {
            compile_expr(chunk, lhs);
            let jump = match op {
                LogicalOp::And => chunk.emit(Instr::JumpIfFalseKeep(0), *span),
                LogicalOp::Or => chunk.emit(Instr::JumpIfTrueKeep(0), *span),
            };
            chunk.emit(Instr::Pop, *span);
            compile_expr(chunk, rhs);
            chunk.patch_jump_to_here(jump);
        }
        Expr::Assign { name, value, span } => {
            // Not reachable from the grammar (assignment is statement-level
            // only) but kept total so compile_expr mirrors eval_expr.
            compile_expr(chunk, value);
            let idx = chunk.add_name(name.clone());
            chunk.emit(Instr::Store(idx), *span);
            chunk.emit(Instr::Load(idx), *span);
        }
        Expr::Call { callee, args, span } => {
            compile_expr(chunk, callee);
            for arg in args {
                compile_expr(chunk, arg);
            }
            chunk.emit(Instr::Call(args.len() as u8), *span);
        }
        Expr::Index { target, index, span } => {
            compile_expr(chunk, target);
            compile_expr(chunk, index);
            chunk.emit(Instr::Index, *span);
        }
    }
}

/// Compiles a single expression ending in `RETURN` instead of `POP`, so the
/// VM can run it as a standalone chunk and recover the resulting value —
/// used by the REPL to echo expression-statement results.
pub fn compile_standalone_expr(expr: &Expr) -> Chunk {
    let mut chunk = Chunk::new();
    let span = expr.span();
    compile_expr(&mut chunk, expr);
    chunk.emit(Instr::Return, span);
    chunk
}

fn binary_instr(op: BinaryOp) -> Instr {
    match op {
        BinaryOp::Add => Instr::Add,
        BinaryOp::Sub => Instr::Sub,
        BinaryOp::Mul => Instr::Mul,
        BinaryOp::Div => Instr::Div,
        BinaryOp::Mod => Instr::Mod,
        BinaryOp::Eq => Instr::Eq,
        BinaryOp::NotEq => Instr::Ne,
        BinaryOp::Lt => Instr::Lt,
        BinaryOp::Le => Instr::Le,
        BinaryOp::Gt => Instr::Gt,
        BinaryOp::Ge => Instr::Ge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn compiles_arithmetic_to_const_and_binary_op() {
        let program = parse("1 + 2;").unwrap();
        let chunk = compile_program(&program);
        assert!(matches!(chunk.code[0], Instr::Const(0)));
        assert!(matches!(chunk.code[1], Instr::Const(1)));
        assert!(matches!(chunk.code[2], Instr::Add));
        assert!(matches!(chunk.code[3], Instr::Pop));
    }

    #[test]
    fn compiles_assignment_without_extra_pop() {
        let program = parse("x = 1;").unwrap();
        let chunk = compile_program(&program);
        assert!(matches!(chunk.code.last(), Some(Instr::Store(_))));
    }

    #[test]
    fn compiles_and_with_keep_semantics() {
        let program = parse("a and b;").unwrap();
        let chunk = compile_program(&program);
        assert!(matches!(chunk.code[1], Instr::JumpIfFalseKeep(_)));
    }

    #[test]
    fn function_body_always_ends_in_return() {
        let program = parse("def f(){ 1; }").unwrap();
        let chunk = compile_program(&program);
        let Instr::MakeFunc(k) = chunk.code[0] else {
            panic!("expected MakeFunc");
        };
        let Constant::Func(descriptor) = &chunk.constants[k as usize] else {
            panic!("expected function descriptor");
        };
        assert!(matches!(descriptor.chunk.code.last(), Some(Instr::Return)));
    }

    #[test]
    fn standalone_block_compiles_inline_with_no_scope_opcode() {
        let program = parse("{ x = 1; }").unwrap();
        let chunk = compile_program(&program);
        assert!(matches!(chunk.code.last(), Some(Instr::Store(_))));
    }

    #[test]
    fn while_loop_jumps_backward() {
        let program = parse("while (true) { 1; }").unwrap();
        let chunk = compile_program(&program);
        let has_negative_jump = chunk
            .code
            .iter()
            .any(|i| matches!(i, Instr::Jump(off) if *off < 0));
        assert!(has_negative_jump);
    }
}
