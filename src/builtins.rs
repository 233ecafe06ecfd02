// ABOUTME: The four fixed global built-in functions: print, len, str, num

use crate::env::Environment;
use crate::error::{ErrorKind, PyRafError};
use crate::token::Span;
use crate::value::Value;
use std::rc::Rc;

/// `print(x1, …)` — prints each argument separated by a space, followed by a
/// trailing newline. Always returns `nil`.
///
/// # Examples
///
/// ```text
/// print(1, "two", 3);  // prints: 1 two 3
/// ```
fn builtin_print(args: &[Value], _span: Span) -> Result<Value, PyRafError> {
    let rendered: Vec<String> = args.iter().map(|v| v.to_string()).collect();
    println!("{}", rendered.join(" "));
    Ok(Value::Nil)
}

/// `len(x)` — length of a string (in UTF-8 scalar values) or a list.
fn builtin_len(args: &[Value], span: Span) -> Result<Value, PyRafError> {
    if args.len() != 1 {
        return Err(PyRafError::new(ErrorKind::arity("len", "1", args.len()), span));
    }
    match &args[0] {
        Value::Str(s) => Ok(Value::Number(s.chars().count() as f64)),
        Value::List(items) => Ok(Value::Number(items.borrow().len() as f64)),
        other => Err(PyRafError::new(
            ErrorKind::type_mismatch("len", "string or list", other.type_name(), 0),
            span,
        )),
    }
}

/// `str(x)` — string coercion via `Display`.
fn builtin_str(args: &[Value], span: Span) -> Result<Value, PyRafError> {
    if args.len() != 1 {
        return Err(PyRafError::new(ErrorKind::arity("str", "1", args.len()), span));
    }
    Ok(Value::str(args[0].to_string()))
}

/// `num(s)` — parses a string into a number; fails with `ValueError` on
/// non-numeric input.
fn builtin_num(args: &[Value], span: Span) -> Result<Value, PyRafError> {
    if args.len() != 1 {
        return Err(PyRafError::new(ErrorKind::arity("num", "1", args.len()), span));
    }
    match &args[0] {
        Value::Str(s) => s.trim().parse::<f64>().map(Value::Number).map_err(|_| {
            PyRafError::new(
                ErrorKind::value_error("num", format!("'{}' is not a number", s)),
                span,
            )
        }),
        Value::Number(n) => Ok(Value::Number(*n)),
        other => Err(PyRafError::new(
            ErrorKind::type_mismatch("num", "string", other.type_name(), 0),
            span,
        )),
    }
}

/// Registers the fixed built-in set into a fresh global environment. Used to
/// seed both the top-level program's environment and every module-global
/// environment created on `import`.
pub fn register(env: &Rc<Environment>) {
    env.define("print", Value::Builtin("print", builtin_print));
    env.define("len", Value::Builtin("len", builtin_len));
    env.define("str", Value::Builtin("str", builtin_str));
    env.define("num", Value::Builtin("num", builtin_num));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_on_string_counts_scalars() {
        assert!(matches!(
            builtin_len(&[Value::str("hello")], Span::default()),
            Ok(Value::Number(n)) if n == 5.0
        ));
    }

    #[test]
    fn len_on_list() {
        let list = Value::list(vec![Value::Number(1.0), Value::Number(2.0)]);
        assert!(matches!(
            builtin_len(&[list], Span::default()),
            Ok(Value::Number(n)) if n == 2.0
        ));
    }

    #[test]
    fn len_rejects_other_types() {
        assert!(builtin_len(&[Value::Number(1.0)], Span::default()).is_err());
    }

    #[test]
    fn len_arity_error_carries_call_span() {
        let span = Span::new(3, 7);
        let err = builtin_len(&[], span).unwrap_err();
        assert_eq!(err.kind.label(), "ArityError");
        assert_eq!(err.span, span);
    }

    #[test]
    fn str_coerces_numbers() {
        assert!(matches!(
            builtin_str(&[Value::Number(42.0)], Span::default()),
            Ok(Value::Str(s)) if *s == "42"
        ));
    }

    #[test]
    fn num_parses_numeric_strings() {
        assert!(matches!(
            builtin_num(&[Value::str("3.5")], Span::default()),
            Ok(Value::Number(n)) if n == 3.5
        ));
    }

    #[test]
    fn num_rejects_non_numeric_strings() {
        let err = builtin_num(&[Value::str("abc")], Span::default()).unwrap_err();
        assert_eq!(err.kind.label(), "ValueError");
    }

    #[test]
    fn register_defines_all_four_builtins() {
        let env = Environment::new();
        register(&env);
        for name in ["print", "len", "str", "num"] {
            assert!(env.get(name).is_some(), "{name} should be registered");
        }
    }
}
