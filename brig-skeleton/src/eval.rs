//! Evaluation of build fragments and expressions.
//!
//! The skeleton only needs the small, declarative subset of the
//! build-system language that dependency clauses are written in:
//! variable assignments and boolean expressions over configuration
//! variables. The build-system boundary stays an opaque callback (the
//! [`FragmentEvaluator`][crate::FragmentEvaluator] trait); this module
//! is the default implementation behind it.

use std::cmp::Ordering;

use winnow::{
    ModalResult,
    Parser,
    ascii::{digit1, space0},
    combinator::{alt, cut_err, delimited, fail, opt, preceded},
    token::{one_of, take_while},
};

use crate::{
    Error,
    value::{Origin, Value, VariableMap},
};

/// A parsed expression.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Expr {
    /// A literal value.
    Literal(Value),
    /// A configuration variable reference.
    Variable(String),
    /// `defined(name)`.
    Defined(String),
    /// Logical negation.
    Not(Box<Expr>),
    /// A binary operation.
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `max`/`min` of two integer expressions.
    Fold(FoldOp, Box<Expr>, Box<Expr>),
}

/// A binary operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// An integer folding function.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FoldOp {
    Max,
    Min,
}

/// One statement of a fragment.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Statement {
    /// `name = expr`.
    Assign(String, Expr),
    /// A bare expression; the last one is the fragment result.
    Expr(Expr),
}

/// Recognizes a variable name (`config.<project>.<name>` style).
fn name(input: &mut &str) -> ModalResult<String> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
        }),
    )
        .take()
        .map(ToString::to_string)
        .parse_next(input)
}

/// Recognizes a primary expression.
fn primary(input: &mut &str) -> ModalResult<Expr> {
    space0.parse_next(input)?;
    alt((
        delimited(('(', space0), expression, (space0, ')')),
        preceded('!', primary).map(|e| Expr::Not(Box::new(e))),
        preceded(
            ("defined", space0, '('),
            cut_err((delimited(space0, name, space0), ')')),
        )
        .map(|(n, _)| Expr::Defined(n)),
        preceded(
            ("max", space0, '('),
            cut_err((expression, (space0, ','), expression, (space0, ')'))),
        )
        .map(|(a, _, b, _)| Expr::Fold(FoldOp::Max, Box::new(a), Box::new(b))),
        preceded(
            ("min", space0, '('),
            cut_err((expression, (space0, ','), expression, (space0, ')'))),
        )
        .map(|(a, _, b, _)| Expr::Fold(FoldOp::Min, Box::new(a), Box::new(b))),
        delimited('\'', take_while(0.., |c: char| c != '\''), '\'')
            .map(|s: &str| Expr::Literal(Value::String(s.to_string()))),
        (opt('-'), digit1)
            .take()
            .try_map(str::parse::<i64>)
            .map(|n| Expr::Literal(Value::Int(n))),
        preceded('$', cut_err(name)).map(Expr::Variable),
        name.map(|word| match word.as_str() {
            "true" => Expr::Literal(Value::Bool(true)),
            "false" => Expr::Literal(Value::Bool(false)),
            // A bare configuration variable name is a reference; any
            // other bare word is a string.
            _ if word.starts_with("config.") => Expr::Variable(word),
            _ => Expr::Literal(Value::String(word)),
        }),
    ))
    .parse_next(input)
}

/// Recognizes a comparison.
fn comparison(input: &mut &str) -> ModalResult<Expr> {
    let left = primary.parse_next(input)?;
    space0.parse_next(input)?;
    let operator = opt(alt((
        "==".value(BinOp::Eq),
        "!=".value(BinOp::Ne),
        "<=".value(BinOp::Le),
        ">=".value(BinOp::Ge),
        '<'.value(BinOp::Lt),
        '>'.value(BinOp::Gt),
    )))
    .parse_next(input)?;
    match operator {
        Some(op) => {
            let right = cut_err(primary).parse_next(input)?;
            Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
        }
        None => Ok(left),
    }
}

/// Recognizes a conjunction.
fn conjunction(input: &mut &str) -> ModalResult<Expr> {
    let mut left = comparison.parse_next(input)?;
    loop {
        space0.parse_next(input)?;
        if opt("&&").parse_next(input)?.is_none() {
            return Ok(left);
        }
        let right = cut_err(comparison).parse_next(input)?;
        left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
    }
}

/// Recognizes a full expression (a disjunction).
fn expression(input: &mut &str) -> ModalResult<Expr> {
    let mut left = conjunction.parse_next(input)?;
    loop {
        space0.parse_next(input)?;
        if opt("||").parse_next(input)?.is_none() {
            return Ok(left);
        }
        let right = cut_err(conjunction).parse_next(input)?;
        left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
    }
}

/// Recognizes one statement.
fn statement(input: &mut &str) -> ModalResult<Statement> {
    alt((assignment, expression.map(Statement::Expr))).parse_next(input)
}

/// Recognizes an assignment (`name = expr`).
fn assignment(input: &mut &str) -> ModalResult<Statement> {
    let target = preceded(space0, name).parse_next(input)?;
    (space0, '=').parse_next(input)?;
    // A second `=` means this is a comparison, not an assignment.
    if input.starts_with('=') {
        return fail.parse_next(input);
    }
    let value = cut_err(expression).parse_next(input)?;
    Ok(Statement::Assign(target, value))
}

/// Parses and evaluates a fragment (statements, newline or `;`
/// separated) over `vars`.
///
/// Assignments update the map with [`Origin::Buildfile`]; the result is
/// the truthiness of the last bare expression, or `true` if there is
/// none.
///
/// # Errors
///
/// Returns a parse or evaluation failure with the offending statement
/// in the message.
pub fn evaluate_fragment(fragment: &str, vars: &VariableMap) -> Result<(VariableMap, bool), Error> {
    let mut vars = vars.clone();
    let mut result = true;
    for line in fragment.split(['\n', ';']) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed = statement.parse(line).map_err(|error| Error::Evaluation {
            context: format!("statement '{line}'"),
            reason: error.to_string(),
        })?;
        match parsed {
            Statement::Assign(name, expr) => {
                let value = evaluate(&expr, &vars).map_err(|reason| Error::Evaluation {
                    context: format!("statement '{line}'"),
                    reason,
                })?;
                vars.set(&name, value, Origin::Buildfile);
            }
            Statement::Expr(expr) => {
                let value = evaluate(&expr, &vars).map_err(|reason| Error::Evaluation {
                    context: format!("statement '{line}'"),
                    reason,
                })?;
                result = value.truthy();
            }
        }
    }
    Ok((vars, result))
}

/// Parses and evaluates a single expression over `vars`.
///
/// # Errors
///
/// Returns a parse or evaluation failure with the expression in the
/// message.
pub fn evaluate_expression(source: &str, vars: &VariableMap) -> Result<Value, Error> {
    let expr = expression
        .parse(source.trim())
        .map_err(|error| Error::Evaluation {
            context: format!("expression '{source}'"),
            reason: error.to_string(),
        })?;
    evaluate(&expr, vars).map_err(|reason| Error::Evaluation {
        context: format!("expression '{source}'"),
        reason,
    })
}

/// Evaluates a parsed expression.
fn evaluate(expr: &Expr, vars: &VariableMap) -> Result<Value, String> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Variable(name) => vars
            .value(name)
            .cloned()
            .ok_or_else(|| format!("undefined variable {name}")),
        Expr::Defined(name) => Ok(Value::Bool(vars.is_defined(name))),
        Expr::Not(inner) => Ok(Value::Bool(!evaluate(inner, vars)?.truthy())),
        Expr::Binary(BinOp::And, left, right) => Ok(Value::Bool(
            evaluate(left, vars)?.truthy() && evaluate(right, vars)?.truthy(),
        )),
        Expr::Binary(BinOp::Or, left, right) => Ok(Value::Bool(
            evaluate(left, vars)?.truthy() || evaluate(right, vars)?.truthy(),
        )),
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, vars)?;
            let right = evaluate(right, vars)?;
            let result = match op {
                BinOp::Eq => left == right,
                BinOp::Ne => left != right,
                BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                    let ordering = compare(&left, &right).ok_or_else(|| {
                        format!("cannot order {left} and {right}")
                    })?;
                    match op {
                        BinOp::Lt => ordering.is_lt(),
                        BinOp::Le => ordering.is_le(),
                        BinOp::Gt => ordering.is_gt(),
                        BinOp::Ge => ordering.is_ge(),
                        BinOp::Eq | BinOp::Ne | BinOp::And | BinOp::Or => unreachable!(),
                    }
                }
                BinOp::And | BinOp::Or => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        Expr::Fold(op, left, right) => {
            let left = evaluate(left, vars)?;
            let right = evaluate(right, vars)?;
            match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(match op {
                    FoldOp::Max => *a.max(b),
                    FoldOp::Min => *a.min(b),
                })),
                _ => Err(format!("cannot fold {left} and {right}")),
            }
        }
    }
}

/// Orders two values of the same type.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use testresult::TestResult;

    use super::*;

    fn vars() -> VariableMap {
        let mut map = VariableMap::new();
        map.set("config.foo.api", Value::String("bar".to_string()), Origin::Default);
        map.set("config.foo.buf", Value::Int(8), Origin::Default);
        map.set("config.foo.fast", Value::Bool(true), Origin::Default);
        map
    }

    #[rstest]
    #[case("true", Value::Bool(true))]
    #[case("false", Value::Bool(false))]
    #[case("42", Value::Int(42))]
    #[case("-1", Value::Int(-1))]
    #[case("'hello world'", Value::String("hello world".to_string()))]
    #[case("bare", Value::String("bare".to_string()))]
    #[case("config.foo.buf", Value::Int(8))]
    #[case("$config.foo.buf", Value::Int(8))]
    #[case("defined(config.foo.api)", Value::Bool(true))]
    #[case("defined(config.foo.missing)", Value::Bool(false))]
    #[case("!defined(config.foo.missing)", Value::Bool(true))]
    #[case("config.foo.buf >= 8", Value::Bool(true))]
    #[case("config.foo.buf > 8", Value::Bool(false))]
    #[case("config.foo.api == bar", Value::Bool(true))]
    #[case("config.foo.api != 'baz'", Value::Bool(true))]
    #[case("config.foo.fast && config.foo.buf == 8", Value::Bool(true))]
    #[case("config.foo.buf < 4 || defined(config.foo.api)", Value::Bool(true))]
    #[case("max(config.foo.buf, 16)", Value::Int(16))]
    #[case("min(config.foo.buf, 16)", Value::Int(8))]
    #[case("(config.foo.buf >= 4) && !(config.foo.buf >= 16)", Value::Bool(true))]
    fn expressions(#[case] source: &str, #[case] expected: Value) -> TestResult {
        assert_eq!(evaluate_expression(source, &vars())?, expected);
        Ok(())
    }

    #[rstest]
    #[case("")]
    #[case("&& true")]
    #[case("defined()")]
    #[case("max(1)")]
    #[case("config.foo.buf >=")]
    #[case("'unterminated")]
    fn malformed_expressions(#[case] source: &str) {
        assert!(evaluate_expression(source, &vars()).is_err());
    }

    #[test]
    fn undefined_reference_fails() {
        let err = evaluate_expression("config.foo.missing == 1", &vars()).unwrap_err();
        assert!(matches!(err, Error::Evaluation { .. }));
    }

    #[test]
    fn fragment_assignments_and_result() -> TestResult {
        let (vars, result) = evaluate_fragment(
            "config.foo.buf = max(config.foo.buf, 16)\nconfig.foo.api = 'baz'",
            &vars(),
        )?;
        assert!(result);
        assert_eq!(vars.value("config.foo.buf"), Some(&Value::Int(16)));
        assert_eq!(
            vars.value("config.foo.api"),
            Some(&Value::String("baz".to_string()))
        );
        assert_eq!(vars.get("config.foo.buf").unwrap().origin, Origin::Buildfile);
        Ok(())
    }

    #[test]
    fn fragment_result_is_last_expression() -> TestResult {
        let (_, result) =
            evaluate_fragment("config.foo.buf = 4; config.foo.buf >= 8", &vars())?;
        assert!(!result);
        Ok(())
    }

    #[test]
    fn fragment_skips_comments_and_blanks() -> TestResult {
        let (vars, result) =
            evaluate_fragment("# comment\n\nconfig.foo.buf = 2\n", &vars())?;
        assert!(result);
        assert_eq!(vars.value("config.foo.buf"), Some(&Value::Int(2)));
        Ok(())
    }

    #[test]
    fn semicolon_separates_statements() -> TestResult {
        let (vars, _) = evaluate_fragment("config.a.x = 1; config.a.y = 2", &vars())?;
        assert_eq!(vars.value("config.a.x"), Some(&Value::Int(1)));
        assert_eq!(vars.value("config.a.y"), Some(&Value::Int(2)));
        Ok(())
    }
}
