//! Key expressions: a small language for deriving reservation key material
//! from an operation's named parameters.
//!
//! ```text
//! expr  := term ('+' term)*
//! term  := '#' ident ('.' segment)*   parameter, optionally a field path
//!        | '\'' text '\''             string literal
//!        | digits                     numeric literal
//! ```
//!
//! Path segments that are all digits index into arrays.

use crate::error::{AppError, Result};
use serde_json::{Map, Value};

/// Evaluates a key expression against the named parameters of a call.
pub trait KeyExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, params: &Map<String, Value>) -> Result<String>;
}

/// Default evaluator supporting parameter references, field paths, literals
/// and `+` concatenation.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldPathEvaluator;

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Path(Vec<String>),
    Literal(String),
}

impl KeyExpressionEvaluator for FieldPathEvaluator {
    fn evaluate(&self, expression: &str, params: &Map<String, Value>) -> Result<String> {
        let terms = parse(expression)?;
        let mut out = String::new();
        for term in terms {
            match term {
                Term::Literal(text) => out.push_str(&text),
                Term::Path(path) => out.push_str(&render(lookup(&path, params, expression)?)),
            }
        }
        Ok(out)
    }
}

fn parse(expression: &str) -> Result<Vec<Term>> {
    let chars: Vec<char> = expression.chars().collect();
    let mut terms = Vec::new();
    let mut pos = 0;
    let mut expect_term = true;

    while pos < chars.len() {
        let c = chars[pos];
        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        if !expect_term {
            if c != '+' {
                return Err(syntax_error(expression, pos, "expected '+'"));
            }
            expect_term = true;
            pos += 1;
            continue;
        }

        match c {
            '#' => {
                pos += 1;
                let mut path = Vec::new();
                loop {
                    let start = pos;
                    while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                        pos += 1;
                    }
                    if start == pos {
                        return Err(syntax_error(expression, pos, "expected identifier"));
                    }
                    path.push(chars[start..pos].iter().collect());
                    if pos < chars.len() && chars[pos] == '.' {
                        pos += 1;
                    } else {
                        break;
                    }
                }
                terms.push(Term::Path(path));
            }
            '\'' => {
                pos += 1;
                let start = pos;
                while pos < chars.len() && chars[pos] != '\'' {
                    pos += 1;
                }
                if pos >= chars.len() {
                    return Err(syntax_error(expression, start, "unterminated string literal"));
                }
                terms.push(Term::Literal(chars[start..pos].iter().collect()));
                pos += 1;
            }
            d if d.is_ascii_digit() => {
                let start = pos;
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
                terms.push(Term::Literal(chars[start..pos].iter().collect()));
            }
            _ => return Err(syntax_error(expression, pos, "unexpected character")),
        }
        expect_term = false;
    }

    if expect_term {
        return Err(syntax_error(expression, pos, "expression is empty or ends with '+'"));
    }

    Ok(terms)
}

fn lookup<'a>(path: &[String], params: &'a Map<String, Value>, expression: &str) -> Result<&'a Value> {
    let (root, rest) = path
        .split_first()
        .ok_or_else(|| AppError::Configuration(format!("Empty path in key expression '{}'", expression)))?;

    let mut current = params.get(root).ok_or_else(|| {
        AppError::Configuration(format!(
            "Key expression '{}' references unknown parameter '{}'",
            expression, root
        ))
    })?;

    for segment in rest {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| {
            AppError::Configuration(format!(
                "Key expression '{}' cannot resolve '{}' on parameter '{}'",
                expression, segment, root
            ))
        })?;
    }

    Ok(current)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn syntax_error(expression: &str, pos: usize, message: &str) -> AppError {
    AppError::Configuration(format!(
        "Malformed key expression '{}' at position {}: {}",
        expression, pos, message
    ))
}
