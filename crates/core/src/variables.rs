//! `{...}` expressions in sitemap attribute values.
//!
//! An attribute such as `src="docs/{1}.xml"` is compiled once at build
//! time into a [`VariableResolver`] and resolved per request against the
//! invoke context's scope stack:
//!
//! - `{name}` reads `name` from the innermost scope map
//! - `{../name}` walks one scope outwards per `../`
//! - `{#anchor:name}` reads from the scope pushed under `anchor`
//! - `{module:expr}` asks the input module `module` for `expr`, where
//!   `expr` may itself contain expressions (`{request-param:{1}}`)
//!
//! `\{`, `\}` and `\\` escape literal braces and backslashes.

use crate::context::InvokeContext;
use crate::error::{BuildError, ProcessingError};
use crate::configuration::Location;
use std::fmt;
use thiserror::Error;
use trellis_traits::{Environment, Parameters};

/// Malformed `{...}` expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExpressionError {
    message: String,
}

impl ExpressionError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn at(self, expression: &str, location: &Location) -> BuildError {
        BuildError::Expression {
            expression: expression.to_string(),
            message: self.message,
            location: location.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Text(String),
    Variable { levels: usize, name: String },
    Anchor { anchor: String, name: String },
    Module { module: String, key: Vec<Token> },
}

/// A compiled attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableResolver {
    expression: String,
    kind: ResolverKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ResolverKind {
    /// No expressions; resolves to the (unescaped) text.
    Static(String),
    Prepared(Vec<Token>),
}

impl VariableResolver {
    pub fn new(expression: &str) -> Result<Self, ExpressionError> {
        let tokens = parse_tokens(expression)?;
        let kind = match tokens.as_slice() {
            [] => ResolverKind::Static(String::new()),
            [Token::Text(text)] => ResolverKind::Static(text.clone()),
            _ => ResolverKind::Prepared(tokens),
        };
        Ok(Self {
            expression: expression.to_string(),
            kind,
        })
    }

    /// True when the value depends on the request.
    pub fn needs_resolve(&self) -> bool {
        matches!(self.kind, ResolverKind::Prepared(_))
    }

    /// The value as written in the sitemap.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn resolve(
        &self,
        context: &InvokeContext,
        env: &dyn Environment,
    ) -> Result<String, ProcessingError> {
        match &self.kind {
            ResolverKind::Static(text) => Ok(text.clone()),
            ResolverKind::Prepared(tokens) => resolve_tokens(tokens, &self.expression, context, env),
        }
    }
}

impl fmt::Display for VariableResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.expression())
    }
}

/// Resolves every name/value pair into a fresh parameter map.
pub fn build_map(
    entries: &[(VariableResolver, VariableResolver)],
    context: &InvokeContext,
    env: &dyn Environment,
) -> Result<Parameters, ProcessingError> {
    entries
        .iter()
        .map(|(name, value)| Ok((name.resolve(context, env)?, value.resolve(context, env)?)))
        .collect()
}

fn resolve_tokens(
    tokens: &[Token],
    expression: &str,
    context: &InvokeContext,
    env: &dyn Environment,
) -> Result<String, ProcessingError> {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Text(text) => out.push_str(text),
            Token::Variable { levels, name } => {
                let map = context.map_at_level(*levels).ok_or_else(|| {
                    ProcessingError::variable(
                        expression,
                        format!(
                            "there are only {} scope levels, cannot go up {}",
                            context.depth(),
                            levels
                        ),
                    )
                })?;
                out.push_str(lookup(map, name, expression));
            }
            Token::Anchor { anchor, name } => {
                let map = context.map_by_anchor(anchor).ok_or_else(|| {
                    ProcessingError::variable(expression, format!("no scope is anchored as '{anchor}'"))
                })?;
                out.push_str(lookup(map, name, expression));
            }
            Token::Module { module, key } => {
                let key = resolve_tokens(key, expression, context, env)?;
                let components = context.component_manager().ok_or_else(|| {
                    ProcessingError::variable(expression, "no component manager in scope for input modules")
                })?;
                let input = components
                    .input_module(module)
                    .map_err(|e| ProcessingError::variable(expression, e.to_string()))?;
                let value = input
                    .attribute(&key, env)
                    .map_err(|e| ProcessingError::variable(expression, e.to_string()))?;
                match value {
                    Some(value) => out.push_str(&value),
                    None => log::debug!("Input module '{module}' has no value for '{key}' in '{expression}'"),
                }
            }
        }
    }
    Ok(out)
}

fn lookup<'a>(map: &'a Parameters, name: &str, expression: &str) -> &'a str {
    match map.get(name) {
        Some(value) => value,
        None => {
            log::debug!("Variable '{name}' in '{expression}' is undefined, using empty string");
            ""
        }
    }
}

fn parse_tokens(expression: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut chars = expression.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, escaped @ ('{' | '}' | '\\'))) => text.push(escaped),
                Some((_, other)) => {
                    text.push('\\');
                    text.push(other);
                }
                None => text.push('\\'),
            },
            '{' => {
                let end = closing_brace(expression, i)?;
                if !text.is_empty() {
                    tokens.push(Token::Text(std::mem::take(&mut text)));
                }
                tokens.push(parse_expression(&expression[i + 1..end])?);
                while chars.peek().is_some_and(|(j, _)| *j <= end) {
                    chars.next();
                }
            }
            '}' => {
                return Err(ExpressionError::new(format!(
                    "unmatched '}}' at offset {i}"
                )));
            }
            other => text.push(other),
        }
    }
    if !text.is_empty() {
        tokens.push(Token::Text(text));
    }
    Ok(tokens)
}

/// Byte offset of the `}` closing the `{` at `open`, honouring nesting and
/// escapes.
fn closing_brace(expression: &str, open: usize) -> Result<usize, ExpressionError> {
    let mut depth = 0usize;
    let mut escaped = false;
    for (i, c) in expression[open..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(open + i);
                }
            }
            _ => {}
        }
    }
    Err(ExpressionError::new(format!("unclosed '{{' at offset {open}")))
}

fn parse_expression(inner: &str) -> Result<Token, ExpressionError> {
    if inner.is_empty() {
        return Err(ExpressionError::new("empty expression '{}'"));
    }

    if let Some(anchored) = inner.strip_prefix('#') {
        let (anchor, name) = anchored.split_once(':').ok_or_else(|| {
            ExpressionError::new(format!("anchored expression '{{{inner}}}' needs the form '#anchor:name'"))
        })?;
        if anchor.is_empty() || name.is_empty() {
            return Err(ExpressionError::new(format!("incomplete anchored expression '{{{inner}}}'")));
        }
        return Ok(Token::Anchor {
            anchor: anchor.to_string(),
            name: name.to_string(),
        });
    }

    let mut levels = 0;
    let mut rest = inner;
    while let Some(stripped) = rest.strip_prefix("../") {
        levels += 1;
        rest = stripped;
    }

    if levels == 0 {
        if let Some((module, key)) = rest.split_once(':') {
            if is_module_name(module) {
                return Ok(Token::Module {
                    module: module.to_string(),
                    key: parse_tokens(key)?,
                });
            }
        }
    }

    if rest.is_empty() || rest.contains(['{', '}']) {
        return Err(ExpressionError::new(format!("invalid variable name in '{{{inner}}}'")));
    }
    Ok(Token::Variable {
        levels,
        name: rest.to_string(),
    })
}

fn is_module_name(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !candidate.chars().all(|c| c.is_ascii_digit())
}
