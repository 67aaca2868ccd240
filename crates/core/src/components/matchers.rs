//! Built-in matchers.
//!
//! Match results use numbered keys: `"0"` is the whole match and `"1"`,
//! `"2"`, ... are the groups in order. Named regex groups are also exposed
//! under their name.

use regex::Regex;
use trellis_traits::{ComponentError, Environment, Matcher, Parameters, PreparedPattern};

fn captures_to_parameters(regex: &Regex, input: &str) -> Option<Parameters> {
    let captures = regex.captures(input)?;
    let mut result: Parameters = captures
        .iter()
        .enumerate()
        .map(|(i, group)| (i.to_string(), group.map_or("", |m| m.as_str()).to_string()))
        .collect();
    for name in regex.capture_names().flatten() {
        if let Some(m) = captures.name(name) {
            result.insert(name.to_string(), m.as_str().to_string());
        }
    }
    Some(result)
}

fn match_prepared(
    prepared: &PreparedPattern,
    env: &dyn Environment,
) -> Result<Option<Parameters>, ComponentError> {
    let regex = prepared.downcast_ref::<Regex>().ok_or_else(|| {
        ComponentError::pattern(prepared.source(), "pattern was prepared by a different matcher")
    })?;
    Ok(captures_to_parameters(regex, &env.addressing().uri))
}

/// Matches the sitemap-relative URI against a wildcard pattern.
///
/// `*` matches within one path segment, `**` across segments, and `\`
/// escapes the next character. Every wildcard is a group.
#[derive(Debug, Default, Clone, Copy)]
pub struct WildcardMatcher;

impl WildcardMatcher {
    pub fn compile(pattern: &str) -> Result<Regex, ComponentError> {
        let mut expression = String::from("^");
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    expression.push_str("(.*)");
                }
                '*' => expression.push_str("([^/]*)"),
                '\\' => match chars.next() {
                    Some(escaped) => expression.push_str(&regex::escape(escaped.encode_utf8(&mut [0; 4]))),
                    None => return Err(ComponentError::pattern(pattern, "dangling escape at end of pattern")),
                },
                other => expression.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        expression.push('$');
        Regex::new(&expression).map_err(|e| ComponentError::pattern(pattern, e.to_string()))
    }
}

impl Matcher for WildcardMatcher {
    fn matches(
        &self,
        pattern: &str,
        env: &dyn Environment,
        _parameters: &Parameters,
    ) -> Result<Option<Parameters>, ComponentError> {
        let regex = Self::compile(pattern)?;
        Ok(captures_to_parameters(&regex, &env.addressing().uri))
    }

    fn is_preparable(&self) -> bool {
        true
    }

    fn prepare(&self, pattern: &str) -> Result<PreparedPattern, ComponentError> {
        Ok(PreparedPattern::new(pattern, Self::compile(pattern)?))
    }

    fn prepared_match(
        &self,
        pattern: &PreparedPattern,
        env: &dyn Environment,
        _parameters: &Parameters,
    ) -> Result<Option<Parameters>, ComponentError> {
        match_prepared(pattern, env)
    }
}

/// Searches the sitemap-relative URI with a regular expression.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexpMatcher;

impl RegexpMatcher {
    fn compile(pattern: &str) -> Result<Regex, ComponentError> {
        Regex::new(pattern).map_err(|e| ComponentError::pattern(pattern, e.to_string()))
    }
}

impl Matcher for RegexpMatcher {
    fn matches(
        &self,
        pattern: &str,
        env: &dyn Environment,
        _parameters: &Parameters,
    ) -> Result<Option<Parameters>, ComponentError> {
        let regex = Self::compile(pattern)?;
        Ok(captures_to_parameters(&regex, &env.addressing().uri))
    }

    fn is_preparable(&self) -> bool {
        true
    }

    fn prepare(&self, pattern: &str) -> Result<PreparedPattern, ComponentError> {
        Ok(PreparedPattern::new(pattern, Self::compile(pattern)?))
    }

    fn prepared_match(
        &self,
        pattern: &PreparedPattern,
        env: &dyn Environment,
        _parameters: &Parameters,
    ) -> Result<Option<Parameters>, ComponentError> {
        match_prepared(pattern, env)
    }
}

/// Matches when the request carries the parameter named by the pattern;
/// the parameter value becomes `"1"`.
///
/// Registered as a pooled component: it keeps the last value it saw.
#[derive(Debug, Default)]
pub struct RequestParameterMatcher {
    last_value: std::sync::Mutex<Option<String>>,
}

impl RequestParameterMatcher {
    /// Value seen by the most recent successful match of this instance.
    pub fn last_value(&self) -> Option<String> {
        self.last_value.lock().ok().and_then(|v| v.clone())
    }
}

impl Matcher for RequestParameterMatcher {
    fn matches(
        &self,
        pattern: &str,
        env: &dyn Environment,
        _parameters: &Parameters,
    ) -> Result<Option<Parameters>, ComponentError> {
        let Some(value) = env.parameter(pattern) else {
            return Ok(None);
        };
        if let Ok(mut last) = self.last_value.lock() {
            *last = Some(value.to_string());
        }
        Ok(Some(Parameters::from([("1".to_string(), value.to_string())])))
    }
}
