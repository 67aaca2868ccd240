//! Built-in selectors and the request action.

use trellis_traits::{Action, ComponentError, Environment, Parameters, Selector};

/// Compares the `when` test against the `parameter-selector-test`
/// parameter of the `<map:select>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParameterSelector;

impl ParameterSelector {
    pub const TEST_PARAMETER: &'static str = "parameter-selector-test";
}

impl Selector for ParameterSelector {
    fn select(
        &self,
        expression: &str,
        _env: &dyn Environment,
        parameters: &Parameters,
    ) -> Result<bool, ComponentError> {
        Ok(parameters
            .get(Self::TEST_PARAMETER)
            .is_some_and(|value| value == expression))
    }
}

/// Compares the `when` test against the request parameter named by the
/// `parameter-name` parameter.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestParameterSelector;

impl RequestParameterSelector {
    pub const NAME_PARAMETER: &'static str = "parameter-name";
}

impl Selector for RequestParameterSelector {
    fn select(
        &self,
        expression: &str,
        env: &dyn Environment,
        parameters: &Parameters,
    ) -> Result<bool, ComponentError> {
        let name = parameters.get(Self::NAME_PARAMETER).ok_or_else(|| {
            ComponentError::execution(format!(
                "request-parameter selector needs a '{}' parameter",
                Self::NAME_PARAMETER
            ))
        })?;
        Ok(env.parameter(name) == Some(expression))
    }
}

/// Exposes the request to its children: every request parameter, plus
/// `requestURI` (full URI) and `sitemapURI` (relative to this sitemap).
///
/// Fails (no match) when a `parameter-required` parameter names a request
/// parameter that is absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestParamAction;

impl Action for RequestParamAction {
    fn act(
        &self,
        env: &mut dyn Environment,
        _source: Option<&str>,
        parameters: &Parameters,
    ) -> Result<Option<Parameters>, ComponentError> {
        if let Some(required) = parameters.get("parameter-required") {
            if env.parameter(required).is_none() {
                return Ok(None);
            }
        }

        let mut result: Parameters = env
            .parameter_names()
            .into_iter()
            .filter_map(|name| {
                let value = env.parameter(&name)?.to_string();
                Some((name, value))
            })
            .collect();
        result.insert("requestURI".to_string(), env.addressing().full_uri());
        result.insert("sitemapURI".to_string(), env.addressing().uri.clone());
        Ok(Some(result))
    }
}
