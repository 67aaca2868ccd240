//! Input modules backing `{module:name}` expressions.

use serde_json::Value;
use trellis_traits::{ComponentError, Environment, InputModule};

/// `{request-param:name}`: a request parameter.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestParamModule;

impl InputModule for RequestParamModule {
    fn attribute(&self, name: &str, env: &dyn Environment) -> Result<Option<String>, ComponentError> {
        Ok(env.parameter(name).map(str::to_string))
    }
}

/// `{request-attr:name}`: a request attribute. Strings come back bare,
/// other JSON values in their compact JSON form.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestAttributeModule;

impl InputModule for RequestAttributeModule {
    fn attribute(&self, name: &str, env: &dyn Environment) -> Result<Option<String>, ComponentError> {
        Ok(env.attribute(name).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::RequestEnvironment;
    use serde_json::json;

    #[test]
    fn test_request_param_module() {
        let env = RequestEnvironment::new("x").with_parameter("q", "rust");
        assert_eq!(RequestParamModule.attribute("q", &env).unwrap().as_deref(), Some("rust"));
        assert_eq!(RequestParamModule.attribute("missing", &env).unwrap(), None);
    }

    #[test]
    fn test_request_attribute_module() {
        let mut env = RequestEnvironment::new("x");
        env.set_attribute("user", json!("ada"));
        env.set_attribute("roles", json!(["admin"]));
        assert_eq!(
            RequestAttributeModule.attribute("user", &env).unwrap().as_deref(),
            Some("ada")
        );
        assert_eq!(
            RequestAttributeModule.attribute("roles", &env).unwrap().as_deref(),
            Some(r#"["admin"]"#)
        );
    }
}
