//! Prop declarations and the validation seam.

use indexmap::IndexMap;

use crate::Value;
use crate::error::{self, Warning};
use crate::instance::Instance;

/// Declaration of a single prop.
#[derive(Clone, Default)]
pub struct PropSpec {
    pub required: bool,
    pub default: Option<Value>,
}

impl PropSpec {
    pub fn required() -> Self {
        Self {
            required: true,
            default: None,
        }
    }

    pub fn with_default(value: Value) -> Self {
        Self {
            required: false,
            default: Some(value),
        }
    }
}

impl std::fmt::Debug for PropSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropSpec")
            .field("required", &self.required)
            .field("default", &self.default.is_some())
            .finish()
    }
}

/// Declared props of a component, in declaration order.
pub type PropsSchema = IndexMap<String, PropSpec>;

/// Raw prop values handed down by a parent.
pub type PropsData = IndexMap<String, Value>;

/// Resolves the value a prop takes for an instance.
///
/// `None` means the prop is absent.
pub trait PropValidator {
    fn validate(
        &self,
        key: &str,
        schema: &PropsSchema,
        data: &PropsData,
        instance: &Instance,
    ) -> Option<Value>;
}

/// Passes raw values through, falls back to declared defaults and warns
/// about missing required props.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPropValidator;

impl PropValidator for DefaultPropValidator {
    fn validate(
        &self,
        key: &str,
        schema: &PropsSchema,
        data: &PropsData,
        instance: &Instance,
    ) -> Option<Value> {
        let spec = schema.get(key);
        if let Some(value) = data.get(key) {
            return Some(value.clone());
        }
        match spec {
            Some(spec) if spec.required => {
                error::warn(
                    Warning::MissingRequiredProp {
                        key: key.to_string(),
                    },
                    Some(instance),
                );
                None
            }
            Some(spec) => spec.default.clone(),
            None => None,
        }
    }
}
