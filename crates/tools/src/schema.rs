//! Parameter schemas.
//!
//! A tool takes either one flat [`ObjectSchema`] or a set of variants keyed
//! by a string `operation` field, each with its own sub-schema. Validation
//! stops at the first offending field and names it.

use regex::Regex;
use serde_json::{json, Map, Value};

/// Field that selects the variant in a variant schema.
pub const OPERATION: &str = "operation";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid parameter `{field}`: {message}")]
pub struct SchemaError {
    pub field: String,
    pub message: String,
}

impl SchemaError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<SchemaError> for hamcp_domain::Error {
    fn from(e: SchemaError) -> Self {
        hamcp_domain::Error::Validation {
            field: e.field,
            message: e.message,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub description: String,
    pub required: bool,
    pub allowed: Vec<String>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub pattern: Option<Regex>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            description: description.into(),
            required: false,
            allowed: Vec::new(),
            minimum: None,
            maximum: None,
            pattern: None,
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParamType::String, description)
    }

    pub fn integer(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParamType::Integer, description)
    }

    pub fn boolean(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParamType::Boolean, description)
    }

    pub fn object(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParamType::Object, description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = values.iter().map(|v| (*v).to_owned()).collect();
        self
    }

    pub fn range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn pattern(mut self, re: &str) -> Result<Self, SchemaError> {
        let compiled = Regex::new(re)
            .map_err(|e| SchemaError::new(self.name.clone(), format!("bad pattern: {e}")))?;
        self.pattern = Some(compiled);
        Ok(self)
    }

    fn validate(&self, field: &str, value: &Value) -> Result<(), SchemaError> {
        if !self.ty.accepts(value) {
            return Err(SchemaError::new(
                field,
                format!("expected {}, got {}", self.ty.as_str(), json_type(value)),
            ));
        }

        if !self.allowed.is_empty() {
            let ok = value.as_str().is_some_and(|s| self.allowed.iter().any(|a| a == s));
            if !ok {
                return Err(SchemaError::new(
                    field,
                    format!("must be one of: {}", self.allowed.join(", ")),
                ));
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.minimum {
                if n < min {
                    return Err(SchemaError::new(field, format!("must be >= {min}")));
                }
            }
            if let Some(max) = self.maximum {
                if n > max {
                    return Err(SchemaError::new(field, format!("must be <= {max}")));
                }
            }
        }

        if let (Some(re), Some(s)) = (&self.pattern, value.as_str()) {
            if !re.is_match(s) {
                return Err(SchemaError::new(
                    field,
                    format!("does not match pattern {}", re.as_str()),
                ));
            }
        }

        Ok(())
    }

    fn to_json_schema(&self) -> Value {
        let mut prop = Map::new();
        if self.ty != ParamType::Any {
            prop.insert("type".into(), json!(self.ty.as_str()));
        }
        prop.insert("description".into(), json!(self.description));
        if !self.allowed.is_empty() {
            prop.insert("enum".into(), json!(self.allowed));
        }
        if let Some(min) = self.minimum {
            prop.insert("minimum".into(), json!(min));
        }
        if let Some(max) = self.maximum {
            prop.insert("maximum".into(), json!(max));
        }
        if let Some(re) = &self.pattern {
            prop.insert("pattern".into(), json!(re.as_str()));
        }
        Value::Object(prop)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schemas
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Flat object schema. Fields not listed are rejected.
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    pub params: Vec<ParamSpec>,
}

impl ObjectSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    fn validate(&self, args: &Map<String, Value>, tag: Option<&str>) -> Result<(), SchemaError> {
        for key in args.keys() {
            if Some(key.as_str()) == tag {
                continue;
            }
            if !self.params.iter().any(|p| &p.name == key) {
                return Err(SchemaError::new(key.as_str(), "unknown field"));
            }
        }

        for spec in &self.params {
            match args.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(SchemaError::new(spec.name.as_str(), "is required"));
                }
                None | Some(Value::Null) => {}
                Some(value) => spec.validate(&spec.name, value)?,
            }
        }
        Ok(())
    }

    fn to_json_schema(&self, tag: Option<(&str, &str)>) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        if let Some((name, description)) = tag {
            properties.insert(
                OPERATION.into(),
                json!({ "const": name, "description": description }),
            );
            required.push(OPERATION.to_owned());
        }
        for spec in &self.params {
            properties.insert(spec.name.clone(), spec.to_json_schema());
            if spec.required {
                required.push(spec.name.clone());
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Variant {
    pub name: String,
    pub description: String,
    pub schema: ObjectSchema,
}

#[derive(Debug, Clone)]
pub enum ParamSchema {
    Object(ObjectSchema),
    /// Tagged by the `operation` field.
    Variants(Vec<Variant>),
}

impl ParamSchema {
    pub fn variants() -> VariantsBuilder {
        VariantsBuilder::default()
    }

    /// Check `args` and return them as an object (`null` counts as `{}`).
    pub fn validate(&self, args: Value) -> Result<Value, SchemaError> {
        let map = match args {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(SchemaError::new(
                    "arguments",
                    format!("expected object, got {}", json_type(&other)),
                ))
            }
        };

        match self {
            Self::Object(schema) => schema.validate(&map, None)?,
            Self::Variants(variants) => {
                let op = match map.get(OPERATION) {
                    Some(Value::String(op)) => op.as_str(),
                    Some(other) => {
                        return Err(SchemaError::new(
                            OPERATION,
                            format!("expected string, got {}", json_type(other)),
                        ))
                    }
                    None => return Err(SchemaError::new(OPERATION, "is required")),
                };
                let variant = variants.iter().find(|v| v.name == op).ok_or_else(|| {
                    let names: Vec<&str> = variants.iter().map(|v| v.name.as_str()).collect();
                    SchemaError::new(
                        OPERATION,
                        format!("unknown operation `{op}`, expected one of: {}", names.join(", ")),
                    )
                })?;
                variant.schema.validate(&map, Some(OPERATION))?;
            }
        }
        Ok(Value::Object(map))
    }

    /// JSON-schema rendering for `tools/list`.
    pub fn to_json_schema(&self) -> Value {
        match self {
            Self::Object(schema) => schema.to_json_schema(None),
            Self::Variants(variants) => {
                let names: Vec<&str> = variants.iter().map(|v| v.name.as_str()).collect();
                let one_of: Vec<Value> = variants
                    .iter()
                    .map(|v| v.schema.to_json_schema(Some((v.name.as_str(), v.description.as_str()))))
                    .collect();
                json!({
                    "type": "object",
                    "properties": {
                        OPERATION: { "type": "string", "enum": names }
                    },
                    "required": [OPERATION],
                    "oneOf": one_of,
                })
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct VariantsBuilder {
    variants: Vec<Variant>,
}

impl VariantsBuilder {
    pub fn op(mut self, name: &str, description: &str, params: Vec<ParamSpec>) -> Self {
        self.variants.push(Variant {
            name: name.to_owned(),
            description: description.to_owned(),
            schema: ObjectSchema::new(params),
        });
        self
    }

    pub fn build(self) -> ParamSchema {
        ParamSchema::Variants(self.variants)
    }
}
