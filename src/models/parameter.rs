//! Script parameters, parsers and parameter groups

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Decode, Encode, FromRow, Postgres};
use utoipa::ToSchema;

/// Form field a parameter is rendered with (stored as the field class name)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum FieldKind {
    BooleanField,
    CharField,
    ChoiceField,
    FileField,
    FloatField,
    IntegerField,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::BooleanField => "BooleanField",
            FieldKind::CharField => "CharField",
            FieldKind::ChoiceField => "ChoiceField",
            FieldKind::FileField => "FileField",
            FieldKind::FloatField => "FloatField",
            FieldKind::IntegerField => "IntegerField",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FieldKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BooleanField" => Ok(FieldKind::BooleanField),
            "CharField" => Ok(FieldKind::CharField),
            "ChoiceField" | "MultipleChoiceField" => Ok(FieldKind::ChoiceField),
            "FileField" => Ok(FieldKind::FileField),
            "FloatField" | "DecimalField" => Ok(FieldKind::FloatField),
            "IntegerField" => Ok(FieldKind::IntegerField),
            _ => Err(format!("Unknown form field: {}", s)),
        }
    }
}

// SQLx conversion for FieldKind
impl sqlx::Type<Postgres> for FieldKind {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for FieldKind {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s: String = Decode::<Postgres>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl Encode<'_, Postgres> for FieldKind {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        <String as Encode<Postgres>>::encode(self.as_str().to_string(), buf)
    }
}

/// How many values a parameter takes, decoded from the stored JSON text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceLimit {
    /// A single value
    None,
    /// A fixed maximum (`nargs=3`)
    Count(i64),
    /// Open ended: `">=0"` or `">=1"`
    AtLeast(u32),
    /// Any other marker (e.g. `"?"`), treated as unbounded
    Other(String),
}

impl ChoiceLimit {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return ChoiceLimit::None;
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Null) => ChoiceLimit::None,
            Ok(Value::Number(n)) => n
                .as_i64()
                .map(ChoiceLimit::Count)
                .unwrap_or_else(|| ChoiceLimit::Other(n.to_string())),
            Ok(Value::String(s)) => Self::parse_marker(&s),
            _ => Self::parse_marker(raw),
        }
    }

    fn parse_marker(marker: &str) -> Self {
        let marker = marker.trim();
        if marker.is_empty() {
            return ChoiceLimit::None;
        }
        if let Ok(n) = marker.parse::<i64>() {
            return ChoiceLimit::Count(n);
        }
        if let Some(min) = marker.strip_prefix(">=").and_then(|m| m.trim().parse::<u32>().ok()) {
            return ChoiceLimit::AtLeast(min);
        }
        ChoiceLimit::Other(marker.to_string())
    }

    /// JSON text stored in `script_parameters.choice_limit`
    pub fn to_json(&self) -> Option<String> {
        match self {
            ChoiceLimit::None => None,
            ChoiceLimit::Count(n) => Some(n.to_string()),
            ChoiceLimit::AtLeast(n) => Some(format!("\">={}\"", n)),
            ChoiceLimit::Other(s) => serde_json::to_string(s).ok(),
        }
    }

    pub fn multiple_choice(&self) -> bool {
        match self {
            ChoiceLimit::None => false,
            ChoiceLimit::Count(n) => *n > 1,
            _ => true,
        }
    }

    /// Maximum number of values, `-1` when unbounded
    pub fn max_choices(&self) -> i64 {
        match self {
            ChoiceLimit::None => 1,
            ChoiceLimit::Count(n) => *n,
            _ => -1,
        }
    }

    pub fn min_choices(&self) -> u32 {
        match self {
            ChoiceLimit::AtLeast(n) => *n,
            _ => 0,
        }
    }
}

/// A named invocation mode of a script; the empty name is the main parser
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ScriptParser {
    pub id: i32,
    pub name: String,
}

impl ScriptParser {
    pub fn is_main(&self) -> bool {
        self.name.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ScriptParameterGroup {
    pub id: i32,
    pub group_name: String,
    pub hidden: bool,
}

/// A typed input or output slot of a script version
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ScriptParameter {
    pub id: i32,
    pub parser_id: i32,
    /// Option string passed on the command line (`--input`); empty for positionals
    pub short_param: String,
    /// Destination name of the parameter
    pub script_param: String,
    pub slug: String,
    pub is_output: bool,
    pub required: bool,
    /// JSON encoded list of allowed values
    pub choices: Option<String>,
    /// JSON encoded choice limit (see [`ChoiceLimit`])
    pub choice_limit: Option<String>,
    pub collapse_arguments: bool,
    pub form_field: FieldKind,
    #[schema(value_type = Option<Object>)]
    pub default_value: Option<Value>,
    /// Type expected by the script (e.g. `int`, `file`)
    pub input_type: String,
    pub param_help: Option<String>,
    pub is_checked: bool,
    pub hidden: bool,
    pub parameter_group_id: i32,
    pub param_order: i16,
}

impl ScriptParameter {
    /// Name of the form input carrying this parameter
    pub fn form_slug(&self) -> String {
        form_slug(self.parser_id, &self.slug)
    }

    pub fn limit(&self) -> ChoiceLimit {
        ChoiceLimit::parse(self.choice_limit.as_deref())
    }

    pub fn multiple_choice(&self) -> bool {
        self.limit().multiple_choice()
    }

    pub fn max_choices(&self) -> i64 {
        self.limit().max_choices()
    }

    pub fn is_positional(&self) -> bool {
        self.short_param.is_empty()
    }

    pub fn is_input_file(&self) -> bool {
        self.form_field == FieldKind::FileField && !self.is_output
    }

    /// Declared choices as strings; numeric choices are stringified
    pub fn choice_list(&self) -> Vec<String> {
        let Some(raw) = self.choices.as_deref() else {
            return Vec::new();
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(values)) => values
                .into_iter()
                .filter_map(|v| match v {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

pub fn form_slug(parser_id: i32, slug: &str) -> String {
    format!("{}-{}", parser_id, slug)
}

/// Fields used to decide whether a parameter from a previous version can be reused
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSignature {
    pub parser_name: String,
    pub group_name: String,
    pub short_param: String,
    pub script_param: String,
    pub is_output: bool,
    pub required: bool,
    pub choices: Option<String>,
    pub choice_limit: Option<String>,
    pub collapse_arguments: bool,
    pub form_field: FieldKind,
    pub default_value: Option<Value>,
    pub input_type: String,
    pub param_help: Option<String>,
    pub is_checked: bool,
    pub hidden: bool,
}

impl ParameterSignature {
    pub fn of(param: &ScriptParameter, parser_name: &str, group_name: &str) -> Self {
        Self {
            parser_name: parser_name.to_string(),
            group_name: group_name.to_string(),
            short_param: param.short_param.clone(),
            script_param: param.script_param.clone(),
            is_output: param.is_output,
            required: param.required,
            choices: param.choices.clone(),
            choice_limit: param.choice_limit.clone(),
            collapse_arguments: param.collapse_arguments,
            form_field: param.form_field,
            default_value: param.default_value.clone(),
            input_type: param.input_type.clone(),
            param_help: param.param_help.clone(),
            is_checked: param.is_checked,
            hidden: param.hidden,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A parameter of the main parser (id 1) with sensible defaults
    pub fn param(id: i32, script_param: &str, short_param: &str, kind: FieldKind) -> ScriptParameter {
        ScriptParameter {
            id,
            parser_id: 1,
            short_param: short_param.to_string(),
            script_param: script_param.to_string(),
            slug: crate::text::slugify(script_param),
            is_output: false,
            required: false,
            choices: None,
            choice_limit: None,
            collapse_arguments: true,
            form_field: kind,
            default_value: None,
            input_type: "str".to_string(),
            param_help: None,
            is_checked: false,
            hidden: false,
            parameter_group_id: 1,
            param_order: 0,
        }
    }
}
