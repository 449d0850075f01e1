//! Parameter schema submitted when a script is registered

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::parameter::{ChoiceLimit, FieldKind, ParameterSignature};

/// Parameter description of a script: parser name -> parameter groups.
/// The empty parser name is the main parser.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ScriptSchema {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub inputs: IndexMap<String, Vec<SchemaGroup>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SchemaGroup {
    pub group: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub nodes: Vec<SchemaNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SchemaNode {
    /// Destination name
    pub name: String,
    /// Option string, empty for positionals
    #[serde(default)]
    pub param: String,
    /// Form field class name
    pub model: String,
    #[serde(rename = "type", default = "default_input_type")]
    pub input_type: String,
    /// File parameters with `upload = false` are outputs
    #[serde(default)]
    pub upload: Option<bool>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub help: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Vec<Object>>)]
    pub choices: Option<Vec<Value>>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub choice_limit: Option<Value>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub default: Option<Value>,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default = "default_collapse")]
    pub collapse_arguments: bool,
}

fn default_input_type() -> String {
    "str".to_string()
}

fn default_collapse() -> bool {
    true
}

impl ScriptSchema {
    pub fn from_json(raw: &str) -> Result<Self, String> {
        let schema: ScriptSchema =
            serde_json::from_str(raw).map_err(|e| format!("Invalid script schema: {}", e))?;
        schema.check()?;
        Ok(schema)
    }

    pub fn version(&self) -> String {
        self.version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("1")
            .to_string()
    }

    /// Parser names, main parser first
    pub fn parser_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inputs.keys().cloned().collect();
        names.sort_by_key(|name| !name.is_empty());
        if !names.iter().any(|n| n.is_empty()) {
            names.insert(0, String::new());
        }
        names
    }

    fn check(&self) -> Result<(), String> {
        for (parser, groups) in &self.inputs {
            for group in groups {
                for node in &group.nodes {
                    node.form_field()
                        .map_err(|e| format!("{} (parameter '{}' of parser '{}')", e, node.name, parser))?;
                    if node.name.trim().is_empty() {
                        return Err(format!("A parameter of parser '{}' has no name", parser));
                    }
                }
            }
        }
        Ok(())
    }
}

impl SchemaNode {
    pub fn form_field(&self) -> Result<FieldKind, String> {
        self.model.parse()
    }

    pub fn is_output(&self) -> bool {
        matches!(self.form_field(), Ok(FieldKind::FileField)) && self.upload == Some(false)
    }

    pub fn choice_limit(&self) -> ChoiceLimit {
        match &self.choice_limit {
            None => ChoiceLimit::None,
            Some(value) => ChoiceLimit::parse(Some(&value.to_string())),
        }
    }

    /// Describe the parameter the way it would be stored
    pub fn signature(&self, parser_name: &str, group_name: &str) -> Result<ParameterSignature, String> {
        Ok(ParameterSignature {
            parser_name: parser_name.to_string(),
            group_name: group_name.to_string(),
            short_param: self.param.clone(),
            script_param: self.name.clone(),
            is_output: self.is_output(),
            required: self.required,
            choices: self
                .choices
                .as_ref()
                .map(|c| serde_json::to_string(c).unwrap_or_else(|_| "[]".to_string())),
            choice_limit: self.choice_limit().to_json(),
            collapse_arguments: self.collapse_arguments,
            form_field: self.form_field()?,
            default_value: self.default.clone().filter(|v| !v.is_null()),
            input_type: self.input_type.clone(),
            param_help: self.help.clone(),
            is_checked: self.checked,
            hidden: self.hidden,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "name": "merge",
        "version": "2",
        "inputs": {
            "zip": [{"group": "Archive", "nodes": [{"name": "level", "param": "--level", "model": "IntegerField"}]}],
            "": [{"group": "Required", "nodes": [
                {"name": "inputs", "param": "--inputs", "model": "FileField", "type": "file",
                 "upload": true, "required": true, "choice_limit": ">=1"},
                {"name": "output", "param": "--out", "model": "FileField", "upload": false}
            ]}]
        }
    }"#;

    #[test]
    fn test_parse_schema() {
        let schema = ScriptSchema::from_json(SCHEMA).unwrap();
        assert_eq!(schema.version(), "2");
        assert_eq!(schema.parser_names(), vec!["".to_string(), "zip".to_string()]);
        let nodes = &schema.inputs[""][0].nodes;
        assert!(!nodes[0].is_output());
        assert!(nodes[1].is_output());
        assert_eq!(nodes[0].choice_limit(), ChoiceLimit::AtLeast(1));
        assert!(nodes[1].collapse_arguments);
    }

    #[test]
    fn test_signature() {
        let schema = ScriptSchema::from_json(SCHEMA).unwrap();
        let sig = schema.inputs[""][0].nodes[0].signature("", "Required").unwrap();
        assert_eq!(sig.form_field, FieldKind::FileField);
        assert_eq!(sig.choice_limit.as_deref(), Some("\">=1\""));
        assert_eq!(sig.script_param, "inputs");
    }

    #[test]
    fn test_unknown_model_rejected() {
        let raw = r#"{"inputs": {"": [{"group": "g", "nodes": [{"name": "d", "model": "DateField"}]}]}}"#;
        let err = ScriptSchema::from_json(raw).unwrap_err();
        assert!(err.contains("DateField"));
    }

    #[test]
    fn test_default_version_and_main_parser() {
        let schema = ScriptSchema::from_json(r#"{"inputs": {}}"#).unwrap();
        assert_eq!(schema.version(), "1");
        assert_eq!(schema.parser_names(), vec![String::new()]);
    }
}
