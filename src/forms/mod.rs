//! Form descriptions generated from script parameters
//!
//! A script version is turned into a [`ScriptForm`]: one entry per parser,
//! each holding its parameter groups and fields. The front-end renders the
//! description, and submissions are checked against it by [`validate_form`].

pub mod validation;

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::models::{FieldKind, ScriptParameter, ScriptParameterGroup, ScriptParser};

pub use validation::{validate_form, CleanedData, FieldValue, Submission, Upload};

/// Name of the hidden field carrying the script version id
pub const SCRIPTLY_TYPE: &str = "scriptly_type";
/// Name of the field selecting the subparser
pub const SCRIPTLY_PARSER: &str = "scriptly_parser";
pub const JOB_NAME: &str = "job_name";
pub const JOB_DESCRIPTION: &str = "job_description";

/// How a field is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Widget {
    Checkbox,
    Select,
    Multiselect,
    File,
    OutputFile,
    Number,
    Text,
    Textarea,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FormField {
    /// Input name (`"{parser_id}-{slug}"` for parameters)
    pub name: String,
    pub param_id: Option<i32>,
    pub parser_id: Option<i32>,
    pub label: String,
    pub kind: FieldKind,
    pub widget: Widget,
    pub required: bool,
    pub help: Option<String>,
    pub choices: Vec<String>,
    pub multiple: bool,
    /// `-1` when unbounded
    pub max_choices: i64,
    pub min_choices: u32,
    pub hidden: bool,
    pub is_output: bool,
    #[schema(value_type = Vec<Object>)]
    pub initial: Vec<Value>,
    pub checked: bool,
}

impl FormField {
    fn meta(name: &str, label: &str, required: bool, widget: Widget) -> Self {
        FormField {
            name: name.to_string(),
            param_id: None,
            parser_id: None,
            label: label.to_string(),
            kind: FieldKind::CharField,
            widget,
            required,
            help: None,
            choices: Vec::new(),
            multiple: false,
            max_choices: 1,
            min_choices: 0,
            hidden: false,
            is_output: false,
            initial: Vec::new(),
            checked: false,
        }
    }

    fn for_parameter(param: &ScriptParameter, initial: Vec<Value>) -> Self {
        let limit = param.limit();
        let choices = param.choice_list();
        let multiple = limit.multiple_choice();
        let widget = match param.form_field {
            FieldKind::BooleanField => Widget::Checkbox,
            FieldKind::FileField if param.is_output => Widget::OutputFile,
            FieldKind::FileField => Widget::File,
            _ if !choices.is_empty() && multiple => Widget::Multiselect,
            _ if !choices.is_empty() => Widget::Select,
            FieldKind::IntegerField | FieldKind::FloatField => Widget::Number,
            FieldKind::ChoiceField | FieldKind::CharField => Widget::Text,
        };
        FormField {
            name: param.form_slug(),
            param_id: Some(param.id),
            parser_id: Some(param.parser_id),
            label: param.script_param.clone(),
            kind: param.form_field,
            widget,
            required: param.required,
            help: param.param_help.clone(),
            choices,
            multiple,
            max_choices: limit.max_choices(),
            min_choices: limit.min_choices(),
            hidden: param.hidden,
            is_output: param.is_output,
            initial,
            checked: param.is_checked,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FormGroup {
    pub id: i32,
    pub group_name: String,
    pub hidden: bool,
    pub fields: Vec<FormField>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FormParser {
    pub id: i32,
    /// Empty for the main parser
    pub name: String,
    pub groups: Vec<FormGroup>,
}

/// Complete form for one script version
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScriptForm {
    pub scriptly_type: i32,
    /// `job_name` and `job_description`
    pub job_fields: Vec<FormField>,
    /// Parser id -> parser, main parser first
    #[schema(value_type = Object)]
    pub parsers: IndexMap<i32, FormParser>,
    /// Subparser preselected from a cloned job
    pub initial_parser: Option<i32>,
}

impl ScriptForm {
    pub fn main_parser_id(&self) -> Option<i32> {
        self.parsers.values().find(|p| p.name.is_empty()).map(|p| p.id)
    }

    pub fn fields(&self) -> impl Iterator<Item = &FormField> {
        self.parsers
            .values()
            .flat_map(|p| p.groups.iter())
            .flat_map(|g| g.fields.iter())
    }
}

/// Values pre-filled into a form
#[derive(Debug, Clone, Default)]
pub struct FormInitial {
    /// Parameter id -> values of a cloned job
    pub job_values: HashMap<i32, Vec<Value>>,
    /// Script parameter name -> values from the query string
    pub query: HashMap<String, Vec<String>>,
    pub parser: Option<i32>,
}

impl FormInitial {
    fn values_for(&self, param: &ScriptParameter) -> Vec<Value> {
        if let Some(values) = self.query.get(&param.script_param) {
            return values.iter().cloned().map(Value::String).collect();
        }
        if let Some(values) = self.job_values.get(&param.id) {
            return values.iter().filter(|v| !v.is_null()).cloned().collect();
        }
        match &param.default_value {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(values)) => values.clone(),
            Some(value) => vec![value.clone()],
        }
    }
}

/// Build the form description of a script version
pub fn get_form_groups(
    version_id: i32,
    parsers: &[ScriptParser],
    groups: &[ScriptParameterGroup],
    parameters: &[ScriptParameter],
    initial: &FormInitial,
) -> ScriptForm {
    let mut ordered_parsers: Vec<&ScriptParser> = parsers.iter().collect();
    ordered_parsers.sort_by_key(|p| (!p.is_main(), p.id));

    let mut ordered_params: Vec<&ScriptParameter> = parameters.iter().collect();
    ordered_params.sort_by_key(|p| (p.param_order, p.id));

    let group_index: HashMap<i32, &ScriptParameterGroup> = groups.iter().map(|g| (g.id, g)).collect();

    let mut form_parsers: IndexMap<i32, FormParser> = ordered_parsers
        .iter()
        .map(|p| {
            (
                p.id,
                FormParser {
                    id: p.id,
                    name: p.name.clone(),
                    groups: Vec::new(),
                },
            )
        })
        .collect();

    for param in ordered_params {
        let Some(parser) = form_parsers.get_mut(&param.parser_id) else {
            tracing::warn!("Parameter {} references unknown parser {}", param.id, param.parser_id);
            continue;
        };
        let field = FormField::for_parameter(param, initial.values_for(param));
        match parser.groups.iter_mut().find(|g| g.id == param.parameter_group_id) {
            Some(group) => group.fields.push(field),
            None => {
                let (group_name, hidden) = group_index
                    .get(&param.parameter_group_id)
                    .map(|g| (g.group_name.clone(), g.hidden))
                    .unwrap_or_else(|| ("Parameters".to_string(), false));
                parser.groups.push(FormGroup {
                    id: param.parameter_group_id,
                    group_name,
                    hidden,
                    fields: vec![field],
                });
            }
        }
    }

    let initial_parser = initial
        .parser
        .filter(|id| form_parsers.get(id).map(|p| !p.name.is_empty()).unwrap_or(false));

    ScriptForm {
        scriptly_type: version_id,
        job_fields: vec![
            FormField::meta(JOB_NAME, "Job Name", true, Widget::Text),
            FormField::meta(JOB_DESCRIPTION, "Job Description", false, Widget::Textarea),
        ],
        parsers: form_parsers,
        initial_parser,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parameter::test_support::param;
    use serde_json::json;

    fn fixtures() -> (Vec<ScriptParser>, Vec<ScriptParameterGroup>, Vec<ScriptParameter>) {
        let parsers = vec![
            ScriptParser { id: 2, name: "zip".to_string() },
            ScriptParser { id: 1, name: String::new() },
        ];
        let groups = vec![
            ScriptParameterGroup { id: 1, group_name: "Required".to_string(), hidden: false },
            ScriptParameterGroup { id: 2, group_name: "Advanced".to_string(), hidden: true },
        ];
        let mut input = param(10, "input", "--input", FieldKind::FileField);
        input.param_order = 1;
        let mut output = param(11, "output", "--out", FieldKind::FileField);
        output.is_output = true;
        output.param_order = 2;
        let mut mode = param(12, "mode", "--mode", FieldKind::ChoiceField);
        mode.choices = Some(r#"["a", "b", "c"]"#.to_string());
        mode.choice_limit = Some("2".to_string());
        mode.parameter_group_id = 2;
        mode.default_value = Some(json!(["a"]));
        let mut level = param(13, "level", "--level", FieldKind::IntegerField);
        level.parser_id = 2;
        level.default_value = Some(json!(6));
        (parsers, groups, vec![output, mode, input, level])
    }

    #[test]
    fn test_form_layout() {
        let (parsers, groups, params) = fixtures();
        let form = get_form_groups(5, &parsers, &groups, &params, &FormInitial::default());
        assert_eq!(form.scriptly_type, 5);
        assert_eq!(form.parsers.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        let main = &form.parsers[&1];
        assert_eq!(main.groups[0].group_name, "Advanced");
        assert!(main.groups[0].hidden);
        let required: Vec<&str> = main.groups[1].fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(required, vec!["1-input", "1-output"]);
        assert_eq!(main.groups[1].fields[1].widget, Widget::OutputFile);
        assert_eq!(form.parsers[&2].groups[0].fields[0].name, "2-level");
        assert_eq!(form.main_parser_id(), Some(1));
    }

    #[test]
    fn test_widgets_and_limits() {
        let (parsers, groups, params) = fixtures();
        let form = get_form_groups(5, &parsers, &groups, &params, &FormInitial::default());
        let mode = form.fields().find(|f| f.name == "1-mode").unwrap();
        assert_eq!(mode.widget, Widget::Multiselect);
        assert!(mode.multiple);
        assert_eq!(mode.max_choices, 2);
        assert_eq!(mode.initial, vec![json!("a")]);
        let level = form.fields().find(|f| f.name == "2-level").unwrap();
        assert_eq!(level.widget, Widget::Number);
        assert_eq!(level.initial, vec![json!(6)]);
    }

    #[test]
    fn test_initial_precedence() {
        let (parsers, groups, params) = fixtures();
        let mut initial = FormInitial::default();
        initial.job_values.insert(12, vec![json!("b"), json!("c")]);
        initial.job_values.insert(13, vec![json!(9)]);
        initial.query.insert("level".to_string(), vec!["3".to_string()]);
        initial.parser = Some(2);
        let form = get_form_groups(5, &parsers, &groups, &params, &initial);
        let mode = form.fields().find(|f| f.name == "1-mode").unwrap();
        assert_eq!(mode.initial, vec![json!("b"), json!("c")]);
        let level = form.fields().find(|f| f.name == "2-level").unwrap();
        assert_eq!(level.initial, vec![json!("3")]);
        assert_eq!(form.initial_parser, Some(2));
    }

    #[test]
    fn test_main_parser_is_never_initial() {
        let (parsers, groups, params) = fixtures();
        let initial = FormInitial { parser: Some(1), ..Default::default() };
        let form = get_form_groups(5, &parsers, &groups, &params, &initial);
        assert_eq!(form.initial_parser, None);
    }
}
