//! Validation of submitted script forms

use indexmap::IndexMap;

use super::{FormField, ScriptForm, JOB_DESCRIPTION, JOB_NAME, SCRIPTLY_PARSER, SCRIPTLY_TYPE};
use crate::error::{FormErrors, NON_FIELD_ERRORS};
use crate::models::FieldKind;

const REQUIRED: &str = "This field is required.";

/// An uploaded file
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Raw form submission: every input may carry several values
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub text: IndexMap<String, Vec<String>>,
    pub files: IndexMap<String, Vec<Upload>>,
}

impl Submission {
    pub fn add_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.text.entry(name.into()).or_default().push(value.into());
    }

    pub fn add_file(&mut self, name: impl Into<String>, upload: Upload) {
        self.files.entry(name.into()).or_default().push(upload);
    }

    /// Last value of a text input
    pub fn get(&self, name: &str) -> Option<&str> {
        self.text.get(name).and_then(|v| v.last()).map(String::as_str)
    }

    /// The script version the submission targets
    pub fn version_id(&self) -> Result<i32, FormErrors> {
        parse_meta_int(self, SCRIPTLY_TYPE, true).map(|v| v.unwrap_or_default())
    }
}

/// A validated value of one field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Upload(Upload),
    /// A file already in storage, referenced by its storage name
    StoredPath(String),
}

/// Validated submission
#[derive(Debug, Clone)]
pub struct CleanedData {
    pub version_id: i32,
    /// Selected subparser, `None` for the main parser only
    pub parser_id: Option<i32>,
    pub job_name: String,
    pub job_description: Option<String>,
    /// Form slug -> values
    pub values: IndexMap<String, Vec<FieldValue>>,
}

fn push_error(errors: &mut FormErrors, field: &str, message: impl Into<String>) {
    errors.entry(field.to_string()).or_default().push(message.into());
}

fn parse_meta_int(submission: &Submission, name: &str, required: bool) -> Result<Option<i32>, FormErrors> {
    let mut errors = FormErrors::new();
    match submission.get(name).map(str::trim).filter(|v| !v.is_empty()) {
        None if required => push_error(&mut errors, name, REQUIRED),
        None => return Ok(None),
        Some(raw) => match raw.parse::<i32>() {
            Ok(v) => return Ok(Some(v)),
            Err(_) => push_error(&mut errors, name, "Enter a whole number."),
        },
    }
    Err(errors)
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "true" | "on" | "1" | "yes")
}

/// Clean every value of one field, reporting problems into `errors`
fn clean_field(field: &FormField, submission: &Submission, errors: &mut FormErrors) -> Vec<FieldValue> {
    let raw: Vec<&str> = submission
        .text
        .get(&field.name)
        .map(|values| values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()).collect())
        .unwrap_or_default();

    let mut values = Vec::new();
    match field.kind {
        FieldKind::BooleanField => {
            if submission.text.contains_key(&field.name) {
                let checked = submission.text[&field.name].iter().any(|v| is_truthy(v));
                values.push(FieldValue::Bool(checked));
            }
            return values;
        }
        FieldKind::FileField if field.is_output => {
            values.extend(raw.iter().map(|v| FieldValue::Text(v.to_string())));
        }
        FieldKind::FileField => {
            if let Some(uploads) = submission.files.get(&field.name) {
                values.extend(
                    uploads
                        .iter()
                        .filter(|u| !u.filename.is_empty())
                        .cloned()
                        .map(FieldValue::Upload),
                );
            }
            values.extend(raw.iter().map(|v| FieldValue::StoredPath(v.to_string())));
        }
        kind => {
            for value in &raw {
                if !field.choices.is_empty() && !field.choices.iter().any(|c| c == value) {
                    push_error(
                        errors,
                        &field.name,
                        format!("Select a valid choice. {} is not one of the available choices.", value),
                    );
                    continue;
                }
                match kind {
                    FieldKind::IntegerField => match value.parse::<i64>() {
                        Ok(v) => values.push(FieldValue::Int(v)),
                        Err(_) => push_error(errors, &field.name, "Enter a whole number."),
                    },
                    FieldKind::FloatField => match value.parse::<f64>() {
                        Ok(v) if v.is_finite() => values.push(FieldValue::Float(v)),
                        _ => push_error(errors, &field.name, "Enter a number."),
                    },
                    _ => values.push(FieldValue::Text(value.to_string())),
                }
            }
        }
    }

    if !field.multiple && values.len() > 1 {
        values = values.split_off(values.len() - 1);
    }
    values
}

fn check_limits(field: &FormField, values: &[FieldValue], errors: &mut FormErrors) {
    if errors.contains_key(&field.name) {
        return;
    }
    let exempt = field.kind == FieldKind::BooleanField || (field.kind == FieldKind::FileField && field.is_output);
    if values.is_empty() && !exempt && (field.required || field.min_choices >= 1) {
        push_error(errors, &field.name, REQUIRED);
        return;
    }
    if field.multiple && field.max_choices >= 0 && values.len() as i64 > field.max_choices {
        push_error(
            errors,
            &field.name,
            format!("Only {} choices are allowed.", field.max_choices),
        );
    }
}

/// Check a submission against a form, returning typed values or per-field errors
pub fn validate_form(form: &ScriptForm, submission: &Submission) -> Result<CleanedData, FormErrors> {
    let mut errors = FormErrors::new();

    let version_id = match submission.version_id() {
        Ok(id) => id,
        Err(e) => {
            errors.extend(e);
            0
        }
    };
    if !errors.contains_key(SCRIPTLY_TYPE) && version_id != form.scriptly_type {
        push_error(&mut errors, NON_FIELD_ERRORS, "The submitted form does not match this script version.");
    }

    let job_name = submission.get(JOB_NAME).map(str::trim).unwrap_or_default().to_string();
    if job_name.is_empty() {
        push_error(&mut errors, JOB_NAME, REQUIRED);
    }
    let job_description = submission
        .get(JOB_DESCRIPTION)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    let main_parser = form.main_parser_id();
    let parser_id = match parse_meta_int(submission, SCRIPTLY_PARSER, false) {
        Ok(None) | Ok(Some(0)) => None,
        Ok(Some(id)) if Some(id) == main_parser => None,
        Ok(Some(id)) if form.parsers.contains_key(&id) => Some(id),
        Ok(Some(_)) => {
            push_error(&mut errors, SCRIPTLY_PARSER, "Select a valid choice.");
            None
        }
        Err(e) => {
            errors.extend(e);
            None
        }
    };

    let mut values = IndexMap::new();
    for field in form.fields() {
        let active = field.parser_id.is_some() && (field.parser_id == main_parser || field.parser_id == parser_id);
        if !active {
            continue;
        }
        let cleaned = clean_field(field, submission, &mut errors);
        check_limits(field, &cleaned, &mut errors);
        if !cleaned.is_empty() {
            values.insert(field.name.clone(), cleaned);
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(CleanedData {
        version_id,
        parser_id,
        job_name,
        job_description,
        values,
    })
}
