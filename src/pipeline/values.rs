//! Typed parameter values: storage coercion, command line rendering and
//! rebasing onto a new job

use std::path::Path;

use serde_json::Value;

use crate::models::{FieldKind, ScriptParameter};

/// One argument derived from a stored parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubprocessArg {
    pub parameter_id: i32,
    /// Option string, `None` for positionals
    pub flag: Option<String>,
    /// `None` for flags that take no value
    pub value: Option<String>,
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn join_path(root: &str, name: &str) -> String {
    Path::new(root).join(name).to_string_lossy().into_owned()
}

/// Normalise a raw value to what is persisted for `param`.
///
/// Input file values must already be storage names (see `FileStore::ingest`).
/// Output file values become `job_output_path/<value or slug>`.
pub fn coerce_value(param: &ScriptParameter, raw: &Value, job_output_path: &str) -> Value {
    match param.form_field {
        FieldKind::CharField => {
            if is_falsy(raw) {
                Value::Null
            } else {
                as_text(raw).map(Value::String).unwrap_or(Value::Null)
            }
        }
        FieldKind::IntegerField => match raw {
            Value::Number(n) if n.is_i64() => raw.clone(),
            Value::String(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => {
                s.parse::<i64>().map(Value::from).unwrap_or(Value::Null)
            }
            _ => Value::Null,
        },
        FieldKind::BooleanField => {
            if is_falsy(raw) {
                Value::Null
            } else {
                Value::Bool(true)
            }
        }
        FieldKind::FloatField => match raw {
            Value::Number(n) => n.as_f64().map(Value::from).unwrap_or(Value::Null),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::from)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        FieldKind::ChoiceField => as_text(raw).map(Value::String).unwrap_or(Value::Null),
        FieldKind::FileField if param.is_output => {
            let name = as_text(raw).filter(|s| !s.is_empty()).unwrap_or_else(|| param.slug.clone());
            Value::String(join_path(job_output_path, &name))
        }
        FieldKind::FileField => match as_text(raw) {
            Some(path) if !path.is_empty() => Value::String(path),
            _ => Value::Null,
        },
    }
}

/// Derive the command line argument of a stored value.
///
/// `job_output_path` is the job directory as a storage name; output files are
/// passed relative to it since the process runs inside that directory. Input
/// files are passed as absolute paths below `local_root`.
pub fn subprocess_arg(
    param: &ScriptParameter,
    value: &Value,
    job_output_path: &str,
    local_root: &Path,
) -> Option<SubprocessArg> {
    if value.is_null() {
        return None;
    }
    let flag = (!param.short_param.is_empty()).then(|| param.short_param.clone());

    let rendered = match param.form_field {
        FieldKind::BooleanField => {
            if is_falsy(value) {
                return None;
            }
            return Some(SubprocessArg {
                parameter_id: param.id,
                flag,
                value: None,
            });
        }
        FieldKind::FileField if param.is_output => {
            let stored = as_text(value)?;
            match Path::new(&stored).strip_prefix(job_output_path) {
                Ok(relative) if !relative.as_os_str().is_empty() => relative.to_string_lossy().into_owned(),
                _ => local_root.join(&stored).to_string_lossy().into_owned(),
            }
        }
        FieldKind::FileField => {
            let stored = as_text(value)?;
            local_root.join(stored).to_string_lossy().into_owned()
        }
        _ => as_text(value)?,
    };

    Some(SubprocessArg {
        parameter_id: param.id,
        flag,
        value: Some(rendered),
    })
}

/// Point an output file value of a previous job at `new_output_path`.
///
/// The previous job directory is the segment right below the parent of
/// `new_output_path`; whatever follows it is kept, or the parameter slug
/// when nothing does. Other values are returned unchanged.
pub fn rebase_output_value(param: &ScriptParameter, old_value: &Value, new_output_path: &str) -> Value {
    if param.form_field != FieldKind::FileField || !param.is_output {
        return old_value.clone();
    }
    let Value::String(old) = old_value else {
        return old_value.clone();
    };

    let new_root = Path::new(new_output_path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let below_root = match old.find(&new_root) {
        Some(pos) if !new_root.is_empty() => old[pos + new_root.len()..].trim_start_matches('/'),
        _ => old.as_str(),
    };
    // drop the previous job directory
    let remainder = below_root.split_once('/').map(|(_, rest)| rest).unwrap_or("");
    let name = if remainder.is_empty() { param.slug.as_str() } else { remainder };

    Value::String(join_path(new_output_path, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parameter::test_support::param;
    use serde_json::json;
    use std::path::PathBuf;

    const OUT: &str = "scriptly_files/alice/merge/1111";

    #[test]
    fn test_coerce_char_and_choice() {
        let p = param(1, "name", "--name", FieldKind::CharField);
        assert_eq!(coerce_value(&p, &json!(""), OUT), Value::Null);
        assert_eq!(coerce_value(&p, &Value::Null, OUT), Value::Null);
        assert_eq!(coerce_value(&p, &json!("abc"), OUT), json!("abc"));
        let c = param(2, "mode", "--mode", FieldKind::ChoiceField);
        assert_eq!(coerce_value(&c, &json!(3), OUT), json!("3"));
    }

    #[test]
    fn test_coerce_numbers() {
        let i = param(1, "n", "-n", FieldKind::IntegerField);
        assert_eq!(coerce_value(&i, &json!(5), OUT), json!(5));
        assert_eq!(coerce_value(&i, &json!("42"), OUT), json!(42));
        assert_eq!(coerce_value(&i, &json!("4.2"), OUT), Value::Null);
        assert_eq!(coerce_value(&i, &json!("abc"), OUT), Value::Null);
        let f = param(2, "x", "-x", FieldKind::FloatField);
        assert_eq!(coerce_value(&f, &json!("0.25"), OUT), json!(0.25));
        assert_eq!(coerce_value(&f, &json!(2), OUT), json!(2.0));
        assert_eq!(coerce_value(&f, &json!("nope"), OUT), Value::Null);
    }

    #[test]
    fn test_coerce_boolean() {
        let b = param(1, "verbose", "-v", FieldKind::BooleanField);
        assert_eq!(coerce_value(&b, &json!(false), OUT), Value::Null);
        assert_eq!(coerce_value(&b, &Value::Null, OUT), Value::Null);
        assert_eq!(coerce_value(&b, &json!(true), OUT), json!(true));
        assert_eq!(coerce_value(&b, &json!("yes"), OUT), json!(true));
    }

    #[test]
    fn test_coerce_files() {
        let mut out = param(1, "output", "--out", FieldKind::FileField);
        out.is_output = true;
        assert_eq!(coerce_value(&out, &json!("result.csv"), OUT), json!(format!("{}/result.csv", OUT)));
        assert_eq!(coerce_value(&out, &Value::Null, OUT), json!(format!("{}/output", OUT)));
        let input = param(2, "input", "--input", FieldKind::FileField);
        assert_eq!(coerce_value(&input, &json!("scriptly_files/ab/cd/x.csv"), OUT), json!("scriptly_files/ab/cd/x.csv"));
        assert_eq!(coerce_value(&input, &json!(""), OUT), Value::Null);
    }

    #[test]
    fn test_subprocess_arg() {
        let root = PathBuf::from("/srv/media");
        let b = param(1, "verbose", "-v", FieldKind::BooleanField);
        assert_eq!(
            subprocess_arg(&b, &json!(true), OUT, &root),
            Some(SubprocessArg { parameter_id: 1, flag: Some("-v".to_string()), value: None })
        );
        assert_eq!(subprocess_arg(&b, &Value::Null, OUT, &root), None);

        let mut out = param(2, "output", "--out", FieldKind::FileField);
        out.is_output = true;
        let arg = subprocess_arg(&out, &json!(format!("{}/result.csv", OUT)), OUT, &root).unwrap();
        assert_eq!(arg.value.as_deref(), Some("result.csv"));

        let input = param(3, "input", "", FieldKind::FileField);
        let arg = subprocess_arg(&input, &json!("scriptly_files/ab/cd/x.csv"), OUT, &root).unwrap();
        assert_eq!(arg.flag, None);
        assert_eq!(arg.value.as_deref(), Some("/srv/media/scriptly_files/ab/cd/x.csv"));

        let f = param(4, "ratio", "--ratio", FieldKind::FloatField);
        let arg = subprocess_arg(&f, &json!(1.5), OUT, &root).unwrap();
        assert_eq!(arg.value.as_deref(), Some("1.5"));
    }

    #[test]
    fn test_rebase_output_value() {
        let mut out = param(1, "output", "--out", FieldKind::FileField);
        out.is_output = true;
        let new_path = "scriptly_files/alice/merge/2222";
        let old = json!(format!("{}/result.csv", OUT));
        assert_eq!(rebase_output_value(&out, &old, new_path), json!("scriptly_files/alice/merge/2222/result.csv"));

        let nested = json!(format!("{}/plots/a.png", OUT));
        assert_eq!(
            rebase_output_value(&out, &nested, new_path),
            json!("scriptly_files/alice/merge/2222/plots/a.png")
        );

        let bare = json!(OUT);
        assert_eq!(rebase_output_value(&out, &bare, new_path), json!("scriptly_files/alice/merge/2222/output"));

        let input = param(2, "input", "--input", FieldKind::FileField);
        let value = json!("scriptly_files/ab/cd/x.csv");
        assert_eq!(rebase_output_value(&input, &value, new_path), value);
    }
}
