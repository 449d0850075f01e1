//! Command line construction

use crate::models::{JobParameter, ScriptParameter, ScriptParser};

use super::values::SubprocessArg;

/// Assemble the argument vector of a job.
///
/// Main parser arguments come first, then the selected subparser name and
/// its arguments. Within a parser, arguments are grouped by parameter in
/// `(param_order, id)` order.
pub fn build_command(
    interpreter: Option<&str>,
    script_path: &str,
    parsers: &[ScriptParser],
    selected_parser: Option<i32>,
    parameters: &[ScriptParameter],
    args: &[SubprocessArg],
) -> Vec<String> {
    let mut command: Vec<String> = Vec::new();
    if let Some(interpreter) = interpreter.filter(|i| !i.is_empty()) {
        command.push(interpreter.to_string());
    }
    command.push(script_path.to_string());

    let mut ordered: Vec<&ScriptParameter> = parameters.iter().collect();
    ordered.sort_by_key(|p| (p.param_order, p.id));

    let main = parsers.iter().find(|p| p.is_main());
    let selected = selected_parser.and_then(|id| parsers.iter().find(|p| p.id == id && !p.is_main()));

    for parser in main.into_iter().chain(selected) {
        if !parser.is_main() {
            command.push(parser.name.clone());
        }
        for param in ordered.iter().filter(|p| p.parser_id == parser.id) {
            let param_args: Vec<&SubprocessArg> = args.iter().filter(|a| a.parameter_id == param.id).collect();
            append_parameter(&mut command, param, &param_args);
        }
    }
    command
}

/// Subparser of a job: the one recorded at submission, otherwise the
/// non-main parser owning one of its values (jobs saved without a record)
pub fn job_parser(
    recorded: Option<i32>,
    parsers: &[ScriptParser],
    parameters: &[ScriptParameter],
    values: &[JobParameter],
) -> Option<i32> {
    let is_subparser = |id: i32| parsers.iter().any(|p| p.id == id && !p.is_main());
    if let Some(id) = recorded.filter(|id| is_subparser(*id)) {
        return Some(id);
    }
    values.iter().find_map(|value| {
        parameters
            .iter()
            .find(|p| p.id == value.parameter_id)
            .map(|p| p.parser_id)
            .filter(|id| is_subparser(*id))
    })
}

fn append_parameter(command: &mut Vec<String>, param: &ScriptParameter, args: &[&SubprocessArg]) {
    if args.is_empty() {
        return;
    }
    if param.is_positional() {
        command.extend(args.iter().filter_map(|a| a.value.clone()));
        return;
    }
    if param.collapse_arguments {
        // --arg v1 v2
        command.push(param.short_param.clone());
        command.extend(args.iter().filter_map(|a| a.value.clone()));
    } else {
        // --arg v1 --arg v2
        for arg in args {
            command.push(param.short_param.clone());
            if let Some(value) = &arg.value {
                command.push(value.clone());
            }
        }
    }
}

/// Render an argument vector as a POSIX shell command line
pub fn render_command(command: &[String]) -> String {
    command.iter().map(|arg| shell_quote(arg)).collect::<Vec<_>>().join(" ")
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\"'\"'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parameter::test_support::param;
    use crate::models::FieldKind;

    fn arg(parameter_id: i32, flag: &str, value: Option<&str>) -> SubprocessArg {
        SubprocessArg {
            parameter_id,
            flag: (!flag.is_empty()).then(|| flag.to_string()),
            value: value.map(str::to_string),
        }
    }

    fn parsers() -> Vec<ScriptParser> {
        vec![
            ScriptParser { id: 1, name: String::new() },
            ScriptParser { id: 2, name: "zip".to_string() },
            ScriptParser { id: 3, name: "tar".to_string() },
        ]
    }

    #[test]
    fn test_collapse_and_positionals() {
        let mut files = param(10, "files", "", FieldKind::FileField);
        files.param_order = 2;
        let mut tags = param(11, "tags", "--tag", FieldKind::CharField);
        tags.collapse_arguments = false;
        tags.param_order = 1;
        let mut names = param(12, "names", "--names", FieldKind::CharField);
        names.param_order = 1;
        let verbose = param(13, "verbose", "-v", FieldKind::BooleanField);

        let args = vec![
            arg(10, "", Some("/m/a.csv")),
            arg(10, "", Some("/m/b.csv")),
            arg(11, "--tag", Some("x")),
            arg(11, "--tag", Some("y")),
            arg(12, "--names", Some("p")),
            arg(12, "--names", Some("q")),
            arg(13, "-v", None),
        ];
        let command = build_command(
            Some("python3"),
            "merge.py",
            &parsers(),
            None,
            &[files, tags, names, verbose],
            &args,
        );
        assert_eq!(
            command,
            vec![
                "python3", "merge.py", "-v", "--tag", "x", "--tag", "y", "--names", "p", "q", "/m/a.csv", "/m/b.csv"
            ]
        );
    }

    #[test]
    fn test_subparser_follows_main_arguments() {
        let out = param(10, "out", "--out", FieldKind::FileField);
        let mut level = param(11, "level", "--level", FieldKind::IntegerField);
        level.parser_id = 2;
        let mut other = param(12, "gzip", "-z", FieldKind::BooleanField);
        other.parser_id = 3;
        let args = vec![arg(11, "--level", Some("9")), arg(10, "--out", Some("o.zip")), arg(12, "-z", None)];
        let command = build_command(None, "/srv/pack.py", &parsers(), Some(2), &[out, level, other], &args);
        assert_eq!(command, vec!["/srv/pack.py", "--out", "o.zip", "zip", "--level", "9"]);
    }

    #[test]
    fn test_main_parser_selection_adds_no_name() {
        let command = build_command(None, "s.py", &parsers(), Some(1), &[], &[]);
        assert_eq!(command, vec!["s.py"]);
    }

    fn job_value(id: i32, parameter_id: i32, value: &str) -> JobParameter {
        JobParameter {
            id,
            job_id: 1,
            parameter_id,
            value: value.to_string(),
        }
    }

    #[test]
    fn test_recorded_subparser_without_values() {
        let mut level = param(11, "level", "--level", FieldKind::IntegerField);
        level.parser_id = 2;
        let parameters = vec![param(10, "out", "--out", FieldKind::FileField), level];

        let selected = job_parser(Some(2), &parsers(), &parameters, &[]);
        assert_eq!(selected, Some(2));
        let command = build_command(None, "pack.py", &parsers(), selected, &parameters, &[]);
        assert_eq!(command, vec!["pack.py", "zip"]);
    }

    #[test]
    fn test_job_parser_fallbacks() {
        let mut gzip = param(12, "gzip", "-z", FieldKind::BooleanField);
        gzip.parser_id = 3;
        let parameters = vec![param(10, "out", "--out", FieldKind::FileField), gzip];
        let values = vec![job_value(1, 10, "\"o.zip\""), job_value(2, 12, "true")];

        assert_eq!(job_parser(None, &parsers(), &parameters, &values), Some(3));
        assert_eq!(job_parser(Some(2), &parsers(), &parameters, &values), Some(2));
        // the main parser is never a selection
        assert_eq!(job_parser(Some(1), &parsers(), &parameters, &values[..1]), None);
        assert_eq!(job_parser(None, &parsers(), &parameters, &[]), None);
    }

    #[test]
    fn test_render_command() {
        let command = vec![
            "python".to_string(),
            "my script.py".to_string(),
            "--name".to_string(),
            "it's".to_string(),
            "".to_string(),
        ];
        assert_eq!(render_command(&command), r#"python 'my script.py' --name 'it'"'"'s' ''"#);
    }
}
