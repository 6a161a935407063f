//! System prompt templating.
//!
//! The built-in prompt text is one template rendered from a single code path
//! with runtime parameters (tools and optional operator instructions).

use std::collections::BTreeMap;

const SYSTEM_PROMPT_TEMPLATE: &str = "\
You are an assistant that gets work done by calling tools on the user's host.

Tools run one at a time, in the order you request them, and each result is
returned to you as JSON of the form {\"success\": bool, \"result\": ..., \"error\": ...}.
Some tools need the user's confirmation first; a call the user refuses comes
back as a failure with the error \"denied by user\". Do not retry a refused call
unless the user asks you to.

When no existing tool fits, `create_tool` can define a new one from a small
script, and `execute_code` runs a script once. Prefer existing tools.

Available tools:
{{ENABLED_TOOLS_LIST}}

{{CUSTOM_INSTRUCTIONS_BLOCK}}
";

/// Parameters used to compile the system prompt template.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SystemPromptParams<'a> {
    pub enabled_tools: Vec<&'a str>,
    pub custom_instructions: Option<&'a str>,
}

/// Render the system prompt template using runtime parameters.
pub fn render_system_prompt(params: SystemPromptParams<'_>) -> String {
    let mut vars = BTreeMap::<&str, String>::new();
    vars.insert(
        "ENABLED_TOOLS_LIST",
        render_enabled_tools(&params.enabled_tools),
    );
    vars.insert(
        "CUSTOM_INSTRUCTIONS_BLOCK",
        render_custom_instructions(params.custom_instructions),
    );
    normalize_blank_lines(&render_template(SYSTEM_PROMPT_TEMPLATE, &vars))
}

fn render_template(template: &str, vars: &BTreeMap<&str, String>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("{{{{{key}}}}}");
        rendered = rendered.replace(&placeholder, value);
    }
    rendered
}

fn render_enabled_tools(enabled_tools: &[&str]) -> String {
    if enabled_tools.is_empty() {
        return "- none".to_string();
    }
    enabled_tools
        .iter()
        .map(|name| format!("- `{name}`"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_custom_instructions(custom: Option<&str>) -> String {
    let Some(custom) = custom.map(str::trim).filter(|s| !s.is_empty()) else {
        return String::new();
    };
    format!("Additional operator instructions:\n{custom}")
}

fn normalize_blank_lines(text: &str) -> String {
    let mut out = String::new();
    let mut previous_blank = false;
    for line in text.lines() {
        let is_blank = line.trim().is_empty();
        if is_blank && previous_blank {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line.trim_end());
        previous_blank = is_blank;
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_tools() {
        let prompt = render_system_prompt(SystemPromptParams {
            enabled_tools: vec!["read_file", "time"],
            custom_instructions: None,
        });
        assert!(prompt.contains("- `read_file`\n- `time`"));
        assert!(prompt.contains("denied by user"));
        assert!(!prompt.contains("{{"));
        assert!(!prompt.contains("operator instructions"));
    }

    #[test]
    fn prompt_without_tools_says_none() {
        let prompt = render_system_prompt(SystemPromptParams {
            enabled_tools: vec![],
            custom_instructions: Some("   "),
        });
        assert!(prompt.contains("Available tools:\n- none"));
        assert!(!prompt.contains("operator instructions"));
    }

    #[test]
    fn prompt_renders_custom_instructions_last() {
        let prompt = render_system_prompt(SystemPromptParams {
            enabled_tools: vec![],
            custom_instructions: Some("Always answer in one sentence."),
        });
        assert!(prompt.ends_with("Additional operator instructions:\nAlways answer in one sentence."));
    }

    #[test]
    fn blank_runs_collapse() {
        assert_eq!(normalize_blank_lines("a\n\n\n\nb  \n\n"), "a\n\nb");
    }
}
