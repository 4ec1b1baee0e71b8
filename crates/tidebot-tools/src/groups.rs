//! Tool group definitions.
//!
//! Groups are shorthands for sets of related tools, referenced with
//! `group:name` syntax.

/// Tool names for a group (without the `group:` prefix).
pub fn group_tools(group: &str) -> Option<&'static [&'static str]> {
    let tools: &'static [&'static str] = match group {
        "fs" => &["read_file", "write_file", "list_dir"],
        "runtime" => &["exec"],
        "web" => &["web_search", "web_fetch"],
        "messaging" => &["message"],
        "sessions" => &["spawn"],
        "automation" => &["cron"],
        _ => return None,
    };
    Some(tools)
}

/// What a background subagent may use. Never messaging or spawning.
pub const SUBAGENT_TOOLS: &[&str] = &["group:fs", "group:runtime", "group:web"];

/// Expand a single name that may be a `group:xxx` reference.
///
/// Unknown groups and plain names are returned as-is.
pub fn expand_name(name: &str) -> Vec<String> {
    if let Some(group) = name.strip_prefix("group:") {
        if let Some(tools) = group_tools(group) {
            return tools.iter().map(|s| s.to_string()).collect();
        }
    }
    vec![name.to_string()]
}

/// Expand a list of names, resolving any `group:xxx` references.
pub fn expand_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    names
        .iter()
        .flat_map(|name| expand_name(name.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_group() {
        assert_eq!(
            expand_name("group:fs"),
            vec!["read_file", "write_file", "list_dir"]
        );
    }

    #[test]
    fn test_expand_unknown_group() {
        assert_eq!(expand_name("group:nonexistent"), vec!["group:nonexistent"]);
    }

    #[test]
    fn test_expand_names_mixed() {
        let expanded = expand_names(&["group:web", "exec"]);
        assert_eq!(expanded, vec!["web_search", "web_fetch", "exec"]);
    }

    #[test]
    fn test_subagent_tools_exclude_messaging_and_spawn() {
        let tools = expand_names(SUBAGENT_TOOLS);
        assert_eq!(tools.len(), 6);
        assert!(!tools.iter().any(|t| t == "message" || t == "spawn" || t == "cron"));
    }
}
