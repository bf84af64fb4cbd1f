//! Intersectional allow-list filtering.
//!
//! Filtering is strictly restrictive: a tool runs only when the client's
//! static `tools_to_execute` list matches it AND the per-request overlays do
//! not exclude it. Overlays can only narrow — a `"*"` overlay keeps the full
//! statically-allowed set, never widens beyond it. The same matching applied
//! to `tools_to_auto_execute` decides whether a call may run without
//! approval; that result is intersected with executability, so auto-listed
//! but non-executable tools are not auto.

use crate::config::ClientConfig;
use crate::context::ExecContext;

/// Matches an allow-list against a tool of a named client.
///
/// `None` and `[]` both deny everything. `"*"` matches every tool. Otherwise
/// the list may name the bare tool or the prefixed `{client}-{tool}` form.
pub fn list_matches(list: Option<&[String]>, client_name: &str, tool: &str) -> bool {
    let Some(list) = list else { return false };
    if list.is_empty() {
        return false;
    }
    let prefixed = format!("{}-{}", client_name, tool);
    list.iter()
        .any(|entry| entry == "*" || entry == tool || entry == &prefixed)
}

/// Whether the request overlay keeps this client. `None` keeps all clients.
pub fn client_included(ctx: &ExecContext, client_name: &str) -> bool {
    match ctx.include_clients.as_deref() {
        None => true,
        Some(list) => list.iter().any(|c| c == "*" || c == client_name),
    }
}

/// Whether the request overlay keeps this tool. `None` keeps all tools; the
/// list may name the bare tool or the prefixed form.
pub fn tool_included(ctx: &ExecContext, client_name: &str, tool: &str) -> bool {
    match ctx.include_tools.as_deref() {
        None => true,
        Some(list) => {
            let prefixed = format!("{}-{}", client_name, tool);
            list.iter().any(|t| t == "*" || t == tool || t == &prefixed)
        }
    }
}

/// Full executability check: static client allow-list AND both overlays.
pub fn is_executable(config: &ClientConfig, ctx: &ExecContext, tool: &str) -> bool {
    list_matches(config.tools_to_execute.as_deref(), &config.name, tool)
        && client_included(ctx, &config.name)
        && tool_included(ctx, &config.name, tool)
}

/// Auto-execution check: executable AND on the auto allow-list.
pub fn is_auto_executable(config: &ClientConfig, ctx: &ExecContext, tool: &str) -> bool {
    is_executable(config, ctx, tool)
        && list_matches(config.tools_to_auto_execute.as_deref(), &config.name, tool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;

    fn client(execute: Option<Vec<&str>>, auto: Option<Vec<&str>>) -> ClientConfig {
        let mut cfg = ClientConfig::new("c1", "fs", ConnectionConfig::InProcess);
        cfg.tools_to_execute = execute.map(|v| v.into_iter().map(String::from).collect());
        cfg.tools_to_auto_execute = auto.map(|v| v.into_iter().map(String::from).collect());
        cfg
    }

    #[test]
    fn nil_and_empty_lists_deny_everything() {
        let ctx = ExecContext::new();
        assert!(!is_executable(&client(None, None), &ctx, "read_file"));
        assert!(!is_executable(&client(Some(vec![]), None), &ctx, "read_file"));
    }

    #[test]
    fn wildcard_and_exact_forms_match() {
        let ctx = ExecContext::new();
        assert!(is_executable(&client(Some(vec!["*"]), None), &ctx, "read_file"));
        assert!(is_executable(
            &client(Some(vec!["read_file"]), None),
            &ctx,
            "read_file"
        ));
        assert!(is_executable(
            &client(Some(vec!["fs-read_file"]), None),
            &ctx,
            "read_file"
        ));
        assert!(!is_executable(
            &client(Some(vec!["write_file"]), None),
            &ctx,
            "read_file"
        ));
    }

    #[test]
    fn overlays_only_narrow() {
        let cfg = client(Some(vec!["read_file"]), None);

        let narrowed = ExecContext::new().with_include_tools(vec!["write_file".into()]);
        assert!(!is_executable(&cfg, &narrowed, "read_file"));

        // A wildcard overlay keeps the allowed set but cannot widen it.
        let wildcard = ExecContext::new().with_include_tools(vec!["*".into()]);
        assert!(is_executable(&cfg, &wildcard, "read_file"));
        assert!(!is_executable(&cfg, &wildcard, "write_file"));
    }

    #[test]
    fn client_overlay_excludes_other_clients() {
        let cfg = client(Some(vec!["*"]), None);
        let other = ExecContext::new().with_include_clients(vec!["github".into()]);
        assert!(!is_executable(&cfg, &other, "read_file"));

        let ours = ExecContext::new().with_include_clients(vec!["fs".into()]);
        assert!(is_executable(&cfg, &ours, "read_file"));

        let any = ExecContext::new().with_include_clients(vec!["*".into()]);
        assert!(is_executable(&cfg, &any, "read_file"));
    }

    #[test]
    fn auto_requires_both_lists() {
        let ctx = ExecContext::new();
        // Auto-listed but not executable: not auto.
        let cfg = client(Some(vec![]), Some(vec!["read_file"]));
        assert!(!is_auto_executable(&cfg, &ctx, "read_file"));

        let cfg = client(Some(vec!["*"]), Some(vec!["read_file"]));
        assert!(is_auto_executable(&cfg, &ctx, "read_file"));
        assert!(!is_auto_executable(&cfg, &ctx, "write_file"));

        // Executable but not auto-listed.
        let cfg = client(Some(vec!["*"]), None);
        assert!(!is_auto_executable(&cfg, &ctx, "read_file"));
    }

    #[test]
    fn prefixed_entries_match_in_auto_list() {
        let ctx = ExecContext::new();
        let cfg = client(Some(vec!["*"]), Some(vec!["fs-read_file"]));
        assert!(is_auto_executable(&cfg, &ctx, "read_file"));
    }
}
