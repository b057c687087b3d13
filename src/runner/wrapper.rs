// src/runner/wrapper.rs

//! Wrapper substitution: turning a node label into the command a shell
//! executes.

/// Single-quote `label` for a POSIX shell; embedded quotes become `'\''`.
pub fn shell_quote(label: &str) -> String {
    format!("'{}'", label.replace('\'', "'\\''"))
}

/// Build the command line for a node.
///
/// - wrapper containing `{}`: the placeholder is replaced with the quoted
///   label;
/// - wrapper without `{}`: the quoted label is appended after one space;
/// - no wrapper: the label runs directly under the shell.
pub fn apply_wrapper(wrapper: Option<&str>, label: &str) -> String {
    match wrapper {
        None => label.to_string(),
        Some(w) if w.is_empty() => label.to_string(),
        Some(w) if w.contains("{}") => w.replace("{}", &shell_quote(label)),
        Some(w) => format!("{w} {}", shell_quote(label)),
    }
}
