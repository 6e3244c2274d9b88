//! Markdown rendering of knowledge items.

use std::fmt::Write;

use noesis_core::KnowledgeItem;

/// Render items under a heading.
///
/// ```text
/// ## Results for "tokio"
///
/// ### 1. Async Rust
/// *vault · `notes/async.md` · score 0.82*
///
/// > Tokio is a runtime...
/// ```
pub fn format_items(heading: &str, items: &[KnowledgeItem]) -> String {
    let mut out = format!("## {}\n", heading);
    if items.is_empty() {
        out.push_str("\nNo matching notes found.\n");
        return out;
    }

    for (index, item) in items.iter().enumerate() {
        let _ = writeln!(out, "\n### {}. {}", index + 1, item.title);
        if item.is_local() {
            let _ = writeln!(out, "*{} · `{}` · score {:.2}*", item.origin, item.id, item.score);
        } else {
            let _ = writeln!(out, "*{} · score {:.2}*", item.origin, item.score);
        }
        if !item.body.trim().is_empty() {
            out.push('\n');
            out.push_str(&quote(&item.body));
        }
    }
    out
}

/// Render the answer of a single tool call.
pub fn format_tool_answer(server: &str, tool: &str, answer: &str) -> String {
    let answer = answer.trim();
    let body = if answer.is_empty() { "(empty response)" } else { answer };
    format!("## Answer from {} ({})\n\n{}\n", server, tool, body)
}

/// Render a failure for display in place of results.
pub fn format_failure(message: &str) -> String {
    format!("**Query failed:** {}\n", message)
}

fn quote(text: &str) -> String {
    text.trim()
        .lines()
        .map(|line| {
            if line.is_empty() {
                ">\n".to_string()
            } else {
                format!("> {}\n", line)
            }
        })
        .collect()
}
