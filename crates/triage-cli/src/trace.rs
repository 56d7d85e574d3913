//! Execution trace of a single task, for `triage send --trace`

use std::fmt;

use triage_a2a::{Part, Role, Task};

const HISTORY_WIDTH: usize = 80;
const RESULT_WIDTH: usize = 200;

/// At most `HISTORY_WIDTH` characters, the cut marked with `...`
fn truncate_history(text: &str) -> String {
    if text.chars().count() <= HISTORY_WIDTH {
        return text.to_string();
    }
    let kept: String = text.chars().take(HISTORY_WIDTH - 3).collect();
    format!("{kept}...")
}

fn truncate_result(text: &str) -> String {
    if text.chars().count() <= RESULT_WIDTH {
        return text.to_string();
    }
    let kept: String = text.chars().take(RESULT_WIDTH).collect();
    format!("{kept}...")
}

/// Renders a task as a numbered execution trace
pub struct Trace<'a>(pub &'a Task);

impl fmt::Display for Trace<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let task = self.0;
        let rule = "=".repeat(60);
        let thin = "-".repeat(40);

        writeln!(f, "{rule}")?;
        writeln!(f, "AGENT EXECUTION TRACE")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Context ID: {}", task.context_id)?;
        writeln!(f, "Task ID: {}", task.id)?;
        writeln!(f, "Status: {}", task.status.state)?;
        writeln!(
            f,
            "Completed: {}",
            task.status.timestamp.as_deref().unwrap_or("-")
        )?;
        writeln!(f)?;

        writeln!(f, "EXECUTION FLOW:")?;
        writeln!(f, "{thin}")?;
        for (i, message) in task.history.iter().enumerate() {
            let text = message
                .parts
                .first()
                .map(Part::render)
                .unwrap_or_else(|| "[No content]".to_string());
            let marker = match message.role {
                Role::User => ">",
                Role::Agent => "<",
            };
            writeln!(
                f,
                "{:2}. {} {}: {}",
                i + 1,
                marker,
                message.role.to_string().to_uppercase(),
                truncate_history(&text)
            )?;
        }
        writeln!(f)?;

        writeln!(f, "FINAL RESULT:")?;
        writeln!(f, "{thin}")?;
        if let Some(part) = task.artifacts.first().and_then(|a| a.parts.first()) {
            writeln!(f, "{}", truncate_result(&part.render()))?;
        }
        writeln!(f, "{rule}")
    }
}

pub fn format_trace(task: &Task) -> String {
    Trace(task).to_string()
}
