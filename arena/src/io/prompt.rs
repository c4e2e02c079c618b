//! Task prompt rendering for agent runs.

use minijinja::{Environment, context};

use crate::core::types::RepoCoordinate;
use crate::error::{ArenaError, ArenaResult};

const AGENT_TASK_TEMPLATE: &str = include_str!("prompts/agent_task.md");

/// Inputs for one agent's task instructions.
#[derive(Debug, Clone)]
pub struct TaskPromptInput<'a> {
    pub issue_id: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub repository: Option<&'a RepoCoordinate>,
    pub branch: &'a str,
}

/// Render the instructions sent with a run request.
pub fn render_task_prompt(input: &TaskPromptInput<'_>) -> ArenaResult<String> {
    let mut env = Environment::new();
    env.add_template("agent_task", AGENT_TASK_TEMPLATE)
        .map_err(template_error)?;
    let template = env.get_template("agent_task").map_err(template_error)?;
    template
        .render(context! {
            issue_id => (!input.issue_id.trim().is_empty()).then(|| input.issue_id.trim()),
            title => input.title.trim(),
            description => input.description.trim(),
            repository => input.repository.map(|repo| repo.to_string()),
            branch => input.branch,
        })
        .map_err(template_error)
}

fn template_error(error: minijinja::Error) -> ArenaError {
    ArenaError::Configuration(format!("render agent task prompt: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_branch_and_repository() {
        let repo = RepoCoordinate::new("acme", "web");
        let prompt = render_task_prompt(&TaskPromptInput {
            issue_id: "ENG-12",
            title: "Add dark mode",
            description: "Toggle in the header.",
            repository: Some(&repo),
            branch: "arena/abc/agent-1",
        })
        .expect("render");

        assert!(prompt.starts_with("# Task: Add dark mode"));
        assert!(prompt.contains("Tracking issue: ENG-12"));
        assert!(prompt.contains("Repository: acme/web"));
        assert!(prompt.contains("`arena/abc/agent-1`"));
    }

    #[test]
    fn optional_sections_are_omitted() {
        let prompt = render_task_prompt(&TaskPromptInput {
            issue_id: " ",
            title: "Fix typo",
            description: "README",
            repository: None,
            branch: "arena/abc/agent-2",
        })
        .expect("render");

        assert!(!prompt.contains("Tracking issue"));
        assert!(!prompt.contains("Repository:"));
    }
}
