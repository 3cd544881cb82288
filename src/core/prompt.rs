//! Transcript flattening

use crate::conversation::Message;

/// Flatten a transcript into the single prompt sent upstream.
///
/// Layout: an optional `System:` paragraph, one `<Role>: <content>` line per
/// context message in order, then the final `User:` line.
pub fn flatten_prompt(system_prompt: Option<&str>, context: &[Message], prompt: &str) -> String {
    let mut out = String::new();

    if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
        out.push_str("System: ");
        out.push_str(system);
        out.push_str("\n\n");
    }

    for msg in context {
        out.push_str(msg.role.label());
        out.push_str(": ");
        out.push_str(&msg.content);
        out.push('\n');
    }

    out.push_str("User: ");
    out.push_str(prompt);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROLE_PREFIXES: [&str; 3] = ["System: ", "User: ", "Assistant: "];

    fn role_lines(prompt: &str) -> Vec<&str> {
        prompt
            .lines()
            .filter(|l| ROLE_PREFIXES.iter().any(|p| l.starts_with(p)))
            .collect()
    }

    #[test]
    fn test_no_context_is_single_user_line() {
        let prompt = flatten_prompt(None, &[], "What is 2+2?");
        assert_eq!(prompt, "User: What is 2+2?");
        assert_eq!(role_lines(&prompt), vec!["User: What is 2+2?"]);
    }

    #[test]
    fn test_context_lines_precede_prompt_in_order() {
        let context = vec![
            Message::system("You are a helpful assistant."),
            Message::user("What is 2+2?"),
            Message::assistant("4"),
            Message::user("What is 3+3?"),
        ];

        let prompt = flatten_prompt(None, &context, "What is 4+4?");
        let lines = role_lines(&prompt);

        assert_eq!(
            lines,
            vec![
                "System: You are a helpful assistant.",
                "User: What is 2+2?",
                "Assistant: 4",
                "User: What is 3+3?",
                "User: What is 4+4?",
            ]
        );
    }

    #[test]
    fn test_system_prompt_leads() {
        let prompt = flatten_prompt(Some("Be terse."), &[Message::assistant("ok")], "go");
        assert_eq!(prompt, "System: Be terse.\n\nAssistant: ok\nUser: go");
    }
}
