//! Static tool-name → category table

use serde::{Deserialize, Serialize};

/// Histogram bucket for a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Read,
    Edit,
    Bash,
    Search,
    Web,
    Task,
    Todo,
    Other,
}

impl ToolCategory {
    /// Every category, in histogram display order
    pub const ALL: [ToolCategory; 8] = [
        ToolCategory::Read,
        ToolCategory::Edit,
        ToolCategory::Bash,
        ToolCategory::Search,
        ToolCategory::Web,
        ToolCategory::Task,
        ToolCategory::Todo,
        ToolCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Read => "read",
            ToolCategory::Edit => "edit",
            ToolCategory::Bash => "bash",
            ToolCategory::Search => "search",
            ToolCategory::Web => "web",
            ToolCategory::Task => "task",
            ToolCategory::Todo => "todo",
            ToolCategory::Other => "other",
        }
    }
}

/// Category for a tool name; unknown tools fall into `Other`
pub fn categorize(tool_name: &str) -> ToolCategory {
    match tool_name {
        "Read" | "NotebookRead" | "LS" => ToolCategory::Read,
        "Edit" | "Write" | "MultiEdit" | "NotebookEdit" => ToolCategory::Edit,
        "Bash" | "BashOutput" | "KillShell" | "KillBash" => ToolCategory::Bash,
        "Grep" | "Glob" => ToolCategory::Search,
        "WebFetch" | "WebSearch" => ToolCategory::Web,
        "Task" | "Agent" => ToolCategory::Task,
        "TodoWrite" | "TodoRead" => ToolCategory::Todo,
        _ => ToolCategory::Other,
    }
}

/// Tools that count towards the code-written counter and the file heat map
pub fn writes_code(tool_name: &str) -> bool {
    matches!(tool_name, "Edit" | "Write" | "MultiEdit" | "NotebookEdit")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tools() {
        assert_eq!(categorize("Read"), ToolCategory::Read);
        assert_eq!(categorize("Edit"), ToolCategory::Edit);
        assert_eq!(categorize("Bash"), ToolCategory::Bash);
        assert_eq!(categorize("Grep"), ToolCategory::Search);
        assert_eq!(categorize("WebFetch"), ToolCategory::Web);
    }

    #[test]
    fn test_unknown_tool_is_other() {
        assert_eq!(categorize("mcp__github__create_issue"), ToolCategory::Other);
        assert_eq!(categorize("read"), ToolCategory::Other);
    }

    #[test]
    fn test_code_writing_tools() {
        assert!(writes_code("Write"));
        assert!(writes_code("Edit"));
        assert!(!writes_code("Read"));
    }
}
