//! Heartbeat job and the `HEARTBEAT.md` emptiness check.
//!
//! The heartbeat wakes the agent periodically, but only when the user has
//! left something actionable in the workspace heartbeat file.

use std::path::Path;

use crate::types::{JobPayload, JobState, PayloadKind, Schedule, ScheduledJob};

/// File name of the heartbeat task list, relative to the workspace.
pub const HEARTBEAT_FILE: &str = "HEARTBEAT.md";

/// Fixed id of the in-memory heartbeat job.
pub const HEARTBEAT_JOB_ID: &str = "heartbeat";

/// Message handed to the agent when the heartbeat fires.
pub const HEARTBEAT_PROMPT: &str = "Read HEARTBEAT.md in your workspace (if it exists). \
Follow any instructions or tasks listed there. \
If nothing needs attention, reply with just: HEARTBEAT_OK";

/// How a single line of the heartbeat file is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    Heading,
    HtmlComment,
    /// A list checkbox with no text, e.g. `- [ ]` or `* [x]`.
    EmptyCheckbox,
    Content,
}

impl LineKind {
    pub fn is_actionable(self) -> bool {
        self == LineKind::Content
    }
}

/// Classify `line`. `in_comment` carries multi-line `<!-- ... -->` state
/// between calls.
pub fn classify_line(line: &str, in_comment: &mut bool) -> LineKind {
    let trimmed = line.trim();

    if *in_comment {
        if trimmed.contains("-->") {
            *in_comment = false;
        }
        return LineKind::HtmlComment;
    }
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if trimmed.starts_with('#') {
        return LineKind::Heading;
    }
    if let Some(rest) = trimmed.strip_prefix("<!--") {
        *in_comment = !rest.contains("-->");
        return LineKind::HtmlComment;
    }
    if is_empty_checkbox(trimmed) {
        return LineKind::EmptyCheckbox;
    }
    LineKind::Content
}

fn is_empty_checkbox(trimmed: &str) -> bool {
    let Some(rest) = trimmed.strip_prefix(['-', '*', '+']) else {
        return false;
    };
    matches!(rest.trim(), "[ ]" | "[]" | "[x]" | "[X]")
}

/// True when the content has nothing for the agent to act on.
pub fn is_heartbeat_empty(content: &str) -> bool {
    let mut in_comment = false;
    !content
        .lines()
        .any(|line| classify_line(line, &mut in_comment).is_actionable())
}

/// True when the heartbeat file exists and has actionable content.
pub fn has_pending_tasks(path: &Path) -> bool {
    match std::fs::read_to_string(path) {
        Ok(content) => !is_heartbeat_empty(&content),
        Err(_) => false,
    }
}

/// Build the in-memory heartbeat job.
pub fn heartbeat_job(interval_ms: i64, now_ms: i64) -> ScheduledJob {
    ScheduledJob {
        id: HEARTBEAT_JOB_ID.to_string(),
        name: "heartbeat".to_string(),
        enabled: true,
        schedule: Schedule::every(interval_ms),
        payload: JobPayload {
            kind: PayloadKind::Heartbeat,
            message: HEARTBEAT_PROMPT.to_string(),
            deliver: false,
            channel: None,
            to: None,
        },
        state: JobState::default(),
        created_at_ms: now_ms,
        updated_at_ms: now_ms,
        delete_after_run: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_scaffolding_is_empty() {
        assert!(is_heartbeat_empty(""));
        assert!(is_heartbeat_empty("# Notes\n- [ ] \n"));
        assert!(is_heartbeat_empty(
            "# Heartbeat\n\n## Tasks\n<!-- add tasks below -->\n- [ ]\n* [x]\n+ [X]\n"
        ));
    }

    #[test]
    fn test_text_is_actionable() {
        assert!(!is_heartbeat_empty("Check the oven"));
        assert!(!is_heartbeat_empty("# Tasks\n- [ ] water the plants\n"));
        assert!(!is_heartbeat_empty("-"));
    }

    #[test]
    fn test_multiline_comment() {
        let content = "<!--\nCheck the oven\n-->\n# Tasks\n";
        assert!(is_heartbeat_empty(content));

        let content = "<!--\nhidden\n-->\nvisible\n";
        assert!(!is_heartbeat_empty(content));
    }

    #[test]
    fn test_classify_line() {
        let mut in_comment = false;
        assert_eq!(classify_line("   ", &mut in_comment), LineKind::Blank);
        assert_eq!(classify_line("## Today", &mut in_comment), LineKind::Heading);
        assert_eq!(classify_line("- [ ]", &mut in_comment), LineKind::EmptyCheckbox);
        assert_eq!(classify_line("- [x] done", &mut in_comment), LineKind::Content);
        assert_eq!(classify_line("<!-- a -->", &mut in_comment), LineKind::HtmlComment);
        assert!(!in_comment);
        assert_eq!(classify_line("<!-- open", &mut in_comment), LineKind::HtmlComment);
        assert!(in_comment);
        assert_eq!(classify_line("close -->", &mut in_comment), LineKind::HtmlComment);
        assert!(!in_comment);
    }

    #[test]
    fn test_has_pending_tasks_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(HEARTBEAT_FILE);
        assert!(!has_pending_tasks(&path));

        std::fs::write(&path, "# Notes\n- [ ] \n").unwrap();
        assert!(!has_pending_tasks(&path));

        std::fs::write(&path, "Check the oven").unwrap();
        assert!(has_pending_tasks(&path));
    }

    #[test]
    fn test_heartbeat_job_shape() {
        let job = heartbeat_job(1_800_000, 5);
        assert!(job.is_heartbeat());
        assert_eq!(job.id, HEARTBEAT_JOB_ID);
        assert_eq!(job.schedule, Schedule::every(1_800_000));
        assert!(!job.payload.deliver);
    }
}
