//! Replay script format.
//!
//! One step per line, `<offset_ms> <action>`, offsets relative to the replay
//! start. Blank lines and lines starting with `#` are skipped.
//!
//! ```text
//! # sustained tachycardia
//! 0     BPM:130
//! 5000  BPM:130
//! 6000  ACK hr_high
//! 9000  DROP out of range
//! ```
//!
//! Anything that is not `ACK` or `DROP` is delivered to the pipeline as a raw
//! token, malformed ones included.

use std::path::Path;
use thiserror::Error;

/// Script errors.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// File could not be read
    #[error("Failed to read script: {0}")]
    Io(#[from] std::io::Error),

    /// Line does not start with an offset
    #[error("Line {line}: invalid offset {value:?}")]
    InvalidOffset {
        /// 1-based line number
        line: usize,
        /// Offending text
        value: String,
    },

    /// Offset with nothing after it
    #[error("Line {line}: missing action")]
    MissingAction {
        /// 1-based line number
        line: usize,
    },
}

/// What one step does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Deliver a raw token
    Token(String),
    /// Caregiver acknowledges the newest alert of this type
    Ack(String),
    /// Drop the link and reconnect
    Drop(String),
}

/// One scripted step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Offset from the replay start (ms)
    pub offset_ms: u64,
    /// Action to perform
    pub action: Action,
}

/// Read and parse a script file.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<Step>, ScriptError> {
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

/// Parse script text.
pub fn parse(content: &str) -> Result<Vec<Step>, ScriptError> {
    let mut steps = Vec::new();
    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        let (offset, rest) = match text.split_once(char::is_whitespace) {
            Some((offset, rest)) => (offset, rest.trim()),
            None => (text, ""),
        };
        let offset_ms = offset.parse().map_err(|_| ScriptError::InvalidOffset {
            line,
            value: offset.to_string(),
        })?;
        if rest.is_empty() {
            return Err(ScriptError::MissingAction { line });
        }

        let action = match rest.split_once(char::is_whitespace) {
            Some(("ACK", alert_type)) => Action::Ack(alert_type.trim().to_string()),
            Some(("DROP", reason)) => Action::Drop(reason.trim().to_string()),
            _ if rest == "DROP" => Action::Drop("link lost".to_string()),
            _ => Action::Token(rest.to_string()),
        };
        steps.push(Step { offset_ms, action });
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_steps() {
        let steps = parse(
            "# header\n\n0 BPM:130\n  5000\tSpO2:85  \n6000 ACK hr_high\n7000 DROP\n8000 DROP out of range\n",
        )
        .unwrap();

        assert_eq!(
            steps,
            vec![
                Step { offset_ms: 0, action: Action::Token("BPM:130".into()) },
                Step { offset_ms: 5000, action: Action::Token("SpO2:85".into()) },
                Step { offset_ms: 6000, action: Action::Ack("hr_high".into()) },
                Step { offset_ms: 7000, action: Action::Drop("link lost".into()) },
                Step { offset_ms: 8000, action: Action::Drop("out of range".into()) },
            ]
        );
    }

    #[test]
    fn test_malformed_tokens_are_kept() {
        let steps = parse("10 BPM:abc\n20 HELLO").unwrap();
        assert_eq!(steps[0].action, Action::Token("BPM:abc".into()));
        assert_eq!(steps[1].action, Action::Token("HELLO".into()));
    }

    #[test]
    fn test_invalid_lines() {
        assert!(matches!(
            parse("soon BPM:80"),
            Err(ScriptError::InvalidOffset { line: 1, .. })
        ));
        assert!(matches!(
            parse("# ok\n100"),
            Err(ScriptError::MissingAction { line: 2 })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0 FALL").unwrap();

        let steps = load(file.path()).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action, Action::Token("FALL".into()));
    }
}
