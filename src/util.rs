//! Small text helpers

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

fn comment_line() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[ ,\t\n]*//+"))
        .as_ref()
        .map_err(|e| Error::Config(e.to_string()))
}

fn separator_line() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"---+"))
        .as_ref()
        .map_err(|e| Error::Config(e.to_string()))
}

/// Parse JSON written with `//` comments.
///
/// Lines starting with `//` or containing `---` are dropped, anything after
/// `//` on the remaining lines is cut. A `//` inside a string value is cut
/// as well.
pub fn load_comment_json(text: &str) -> Result<serde_json::Value> {
    let comment = comment_line()?;
    let separator = separator_line()?;

    let clean: String = text
        .lines()
        .filter(|line| !(comment.is_match(line) || separator.is_match(line)))
        .map(|line| line.split("//").next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(serde_json::from_str(&clean)?)
}

/// [`load_comment_json`] over a file
pub fn load_comment_json_file(path: &Path) -> Result<serde_json::Value> {
    load_comment_json(&std::fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comments_are_stripped() {
        let text = r#"
// report settings
{
    "days": 7,   // keep a week
    // "debug": true,
    "tables": ["log_1", "log_2"]
    //-------------------------
}
"#;
        let json = load_comment_json(text).unwrap();
        assert_eq!(json["days"], 7);
        assert_eq!(json["tables"][1], "log_2");
        assert!(json.get("debug").is_none());
    }

    #[test]
    fn test_separator_lines_are_dropped() {
        let text = "{\n\"a\": 1\n, \"note\": \"-----\"\n}";
        let json = load_comment_json(text).unwrap();
        assert_eq!(json, serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_invalid_json_errors() {
        assert!(matches!(load_comment_json("{ // open"), Err(Error::Json(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, "{\"x\": true} // flag\n").unwrap();
        assert_eq!(load_comment_json_file(&path).unwrap()["x"], true);
    }
}
