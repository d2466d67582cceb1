//! Commands file reader for the client.
//!
//! Each line is `<method-token> <path> [ignored...]`, e.g. `client_get notes.txt`.
//! A token containing `get` selects GET, anything else selects POST.

use crate::error::{Error, Result};
use crate::protocol::Method;
use std::path::Path;
use tracing::warn;

/// One queued client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCommand {
    pub method: Method,
    pub path: String,
}

/// Parse a single command line. Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str) -> Option<ClientCommand> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut parts = line.split_whitespace();
    let token = parts.next()?;
    let Some(path) = parts.next() else {
        warn!(line, "Skipping command without a path");
        return None;
    };

    let lowered = token.to_ascii_lowercase();
    let method = if lowered.contains("get") {
        Method::Get
    } else {
        if !lowered.contains("post") {
            warn!(token, "Unrecognized method, defaulting to POST");
        }
        Method::Post
    };

    Some(ClientCommand {
        method,
        path: path.to_string(),
    })
}

/// Ordered, single-pass source of client commands.
#[derive(Debug)]
pub struct CommandSource {
    lines: std::vec::IntoIter<String>,
}

impl CommandSource {
    /// Read the commands file.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| Error::FileNotFound {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_text(&contents))
    }

    pub fn from_text(text: &str) -> Self {
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        Self {
            lines: lines.into_iter(),
        }
    }
}

impl Iterator for CommandSource {
    type Item = ClientCommand;

    fn next(&mut self) -> Option<ClientCommand> {
        self.lines.by_ref().find_map(|line| parse_command(&line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_variants() {
        assert_eq!(
            parse_command("client_get notes.txt 127.0.0.1 8080"),
            Some(ClientCommand {
                method: Method::Get,
                path: "notes.txt".to_string()
            })
        );
        assert_eq!(parse_command("GET a.txt").unwrap().method, Method::Get);
        assert_eq!(parse_command("client_post b.txt").unwrap().method, Method::Post);
        assert_eq!(parse_command("upload c.txt").unwrap().method, Method::Post);
    }

    #[test]
    fn test_skips_blank_comment_and_pathless() {
        assert!(parse_command("").is_none());
        assert!(parse_command("   ").is_none());
        assert!(parse_command("# client_get x").is_none());
        assert!(parse_command("client_get").is_none());
    }

    #[test]
    fn test_source_order() {
        let source = CommandSource::from_text(
            "client_get a.txt\n\nclient_post b.txt\n# note\nclient_get\nclient_get c.txt\n",
        );
        let paths: Vec<String> = source.map(|c| c.path).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            CommandSource::load(&dir.path().join("commands.txt")).await,
            Err(Error::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.txt");
        std::fs::write(&path, "client_get a.txt\r\nclient_post b.txt\r\n").unwrap();

        let commands: Vec<ClientCommand> = CommandSource::load(&path).await.unwrap().collect();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].method, Method::Post);
    }
}
