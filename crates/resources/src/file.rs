//! Files on the target, identified by their MD5 checksum.

use crate::catalog::ResourceType;
use crate::error::Error;
use crate::parsing::line;
use crate::script::{remove_file, write_file};
use anyhow::{Context as _, Result};
use plan::runner::shell_quote;
use plan::{ApplyContext, Diff, Resource, Runner, State, to_state};
use serde::{Deserialize, Serialize};
use std::fs;

const FILE_MODE: u32 = 0o660;

/// A file with fixed content.
///
/// Exactly one of `source` (a local path) or `content` is expected. The
/// checksum uses MD5 since `md5sum` ships with coreutils and busybox alike.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// `md5:<hex>` checksum of `bytes`
pub fn checksum_of(bytes: &[u8]) -> String {
    format!("md5:{:x}", md5::compute(bytes))
}

impl File {
    /// File at `destination` with inline `content`
    pub fn with_content(destination: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            checksum: checksum_of(content.as_bytes()),
            content,
            destination: destination.into(),
            source: String::new(),
        }
    }

    /// File at `destination` copied from the local file `source`
    pub fn from_source(
        destination: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self, Error> {
        let mut file = Self {
            source: source.into(),
            destination: destination.into(),
            ..Self::default()
        };
        file.checksum = checksum_of(&file.bytes()?);
        Ok(file)
    }

    /// File known only by path, e.g. one created by some command that must
    /// be removed on undo
    pub fn at(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            ..Self::default()
        }
    }

    fn bytes(&self) -> Result<Vec<u8>, Error> {
        if self.source.is_empty() {
            Ok(self.content.clone().into_bytes())
        } else {
            fs::read(&self.source).map_err(|e| Error::io(&self.source, e))
        }
    }

    fn desired_checksum(&self) -> Option<String> {
        if !self.checksum.is_empty() {
            return Some(self.checksum.clone());
        }
        self.bytes().ok().map(|b| checksum_of(&b))
    }
}

impl Resource for File {
    fn type_name(&self) -> &'static str {
        ResourceType::File.name()
    }

    fn state(&self) -> State {
        let mut state = to_state(self);
        if let Some(checksum) = self.desired_checksum() {
            state.insert("checksum", checksum);
        }
        state
    }

    fn hidden_fields(&self) -> &'static [&'static str] {
        &["checksum"]
    }

    fn query_state(&self, ctx: &ApplyContext, runner: &dyn Runner) -> Result<State> {
        let cmd = format!("md5sum {}", shell_quote(&self.destination));
        let output = match runner.run_command(ctx, &cmd, None) {
            Ok(output) => output,
            // locale dependent, but so is every other option
            Err(e) if e.output().contains("No such file or directory") => {
                return Ok(State::empty());
            }
            Err(e) => return Err(Error::command(cmd, e).into()),
        };

        let first = line(&output);
        let Some(sum) = first.split_whitespace().next() else {
            return Err(Error::Parse {
                what: "md5sum output",
                line: first.to_string(),
            }
            .into());
        };
        let mut state = self.state();
        state.insert("checksum", format!("md5:{sum}"));
        Ok(state)
    }

    fn apply(&self, ctx: &ApplyContext, runner: &dyn Runner, diff: &Diff) -> Result<bool> {
        if self.state() == diff.current_state {
            return Ok(false);
        }
        let content = self
            .bytes()
            .with_context(|| format!("file: {}", self.destination))?;
        write_file(ctx, runner, &content, &self.destination, FILE_MODE)?;
        Ok(true)
    }

    /// Removes the file whatever its content, so files created as a side
    /// effect of other commands can be cleaned up too.
    fn undo(&self, ctx: &ApplyContext, runner: &dyn Runner, _current: &State) -> Result<()> {
        remove_file(ctx, runner, &self.destination)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan::runner::MockRunner;
    use std::io::Write as _;

    const HELLO_MD5: &str = "md5:b1946ac92492d2347c6235b4d2611184";

    #[test]
    fn test_checksum() {
        assert_eq!(checksum_of(b"hello\n"), HELLO_MD5);
        assert_eq!(
            File::with_content("/etc/motd", "hello\n").checksum,
            HELLO_MD5
        );
    }

    #[test]
    fn test_from_source() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello\n").unwrap();
        let path = tmp.path().to_string_lossy().into_owned();

        let file = File::from_source("/etc/motd", &path).unwrap();
        assert_eq!(file.checksum, HELLO_MD5);

        let missing = File::from_source("/etc/motd", "/definitely/not/here");
        assert!(matches!(missing, Err(Error::Io { .. })));
    }

    #[test]
    fn test_checksum_is_hidden_but_part_of_state() {
        let file = File::with_content("/etc/motd", "hello\n");
        assert_eq!(file.state().string("checksum"), HELLO_MD5);
        assert!(!plan::visible_state(&file).contains("checksum"));

        let decoded: File =
            serde_json::from_str(r#"{"content": "hello\n", "destination": "/etc/motd"}"#).unwrap();
        assert_eq!(decoded.state(), file.state());
    }

    #[test]
    fn test_query_matches_when_checksum_equal() {
        let mock = MockRunner::new();
        mock.on("md5sum", "b1946ac92492d2347c6235b4d2611184  /etc/motd\n");
        let file = File::with_content("/etc/motd", "hello\n");
        let current = file.query_state(&ApplyContext::new(), &mock).unwrap();
        assert_eq!(current, file.state());

        let applied = file
            .apply(&ApplyContext::new(), &mock, &Diff::with_current_state(current))
            .unwrap();
        assert!(!applied);
        assert_eq!(mock.commands(), ["md5sum '/etc/motd'"]);
    }

    #[test]
    fn test_query_missing_file() {
        let mock = MockRunner::new();
        mock.fail("md5sum", 1, "md5sum: /etc/motd: No such file or directory\n");
        let state = File::with_content("/etc/motd", "hi")
            .query_state(&ApplyContext::new(), &mock)
            .unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_apply_writes_content() {
        let mock = MockRunner::new();
        let applied = File::with_content("/etc/motd", "hello\n")
            .apply(&ApplyContext::new(), &mock, &Diff::empty())
            .unwrap();
        assert!(applied);

        let inv = &mock.invocations()[0];
        assert!(inv.command.contains("sed -n 'w /etc/motd'"));
        assert!(inv.command.ends_with("chmod 0660 '/etc/motd'"));
        assert_eq!(inv.stdin.as_deref(), Some("hello\n"));
    }

    #[test]
    fn test_undo_removes_file() {
        let mock = MockRunner::new();
        File::at("/etc/kubernetes/manifests/etcd.yaml")
            .undo(&ApplyContext::new(), &mock, &State::empty())
            .unwrap();
        assert_eq!(
            mock.commands(),
            ["rm -f '/etc/kubernetes/manifests/etcd.yaml'"]
        );
    }
}
