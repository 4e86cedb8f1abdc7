//! Scripted MCP servers for tests.
//!
//! The scripts are plain `/bin/sh` run through the `sh` interpreter, so they
//! need nothing beyond a POSIX shell and `sed`.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;

use crate::command::ServerCommand;

const ECHO_SERVER: &str = r##"log="$1"
while IFS= read -r line; do
  if [ -n "$log" ]; then printf '%s\n' "$line" >> "$log"; fi
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"stub","version":"0.1.0"}}}\n' "$id"
      ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo the given text","inputSchema":{"type":"object","properties":{"text":{"type":"string"}},"required":["text"]}}]}}\n' "$id"
      ;;
    *'"method":"tools/call"'*'"text":"stall"'*)
      ;;
    *'"method":"tools/call"'*'"name":"echo"'*)
      text=$(printf '%s\n' "$line" | sed -n 's/.*"text":"\([^"]*\)".*/\1/p')
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"%s"}],"isError":false}}\n' "$id" "$text"
      ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"unknown tool"}],"isError":true}}\n' "$id"
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"method not found"}}\n' "$id"
      ;;
  esac
done
"##;

const EXITING_SERVER: &str = "exit 3\n";

const SILENT_SERVER: &str = r#"log="$1"
while IFS= read -r line; do
  if [ -n "$log" ]; then printf '%s\n' "$line" >> "$log"; fi
done
"#;

/// A stub MCP server script in a private temporary directory.
pub struct StubServer {
    dir: TempDir,
    script: PathBuf,
}

impl StubServer {
    /// Answers the handshake and exposes a single `echo` tool.
    ///
    /// Calls whose text is `stall` are never answered.
    #[must_use]
    pub fn echo() -> Self {
        Self::with_script(ECHO_SERVER)
    }

    /// Exits before the handshake.
    #[must_use]
    pub fn exiting() -> Self {
        Self::with_script(EXITING_SERVER)
    }

    /// Reads requests and never answers.
    #[must_use]
    pub fn silent() -> Self {
        Self::with_script(SILENT_SERVER)
    }

    /// Stub running an arbitrary shell script; `$1` is the receive log path.
    ///
    /// # Panics
    /// If the temporary directory cannot be written.
    #[must_use]
    pub fn with_script(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("create stub server dir");
        let script = dir.path().join("server.sh");
        std::fs::write(&script, body).expect("write stub server script");
        Self { dir, script }
    }

    /// Command that launches this stub.
    #[must_use]
    pub fn command(&self) -> ServerCommand {
        ServerCommand::new(&self.script)
            .interpreter("sh")
            .args([self.log_path().to_string_lossy().into_owned()])
    }

    /// Script location.
    #[must_use]
    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Raw lines the stub has received so far.
    #[must_use]
    pub fn received(&self) -> Vec<String> {
        std::fs::read_to_string(self.log_path())
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// `method` of every received message, in arrival order.
    #[must_use]
    pub fn received_methods(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|msg| msg.get("method").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    fn log_path(&self) -> PathBuf {
        self.dir.path().join("received.log")
    }
}
