//! Upstream connector: a single long-lived MCP client session held
//! against the tool server this proxy fronts.
//!
//! The session is established lazily on first use (in practice during
//! server start, see `main.rs`) and then reused for every subsequent
//! request. If the transport dies, later calls fail with an upstream
//! error — this does not attempt reconnection.

use anyhow::{Context, Result};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult, Prompt,
    ReadResourceRequestParam, ReadResourceResult, Resource, Tool,
};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use rmcp::ServiceExt;
use serde_json::Map;
use tokio::process::Command;

/// Holds the running MCP client session against the upstream. Closing
/// the session (via [`UpstreamConnector::close`]) releases the
/// transport and the child process, if any, in reverse order.
pub struct UpstreamConnector {
    session: RunningService<RoleClient, ()>,
}

impl UpstreamConnector {
    /// Spawn `command` (already shell-split into argv) and speak MCP
    /// over its stdin/stdout.
    pub async fn connect_stdio(command: &str, args: &[String]) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        let transport = TokioChildProcess::new(cmd)
            .context("failed to spawn upstream stdio process")?;
        let session = ()
            .serve(transport)
            .await
            .context("upstream stdio handshake failed")?;
        Ok(Self { session })
    }

    /// Open a streaming HTTP connection to `url` and speak MCP over it.
    pub async fn connect_http(url: &str) -> Result<Self> {
        let transport = StreamableHttpClientTransport::from_uri(url.to_string());
        let session = ()
            .serve(transport)
            .await
            .context("upstream HTTP handshake failed")?;
        Ok(Self { session })
    }

    #[must_use]
    pub fn peer_info(&self) -> Option<rmcp::model::InitializeResult> {
        self.session.peer_info().cloned()
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.session
            .list_all_tools()
            .await
            .context("upstream tools/list failed")
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, serde_json::Value>>,
    ) -> Result<CallToolResult> {
        self.session
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
            .context("upstream tools/call failed")
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.session
            .list_all_resources()
            .await
            .context("upstream resources/list failed")
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.session
            .read_resource(ReadResourceRequestParam {
                uri: uri.to_string(),
            })
            .await
            .context("upstream resources/read failed")
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.session
            .list_all_prompts()
            .await
            .context("upstream prompts/list failed")
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Map<String, serde_json::Value>>,
    ) -> Result<GetPromptResult> {
        self.session
            .get_prompt(GetPromptRequestParam {
                name: name.to_string(),
                arguments,
            })
            .await
            .context("upstream prompts/get failed")
    }

    pub async fn close(self) -> Result<()> {
        self.session
            .cancel()
            .await
            .context("failed to close upstream session")?;
        Ok(())
    }
}

/// Split a shell command line into argv[0] and its arguments.
pub fn split_command(command_line: &str) -> Result<(String, Vec<String>)> {
    let parts = shlex::split(command_line)
        .context("BANSHO_UPSTREAM_CMD is not a valid shell command line")?;
    let mut iter = parts.into_iter();
    let program = iter
        .next()
        .context("BANSHO_UPSTREAM_CMD must not be empty")?;
    Ok((program, iter.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_program_and_args() {
        let (program, args) = split_command("python3 -m my_server --flag value").unwrap();
        assert_eq!(program, "python3");
        assert_eq!(args, vec!["-m", "my_server", "--flag", "value"]);
    }

    #[test]
    fn rejects_empty_command() {
        assert!(split_command("").is_err());
        assert!(split_command("   ").is_err());
    }

    #[test]
    fn honors_quoting() {
        let (program, args) = split_command(r#"node server.js --name "my server""#).unwrap();
        assert_eq!(program, "node");
        assert_eq!(args, vec!["server.js", "--name", "my server"]);
    }
}
