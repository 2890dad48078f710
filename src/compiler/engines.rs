//! Execution engines
//!
//! The compiler does not run an engine. Each [`AgenticEngine`] knows how
//! to install its CLI, which secrets and endpoints it needs, and which
//! step runs it against the prompt file with a given tool list.

use super::expressions::secret;
use super::job::Step;
use super::paths::{CODEX_HOME, MCP_CONFIG_FILE};
use crate::config::ActionPins;
use crate::model::{BashTool, EngineConfig, EngineId, Tools};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Name of the MCP server that mediates safe outputs
pub const SAFE_OUTPUTS_SERVER: &str = "safeoutputs";

/// Everything an engine needs to render its execution step
pub struct EngineRun<'a> {
    pub config: &'a EngineConfig,
    pub prompt_file: &'a str,
    pub log_file: &'a str,
    /// Whether an MCP config file was written for this run
    pub mcp_config: bool,
    pub tools: &'a Tools,
    pub safe_outputs: bool,
    pub timeout_minutes: u32,
}

pub trait AgenticEngine {
    fn id(&self) -> EngineId;

    /// Secrets the execution step reads
    fn secrets(&self) -> &'static [&'static str];

    /// API endpoints the firewall must allow
    fn domains(&self) -> &'static [&'static str];

    fn install_steps(&self, config: &EngineConfig, pins: &ActionPins) -> Vec<Step>;

    /// Steps that run the agent; raw YAML so custom engines pass through
    fn execution_steps(&self, run: &EngineRun<'_>) -> Vec<Value>;

    /// Tool names in the engine's own vocabulary
    fn tool_list(&self, tools: &Tools, safe_outputs: bool) -> Vec<String>;
}

/// Engine implementation for `id`
pub fn engine_for(id: EngineId) -> Box<dyn AgenticEngine> {
    match id {
        EngineId::Claude => Box::new(ClaudeEngine),
        EngineId::Codex => Box::new(CodexEngine),
        EngineId::Copilot => Box::new(CopilotEngine),
        EngineId::Custom => Box::new(CustomEngine),
    }
}

fn npm_install_steps(package: &str, config: &EngineConfig, pins: &ActionPins) -> Vec<Step> {
    let version = config.version.as_deref().unwrap_or("latest");
    vec![
        Step::uses("Setup Node.js", pins.setup_node.clone()).input("node-version", "24"),
        Step::run(
            format!("Install {package}"),
            format!("npm install -g {package}@{version}"),
        ),
    ]
}

fn secret_env(secrets: &[&str], config: &EngineConfig) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = secrets
        .iter()
        .map(|name| (name.to_string(), secret(name)))
        .collect();
    env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

fn command_line(parts: &[String]) -> String {
    shell_words::join(parts)
}

fn run_script(command: &[String], prompt_file: &str, log_file: &str) -> String {
    format!(
        "set -o pipefail\n{} \"$(cat {prompt_file})\" 2>&1 | tee {log_file}\n",
        command_line(command)
    )
}

fn execution_step(name: &str, run: &EngineRun<'_>, script: String, env: BTreeMap<String, String>) -> Value {
    Step::run(name, script)
        .with_id("agentic_execution")
        .timeout(run.timeout_minutes)
        .envs(&env)
        .to_yaml()
}

pub struct ClaudeEngine;

impl AgenticEngine for ClaudeEngine {
    fn id(&self) -> EngineId {
        EngineId::Claude
    }

    fn secrets(&self) -> &'static [&'static str] {
        &["ANTHROPIC_API_KEY"]
    }

    fn domains(&self) -> &'static [&'static str] {
        &["api.anthropic.com", "statsig.anthropic.com"]
    }

    fn install_steps(&self, config: &EngineConfig, pins: &ActionPins) -> Vec<Step> {
        npm_install_steps("@anthropic-ai/claude-code", config, pins)
    }

    fn execution_steps(&self, run: &EngineRun<'_>) -> Vec<Value> {
        let mut command: Vec<String> = vec!["claude".into(), "--print".into()];
        if let Some(model) = &run.config.model {
            command.extend(["--model".into(), model.clone()]);
        }
        if let Some(turns) = run.config.max_turns {
            command.extend(["--max-turns".into(), turns.to_string()]);
        }
        if run.mcp_config {
            command.extend(["--mcp-config".into(), MCP_CONFIG_FILE.into()]);
        }
        let tools = self.tool_list(run.tools, run.safe_outputs);
        if !tools.is_empty() {
            command.extend(["--allowed-tools".into(), tools.join(",")]);
        }
        command.extend([
            "--permission-mode".into(),
            "bypassPermissions".into(),
            "--output-format".into(),
            "stream-json".into(),
            "--verbose".into(),
        ]);
        command.extend(run.config.args.iter().cloned());

        let mut env = secret_env(self.secrets(), run.config);
        env.insert("DISABLE_TELEMETRY".into(), "1".into());
        env.insert("MCP_TIMEOUT".into(), "120000".into());
        vec![execution_step(
            "Run Claude Code",
            run,
            run_script(&command, run.prompt_file, run.log_file),
            env,
        )]
    }

    fn tool_list(&self, tools: &Tools, safe_outputs: bool) -> Vec<String> {
        let mut list: Vec<String> = ["Glob", "Grep", "LS", "Read", "Task", "TodoWrite"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        if tools.edit {
            list.extend(["Edit", "MultiEdit", "NotebookEdit", "Write"].iter().map(|t| t.to_string()));
        }
        match &tools.bash {
            Some(BashTool::Any) => list.push("Bash".into()),
            Some(BashTool::Commands(commands)) => {
                list.extend(commands.iter().map(|command| format!("Bash({command})")))
            }
            None => {}
        }
        if tools.web_fetch {
            list.push("WebFetch".into());
        }
        if tools.web_search {
            list.push("WebSearch".into());
        }
        if let Some(github) = &tools.github {
            list.extend(mcp_tool_names("github", &github.allowed));
        }
        for server in &tools.mcp_servers {
            list.extend(mcp_tool_names(&server.name, &server.allowed));
        }
        if safe_outputs {
            list.push(format!("mcp__{SAFE_OUTPUTS_SERVER}"));
        }
        list.sort();
        list.dedup();
        list
    }
}

fn mcp_tool_names(server: &str, allowed: &[String]) -> Vec<String> {
    if allowed.is_empty() {
        vec![format!("mcp__{server}")]
    } else {
        allowed.iter().map(|tool| format!("mcp__{server}__{tool}")).collect()
    }
}

pub struct CodexEngine;

impl AgenticEngine for CodexEngine {
    fn id(&self) -> EngineId {
        EngineId::Codex
    }

    fn secrets(&self) -> &'static [&'static str] {
        &["OPENAI_API_KEY"]
    }

    fn domains(&self) -> &'static [&'static str] {
        &["api.openai.com"]
    }

    fn install_steps(&self, config: &EngineConfig, pins: &ActionPins) -> Vec<Step> {
        npm_install_steps("@openai/codex", config, pins)
    }

    fn execution_steps(&self, run: &EngineRun<'_>) -> Vec<Value> {
        let mut command: Vec<String> = vec!["codex".into()];
        if let Some(model) = &run.config.model {
            command.extend(["-c".into(), format!("model={model}")]);
        }
        command.extend(["exec".into(), "--full-auto".into(), "--skip-git-repo-check".into()]);
        command.extend(run.config.args.iter().cloned());

        let mut env = secret_env(self.secrets(), run.config);
        env.insert("CODEX_HOME".into(), CODEX_HOME.into());
        env.insert("RUST_LOG".into(), "info".into());
        vec![execution_step(
            "Run Codex",
            run,
            run_script(&command, run.prompt_file, run.log_file),
            env,
        )]
    }

    /// Codex exposes every configured MCP server; nothing to filter
    fn tool_list(&self, _tools: &Tools, _safe_outputs: bool) -> Vec<String> {
        Vec::new()
    }
}

pub struct CopilotEngine;

impl AgenticEngine for CopilotEngine {
    fn id(&self) -> EngineId {
        EngineId::Copilot
    }

    fn secrets(&self) -> &'static [&'static str] {
        &["COPILOT_GITHUB_TOKEN"]
    }

    fn domains(&self) -> &'static [&'static str] {
        &[
            "api.business.githubcopilot.com",
            "api.enterprise.githubcopilot.com",
            "api.githubcopilot.com",
        ]
    }

    fn install_steps(&self, config: &EngineConfig, pins: &ActionPins) -> Vec<Step> {
        npm_install_steps("@github/copilot", config, pins)
    }

    fn execution_steps(&self, run: &EngineRun<'_>) -> Vec<Value> {
        let mut command: Vec<String> = vec![
            "copilot".into(),
            "--add-dir".into(),
            "/tmp/aw/".into(),
            "--log-level".into(),
            "all".into(),
        ];
        if let Some(model) = &run.config.model {
            command.extend(["--model".into(), model.clone()]);
        }
        if run.mcp_config {
            command.extend(["--additional-mcp-config".into(), format!("@{MCP_CONFIG_FILE}")]);
        }
        for tool in self.tool_list(run.tools, run.safe_outputs) {
            command.extend(["--allow-tool".into(), tool]);
        }
        command.extend(run.config.args.iter().cloned());
        command.push("--prompt".into());

        let env = secret_env(self.secrets(), run.config);
        vec![execution_step(
            "Run GitHub Copilot CLI",
            run,
            run_script(&command, run.prompt_file, run.log_file),
            env,
        )]
    }

    fn tool_list(&self, tools: &Tools, safe_outputs: bool) -> Vec<String> {
        let mut list = Vec::new();
        match &tools.bash {
            Some(BashTool::Any) => list.push("shell".to_string()),
            Some(BashTool::Commands(commands)) => {
                list.extend(commands.iter().map(|command| format!("shell({command})")))
            }
            None => {}
        }
        if tools.edit {
            list.push("write".into());
        }
        if let Some(github) = &tools.github {
            list.extend(copilot_tool_names("github", &github.allowed));
        }
        for server in &tools.mcp_servers {
            list.extend(copilot_tool_names(&server.name, &server.allowed));
        }
        if safe_outputs {
            list.push(SAFE_OUTPUTS_SERVER.into());
        }
        list.sort();
        list.dedup();
        list
    }
}

fn copilot_tool_names(server: &str, allowed: &[String]) -> Vec<String> {
    if allowed.is_empty() {
        vec![server.to_string()]
    } else {
        allowed.iter().map(|tool| format!("{server}({tool})")).collect()
    }
}

/// User-supplied steps run the agent
pub struct CustomEngine;

impl AgenticEngine for CustomEngine {
    fn id(&self) -> EngineId {
        EngineId::Custom
    }

    fn secrets(&self) -> &'static [&'static str] {
        &[]
    }

    fn domains(&self) -> &'static [&'static str] {
        &[]
    }

    fn install_steps(&self, _config: &EngineConfig, _pins: &ActionPins) -> Vec<Step> {
        Vec::new()
    }

    fn execution_steps(&self, run: &EngineRun<'_>) -> Vec<Value> {
        run.config.steps.clone()
    }

    fn tool_list(&self, _tools: &Tools, _safe_outputs: bool) -> Vec<String> {
        Vec::new()
    }
}
