//! Agent job
//!
//! Runs the engine on the task body with only read grants (plus writes
//! implied by declared tools). Effect requests leave the job through the
//! safe-outputs log artifact, never through a credential.

use super::activation;
use super::engines::{AgenticEngine, EngineRun, SAFE_OUTPUTS_SERVER};
use super::expressions::{job_output, secret, step_output, wrap};
use super::job::{Job, Step};
use super::paths::*;
use super::steps;
use crate::config::CompilerConfig;
use crate::model::{EffectKind, EngineId, GatewayNetworkMode, SafeOutputsConfig, SandboxAgent, WorkflowModel};
use serde_json::{json, Map, Value as JsonValue};

pub const JOB_NAME: &str = "agent";

pub const GITHUB_MCP_IMAGE: &str = "ghcr.io/github/github-mcp-server:v0.20.1";

pub fn build(model: &WorkflowModel, config: &CompilerConfig, engine: &dyn AgenticEngine) -> Job {
    let mut job = Job::new(JOB_NAME, model.runs_on.clone());
    job.needs(activation::JOB_NAME);
    job.condition = Some(format!("{} == 'true'", job_output(activation::JOB_NAME, "activated")));
    job.permissions = model.permissions.clone();
    job.timeout_minutes = Some(model.timeout_minutes);

    let safe_outputs = model.safe_outputs.as_ref();
    if safe_outputs.is_some() {
        job.env("AW_SAFE_OUTPUTS", SAFE_OUTPUTS_LOG);
        job.env("AW_SAFE_OUTPUTS_CONFIG", SAFE_OUTPUTS_CONFIG_FILE);
    }

    job.step(steps::checkout(config));
    if let Some(outputs) = safe_outputs {
        job.step(steps::install_runtime(config));
        job.step(steps::write_file(
            "Write safe-outputs config",
            SAFE_OUTPUTS_CONFIG_FILE,
            &runtime_config_json(outputs),
        ));
    }
    job.raw_steps(&model.steps);
    for step in engine.install_steps(&model.engine, &config.actions) {
        job.step(step);
    }

    job.step(steps::write_file("Create prompt", PROMPT_FILE, &prompt(model)));

    let mcp_config = mcp_servers(model, config);
    let has_mcp = !mcp_config.is_empty();
    if has_mcp {
        let step = match model.engine.id {
            EngineId::Codex => steps::write_file(
                "Setup MCP servers",
                &format!("{CODEX_HOME}/config.toml"),
                &codex_config(&mcp_config),
            ),
            _ => steps::write_file(
                "Setup MCP servers",
                MCP_CONFIG_FILE,
                &pretty_json(&json!({ "mcpServers": mcp_config })),
            ),
        };
        job.step(step);
    }

    if model.network.declared || model.sandbox.agent != SandboxAgent::None {
        job.env("AW_NETWORK_POLICY", NETWORK_CONFIG_FILE);
        job.step(steps::write_file(
            "Write network policy",
            NETWORK_CONFIG_FILE,
            &network_policy(model, engine),
        ));
    }
    if let Some(gateway) = &model.sandbox.gateway {
        let mut args: Vec<String> = vec![
            "docker".into(),
            "run".into(),
            "-d".into(),
            "--name".into(),
            "aw-mcp-gateway".into(),
            "--network".into(),
            match gateway.network_mode {
                GatewayNetworkMode::Bridge => "bridge".into(),
                GatewayNetworkMode::Host => "host".into(),
            },
        ];
        if gateway.network_mode == GatewayNetworkMode::Bridge {
            args.extend(["-p".into(), format!("{0}:{0}", gateway.port)]);
        }
        for mount in &gateway.mounts {
            args.extend(["-v".into(), mount.spec()]);
        }
        for (key, value) in &gateway.env {
            args.extend(["-e".into(), format!("{key}={value}")]);
        }
        args.push(gateway.container.clone());
        job.step(Step::run("Start MCP gateway", shell_words::join(&args)));
    }

    let run = EngineRun {
        config: &model.engine,
        prompt_file: PROMPT_FILE,
        log_file: AGENT_LOG,
        mcp_config: has_mcp,
        tools: &model.tools,
        safe_outputs: safe_outputs.is_some(),
        timeout_minutes: model.timeout_minutes,
    };
    job.raw_steps(&engine.execution_steps(&run));

    if let Some(outputs) = safe_outputs {
        if outputs.is_declared(EffectKind::CreatePullRequest) {
            job.step(
                Step::run(
                    "Generate patch",
                    format!(
                        "git add -A\ngit diff --cached --binary {} > {PATCH_FILE} || true\n",
                        wrap("github.sha")
                    ),
                )
                .when("always()"),
            );
        }
        job.step(
            steps::runtime(
                config,
                "Collect safe outputs",
                &[
                    "safe-outputs",
                    "collect",
                    "--output",
                    AGENT_OUTPUT_FILE,
                    "--patch",
                    PATCH_FILE,
                ],
            )
            .with_id("collect")
            .when("always()"),
        );
        job.output("output_types", step_output("collect", "output_types"));
        job.output("has_patch", step_output("collect", "has_patch"));
        job.step(steps::upload_artifact(config, SAFE_OUTPUTS_ARTIFACT, AGENT_OUTPUT_FILE));
        if outputs.is_declared(EffectKind::CreatePullRequest) {
            job.step(steps::upload_artifact(config, PATCH_ARTIFACT, PATCH_FILE));
        }
    }
    job.step(steps::upload_artifact(config, AGENT_LOG_ARTIFACT, AGENT_LOG));
    job.raw_steps(&model.post_steps);
    job
}

/// Declarations handed to the mediator and collector
pub fn runtime_config_json(outputs: &SafeOutputsConfig) -> String {
    let declarations: Vec<_> = outputs
        .declarations
        .iter()
        .map(|declaration| outputs.runtime_declaration(declaration))
        .collect();
    serde_json::to_string_pretty(&declarations).unwrap_or_else(|_| "[]".to_string())
}

/// Task body followed by instructions for requesting effects
pub fn prompt(model: &WorkflowModel) -> String {
    let mut prompt = model.body.clone();
    let Some(outputs) = &model.safe_outputs else {
        return prompt;
    };

    prompt.push_str("\n\n---\n\n## Reporting results\n\n");
    prompt.push_str(&format!(
        "You cannot write to GitHub directly. Request changes through the `{SAFE_OUTPUTS_SERVER}` tools; \
         separate jobs review and apply them after you finish.\n\n"
    ));
    for declaration in &outputs.declarations {
        let kind = declaration.kind;
        prompt.push_str(&format!(
            "- `{}`: {} (at most {})",
            kind.tool_name(),
            kind.description(),
            declaration.max
        ));
        if !declaration.allowed.is_empty() {
            if let Some(subject) = kind.allow_list_subject() {
                prompt.push_str(&format!("; allowed {subject}: {}", declaration.allowed.join(", ")));
            }
        }
        prompt.push('\n');
    }
    if outputs.is_declared(EffectKind::CreatePullRequest) {
        prompt.push_str(
            "\nTo propose code changes, edit files in the working tree and call `create_pull_request`; \
             do not push branches yourself.\n",
        );
    }
    prompt
}

/// MCP server entries keyed by server name
pub fn mcp_servers(model: &WorkflowModel, config: &CompilerConfig) -> Map<String, JsonValue> {
    let mut servers = Map::new();

    if let Some(github) = &model.tools.github {
        let mut args = vec!["run", "-i", "--rm", "-e", "GITHUB_PERSONAL_ACCESS_TOKEN", "-e", "GITHUB_TOOLSETS"];
        if github.read_only {
            args.extend(["-e", "GITHUB_READ_ONLY=1"]);
        }
        args.push(GITHUB_MCP_IMAGE);
        servers.insert(
            "github".into(),
            json!({
                "command": "docker",
                "args": args,
                "env": {
                    "GITHUB_PERSONAL_ACCESS_TOKEN": secret("GITHUB_TOKEN"),
                    "GITHUB_TOOLSETS": github.toolsets.join(","),
                },
            }),
        );
    }

    for server in &model.tools.mcp_servers {
        let entry = match (&server.container, &server.command) {
            (Some(image), _) => {
                let mut args: Vec<String> = vec!["run".into(), "-i".into(), "--rm".into()];
                for key in server.env.keys() {
                    args.extend(["-e".into(), key.clone()]);
                }
                args.push(image.clone());
                args.extend(server.args.iter().cloned());
                json!({ "command": "docker", "args": args, "env": server.env })
            }
            (None, Some(command)) => json!({ "command": command, "args": server.args, "env": server.env }),
            (None, None) => continue,
        };
        servers.insert(server.name.clone(), entry);
    }

    if model.safe_outputs.is_some() {
        servers.insert(
            SAFE_OUTPUTS_SERVER.into(),
            json!({
                "command": config.runtime_command,
                "args": ["safe-outputs", "serve"],
                "env": {
                    "AW_SAFE_OUTPUTS": SAFE_OUTPUTS_LOG,
                    "AW_SAFE_OUTPUTS_CONFIG": SAFE_OUTPUTS_CONFIG_FILE,
                },
            }),
        );
    }
    servers
}

/// Codex reads MCP servers from `config.toml`
fn codex_config(servers: &Map<String, JsonValue>) -> String {
    let mut root = toml::Table::new();
    let mut table = toml::Table::new();
    for (name, server) in servers {
        if let Ok(value) = toml::Value::try_from(server) {
            table.insert(name.clone(), value);
        }
    }
    root.insert("mcp_servers".into(), toml::Value::Table(table));
    toml::to_string(&root).unwrap_or_default()
}

fn network_policy(model: &WorkflowModel, engine: &dyn AgenticEngine) -> String {
    let policy = json!({
        "allowed": model.network.effective_domains(engine.domains()),
        "firewall": model.sandbox.firewall_enabled(&model.network),
        "sandbox": {
            "agent": model.sandbox.agent,
            "mounts": model.sandbox.mounts.iter().map(|mount| mount.spec()).collect::<Vec<_>>(),
        },
    });
    pretty_json(&policy)
}

fn pretty_json(value: &JsonValue) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}
