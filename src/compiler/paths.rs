//! Runner file locations shared by generated steps and the runtime commands

pub const RUNTIME_DIR: &str = "/tmp/aw";
pub const PROMPT_FILE: &str = "/tmp/aw/prompts/prompt.txt";
pub const MCP_CONFIG_FILE: &str = "/tmp/aw/mcp-config/mcp-servers.json";
pub const CODEX_HOME: &str = "/tmp/aw/mcp-config";
pub const NETWORK_CONFIG_FILE: &str = "/tmp/aw/network/policy.json";
pub const AGENT_LOG: &str = "/tmp/aw/agent-stdio.log";
/// Raw log the mediator appends to
pub const SAFE_OUTPUTS_LOG: &str = "/tmp/aw/safeoutputs/outputs.jsonl";
pub const SAFE_OUTPUTS_CONFIG_FILE: &str = "/tmp/aw/safeoutputs/config.json";
/// Sanitized log handed to effect jobs
pub const AGENT_OUTPUT_FILE: &str = "/tmp/aw/safeoutputs/agent_output.jsonl";
pub const PATCH_FILE: &str = "/tmp/aw/aw.patch";
pub const DETECTION_DIR: &str = "/tmp/aw/threat-detection";
pub const DETECTION_PROMPT_FILE: &str = "/tmp/aw/threat-detection/prompt.txt";
pub const DETECTION_LOG: &str = "/tmp/aw/threat-detection/detection.log";

pub const SAFE_OUTPUTS_ARTIFACT: &str = "safe-outputs";
pub const AGENT_LOG_ARTIFACT: &str = "agent-log";
pub const PATCH_ARTIFACT: &str = "aw.patch";
