//! MCP mediator server
//!
//! Speaks newline-delimited JSON-RPC 2.0 over stdio. Each declared effect
//! kind is exposed as one tool; a successful call appends a record to the
//! safe-outputs log through [`SafeOutputsWriter`].

use super::log::SafeOutputsWriter;
use crate::model::{EffectKind, SafeOutputDeclaration};
use serde_json::{json, Map, Value};
use std::io::{self, BufRead, Write};
use tracing::{debug, warn};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "safeoutputs";

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

fn string_property(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn list_property(description: &str) -> Value {
    json!({ "type": "array", "items": { "type": "string" }, "description": description })
}

fn number_property(description: &str) -> Value {
    json!({ "type": ["number", "string"], "description": description })
}

/// JSON schema of a tool's arguments
pub fn input_schema(declaration: &SafeOutputDeclaration) -> Value {
    let mut properties = Map::new();
    let mut required: Vec<String> = Vec::new();
    let mut add = |name: &str, schema: Value, is_required: bool| {
        properties.insert(name.to_string(), schema);
        if is_required {
            required.push(name.to_string());
        }
    };

    let item_number = "Issue, pull request or discussion number; only needed when the target is not the triggering item";
    match declaration.kind {
        EffectKind::CreateIssue => {
            add("title", string_property("Issue title"), true);
            add("body", string_property("Issue body in markdown"), true);
            add("labels", list_property("Labels to apply"), false);
        }
        EffectKind::CreateDiscussion => {
            add("title", string_property("Discussion title"), true);
            add("body", string_property("Discussion body in markdown"), true);
            add("category", string_property("Discussion category"), false);
        }
        EffectKind::CreatePullRequest => {
            add("title", string_property("Pull request title"), true);
            add("body", string_property("Pull request description in markdown"), true);
            add("branch", string_property("Branch name for the changes"), false);
            add("labels", list_property("Labels to apply"), false);
        }
        EffectKind::AddComment => {
            add("body", string_property("Comment body in markdown"), true);
            add("item_number", number_property(item_number), false);
        }
        EffectKind::AddLabels => {
            add("labels", list_property("Labels to add"), true);
            add("item_number", number_property(item_number), false);
        }
        EffectKind::UpdateIssue => {
            add("title", string_property("New title"), false);
            add("body", string_property("New body"), false);
            add(
                "status",
                json!({ "type": "string", "enum": ["open", "closed"], "description": "New state" }),
                false,
            );
            add("item_number", number_property(item_number), false);
        }
        EffectKind::AssignToUser => {
            add("assignees", list_property("Users to assign"), true);
            add("item_number", number_property(item_number), false);
        }
        EffectKind::CloseIssue => {
            add("body", string_property("Closing comment"), false);
            add("item_number", number_property(item_number), false);
        }
        EffectKind::CreatePullRequestReviewComment => {
            add("path", string_property("File path relative to the repository root"), true);
            add("line", number_property("Line the comment applies to"), true);
            add("start_line", number_property("First line of a multi-line comment"), false);
            add(
                "side",
                json!({ "type": "string", "enum": ["LEFT", "RIGHT"], "description": "Side of the diff" }),
                false,
            );
            add("body", string_property("Comment body in markdown"), true);
            add("item_number", number_property("Pull request number"), false);
        }
        EffectKind::MissingTool => {
            add("tool", string_property("Name of the missing tool or permission"), true);
            add("reason", string_property("Why it was needed"), true);
            add("alternatives", string_property("Workarounds that were considered"), false);
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

pub fn tool_definition(declaration: &SafeOutputDeclaration) -> Value {
    let kind = declaration.kind;
    let mut description = kind.description().to_string();
    if declaration.max > 1 {
        description.push_str(&format!(" (at most {} per run)", declaration.max));
    }
    if !declaration.allowed.is_empty() {
        if let Some(subject) = kind.allow_list_subject() {
            description.push_str(&format!("; allowed {subject}: {}", declaration.allowed.join(", ")));
        }
    }
    json!({
        "name": kind.tool_name(),
        "description": description,
        "inputSchema": input_schema(declaration),
    })
}

pub struct McpServer {
    writer: SafeOutputsWriter,
}

impl McpServer {
    pub fn new(writer: SafeOutputsWriter) -> Self {
        Self { writer }
    }

    /// Serve until `input` reaches end of file
    pub fn serve<R: BufRead, W: Write>(&self, input: R, mut output: W) -> io::Result<()> {
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line) {
                writeln!(output, "{response}")?;
                output.flush()?;
            }
        }
        Ok(())
    }

    /// Handle one message; notifications produce no response
    pub fn handle_line(&self, line: &str) -> Option<Value> {
        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => return Some(error_response(Value::Null, PARSE_ERROR, &e.to_string())),
        };
        let id = message.get("id").cloned();
        let method = message.get("method").and_then(Value::as_str).unwrap_or_default();
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        debug!("mcp request {}", method);

        let id = id?;
        let result = match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({
                "tools": self
                    .writer
                    .declarations()
                    .iter()
                    .map(tool_definition)
                    .collect::<Vec<_>>(),
            })),
            "tools/call" => self.call_tool(&params),
            other => Err((METHOD_NOT_FOUND, format!("method `{other}` not found"))),
        };
        Some(match result {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => error_response(id, code, &message),
        })
    }

    fn call_tool(&self, params: &Value) -> Result<Value, (i64, String)> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or((INVALID_PARAMS, "missing tool name".to_string()))?;
        let Some(kind) = EffectKind::from_key(name) else {
            return Err((INVALID_PARAMS, format!("unknown tool `{name}`")));
        };
        let mut arguments = match params.get("arguments") {
            Some(Value::Object(arguments)) => arguments.clone(),
            None | Some(Value::Null) => Map::new(),
            Some(_) => return Err((INVALID_PARAMS, "`arguments` must be an object".to_string())),
        };
        arguments.insert("type".to_string(), Value::from(kind.key()));

        match self.writer.emit(Value::Object(arguments)) {
            Ok(request) => Ok(json!({
                "content": [{ "type": "text", "text": format!("Recorded {}", request.summary()) }],
            })),
            Err(err) => {
                warn!("rejected {} call: {}", name, err);
                Ok(json!({
                    "content": [{ "type": "text", "text": err.to_string() }],
                    "isError": true,
                }))
            }
        }
    }
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safe_outputs::log::SafeOutputsLog;
    use tempfile::TempDir;

    fn server(dir: &TempDir) -> (McpServer, SafeOutputsLog) {
        let log = SafeOutputsLog::new(dir.path().join("outputs.jsonl"));
        let mut labels = SafeOutputDeclaration::new(EffectKind::AddLabels);
        labels.allowed = vec!["bug".into()];
        let writer = SafeOutputsWriter::new(
            log.clone(),
            vec![SafeOutputDeclaration::new(EffectKind::CreateIssue), labels],
        );
        (McpServer::new(writer), log)
    }

    #[test]
    fn test_session() {
        let dir = TempDir::new().unwrap();
        let (server, log) = server(&dir);
        let input = [
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"create_issue","arguments":{"title":"t","body":"b"}}}"#,
        ]
        .join("\n");
        let mut output = Vec::new();
        server.serve(input.as_bytes(), &mut output).unwrap();

        let responses: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["result"]["serverInfo"]["name"], "safeoutputs");
        let tools = responses[1]["result"]["tools"].as_array().unwrap();
        assert_eq!(tools[0]["name"], "create_issue");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["title", "body"]));
        assert!(tools[1]["description"].as_str().unwrap().contains("allowed labels: bug"));
        assert_eq!(responses[2]["result"]["content"][0]["text"], "Recorded issue \"t\"");

        assert_eq!(log.read().unwrap().records.len(), 1);
    }

    #[test]
    fn test_undeclared_tool_is_an_error_result() {
        let dir = TempDir::new().unwrap();
        let (server, log) = server(&dir);
        let response = server
            .handle_line(r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"close_issue","arguments":{}}}"#)
            .unwrap();
        assert_eq!(response["result"]["isError"], true);
        assert!(log.read().unwrap().is_empty());

        let response = server
            .handle_line(r#"{"jsonrpc":"2.0","id":8,"method":"resources/list"}"#)
            .unwrap();
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
    }
}
