//! Step builders shared by the job builders

use super::job::Step;
use crate::config::CompilerConfig;

/// Heredoc that writes `content` to `path`, with a delimiter that cannot
/// collide with the content
pub fn write_file(name: &str, path: &str, content: &str) -> Step {
    let mut delimiter = String::from("AW_EOF");
    while content.lines().any(|line| line.trim() == delimiter) {
        delimiter.push('_');
    }
    let dir = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(".");
    let mut body = content.to_string();
    if !body.ends_with('\n') {
        body.push('\n');
    }
    Step::run(
        name,
        format!("mkdir -p {dir}\ncat > {path} << '{delimiter}'\n{body}{delimiter}\n"),
    )
}

pub fn checkout(config: &CompilerConfig) -> Step {
    Step::uses("Checkout repository", config.actions.checkout.clone()).input("persist-credentials", false)
}

/// Installs the `aw` runtime used by mediator and effect steps
pub fn install_runtime(config: &CompilerConfig) -> Step {
    Step::run("Install agentic-workflows runtime", config.runtime_install.clone())
}

/// A step invoking the runtime binary
pub fn runtime(config: &CompilerConfig, name: &str, args: &[&str]) -> Step {
    let mut command = vec![config.runtime_command.as_str()];
    command.extend_from_slice(args);
    Step::run(name, shell_words::join(command))
}

pub fn upload_artifact(config: &CompilerConfig, artifact: &str, path: &str) -> Step {
    Step::uses(format!("Upload {artifact}"), config.actions.upload_artifact.clone())
        .when("always()")
        .input("name", artifact)
        .input("path", path)
        .input("if-no-files-found", "ignore")
}

pub fn download_artifact(config: &CompilerConfig, artifact: &str, path: &str) -> Step {
    Step::uses(format!("Download {artifact}"), config.actions.download_artifact.clone())
        .input("name", artifact)
        .input("path", path)
}
