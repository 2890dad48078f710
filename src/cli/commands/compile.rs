//! Compile, validate and graph commands

use crate::compiler::{ensure_up_to_date, lock_file_path, Compiler};
use crate::config::{CompilerConfig, ConfigLoader};
use crate::imports::{GitHubSource, ImportCache, OfflineSource, RemoteSource};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Directory searched when no paths are given
pub const DEFAULT_WORKFLOW_DIR: &str = ".github/workflows";

pub struct CompileParams {
    pub root: PathBuf,
    pub paths: Vec<PathBuf>,
    pub check: bool,
    pub output: Option<PathBuf>,
    pub offline: bool,
}

/// Everything one compile invocation shares across files
struct Session {
    config: CompilerConfig,
    cache: ImportCache,
    remote: Box<dyn RemoteSource>,
}

impl Session {
    fn open(root: &Path, offline: bool) -> Result<Self> {
        let config = ConfigLoader::new(root)
            .load()
            .with_context(|| format!("Failed to load configuration under {}", root.display()))?;
        let cache = match config.get_cache_dir() {
            Some(dir) => {
                debug!("import cache at {}", dir.display());
                ImportCache::on_disk(dir)
            }
            None => ImportCache::in_memory(),
        };
        let remote: Box<dyn RemoteSource> = if offline {
            Box::new(OfflineSource)
        } else {
            Box::new(
                GitHubSource::from_env(&config.github_api_url)
                    .context("Failed to set up the GitHub import source")?,
            )
        };
        Ok(Self {
            config,
            cache,
            remote,
        })
    }

    fn compiler(&self) -> Compiler<'_> {
        Compiler::new(&self.config)
    }
}

/// Workflow sources named by `paths`; directories contribute their
/// top-level `*.md` files so shared fragments in subdirectories are skipped
pub fn discover_workflows(root: &Path, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let paths = if paths.is_empty() {
        vec![root.join(DEFAULT_WORKFLOW_DIR)]
    } else {
        paths.to_vec()
    };

    let mut found = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut in_dir: Vec<PathBuf> = WalkDir::new(&path)
                .max_depth(1)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|file| file.extension().is_some_and(|ext| ext == "md"))
                .collect();
            in_dir.sort();
            found.extend(in_dir);
        } else if path.is_file() {
            found.push(path);
        } else {
            bail!("No such workflow file or directory: {}", path.display());
        }
    }
    Ok(found)
}

pub fn run_compile(params: CompileParams) -> Result<()> {
    let workflows = discover_workflows(&params.root, &params.paths)?;
    if workflows.is_empty() {
        println!("No workflows found.");
        return Ok(());
    }
    if params.output.is_some() && workflows.len() > 1 {
        bail!("--output can only be used with a single workflow");
    }

    let session = Session::open(&params.root, params.offline)?;
    let compiler = session.compiler();
    let mut failures = 0;

    for source in &workflows {
        let target = params.output.clone().unwrap_or_else(|| lock_file_path(source));
        let result = compiler
            .compile_file(source, &session.cache, session.remote.as_ref())
            .map_err(anyhow::Error::from)
            .and_then(|compiled| {
                if params.check {
                    ensure_up_to_date(&target, &compiled.yaml)?;
                    println!("✓ {} is up to date", target.display());
                } else {
                    fs::write(&target, &compiled.yaml)
                        .with_context(|| format!("Failed to write {}", target.display()))?;
                    println!("✓ {} -> {} ({} jobs)", source.display(), target.display(), compiled.graph.len());
                }
                Ok(())
            });
        if let Err(e) = result {
            failures += 1;
            eprintln!("✗ {}: {e:#}", source.display());
        }
    }

    info!("compiled {} workflow(s), {} failed", workflows.len() - failures, failures);
    if failures > 0 {
        bail!("{failures} of {} workflow(s) failed", workflows.len());
    }
    Ok(())
}

pub fn run_validate(root: &Path, paths: Vec<PathBuf>, offline: bool) -> Result<()> {
    let workflows = discover_workflows(root, &paths)?;
    let session = Session::open(root, offline)?;
    let compiler = session.compiler();
    let mut failures = 0;

    for source in &workflows {
        match compiler.compile_file(source, &session.cache, session.remote.as_ref()) {
            Ok(compiled) => println!("✓ {} ({} jobs)", source.display(), compiled.graph.len()),
            Err(e) => {
                failures += 1;
                eprintln!("✗ {}: {e}", source.display());
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} workflow(s) are invalid", workflows.len());
    }
    Ok(())
}

pub fn run_graph(root: &Path, workflow: &Path, offline: bool) -> Result<()> {
    let session = Session::open(root, offline)?;
    let compiled = session
        .compiler()
        .compile_file(workflow, &session.cache, session.remote.as_ref())
        .with_context(|| format!("Failed to compile {}", workflow.display()))?;
    println!("{}", compiled.graph.to_mermaid());
    Ok(())
}
