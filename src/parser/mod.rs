//! Document parsing
//!
//! Loads a workflow document, resolves its imports recursively and returns
//! a single [`SourceDocument`] whose configuration is the deep merge of
//! every layer and whose body has all fragments spliced in.

use crate::error::{ErrorCode, Result};
use crate::imports::{
    ContentVersion, DocumentId, ImportBase, ImportCache, ImportReference, ImportResolver,
    RemoteSource, ResolutionError, ResolvedImport,
};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub mod directives;
pub mod frontmatter;
pub mod merge;
pub mod sections;

pub use directives::Segment;
pub use frontmatter::Frontmatter;
pub use merge::{merge_layer, normalize_kind_keys};
pub use sections::extract_section;

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|line| format!(":{line}")).unwrap_or_default()
}

/// Malformed document syntax
#[derive(Error, Debug, Clone, PartialEq)]
#[error("[E{code:04}] {file}{}: {message}", line_suffix(.line))]
pub struct ParseError {
    pub code: u16,
    pub file: String,
    pub line: Option<usize>,
    pub message: String,
}

impl ParseError {
    pub fn new(code: u16, file: impl Into<String>, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            code,
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }
}

/// An import that contributed to a document
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRecord {
    pub id: DocumentId,
    /// Reference with its resolved version, e.g. `acme/wf/x.md@<sha>`
    pub display: String,
    pub version: ContentVersion,
    /// Engine declared by the fragment itself, before merging
    pub engine: Option<Value>,
}

/// A fully merged workflow document
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub id: DocumentId,
    pub path: PathBuf,
    pub version: ContentVersion,
    pub config: Mapping,
    pub body: String,
    /// Imports in the order they were first merged
    pub imports: Vec<ImportRecord>,
    /// Engine declared by the root document, before merging
    pub engine: Option<Value>,
}

impl SourceDocument {
    /// Workflow name derived from the file stem
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workflow".to_string())
    }
}

struct Loaded {
    config: Mapping,
    body: String,
    engine: Option<Value>,
}

/// Loads documents and their imports for one compile invocation
pub struct DocumentLoader<'a> {
    resolver: ImportResolver<'a>,
    /// Spliced bodies, keyed by document and section
    visited: HashSet<(DocumentId, Option<String>)>,
    /// Documents whose configuration is already merged
    merged: HashSet<DocumentId>,
    records: Vec<ImportRecord>,
}

impl<'a> DocumentLoader<'a> {
    pub fn new(cache: &'a ImportCache, remote: &'a dyn RemoteSource) -> Self {
        Self {
            resolver: ImportResolver::new(cache, remote),
            visited: HashSet::new(),
            merged: HashSet::new(),
            records: Vec::new(),
        }
    }

    /// Load a root document from disk
    pub fn load(mut self, path: &Path) -> Result<SourceDocument> {
        let root = self.resolver.resolve_local(path, None)?;
        let id = root.id.clone();
        let version = root.version.clone();
        debug!("loading workflow {}", id);

        self.visited.insert((id.clone(), root.section.clone()));
        self.merged.insert(id.clone());
        let loaded = self.load_resolved(&root)?;

        Ok(SourceDocument {
            id,
            path: path.to_path_buf(),
            version,
            config: loaded.config,
            body: loaded.body,
            imports: self.records,
            engine: loaded.engine,
        })
    }

    fn load_resolved(&mut self, document: &ResolvedImport) -> Result<Loaded> {
        self.resolver.enter(&document.id)?;

        let split = frontmatter::split(&document.content, &document.display)?;
        let mut own = split.config;
        let engine = own.get("engine").cloned();
        let references = take_imports(&mut own, &document.display)?;
        normalize_kind_keys(&mut own);

        let mut config = Mapping::new();
        let mut prefix = Vec::new();
        for reference in references {
            if let Some(loaded) = self.load_import(document, &reference, false)? {
                merge_layer(&mut config, loaded.config);
                prefix.push(loaded.body);
            }
        }

        let body = match &document.section {
            Some(section) => extract_section(&split.body, section).ok_or_else(|| ResolutionError::NotFound {
                reference: format!("{}#{}", document.display, section),
                importer: None,
            })?,
            None => split.body,
        };

        let mut spliced = String::new();
        for segment in directives::segments(&body) {
            match segment {
                Segment::Text(text) => spliced.push_str(&text),
                Segment::Import {
                    reference, optional, ..
                } => {
                    if let Some(loaded) = self.load_import(document, &reference, optional)? {
                        merge_layer(&mut config, loaded.config);
                        spliced.push_str(loaded.body.trim_matches('\n'));
                        spliced.push('\n');
                    }
                }
            }
        }

        merge_layer(&mut config, own);
        self.resolver.leave();

        Ok(Loaded {
            config,
            body: join_bodies(prefix, spliced),
            engine,
        })
    }

    /// Resolve and load one import of `importer`; `None` when the same
    /// document and section was already spliced or an optional import is
    /// missing. Another section of an already merged document contributes
    /// its body only.
    fn load_import(
        &mut self,
        importer: &ResolvedImport,
        reference: &str,
        optional: bool,
    ) -> Result<Option<Loaded>> {
        let parsed = ImportReference::parse(reference).map_err(|e| e.imported_from(&importer.id))?;
        let resolved = match self.resolver.resolve(&parsed, &importer.base) {
            Ok(resolved) => resolved,
            Err(ResolutionError::NotFound { .. }) if optional => {
                debug!("optional import {} not found, skipping", reference);
                return Ok(None);
            }
            Err(e) => return Err(e.imported_from(&importer.id).into()),
        };

        if self.resolver.chain().contains(&resolved.id) {
            // Surfaces the full ancestry as a cycle error
            self.resolver.enter(&resolved.id)?;
        }
        if !self.visited.insert((resolved.id.clone(), resolved.section.clone())) {
            debug!("{} already imported, skipping", resolved.display);
            return Ok(None);
        }
        let first_merge = self.merged.insert(resolved.id.clone());

        let mut loaded = self.load_resolved(&resolved).map_err(|e| match e {
            crate::error::Error::Resolution(err) => err.imported_from(&importer.id).into(),
            other => other,
        })?;
        if !first_merge {
            debug!("{} already merged, splicing body only", resolved.display);
            loaded.config = Mapping::new();
            return Ok(Some(loaded));
        }
        self.records.push(ImportRecord {
            id: resolved.id.clone(),
            display: resolved.display.clone(),
            version: resolved.version.clone(),
            engine: loaded.engine.clone(),
        });
        Ok(Some(loaded))
    }
}

/// Remove the `imports` key and return its references
fn take_imports(config: &mut Mapping, file: &str) -> std::result::Result<Vec<String>, ParseError> {
    match config.remove("imports") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(single)) => Ok(vec![single]),
        Some(Value::Sequence(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(reference) => Ok(reference),
                other => Err(ParseError::new(
                    ErrorCode::PARSE_INVALID_DIRECTIVE,
                    file,
                    None,
                    format!("imports entries must be strings, found {}", frontmatter::kind_of(&other)),
                )),
            })
            .collect(),
        Some(other) => Err(ParseError::new(
            ErrorCode::PARSE_INVALID_DIRECTIVE,
            file,
            None,
            format!("imports must be a list of strings, found {}", frontmatter::kind_of(&other)),
        )),
    }
}

fn join_bodies(prefix: Vec<String>, body: String) -> String {
    let mut parts: Vec<String> = prefix
        .into_iter()
        .map(|part| part.trim_matches('\n').to_string())
        .filter(|part| !part.is_empty())
        .collect();
    let body = body.trim_start_matches('\n');
    if !body.is_empty() {
        parts.push(body.to_string());
    }
    let mut joined = parts.join("\n\n");
    if !joined.is_empty() && !joined.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

/// Parse a standalone document without resolving imports
pub fn parse(raw: &str, file: &str) -> std::result::Result<Frontmatter, ParseError> {
    frontmatter::split(raw, file)
}

/// Base directory for a root document path
pub fn base_for(path: &Path) -> ImportBase {
    ImportBase::Local(path.parent().map(Path::to_path_buf).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::imports::OfflineSource;
    use crate::testing::MemoryRemoteSource;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn load(path: &Path) -> Result<SourceDocument> {
        let cache = ImportCache::in_memory();
        DocumentLoader::new(&cache, &OfflineSource).load(path)
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new(ErrorCode::PARSE_INVALID_YAML, "a.md", Some(4), "bad indent");
        assert_eq!(err.to_string(), "[E3002] a.md:4: bad indent");
        let err = ParseError::new(ErrorCode::PARSE_NOT_A_MAPPING, "a.md", None, "nope");
        assert_eq!(err.to_string(), "[E3003] a.md: nope");
    }

    #[test]
    fn test_frontmatter_imports_merge_and_prepend() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "shared/tools.md",
            "---\ntools:\n  github:\n    toolsets: [issues]\nnetwork:\n  allowed: [a.com]\n---\nShared guidance.\n",
        );
        let main = write(
            temp.path(),
            "main.md",
            "---\non: push\nimports:\n  - shared/tools.md\nnetwork:\n  allowed: [b.com]\n---\n# Main\n",
        );

        let doc = load(&main).unwrap();
        assert!(!doc.config.contains_key("imports"));
        assert_eq!(
            doc.config.get("network").unwrap().get("allowed").unwrap(),
            &serde_yaml::from_str::<Value>("[a.com, b.com]").unwrap()
        );
        assert_eq!(doc.body, "Shared guidance.\n\n# Main\n");
        assert_eq!(doc.imports.len(), 1);
    }

    #[test]
    fn test_importing_document_wins_on_scalars() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "shared/base.md", "---\ntimeout-minutes: 5\nruns-on: big\n---\n");
        let main = write(
            temp.path(),
            "main.md",
            "---\nimports: [shared/base.md]\ntimeout-minutes: 30\n---\nbody\n",
        );

        let doc = load(&main).unwrap();
        assert_eq!(doc.config.get("timeout-minutes"), Some(&Value::from(30)));
        assert_eq!(doc.config.get("runs-on"), Some(&Value::from("big")));
    }

    #[test]
    fn test_body_directive_splices_in_place() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "shared/rules.md", "---\ntools:\n  edit:\n---\n- rule one\n");
        let main = write(
            temp.path(),
            "main.md",
            "---\non: push\n---\nBefore\n@include shared/rules.md\nAfter\n",
        );

        let doc = load(&main).unwrap();
        assert_eq!(doc.body, "Before\n- rule one\nAfter\n");
        assert!(doc.config.get("tools").unwrap().get("edit").is_some());
    }

    #[test]
    fn test_optional_directive_tolerates_missing_file() {
        let temp = TempDir::new().unwrap();
        let main = write(temp.path(), "main.md", "A\n{{#import? shared/none.md}}\nB\n");
        let doc = load(&main).unwrap();
        assert_eq!(doc.body, "A\nB\n");
    }

    #[test]
    fn test_missing_import_names_importer() {
        let temp = TempDir::new().unwrap();
        let main = write(temp.path(), "main.md", "---\nimports: [shared/none.md]\n---\n");
        let err = load(&main).unwrap_err();
        match err {
            Error::Resolution(ResolutionError::NotFound { importer, .. }) => {
                assert!(importer.unwrap().ends_with("main.md"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_cycle_is_reported() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.md", "---\nimports: [b.md]\n---\n");
        write(temp.path(), "b.md", "---\nimports: [a.md]\n---\n");

        let err = load(&temp.path().join("a.md")).unwrap_err();
        match err {
            Error::Resolution(ResolutionError::Cycle { chain }) => {
                assert_eq!(chain.len(), 3);
                assert!(chain[0].ends_with("a.md"));
                assert!(chain[1].ends_with("b.md"));
                assert!(chain[2].ends_with("a.md"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_diamond_imports_merge_once() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "shared/common.md", "common\n");
        write(temp.path(), "shared/left.md", "---\nimports: [common.md]\n---\nleft\n");
        write(temp.path(), "shared/right.md", "---\nimports: [common.md]\n---\nright\n");
        let main = write(
            temp.path(),
            "main.md",
            "---\nimports: [shared/left.md, shared/right.md]\n---\nmain\n",
        );

        let doc = load(&main).unwrap();
        assert_eq!(doc.body, "common\n\nleft\n\nright\n\nmain\n");
        assert_eq!(doc.imports.len(), 3);
    }

    #[test]
    fn test_remote_section_import() {
        let temp = TempDir::new().unwrap();
        let sha = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
        let source = MemoryRemoteSource::new();
        source.add_revision("acme/agents", "v2", sha);
        source.add_file(
            "acme/agents",
            sha,
            "docs/guide.md",
            "# Guide\n\n## Tone\n\nBe kind.\n\n## Other\n\nno\n",
        );
        let main = write(
            temp.path(),
            "main.md",
            "---\non: push\n---\n{{#import acme/agents/docs/guide.md@v2#Tone}}\n",
        );

        let cache = ImportCache::in_memory();
        let doc = DocumentLoader::new(&cache, &source).load(&main).unwrap();
        assert_eq!(doc.body, "## Tone\n\nBe kind.\n");
        assert_eq!(doc.imports[0].version.as_str(), sha);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_sections_of_one_file_splice_at_each_reference() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "shared/guide.md",
            "---\ntools:\n  edit:\n---\n## Setup\n\nsetup text\n\n## Review\n\nreview text\n",
        );
        let main = write(
            temp.path(),
            "main.md",
            "---\non: push\n---\nStart\n{{#import shared/guide.md#Setup}}\nMiddle\n{{#import shared/guide.md#Review}}\nEnd\n",
        );

        let doc = load(&main).unwrap();
        assert_eq!(
            doc.body,
            "Start\n## Setup\n\nsetup text\nMiddle\n## Review\n\nreview text\nEnd\n"
        );
        assert_eq!(doc.imports.len(), 1);
        assert!(doc.config.get("tools").unwrap().get("edit").is_some());
    }

    #[test]
    fn test_same_section_twice_splices_once() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "shared/guide.md", "## Setup\n\nsetup text\n");
        let main = write(
            temp.path(),
            "main.md",
            "A\n{{#import shared/guide.md#Setup}}\nB\n{{#import shared/guide.md#Setup}}\nC\n",
        );

        let doc = load(&main).unwrap();
        assert_eq!(doc.body, "A\n## Setup\n\nsetup text\nB\nC\n");
    }

    #[test]
    fn test_kind_spellings_merge_into_one_declaration() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "shared/labels.md",
            "---\nsafe-outputs:\n  add_labels:\n    allowed: [bug]\n---\n",
        );
        let main = write(
            temp.path(),
            "main.md",
            "---\non: push\nimports: [shared/labels.md]\nsafe-outputs:\n  add-labels:\n    allowed: [question]\n---\nLabel it.\n",
        );

        let doc = load(&main).unwrap();
        let outputs = doc.config.get("safe-outputs").unwrap().as_mapping().unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(
            outputs.get("add-labels").unwrap().get("allowed").unwrap(),
            &serde_yaml::from_str::<Value>("[bug, question]").unwrap()
        );
    }

    #[test]
    fn test_import_records_fragment_engine() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "shared/e.md", "---\nengine: codex\n---\n");
        let main = write(temp.path(), "main.md", "---\nimports: [shared/e.md]\nengine: claude\n---\n");

        let doc = load(&main).unwrap();
        assert_eq!(doc.engine, Some(Value::from("claude")));
        assert_eq!(doc.imports[0].engine, Some(Value::from("codex")));
        assert_eq!(doc.config.get("engine"), Some(&Value::from("claude")));
    }
}
