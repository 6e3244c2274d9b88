//! Markdown vault access: directory walking and note parsing.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use ignore::WalkBuilder;
use noesis_core::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::host::{DocumentMeta, DocumentSource};
use crate::relevance::Candidate;

/// Documents read concurrently while collecting notes.
const READ_CONCURRENCY: usize = 8;

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)#([\p{L}\p{N}_][\p{L}\p{N}_/-]*)").expect("tag pattern"));

/// A parsed vault note.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub path: String,
    pub title: String,
    pub tags: Vec<String>,
    /// Content without frontmatter.
    pub body: String,
}

impl Note {
    /// Parse a note's frontmatter, title and tags.
    ///
    /// The title is the frontmatter `title`, else the first `# ` heading,
    /// else the file stem.
    pub fn parse(path: &str, content: &str) -> Self {
        let (frontmatter, body) = split_frontmatter(content);

        let mut title = None;
        let mut tags = Vec::new();
        if let Some(frontmatter) = frontmatter {
            let parsed = parse_frontmatter(frontmatter);
            title = parsed.title;
            tags = parsed.tags;
        }

        let title = title
            .or_else(|| {
                body.lines()
                    .find_map(|line| line.strip_prefix("# "))
                    .map(|heading| heading.trim().to_string())
            })
            .unwrap_or_else(|| file_stem(path));

        for tag in inline_tags(body) {
            push_unique(&mut tags, tag);
        }

        Self {
            path: path.to_string(),
            title,
            tags,
            body: body.to_string(),
        }
    }

    pub fn to_candidate(&self) -> Candidate {
        Candidate {
            id: self.path.clone(),
            title: self.title.clone(),
            path: self.path.clone(),
            tags: self.tags.clone(),
            body: self.body.clone(),
        }
    }
}

fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (None, content);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let body = &rest[offset + line.len()..];
            return (Some(&rest[..offset]), body);
        }
        offset += line.len();
    }
    // Unterminated; treat as plain content.
    (None, content)
}

#[derive(Default)]
struct Frontmatter {
    title: Option<String>,
    tags: Vec<String>,
}

fn parse_frontmatter(text: &str) -> Frontmatter {
    let mut parsed = Frontmatter::default();
    let mut in_tag_list = false;

    for line in text.lines() {
        if in_tag_list {
            if let Some(item) = line.trim_start().strip_prefix("- ") {
                push_unique(&mut parsed.tags, clean_value(item).trim_start_matches('#').to_string());
                continue;
            }
            in_tag_list = false;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "title" => {
                let value = clean_value(value);
                if !value.is_empty() {
                    parsed.title = Some(value.to_string());
                }
            }
            "tags" | "tag" => {
                let value = value.trim();
                if value.is_empty() {
                    in_tag_list = true;
                } else {
                    let value = value.trim_start_matches('[').trim_end_matches(']');
                    for tag in value.split(',') {
                        push_unique(&mut parsed.tags, clean_value(tag).trim_start_matches('#').to_string());
                    }
                }
            }
            _ => {}
        }
    }
    parsed
}

fn clean_value(value: &str) -> &str {
    value.trim().trim_matches(|c| c == '"' || c == '\'')
}

/// `#tag` tokens outside fenced code blocks. Purely numeric tokens such as
/// `#1` are not tags.
fn inline_tags(body: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut in_fence = false;
    for line in body.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        for capture in TAG_RE.captures_iter(line) {
            let tag = &capture[1];
            if !tag.chars().all(|c| c.is_numeric()) {
                tags.push(tag.to_string());
            }
        }
    }
    tags
}

fn push_unique(tags: &mut Vec<String>, tag: String) {
    if !tag.is_empty() && !tags.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
        tags.push(tag);
    }
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// A vault rooted at a directory of Markdown files.
///
/// Hidden entries (`.obsidian`, `.trash`) and anything matched by the
/// vault's ignore files are skipped.
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a vault-relative path, refusing anything outside the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(Error::Vault(format!("path '{}' is outside the vault", path)));
        }
        Ok(self.root.join(relative))
    }
}

fn walk(root: &Path) -> Vec<DocumentMeta> {
    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .require_git(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut documents = Vec::new();
    for entry in walker.flatten() {
        let path = entry.path();
        let is_markdown = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("md"));
        if !is_markdown || !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        let metadata = entry.metadata().ok();

        documents.push(DocumentMeta {
            title: file_stem(&relative),
            modified: metadata
                .as_ref()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from),
            size: metadata.map(|m| m.len()).unwrap_or(0),
            path: relative,
        });
    }
    documents
}

#[async_trait]
impl DocumentSource for FsVault {
    async fn list_documents(&self) -> Result<Vec<DocumentMeta>> {
        if !self.root.is_dir() {
            return Err(Error::Vault(format!("{} is not a directory", self.root.display())));
        }

        let root = self.root.clone();
        let documents = tokio::task::spawn_blocking(move || walk(&root))
            .await
            .map_err(|e| Error::Internal(format!("vault walk failed: {}", e)))?;

        debug!(root = %self.root.display(), documents = documents.len(), "Listed vault");
        Ok(documents)
    }

    async fn read_document(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::read_to_string(full).await?)
    }
}

/// Read and parse every document in a source, in listing order.
///
/// Documents that cannot be read are logged and skipped.
pub async fn collect_notes(source: &dyn DocumentSource) -> Result<Vec<Note>> {
    let documents = source.list_documents().await?;
    let total = documents.len();

    let notes: Vec<Note> = stream::iter(documents)
        .map(|meta| async move {
            match source.read_document(&meta.path).await {
                Ok(content) => Some(Note::parse(&meta.path, &content)),
                Err(e) => {
                    warn!(path = %meta.path, error = %e, "Skipping unreadable document");
                    None
                }
            }
        })
        .buffered(READ_CONCURRENCY)
        .filter_map(|note| async move { note })
        .collect()
        .await;

    info!(notes = notes.len(), skipped = total - notes.len(), "Loaded vault notes");
    Ok(notes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn vault() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("rust.md"), "# Rust\nOwnership and #borrowing").unwrap();
        fs::create_dir(dir.path().join("ideas")).unwrap();
        fs::write(dir.path().join("ideas/garden.md"), "Digital gardens").unwrap();
        fs::write(dir.path().join("ideas/image.png"), [0u8, 1, 2]).unwrap();
        fs::create_dir(dir.path().join(".obsidian")).unwrap();
        fs::write(dir.path().join(".obsidian/workspace.md"), "hidden").unwrap();
        dir
    }

    #[test]
    fn test_parse_frontmatter_title_and_tags() {
        let content = "---\ntitle: \"Graph Theory\"\ntags: [math, graphs]\n---\nBody about #networks.\n";
        let note = Note::parse("notes/graph.md", content);
        assert_eq!(note.title, "Graph Theory");
        assert_eq!(note.tags, vec!["math", "graphs", "networks"]);
        assert_eq!(note.body, "Body about #networks.\n");
    }

    #[test]
    fn test_parse_frontmatter_tag_list() {
        let content = "---\ntags:\n  - rust\n  - \"#async\"\nauthor: me\n---\n# Tokio\n";
        let note = Note::parse("tokio.md", content);
        assert_eq!(note.tags, vec!["rust", "async"]);
        assert_eq!(note.title, "Tokio");
    }

    #[test]
    fn test_title_falls_back_to_stem() {
        let note = Note::parse("daily/2024-05-01.md", "no heading here");
        assert_eq!(note.title, "2024-05-01");
        assert!(note.tags.is_empty());
    }

    #[test]
    fn test_inline_tags_skip_headings_numbers_and_code() {
        let body = "## Section\nIssue #42 relates to #Rust and #rust\n```\n#not-a-tag\n```\n#nested/tag";
        let note = Note::parse("a.md", body);
        assert_eq!(note.tags, vec!["Rust", "nested/tag"]);
    }

    #[test]
    fn test_unterminated_frontmatter_is_content() {
        let content = "---\ntitle: nope\nstill going";
        let note = Note::parse("x.md", content);
        assert_eq!(note.body, content);
        assert_eq!(note.title, "x");
    }

    #[tokio::test]
    async fn test_list_documents() {
        let dir = vault();
        let vault = FsVault::new(dir.path());
        let documents = vault.list_documents().await.unwrap();

        let paths: Vec<&str> = documents.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["ideas/garden.md", "rust.md"]);
        assert_eq!(documents[1].title, "rust");
        assert!(documents[1].size > 0);
        assert!(documents[1].modified.is_some());
    }

    #[tokio::test]
    async fn test_read_document_and_escape() {
        let dir = vault();
        let vault = FsVault::new(dir.path());
        assert_eq!(vault.read_document("ideas/garden.md").await.unwrap(), "Digital gardens");

        let err = vault.read_document("../secret.md").await.unwrap_err();
        assert!(matches!(err, Error::Vault(_)));
        assert!(matches!(vault.read_document("missing.md").await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_missing_root() {
        let vault = FsVault::new("/definitely/not/a/vault");
        assert!(matches!(vault.list_documents().await, Err(Error::Vault(_))));
    }

    struct FlakySource;

    #[async_trait]
    impl DocumentSource for FlakySource {
        async fn list_documents(&self) -> Result<Vec<DocumentMeta>> {
            Ok(["a.md", "broken.md", "c.md"]
                .iter()
                .map(|p| DocumentMeta {
                    path: p.to_string(),
                    title: file_stem(p),
                    modified: None,
                    size: 0,
                })
                .collect())
        }

        async fn read_document(&self, path: &str) -> Result<String> {
            if path == "broken.md" {
                Err(Error::Vault("permission denied".to_string()))
            } else {
                Ok(format!("contents of {}", path))
            }
        }
    }

    #[tokio::test]
    async fn test_collect_notes_skips_unreadable() {
        let notes = collect_notes(&FlakySource).await.unwrap();
        let paths: Vec<&str> = notes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "c.md"]);
    }
}
