use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::ast::Node;
use crate::diagnostics::{OleanderError, Result};
use crate::parser::parse_source;

/// On-disk AST cache keyed by a SHA-256 digest of the source text. Entries
/// are serialized node lists; any unreadable or undecodable entry counts as
/// a miss and gets rewritten, never a failure.
pub struct AstCache {
    dir: PathBuf,
}

impl AstCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn key(source: &str) -> String {
        let digest = Sha256::digest(source.as_bytes());
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    pub fn entry_path(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{}.ast.json", Self::key(source)))
    }

    pub fn load(&self, source: &str) -> Option<Vec<Node>> {
        let path = self.entry_path(source);
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(nodes) => {
                tracing::debug!(path = %path.display(), "cache hit");
                Some(nodes)
            }
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "corrupt cache entry");
                None
            }
        }
    }

    pub fn store(&self, source: &str, nodes: &[Node]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let bytes = serde_json::to_vec(nodes)
            .map_err(|err| OleanderError::Cache(err.to_string()))?;
        fs::write(self.entry_path(source), bytes)?;
        Ok(())
    }

    /// Returns the cached tree for `source`, or parses and stores it on a
    /// miss. A failed write is logged and the parse result returned anyway.
    pub fn load_or_parse(&self, source: &str) -> Result<Vec<Node>> {
        if let Some(nodes) = self.load(source) {
            return Ok(nodes);
        }
        tracing::debug!("cache miss");
        let nodes = parse_source(source)?;
        if let Err(err) = self.store(source, &nodes) {
            tracing::debug!(error = %err, "failed to write cache entry");
        }
        Ok(nodes)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
