use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;

/// `{file -> content-hash}` over a source file and every file transitively
/// reachable through `#include` directives. Include cycles are
/// handled by recording each file exactly once; the stable (sorted-path)
/// traversal means the combined digest doesn't depend on the order includes
/// were discovered in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeTreeFingerprint {
    file_hashes: BTreeMap<PathBuf, blake3::Hash>,
}

/// Matches `#include "foo.glsl"` / `#include <foo.hlsl>`-style directives,
/// which is the only flavor of include both the HLSL and GLSL front ends
/// in scope here use.
fn parse_include_line(line: &str) -> Option<&str> {
    let line = line.trim();
    let rest = line.strip_prefix("#include")?;
    let rest = rest.trim();
    if let Some(rest) = rest.strip_prefix('"') {
        rest.split('"').next()
    } else if let Some(rest) = rest.strip_prefix('<') {
        rest.split('>').next()
    } else {
        None
    }
}

impl IncludeTreeFingerprint {
    /// Computes the fingerprint for `source`, resolving includes relative to
    /// the file doing the including.
    pub fn compute(source: &Path) -> anyhow::Result<Self> {
        let mut file_hashes = BTreeMap::new();
        let mut stack = vec![source.to_path_buf()];
        let mut visited = std::collections::HashSet::new();

        while let Some(path) = stack.pop() {
            let canonical = path
                .canonicalize()
                .with_context(|| format!("resolving {}", path.display()))?;
            if !visited.insert(canonical.clone()) {
                continue; // already hashed once; handles include cycles
            }

            let contents = std::fs::read(&canonical)
                .with_context(|| format!("reading {}", canonical.display()))?;
            file_hashes.insert(canonical.clone(), blake3::hash(&contents));

            let text = String::from_utf8_lossy(&contents);
            let dir = canonical.parent().unwrap_or_else(|| Path::new("."));
            for line in text.lines() {
                if let Some(included) = parse_include_line(line) {
                    stack.push(dir.join(included));
                }
            }
        }

        Ok(Self { file_hashes })
    }

    /// Single combined digest, stable across traversal order (the map is
    /// sorted by canonical path).
    pub fn digest(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        for (path, hash) in &self.file_hashes {
            hasher.update(path.to_string_lossy().as_bytes());
            hasher.update(hash.as_bytes());
        }
        hasher.finalize()
    }

    pub fn file_count(&self) -> usize {
        self.file_hashes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn picks_up_transitive_includes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bar.glsl", "float x = 1.0;");
        write(dir.path(), "foo.glsl", "#include \"bar.glsl\"\nvoid f(){}");
        let top = write(dir.path(), "top.glsl", "#include \"foo.glsl\"\nvoid main(){}");

        let fp = IncludeTreeFingerprint::compute(&top).unwrap();
        assert_eq!(fp.file_count(), 3);
    }

    #[test]
    fn handles_include_cycles() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.glsl", "#include \"b.glsl\"\n");
        write(dir.path(), "b.glsl", "#include \"a.glsl\"\n");
        let a = dir.path().join("a.glsl");

        let fp = IncludeTreeFingerprint::compute(&a).unwrap();
        assert_eq!(fp.file_count(), 2);
    }

    #[test]
    fn content_change_changes_digest() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bar.glsl", "float x = 1.0;");
        let top = write(dir.path(), "top.glsl", "#include \"bar.glsl\"\n");

        let before = IncludeTreeFingerprint::compute(&top).unwrap().digest();
        write(dir.path(), "bar.glsl", "float x = 2.0;");
        let after = IncludeTreeFingerprint::compute(&top).unwrap().digest();

        assert_ne!(before, after);
    }
}
