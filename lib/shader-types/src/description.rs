use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::include_tree::IncludeTreeFingerprint;
use crate::macros::MacroConfiguration;
use crate::name::{validate_shader_name, ShaderNameError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ShaderKind {
    Vertex,
    Fragment,
    Compute,
}

/// Tag identifying the vertex-layout a vertex shader is bound to. Only
/// meaningful for [`ShaderKind::Vertex`] shaders used by the mesh pipeline
///.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct VertexLayoutTag(pub String);

#[derive(Debug, Error)]
pub enum ShaderDescriptionError {
    #[error(transparent)]
    Name(#[from] ShaderNameError),
    #[error("source path {0:?} does not exist or is not a regular file")]
    InvalidSourcePath(PathBuf),
    #[error("vertex-layout tag is only meaningful for vertex shaders")]
    VertexLayoutOnNonVertex,
}

/// Fully identifies a compiled shader variant: name, source, kind,
/// optional vertex-layout tag, entry function, and macro set. Two
/// descriptions are equal iff all of these match *and* their include-tree
/// fingerprints match — so equality of [`ShaderDescription`] alone is only
/// "same logical shader", use [`ShaderDescription::matches_cached`] (in
/// `shader-cache`) for full cache-key equality.
#[derive(Debug, Clone)]
pub struct ShaderDescription {
    pub name: String,
    pub source_path: PathBuf,
    pub kind: ShaderKind,
    pub vertex_layout: Option<VertexLayoutTag>,
    pub entry_function: String,
    pub macros: MacroConfiguration,
}

impl ShaderDescription {
    pub fn new(
        name: impl Into<String>,
        source_path: impl Into<PathBuf>,
        kind: ShaderKind,
        entry_function: impl Into<String>,
        macros: MacroConfiguration,
    ) -> Result<Self, ShaderDescriptionError> {
        let name = name.into();
        validate_shader_name(&name)?;

        let source_path = source_path.into();
        if !source_path.is_file() {
            return Err(ShaderDescriptionError::InvalidSourcePath(source_path));
        }

        Ok(Self {
            name,
            source_path,
            kind,
            vertex_layout: None,
            entry_function: entry_function.into(),
            macros,
        })
    }

    pub fn with_vertex_layout(
        mut self,
        tag: VertexLayoutTag,
    ) -> Result<Self, ShaderDescriptionError> {
        if self.kind != ShaderKind::Vertex {
            return Err(ShaderDescriptionError::VertexLayoutOnNonVertex);
        }
        self.vertex_layout = Some(tag);
        Ok(self)
    }

    /// Clones this description and augments its macro list with the given
    /// extra definitions (used by C5 to build per-configuration variants).
    pub fn with_additional_macros(&self, extra: &MacroConfiguration) -> Self {
        let mut macros = self.macros.clone();
        for m in extra.iter() {
            macros.insert(m.clone());
        }
        Self {
            name: self.name.clone(),
            source_path: self.source_path.clone(),
            kind: self.kind,
            vertex_layout: self.vertex_layout.clone(),
            entry_function: self.entry_function.clone(),
            macros,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn compute_include_tree(&self) -> anyhow::Result<IncludeTreeFingerprint> {
        IncludeTreeFingerprint::compute(&self.source_path)
    }
}

/// Equality of the description's static fields, ignoring the include-tree
///.
impl PartialEq for ShaderDescription {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.source_path == other.source_path
            && self.kind == other.kind
            && self.vertex_layout == other.vertex_layout
            && self.entry_function == other.entry_function
            && self.macros == other.macros
    }
}
impl Eq for ShaderDescription {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_source(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"void main() {}").unwrap();
        path
    }

    #[test]
    fn rejects_missing_source() {
        let err = ShaderDescription::new(
            "mesh_vs",
            "/nonexistent/path.glsl",
            ShaderKind::Vertex,
            "main",
            MacroConfiguration::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ShaderDescriptionError::InvalidSourcePath(_)));
    }

    #[test]
    fn vertex_layout_only_on_vertex_shaders() {
        let dir = tempfile::tempdir().unwrap();
        let src = make_source(&dir, "frag.glsl");
        let desc = ShaderDescription::new(
            "frag_shader",
            src,
            ShaderKind::Fragment,
            "main",
            MacroConfiguration::default(),
        )
        .unwrap();
        let err = desc
            .with_vertex_layout(VertexLayoutTag("mesh".into()))
            .unwrap_err();
        assert!(matches!(err, ShaderDescriptionError::VertexLayoutOnNonVertex));
    }

    #[test]
    fn macro_order_independence_via_equality() {
        let dir = tempfile::tempdir().unwrap();
        let src = make_source(&dir, "vs.glsl");
        let a = ShaderDescription::new(
            "mesh_vs",
            &src,
            ShaderKind::Vertex,
            "main",
            MacroConfiguration::new([
                crate::macros::MacroDefinition::with_value("A", "1"),
                crate::macros::MacroDefinition::flag("B"),
            ]),
        )
        .unwrap();
        let b = ShaderDescription::new(
            "mesh_vs",
            &src,
            ShaderKind::Vertex,
            "main",
            MacroConfiguration::new([
                crate::macros::MacroDefinition::flag("B"),
                crate::macros::MacroDefinition::with_value("A", "1"),
            ]),
        )
        .unwrap();
        assert_eq!(a, b);
    }
}
