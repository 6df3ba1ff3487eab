use serde::{Deserialize, Serialize};
use shader_types::{MacroDefinition, ShaderDescription, ShaderKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedDescription {
    pub name: String,
    pub source_path: String,
    pub kind: String,
    pub vertex_layout: Option<String>,
    pub entry_function: String,
    pub macros: Vec<(String, Option<String>)>,
}

fn kind_to_str(kind: ShaderKind) -> &'static str {
    match kind {
        ShaderKind::Vertex => "vertex",
        ShaderKind::Fragment => "fragment",
        ShaderKind::Compute => "compute",
    }
}

impl PersistedDescription {
    pub fn from_description(description: &ShaderDescription) -> Self {
        Self {
            name: description.name.clone(),
            source_path: description.source_path().to_string_lossy().into_owned(),
            kind: kind_to_str(description.kind).to_string(),
            vertex_layout: description.vertex_layout.as_ref().map(|t| t.0.clone()),
            entry_function: description.entry_function.clone(),
            macros: description
                .macros
                .iter()
                .map(|m| (m.name.clone(), m.value.clone()))
                .collect(),
        }
    }

    fn macros_as_defs(&self) -> Vec<MacroDefinition> {
        self.macros
            .iter()
            .map(|(name, value)| MacroDefinition {
                name: name.clone(),
                value: value.clone(),
            })
            .collect()
    }

    pub fn entry_function_matches(&self, description: &ShaderDescription) -> bool {
        self.entry_function == description.entry_function
    }

    pub fn kind_matches(&self, description: &ShaderDescription) -> bool {
        self.kind == kind_to_str(description.kind)
    }

    pub fn macros_match(&self, description: &ShaderDescription) -> bool {
        let mut mine = self.macros_as_defs();
        let mut theirs: Vec<MacroDefinition> = description.macros.iter().cloned().collect();
        mine.sort();
        theirs.sort();
        mine == theirs
    }
}

/// HLSL-only per-shader extras.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HlslPerShaderExtras {
    pub reflection_file_hash: String,
}

/// Per-shader-variant cache metadata, one file per configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerShaderMetadata {
    #[serde(rename = "Shader Description")]
    pub description: PersistedDescription,
    pub compiled_bytecode_hash: String,
    pub source_file_hash: String,
    pub include_tree_digest: String,
    #[serde(rename = "HLSL")]
    pub hlsl: Option<HlslPerShaderExtras>,
}

impl PerShaderMetadata {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
