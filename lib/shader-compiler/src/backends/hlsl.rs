use std::fs;
use std::path::Path;

use regex::Regex;

use shader_backend_traits::{
    BackendLanguage, BindingEntry, BindingKind, CompileOutcome, CompiledArtifact,
    PushConstantField, PushConstantFieldType, ReflectionSummary, ShaderCompilerBackend,
    ShaderStageMask,
};
use shader_types::{ShaderDescription, ShaderKind};

use crate::diagnostics::annotate_with_source_line;

fn target_profile(kind: ShaderKind) -> &'static str {
    match kind {
        ShaderKind::Vertex => "vs_6_0",
        ShaderKind::Fragment => "ps_6_0",
        ShaderKind::Compute => "cs_6_0",
    }
}

fn stage_mask(kind: ShaderKind) -> ShaderStageMask {
    match kind {
        ShaderKind::Vertex => ShaderStageMask::VERTEX,
        ShaderKind::Fragment => ShaderStageMask::FRAGMENT,
        ShaderKind::Compute => ShaderStageMask::COMPUTE,
    }
}

/// Scans HLSL source for `register(bN)`/`register(tN)`/`register(uN)`
/// declarations. DXC's full reflection API requires a COM container this
/// crate does not otherwise need, so bindings are recovered from source
/// text the same way the compiler's own diagnostics refer back to source
/// lines.
fn scan_bindings(source: &str, kind: ShaderKind) -> Vec<BindingEntry> {
    let pattern =
        Regex::new(r"(?m)^\s*\S.*?\b(\w+)\s*:\s*register\(\s*([btu])(\d+)").unwrap();
    let mut bindings = Vec::new();
    for captures in pattern.captures_iter(source) {
        let name = captures[1].to_string();
        let register_kind = &captures[2];
        let index: u32 = captures[3].parse().unwrap_or(0);
        let binding_kind = match register_kind {
            "b" => BindingKind::UniformBuffer,
            "u" => BindingKind::StorageBuffer,
            _ => BindingKind::SampledImage,
        };
        bindings.push(BindingEntry {
            name,
            binding_index: index,
            kind: binding_kind,
            stages: stage_mask(kind),
        });
    }
    bindings
}

fn scan_push_constants(source: &str) -> Vec<PushConstantField> {
    let block_pattern = Regex::new(r"(?s)\[\[vk::push_constant\]\].*?\{(.*?)\}").unwrap();
    let field_pattern = Regex::new(r"(?m)^\s*uint\s+(\w+)\s*;").unwrap();
    let mut fields = Vec::new();
    if let Some(block) = block_pattern.captures(source) {
        for field in field_pattern.captures_iter(&block[1]) {
            fields.push(PushConstantField {
                name: field[1].to_string(),
                ty: PushConstantFieldType::Uint,
            });
        }
    }
    fields
}

fn scan_workgroup_size(source: &str) -> Option<[u32; 3]> {
    let pattern = Regex::new(r"\[numthreads\(\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*\)\]").unwrap();
    let captures = pattern.captures(source)?;
    Some([
        captures[1].parse().ok()?,
        captures[2].parse().ok()?,
        captures[3].parse().ok()?,
    ])
}

/// HLSL-to-DXIL backend used by the DirectX 12 renderer, wrapping DXC via
/// `hassle-rs`. Writes a JSON reflection sidecar alongside each compiled
/// artifact since DXC doesn't expose the same reflection API SPIR-V does.
pub struct HlslCompilerBackend;

impl ShaderCompilerBackend for HlslCompilerBackend {
    fn language(&self) -> BackendLanguage {
        BackendLanguage::Hlsl
    }

    fn compile(
        &self,
        description: &ShaderDescription,
        out_directory: &Path,
        configuration_tag: &str,
    ) -> CompileOutcome {
        let source = match fs::read_to_string(description.source_path()) {
            Ok(source) => source,
            Err(error) => return CompileOutcome::Internal(error.into()),
        };

        let defines: Vec<(String, Option<String>)> = description
            .macros
            .iter()
            .map(|macro_definition| (macro_definition.name.clone(), macro_definition.value.clone()))
            .collect();
        let define_refs: Vec<(&str, Option<&str>)> = defines
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_deref()))
            .collect();

        // Warnings are promoted to errors.
        let args = ["-WX"];

        let bytecode = hassle_rs::compile_hlsl(
            &description.name,
            &source,
            &description.entry_function,
            target_profile(description.kind),
            &args,
            &define_refs,
        );

        let bytecode = match bytecode {
            Ok(bytecode) => bytecode,
            Err(message) => {
                return CompileOutcome::Diagnostic(annotate_with_source_line(&message, &source));
            }
        };

        let mut reflection = ReflectionSummary {
            bindings: scan_bindings(&source, description.kind),
            push_constants: scan_push_constants(&source),
            compute_workgroup_size: None,
        };
        if description.kind == ShaderKind::Compute {
            reflection.compute_workgroup_size = scan_workgroup_size(&source);
        }
        let reflection_bytes = match serde_json::to_vec_pretty(&reflection) {
            Ok(bytes) => bytes,
            Err(error) => return CompileOutcome::Internal(error.into()),
        };

        if let Err(error) = fs::create_dir_all(out_directory) {
            return CompileOutcome::Internal(error.into());
        }
        let artifact_path = out_directory.join(format!("shader{configuration_tag}"));
        if let Err(error) = fs::write(&artifact_path, &bytecode) {
            return CompileOutcome::Internal(error.into());
        }
        let reflection_path = out_directory.join(format!("shader{configuration_tag}.reflection"));
        if let Err(error) = fs::write(&reflection_path, &reflection_bytes) {
            return CompileOutcome::Internal(error.into());
        }

        CompileOutcome::Compiled(CompiledArtifact {
            bytecode,
            reflection: Some(reflection),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_register_bindings() {
        let source = "cbuffer FrameData : register(b0) { uint iFrame; };\n";
        let bindings = scan_bindings(source, ShaderKind::Vertex);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].binding_index, 0);
        assert_eq!(bindings[0].kind, BindingKind::UniformBuffer);
    }

    #[test]
    fn scans_compute_workgroup_size() {
        let source = "[numthreads(8, 8, 1)]\nvoid main() {}\n";
        assert_eq!(scan_workgroup_size(source), Some([8, 8, 1]));
    }

    #[test]
    fn scans_push_constant_uint_fields() {
        let source = "[[vk::push_constant]]\nstruct Push {\n    uint iIndex;\n    uint iFlags;\n};\n";
        let fields = scan_push_constants(source);
        assert_eq!(fields.len(), 2);
    }
}
