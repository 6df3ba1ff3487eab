use std::fs;
use std::path::Path;

use naga::back::spv;
use naga::front::glsl::{Frontend, Options as GlslOptions};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::ShaderStage;

use shader_backend_traits::{
    BackendLanguage, BindingEntry, BindingKind, CompileOutcome, CompiledArtifact,
    PushConstantField, PushConstantFieldType, ReflectionSummary, ShaderCompilerBackend,
    ShaderStageMask,
};
use shader_types::{ShaderDescription, ShaderKind};

use crate::diagnostics::annotate_with_source_line;

fn shader_stage(kind: ShaderKind) -> ShaderStage {
    match kind {
        ShaderKind::Vertex => ShaderStage::Vertex,
        ShaderKind::Fragment => ShaderStage::Fragment,
        ShaderKind::Compute => ShaderStage::Compute,
    }
}

fn stage_mask(kind: ShaderKind) -> ShaderStageMask {
    match kind {
        ShaderKind::Vertex => ShaderStageMask::VERTEX,
        ShaderKind::Fragment => ShaderStageMask::FRAGMENT,
        ShaderKind::Compute => ShaderStageMask::COMPUTE,
    }
}

fn binding_kind_for(space: naga::AddressSpace) -> Option<BindingKind> {
    match space {
        naga::AddressSpace::Uniform => Some(BindingKind::UniformBuffer),
        naga::AddressSpace::Storage { .. } => Some(BindingKind::StorageBuffer),
        naga::AddressSpace::Handle => Some(BindingKind::SampledImage),
        _ => None,
    }
}

/// Push-constant blocks surface in the GLSL front-end as a `PushConstant`
/// address-space global pointing at a struct type; only `uint` members are
/// reflected, matching the push-constant block restriction.
fn reflect_push_constants(module: &naga::Module) -> Vec<PushConstantField> {
    let mut fields = Vec::new();
    for (_, variable) in module.global_variables.iter() {
        if variable.space != naga::AddressSpace::PushConstant {
            continue;
        }
        let naga::TypeInner::Struct { members, .. } = &module.types[variable.ty].inner else {
            continue;
        };
        for member in members {
            let naga::TypeInner::Scalar(scalar) = &module.types[member.ty].inner else {
                continue;
            };
            if scalar.kind != naga::ScalarKind::Uint {
                continue;
            }
            let Some(name) = member.name.clone() else {
                continue;
            };
            fields.push(PushConstantField {
                name,
                ty: PushConstantFieldType::Uint,
            });
        }
    }
    fields
}

fn reflect(module: &naga::Module, description: &ShaderDescription) -> ReflectionSummary {
    let mut bindings = Vec::new();
    for (_, variable) in module.global_variables.iter() {
        let Some(resource_binding) = &variable.binding else {
            continue;
        };
        let Some(kind) = binding_kind_for(variable.space) else {
            continue;
        };
        let name = variable
            .name
            .clone()
            .unwrap_or_else(|| format!("binding_{}", resource_binding.binding));
        bindings.push(BindingEntry {
            name,
            binding_index: resource_binding.binding,
            kind,
            stages: stage_mask(description.kind),
        });
    }

    let compute_workgroup_size = module
        .entry_points
        .iter()
        .find(|entry_point| entry_point.name == description.entry_function)
        .filter(|_| description.kind == ShaderKind::Compute)
        .map(|entry_point| entry_point.workgroup_size);

    ReflectionSummary {
        bindings,
        push_constants: reflect_push_constants(module),
        compute_workgroup_size,
    }
}

/// GLSL-to-SPIR-V backend used by the Vulkan renderer, built on `naga`
/// (`glsl-in`/`spv-out`) rather than `shaderc`/`spirv-reflect`, since the
/// latter are native library bindings this crate would otherwise have to
/// vendor.
pub struct SpirvCompilerBackend;

impl ShaderCompilerBackend for SpirvCompilerBackend {
    fn language(&self) -> BackendLanguage {
        BackendLanguage::Spirv
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

        let mut defines = naga::FastHashMap::default();
        for macro_definition in description.macros.iter() {
            defines.insert(
                macro_definition.name.clone(),
                macro_definition.value.clone().unwrap_or_default(),
            );
        }

        let options = GlslOptions {
            stage: shader_stage(description.kind),
            defines,
        };

        let mut frontend = Frontend::default();
        let module = match frontend.parse(&options, &source) {
            Ok(module) => module,
            Err(errors) => {
                let joined = errors
                    .iter()
                    .map(|error| error.to_string())
                    .collect::<Vec<_>>()
                    .join("\n");
                return CompileOutcome::Diagnostic(annotate_with_source_line(&joined, &source));
            }
        };

        let info = match Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
        {
            Ok(info) => info,
            Err(error) => {
                return CompileOutcome::Diagnostic(annotate_with_source_line(
                    &error.to_string(),
                    &source,
                ));
            }
        };

        let spv_options = spv::Options::default();
        let words = match spv::write_vec(&module, &info, &spv_options, None) {
            Ok(words) => words,
            Err(error) => return CompileOutcome::Internal(error.into()),
        };

        let bytecode: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
        let reflection = reflect(&module, description);

        if let Err(error) = fs::create_dir_all(out_directory) {
            return CompileOutcome::Internal(error.into());
        }
        let artifact_path =
            out_directory.join(format!("shader{configuration_tag}"));
        if let Err(error) = fs::write(&artifact_path, &bytecode) {
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

    fn parse(source: &str, stage: ShaderStage) -> naga::Module {
        let options = GlslOptions {
            stage,
            defines: naga::FastHashMap::default(),
        };
        Frontend::default()
            .parse(&options, source)
            .expect("test source should parse")
    }

    #[test]
    fn reflects_push_constant_uint_fields() {
        let source = "#version 450\n\
                       layout(push_constant) uniform Push {\n\
                           uint iIndex;\n\
                           uint iFlags;\n\
                       } push;\n\
                       void main() {}\n";
        let module = parse(source, ShaderStage::Vertex);
        let fields = reflect_push_constants(&module);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "iIndex");
        assert_eq!(fields[0].ty, PushConstantFieldType::Uint);
        assert_eq!(fields[1].name, "iFlags");
    }

    #[test]
    fn reflects_no_push_constants_when_block_is_absent() {
        let source = "#version 450\nvoid main() {}\n";
        let module = parse(source, ShaderStage::Vertex);
        assert!(reflect_push_constants(&module).is_empty());
    }
}
