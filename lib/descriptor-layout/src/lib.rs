//! Descriptor/root-layout synthesizer: merges a vertex and fragment
//! shader's reflected bindings into one binding table and asks the backend
//! to materialize the descriptor set layout, pool, and per-frame sets.

use std::collections::HashMap;

use shader_backend_traits::{
    BindingEntry, BindingKind, BoundResource, DescriptorPoolHandle, DescriptorSetHandle,
    DescriptorSetLayoutHandle, ImageHandle, PushConstantFieldType, ReflectionSummary,
    RendererBackend, ShaderStageMask,
};

/// Name and binding index the frame-constants uniform buffer must occupy in
/// the vertex shader.
pub const FRAME_CONSTANTS_BUFFER_NAME: &str = "frame_data";
pub const FRAME_CONSTANTS_BINDING_INDEX: u32 = 0;

/// Why merging two shaders' reflections into one descriptor layout failed
///.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("shader declares two resources with the same name {name:?}")]
    DuplicateBindingName { name: String },
    #[error("shader declares two resources at the same binding index {binding_index}")]
    DuplicateBindingIndex { binding_index: u32 },
    #[error(
        "resource {name:?} is declared at binding {vertex_index} in the vertex shader and at \
         binding {fragment_index} in the fragment shader"
    )]
    BindingIndexConflict {
        name: String,
        vertex_index: u32,
        fragment_index: u32,
    },
    #[error(
        "binding index {binding_index} is used by resource {first_name:?} in one stage and by \
         {second_name:?} in the other; resources with the same binding index must share a name"
    )]
    BindingNameConflict {
        binding_index: u32,
        first_name: String,
        second_name: String,
    },
    #[error(
        "resource {name:?} is declared with binding index {binding_index} in one stage and a \
         different kind in the other"
    )]
    BindingKindConflict { name: String, binding_index: u32 },
    #[error(
        "expected a uniform buffer named {FRAME_CONSTANTS_BUFFER_NAME:?} at binding \
         {FRAME_CONSTANTS_BINDING_INDEX} in the vertex shader"
    )]
    MissingFrameConstantsBuffer,
    #[error(
        "expected {FRAME_CONSTANTS_BUFFER_NAME:?} to use binding index \
         {FRAME_CONSTANTS_BINDING_INDEX}, found {actual}"
    )]
    WrongFrameConstantsBindingIndex { actual: u32 },
    #[error("push-constant field {name:?} has the same name in both stages but different types")]
    PushConstantFieldTypeConflict { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedBinding {
    pub name_binding_index: u32,
    pub kind: BindingKind,
    pub stages: ShaderStageMask,
}

/// The merged binding table and push-constant field union.
#[derive(Debug, Clone, Default)]
pub struct MergedLayout {
    pub bindings: HashMap<String, MergedBinding>,
    pub push_constant_fields: Vec<String>,
}

fn stages_for(kind: BindingKind) -> ShaderStageMask {
    match kind {
        BindingKind::SampledImage => ShaderStageMask::FRAGMENT,
        BindingKind::UniformBuffer | BindingKind::StorageBuffer => {
            ShaderStageMask::VERTEX | ShaderStageMask::FRAGMENT
        }
    }
}

fn validate_shader_local_uniqueness(bindings: &[BindingEntry]) -> Result<(), MergeError> {
    let mut seen_names = std::collections::HashSet::new();
    let mut seen_indices = std::collections::HashSet::new();
    for binding in bindings {
        if !seen_names.insert(binding.name.clone()) {
            return Err(MergeError::DuplicateBindingName {
                name: binding.name.clone(),
            });
        }
        if !seen_indices.insert(binding.binding_index) {
            return Err(MergeError::DuplicateBindingIndex {
                binding_index: binding.binding_index,
            });
        }
    }
    Ok(())
}

fn merge_push_constants(
    vertex: &ReflectionSummary,
    fragment: &ReflectionSummary,
) -> Result<Vec<String>, MergeError> {
    let mut types: HashMap<String, PushConstantFieldType> = HashMap::new();
    let mut order = Vec::new();
    for field in vertex.push_constants.iter().chain(fragment.push_constants.iter()) {
        match types.get(&field.name) {
            Some(existing) if *existing != field.ty => {
                return Err(MergeError::PushConstantFieldTypeConflict {
                    name: field.name.clone(),
                });
            }
            Some(_) => {}
            None => {
                types.insert(field.name.clone(), field.ty);
                order.push(field.name.clone());
            }
        }
    }
    Ok(order)
}

/// Merges a vertex and fragment shader's reflection into one binding table,
/// applying rules R1-R5 in order.
pub fn merge_bindings(
    vertex: &ReflectionSummary,
    fragment: &ReflectionSummary,
) -> Result<MergedLayout, MergeError> {
    validate_shader_local_uniqueness(&vertex.bindings)?;
    validate_shader_local_uniqueness(&fragment.bindings)?;

    let frame_buffer = vertex
        .bindings
        .iter()
        .find(|b| b.name == FRAME_CONSTANTS_BUFFER_NAME)
        .ok_or(MergeError::MissingFrameConstantsBuffer)?;
    if frame_buffer.binding_index != FRAME_CONSTANTS_BINDING_INDEX {
        return Err(MergeError::WrongFrameConstantsBindingIndex {
            actual: frame_buffer.binding_index,
        });
    }

    let mut bindings: HashMap<String, MergedBinding> = HashMap::new();
    let mut by_index: HashMap<u32, String> = HashMap::new();

    for binding in &fragment.bindings {
        bindings.insert(
            binding.name.clone(),
            MergedBinding {
                name_binding_index: binding.binding_index,
                kind: binding.kind,
                stages: stages_for(binding.kind),
            },
        );
        by_index.insert(binding.binding_index, binding.name.clone());
    }

    for binding in &vertex.bindings {
        if let Some(existing) = bindings.get(&binding.name) {
            if existing.name_binding_index != binding.binding_index {
                return Err(MergeError::BindingIndexConflict {
                    name: binding.name.clone(),
                    vertex_index: binding.binding_index,
                    fragment_index: existing.name_binding_index,
                });
            }
            if existing.kind != binding.kind {
                return Err(MergeError::BindingKindConflict {
                    name: binding.name.clone(),
                    binding_index: binding.binding_index,
                });
            }
            continue;
        }

        if let Some(other_name) = by_index.get(&binding.binding_index) {
            return Err(MergeError::BindingNameConflict {
                binding_index: binding.binding_index,
                first_name: other_name.clone(),
                second_name: binding.name.clone(),
            });
        }

        bindings.insert(
            binding.name.clone(),
            MergedBinding {
                name_binding_index: binding.binding_index,
                kind: binding.kind,
                stages: stages_for(binding.kind),
            },
        );
        by_index.insert(binding.binding_index, binding.name.clone());
    }

    let push_constant_fields = merge_push_constants(vertex, fragment)?;

    Ok(MergedLayout {
        bindings,
        push_constant_fields,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptorLayoutError {
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// A merged binding table plus the backend objects synthesized from it
///.
pub struct GeneratedLayout {
    pub layout: DescriptorSetLayoutHandle,
    pub pool: DescriptorPoolHandle,
    pub sets: Vec<DescriptorSetHandle>,
    pub resource_bindings: HashMap<String, u32>,
    pub push_constant_fields: Vec<String>,
}

/// Merges `vertex`/`fragment` reflections and asks `backend` to materialize
/// the descriptor set layout, a pool sized for `frame_slots`, and that many
/// allocated (but not yet written) descriptor sets.
pub fn generate(
    vertex: &ReflectionSummary,
    fragment: &ReflectionSummary,
    backend: &dyn RendererBackend,
    frame_slots: u32,
) -> Result<GeneratedLayout, DescriptorLayoutError> {
    let merged = merge_bindings(vertex, fragment)?;

    let mut binding_entries: Vec<BindingEntry> = merged
        .bindings
        .iter()
        .map(|(name, binding)| BindingEntry {
            name: name.clone(),
            binding_index: binding.name_binding_index,
            kind: binding.kind,
            stages: binding.stages,
        })
        .collect();
    binding_entries.sort_by_key(|b| b.binding_index);

    let mut counts: HashMap<BindingKind, u32> = HashMap::new();
    for binding in &binding_entries {
        *counts.entry(binding.kind).or_insert(0) += 1;
    }
    let sizes_per_binding_kind: Vec<(BindingKind, u32)> = counts
        .into_iter()
        .map(|(kind, count)| (kind, count * frame_slots))
        .collect();

    let layout = backend.create_descriptor_set_layout(&binding_entries)?;
    let pool = match backend.create_descriptor_pool(&sizes_per_binding_kind, frame_slots) {
        Ok(pool) => pool,
        Err(error) => {
            backend.destroy_descriptor_set_layout(layout);
            return Err(error.into());
        }
    };
    let sets = match backend.allocate_descriptor_sets(pool, layout, frame_slots) {
        Ok(sets) => sets,
        Err(error) => {
            backend.destroy_descriptor_pool(pool);
            backend.destroy_descriptor_set_layout(layout);
            return Err(error.into());
        }
    };

    let resource_bindings = merged
        .bindings
        .iter()
        .map(|(name, binding)| (name.clone(), binding.name_binding_index))
        .collect();

    Ok(GeneratedLayout {
        layout,
        pool,
        sets,
        resource_bindings,
        push_constant_fields: merged.push_constant_fields,
    })
}

/// Resolves a merged binding's name to the concrete GPU resource(s) it
/// should be written to. Implemented once per engine (composing the
/// frame-constants buffer and the shadow-map descriptor arrays) and shared
/// across every pipeline.
pub trait DescriptorResourceResolver: Send + Sync {
    /// A single-resource binding (e.g. the per-frame-slot constants
    /// buffer), resolved per frame slot. Returning `None` leaves that
    /// binding allocated but unwritten for this slot (e.g. a name this
    /// resolver doesn't own).
    fn resolve(&self, name: &str, frame_slot: u32) -> Option<BoundResource>;

    /// A descriptor-array binding (e.g. a shadow-map array), resolved as
    /// its full dense contents; written identically into every frame
    /// slot's set. `None` means this name isn't an array binding this
    /// resolver owns.
    fn resolve_array(&self, _name: &str) -> Option<Vec<ImageHandle>> {
        None
    }
}

/// Writes every resolvable single-resource binding from
/// `generated.resource_bindings` into each of `generated.sets`, one frame
/// slot at a time. Must run after [`generate`] allocates the sets and
/// before the pipeline that owns them is used to draw.
pub fn write_resources(
    generated: &GeneratedLayout,
    resolver: &dyn DescriptorResourceResolver,
    backend: &dyn RendererBackend,
) {
    for (frame_slot, set) in generated.sets.iter().enumerate() {
        for (name, binding_index) in &generated.resource_bindings {
            if let Some(resource) = resolver.resolve(name, frame_slot as u32) {
                backend.write_descriptor(*set, *binding_index, resource);
            }
        }
    }
}

/// Writes every resolvable descriptor-array binding (e.g. the shadow-map
/// arrays) into every one of `generated.sets`. Call alongside
/// [`write_resources`] when materializing a pipeline.
pub fn write_array_resources(
    generated: &GeneratedLayout,
    resolver: &dyn DescriptorResourceResolver,
    backend: &dyn RendererBackend,
) {
    for (name, binding_index) in &generated.resource_bindings {
        let Some(images) = resolver.resolve_array(name) else {
            continue;
        };
        for set in &generated.sets {
            for (array_element, image) in images.iter().enumerate() {
                backend.write_descriptor(
                    *set,
                    *binding_index,
                    BoundResource::Image {
                        handle: *image,
                        array_element: array_element as u32,
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shader_backend_traits::null::NullBackend;
    use shader_backend_traits::PushConstantField;

    fn frame_data_binding() -> BindingEntry {
        BindingEntry {
            name: FRAME_CONSTANTS_BUFFER_NAME.to_string(),
            binding_index: FRAME_CONSTANTS_BINDING_INDEX,
            kind: BindingKind::UniformBuffer,
            stages: ShaderStageMask::VERTEX | ShaderStageMask::FRAGMENT,
        }
    }

    fn reflection(bindings: Vec<BindingEntry>) -> ReflectionSummary {
        ReflectionSummary {
            bindings,
            push_constants: Vec::new(),
            compute_workgroup_size: None,
        }
    }

    #[test]
    fn m1_same_name_different_binding_conflicts() {
        let vertex = reflection(vec![
            frame_data_binding(),
            BindingEntry {
                name: "SomeData".into(),
                binding_index: 2,
                kind: BindingKind::UniformBuffer,
                stages: ShaderStageMask::all(),
            },
        ]);
        let fragment = reflection(vec![BindingEntry {
            name: "SomeData".into(),
            binding_index: 1,
            kind: BindingKind::UniformBuffer,
            stages: ShaderStageMask::all(),
        }]);
        let err = merge_bindings(&vertex, &fragment).unwrap_err();
        assert!(matches!(err, MergeError::BindingIndexConflict { .. }));
    }

    #[test]
    fn m2_same_binding_different_kind_conflicts() {
        let vertex = reflection(vec![
            frame_data_binding(),
            BindingEntry {
                name: "SomeData".into(),
                binding_index: 1,
                kind: BindingKind::UniformBuffer,
                stages: ShaderStageMask::all(),
            },
        ]);
        let fragment = reflection(vec![BindingEntry {
            name: "SomeData".into(),
            binding_index: 1,
            kind: BindingKind::StorageBuffer,
            stages: ShaderStageMask::all(),
        }]);
        let err = merge_bindings(&vertex, &fragment).unwrap_err();
        assert!(matches!(err, MergeError::BindingKindConflict { .. }));
    }

    #[test]
    fn m3_different_names_same_binding_conflicts() {
        let vertex = reflection(vec![
            frame_data_binding(),
            BindingEntry {
                name: "SomeData1".into(),
                binding_index: 1,
                kind: BindingKind::UniformBuffer,
                stages: ShaderStageMask::all(),
            },
        ]);
        let fragment = reflection(vec![BindingEntry {
            name: "SomeData2".into(),
            binding_index: 1,
            kind: BindingKind::UniformBuffer,
            stages: ShaderStageMask::all(),
        }]);
        let err = merge_bindings(&vertex, &fragment).unwrap_err();
        assert!(matches!(err, MergeError::BindingNameConflict { .. }));
    }

    #[test]
    fn m4_agreeing_push_constants_union() {
        let vertex = ReflectionSummary {
            bindings: vec![frame_data_binding()],
            push_constants: vec![PushConstantField {
                name: "instance_index".into(),
                ty: PushConstantFieldType::Uint,
            }],
            compute_workgroup_size: None,
        };
        let fragment = ReflectionSummary {
            bindings: vec![],
            push_constants: vec![PushConstantField {
                name: "material_index".into(),
                ty: PushConstantFieldType::Uint,
            }],
            compute_workgroup_size: None,
        };
        let merged = merge_bindings(&vertex, &fragment).unwrap();
        let mut fields = merged.push_constant_fields;
        fields.sort();
        assert_eq!(fields, vec!["instance_index", "material_index"]);
    }

    #[test]
    fn missing_frame_constants_buffer_is_rejected() {
        let vertex = reflection(vec![]);
        let fragment = reflection(vec![]);
        let err = merge_bindings(&vertex, &fragment).unwrap_err();
        assert!(matches!(err, MergeError::MissingFrameConstantsBuffer));
    }

    #[test]
    fn generate_allocates_one_set_per_frame_slot() {
        let vertex = reflection(vec![frame_data_binding()]);
        let fragment = reflection(vec![BindingEntry {
            name: "diffuse".into(),
            binding_index: 1,
            kind: BindingKind::SampledImage,
            stages: ShaderStageMask::FRAGMENT,
        }]);
        let backend = NullBackend::new();
        let generated = generate(&vertex, &fragment, &backend, 3).unwrap();
        assert_eq!(generated.sets.len(), 3);
        assert_eq!(generated.resource_bindings.len(), 2);
    }

    struct StaticResolver {
        frame_buffer: shader_backend_traits::BufferHandle,
        diffuse: shader_backend_traits::ImageHandle,
    }

    impl DescriptorResourceResolver for StaticResolver {
        fn resolve(&self, name: &str, _frame_slot: u32) -> Option<BoundResource> {
            match name {
                FRAME_CONSTANTS_BUFFER_NAME => Some(BoundResource::Buffer(self.frame_buffer)),
                "diffuse" => Some(BoundResource::Image {
                    handle: self.diffuse,
                    array_element: 0,
                }),
                _ => None,
            }
        }
    }

    #[test]
    fn write_resources_writes_every_binding_for_every_frame_slot() {
        let vertex = reflection(vec![frame_data_binding()]);
        let fragment = reflection(vec![BindingEntry {
            name: "diffuse".into(),
            binding_index: 1,
            kind: BindingKind::SampledImage,
            stages: ShaderStageMask::FRAGMENT,
        }]);
        let backend = NullBackend::new();
        let generated = generate(&vertex, &fragment, &backend, 2).unwrap();

        let resolver = StaticResolver {
            frame_buffer: shader_backend_traits::BufferHandle(1),
            diffuse: shader_backend_traits::ImageHandle(2),
        };
        write_resources(&generated, &resolver, &backend);

        for set in &generated.sets {
            assert!(matches!(
                backend.written_descriptor(*set, FRAME_CONSTANTS_BINDING_INDEX, 0),
                Some(BoundResource::Buffer(shader_backend_traits::BufferHandle(1)))
            ));
            assert!(matches!(
                backend.written_descriptor(*set, 1, 0),
                Some(BoundResource::Image { array_element: 0, .. })
            ));
        }
    }
}
