/// Kind of resource a binding refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BindingKind {
    UniformBuffer,
    StorageBuffer,
    SampledImage,
}

bitflags::bitflags! {
    /// Which shader stages a binding (or push-constant range) is visible to.
    /// Image/sampler bindings are fragment-stage-only; everything else is
    /// visible to all graphics stages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct ShaderStageMask: u32 {
        const VERTEX = 0b01;
        const FRAGMENT = 0b10;
        const COMPUTE = 0b100;
    }
}

/// One binding as seen by reflection of a single compiled shader stage.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BindingEntry {
    pub name: String,
    pub binding_index: u32,
    pub kind: BindingKind,
    pub stages: ShaderStageMask,
}

/// A named field inside a push-constant block. Push-constant blocks may
/// only contain `uint` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PushConstantFieldType {
    Uint,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PushConstantField {
    pub name: String,
    pub ty: PushConstantFieldType,
}

/// Structured metadata extracted from one compiled shader stage.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ReflectionSummary {
    pub bindings: Vec<BindingEntry>,
    pub push_constants: Vec<PushConstantField>,
    /// Set only for compute shaders.
    pub compute_workgroup_size: Option<[u32; 3]>,
}
