pub mod hlsl;
pub mod spirv;
