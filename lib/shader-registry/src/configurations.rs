use shader_types::{MacroConfiguration, MacroDefinition, ShaderKind};

/// The closed set of valid macro configurations a pack compiles, per shader
/// kind. Vertex and fragment shaders each get the power set of a
/// small table of optional feature toggles; compute shaders always compile
/// exactly one (empty) configuration, since a compute shader's workgroup
/// size, not a material feature toggle, is its one distinguishing
/// parameter.
const VERTEX_FEATURE_TOGGLES: &[&str] = &["USE_SKINNING"];
const FRAGMENT_FEATURE_TOGGLES: &[&str] = &["USE_DIFFUSE_TEXTURE", "USE_NORMAL_TEXTURE"];

fn power_set_configurations(toggles: &[&str]) -> Vec<MacroConfiguration> {
    let count = toggles.len();
    (0..(1u32 << count))
        .map(|mask| {
            let mut config = MacroConfiguration::default();
            for (i, toggle) in toggles.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    config.insert(MacroDefinition::flag(*toggle));
                }
            }
            config
        })
        .collect()
}

pub fn valid_configurations_for(kind: ShaderKind) -> Vec<MacroConfiguration> {
    match kind {
        ShaderKind::Vertex => power_set_configurations(VERTEX_FEATURE_TOGGLES),
        ShaderKind::Fragment => power_set_configurations(FRAGMENT_FEATURE_TOGGLES),
        ShaderKind::Compute => vec![MacroConfiguration::default()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_configurations_cover_the_power_set() {
        assert_eq!(valid_configurations_for(ShaderKind::Vertex).len(), 2);
    }

    #[test]
    fn fragment_configurations_cover_the_power_set() {
        assert_eq!(valid_configurations_for(ShaderKind::Fragment).len(), 4);
    }

    #[test]
    fn compute_has_exactly_one_configuration() {
        let configurations = valid_configurations_for(ShaderKind::Compute);
        assert_eq!(configurations.len(), 1);
        assert!(configurations[0].is_empty());
    }
}
