use serde::{Deserialize, Serialize};

/// Which renderer backend produced the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RendererKind {
    Vulkan = 0,
    DirectX12 = 1,
}

impl RendererKind {
    fn as_u32(self) -> u32 {
        self as u32
    }
}

/// HLSL-specific fields of the global header: the
/// three shader-model strings and the compiler version. GLSL has none
/// currently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HlslGlobalCacheParams {
    pub vs: String,
    pub ps: String,
    pub cs: String,
    pub compiler_version: String,
}

/// Global shader-cache header, one file per cache directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalCacheHeader {
    pub is_release_build: bool,
    pub renderer: u32,
    pub hlsl: Option<HlslGlobalCacheParams>,
}

impl GlobalCacheHeader {
    pub fn new(
        is_release_build: bool,
        renderer: RendererKind,
        hlsl: Option<HlslGlobalCacheParams>,
    ) -> Self {
        Self {
            is_release_build,
            renderer: renderer.as_u32(),
            hlsl,
        }
    }

    /// Returns the reason the cache is outdated, if any.
    pub fn outdated_reason(&self, current: &GlobalCacheHeader) -> Option<String> {
        if self.is_release_build != current.is_release_build {
            return Some("build mode changed".to_string());
        }
        if self.renderer != current.renderer {
            return Some("renderer changed".to_string());
        }
        match (&self.hlsl, &current.hlsl) {
            (Some(old), Some(new)) if old != new => {
                Some("hlsl compiler parameters changed".to_string())
            }
            (None, Some(_)) | (Some(_), None) => {
                Some("hlsl cache section presence changed".to_string())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_build_mode_change() {
        let old = GlobalCacheHeader::new(false, RendererKind::Vulkan, None);
        let new = GlobalCacheHeader::new(true, RendererKind::Vulkan, None);
        assert!(old.outdated_reason(&new).is_some());
    }

    #[test]
    fn detects_hlsl_model_change() {
        let old = GlobalCacheHeader::new(
            true,
            RendererKind::DirectX12,
            Some(HlslGlobalCacheParams {
                vs: "vs_6_0".into(),
                ps: "ps_6_0".into(),
                cs: "cs_6_0".into(),
                compiler_version: "1.0".into(),
            }),
        );
        let new = GlobalCacheHeader::new(
            true,
            RendererKind::DirectX12,
            Some(HlslGlobalCacheParams {
                vs: "vs_6_1".into(),
                ps: "ps_6_0".into(),
                cs: "cs_6_0".into(),
                compiler_version: "1.0".into(),
            }),
        );
        assert!(old.outdated_reason(&new).is_some());
    }

    #[test]
    fn identical_headers_are_not_outdated() {
        let header = GlobalCacheHeader::new(true, RendererKind::Vulkan, None);
        assert!(header.outdated_reason(&header.clone()).is_none());
    }
}
