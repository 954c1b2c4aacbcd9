//! Shader program manifest
//!
//! Every backend implements the same fixed set of programs. A program is looked up by
//! name, its uniforms are read by the names in [`uniforms`] and its inputs are read from
//! the texture units listed alongside each program.

/// Blend behaviour of a program's color outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// Outputs overwrite the target
    Replace,
    /// `src * src.a + dst * (1 - src.a)` on every color target
    AlphaBlend,
    /// Target 0 accumulates additively, target 1 is multiplied by `1 - src.r`
    WeightedAccumulate,
}

/// The programs the deferred pipeline is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    /// G-buffer fill. Outputs colors, view normals, world normals, material parameters and
    /// the screen-space velocity since the previous frame.
    Solid,
    /// Depth only, used to fill the shadow map.
    ShadowDepth,
    /// Weighted blended transparency accumulation.
    WeightedSum,
    /// Textured GUI quads. Unit 0: glyph texture.
    Font,
    /// Full-screen copy. Unit 0: source.
    Screen,
    /// One direction of a separable blur. Unit 0: source.
    Blur,
    /// Screen-space ambient occlusion. Units: 0 normals, 1 depths, 2 noise.
    Ssao,
    /// Shadow map lookup with PCF. Units: 0 vertex normals, 1 depths, 2 shadow map, 3 noise.
    Shadow,
    /// Deferred directional lighting and motion blur.
    /// Units: 0 colors, 1 normals, 2 depths, 3 materials, 4 occlusions, 5 shadows, 6 velocities.
    Lighting,
    /// Composite of accumulated transparency over a backdrop.
    /// Units: 0 backdrop, 1 accumulation, 2 revealage.
    TransparencyBlending,
}

impl ProgramKind {
    pub const ALL: [ProgramKind; 10] = [
        ProgramKind::Solid,
        ProgramKind::ShadowDepth,
        ProgramKind::WeightedSum,
        ProgramKind::Font,
        ProgramKind::Screen,
        ProgramKind::Blur,
        ProgramKind::Ssao,
        ProgramKind::Shadow,
        ProgramKind::Lighting,
        ProgramKind::TransparencyBlending,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProgramKind::Solid => "solid",
            ProgramKind::ShadowDepth => "shadowDepth",
            ProgramKind::WeightedSum => "weightedSum",
            ProgramKind::Font => "font",
            ProgramKind::Screen => "screen",
            ProgramKind::Blur => "blur",
            ProgramKind::Ssao => "ssao",
            ProgramKind::Shadow => "shadow",
            ProgramKind::Lighting => "lighting",
            ProgramKind::TransparencyBlending => "transparencyBlending",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// Programs drawn as a full-screen triangle rather than from a mesh
    pub fn is_screen_pass(&self) -> bool {
        matches!(
            self,
            ProgramKind::Screen
                | ProgramKind::Blur
                | ProgramKind::Ssao
                | ProgramKind::Shadow
                | ProgramKind::Lighting
                | ProgramKind::TransparencyBlending
        )
    }

    pub fn blend(&self) -> BlendMode {
        match self {
            ProgramKind::Font => BlendMode::AlphaBlend,
            ProgramKind::WeightedSum => BlendMode::WeightedAccumulate,
            _ => BlendMode::Replace,
        }
    }

    pub fn writes_depth(&self) -> bool {
        matches!(self, ProgramKind::Solid | ProgramKind::ShadowDepth)
    }

    /// Number of color targets the program writes
    pub fn color_targets(&self) -> usize {
        match self {
            ProgramKind::Solid => 5,
            ProgramKind::ShadowDepth => 0,
            ProgramKind::WeightedSum => 2,
            _ => 1,
        }
    }
}

impl std::fmt::Display for ProgramKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Uniform names read by the programs
pub mod uniforms {
    pub const MODEL_MATRIX: &str = "modelMatrix";
    pub const VIEW_MATRIX: &str = "viewMatrix";
    pub const INVERSE_VIEW_MATRIX: &str = "inverseViewMatrix";
    pub const PROJECTION_MATRIX: &str = "projectionMatrix";
    pub const PREVIOUS_MODEL_MATRIX: &str = "previousModelMatrix";
    pub const PREVIOUS_VIEW_MATRIX: &str = "previousViewMatrix";
    pub const PREVIOUS_PROJECTION_MATRIX: &str = "previousProjectionMatrix";
    pub const BLUR_STRENGTH: &str = "blurStrength";

    pub const MODEL_COLOR: &str = "modelColor";
    pub const DIFFUSE_INTENSITY: &str = "diffuseIntensity";
    pub const SPECULAR_INTENSITY: &str = "specularIntensity";
    pub const AMBIENT_INTENSITY: &str = "ambientIntensity";
    pub const SHININESS: &str = "shininess";
    pub const LIGHT_DIRECTION: &str = "lightDirection";

    pub const TAN_HALF_FOV: &str = "tanHalfFOV";
    pub const ASPECT_RATIO: &str = "aspectRatio";
    pub const Z_NEAR: &str = "zNear";
    pub const Z_FAR: &str = "zFar";

    pub const KERNEL_SIZE: &str = "kernelSize";
    pub const KERNEL: &str = "kernel";
    pub const OFFSETS: &str = "offsets";
    pub const RESOLUTION: &str = "resolution";
    pub const DIRECTION: &str = "direction";
    pub const NOISE_SCALE: &str = "noiseScale";
    pub const RADIUS: &str = "radius";
    pub const POWER: &str = "power";
    pub const BIAS: &str = "bias";
    pub const LIGHT_VIEW_MATRIX: &str = "lightViewMatrix";
    pub const LIGHT_PROJECTION_MATRIX: &str = "lightProjectionMatrix";
}

/// Largest sample kernel any program accepts
pub const MAX_KERNEL_SIZE: usize = 32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for kind in ProgramKind::ALL {
            assert_eq!(ProgramKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ProgramKind::from_name("phong"), None);
    }

    #[test]
    fn test_screen_passes_write_one_target() {
        for kind in ProgramKind::ALL.iter().filter(|k| k.is_screen_pass()) {
            assert_eq!(kind.color_targets(), 1, "{kind}");
            assert!(!kind.writes_depth());
        }
    }
}
