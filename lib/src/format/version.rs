use anyhow::{anyhow, Result};
use strum::{Display, EnumIter, EnumString};

/// Known model format revisions.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum ModelVersion {
    AncientMap,
    Ancient,
    Beta,
    BetaMap,
    Demo,
    DemoMap,
    Final,
    FinalMap,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CountWidth {
    U8,
    U16,
}

/// Header location of a table pointer and its element count.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TableField {
    pub offset: usize,
    pub count: usize,
    pub count_width: CountWidth,
}

const fn table(offset: usize, count: usize, count_width: CountWidth) -> TableField {
    TableField { offset, count, count_width }
}

/// Header location of a command stream pointer and its byte count (u16).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BitstreamField {
    pub offset: usize,
    pub byte_count: usize,
}

const fn bits(offset: usize, byte_count: usize) -> BitstreamField {
    BitstreamField { offset, byte_count }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FineSkinningFields {
    /// Inline config block
    pub config: usize,
    /// Pointer to piece table
    pub pieces: usize,
    /// Pointer to weight table
    pub weights: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DisplayListFields {
    pub table: TableField,
    /// Entry stride, or `None` when it must be detected.
    pub stride: Option<usize>,
}

/// Entry strides tried when a revision's display-list table stride is unknown.
pub const DL_INFO_STRIDE_CANDIDATES: [usize; 4] = [0x1c, 0x18, 0x10, 0x08];

/// How a revision marks its dedicated water pass.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WaterPass {
    /// Water comes only from shaders flagged as water.
    ShaderOnly,
    /// This pass index, when its stream is non-empty.
    Fixed(usize),
    /// The last non-empty auxiliary stream.
    LastNonEmpty,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShaderFamily {
    /// Earliest revisions: small records, classification by texture id.
    Ancient,
    /// Beta and demo revisions: final-like flags, heuristic water/lava/cutout.
    Legacy,
    /// Shipped revision: explicit flag bits and probe parameters.
    Standard,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProbeFields {
    pub hemispheric_enabled: usize,
    pub hemispheric_tex: usize,
    pub reflective_enabled: usize,
    pub reflective_tex: usize,
    pub reflective_factor: usize,
}

/// Field offsets within one shader record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ShaderLayout {
    pub family: ShaderFamily,
    pub size: usize,
    pub base_color: usize,
    pub layers: usize,
    pub layer_size: usize,
    pub layer_count: usize,
    pub flags: usize,
    pub attr_flags: usize,
    pub probes: Option<ProbeFields>,
    pub nbt_tex: Option<usize>,
    pub fur_region_tex: Option<usize>,
}

pub const STANDARD_SHADER_LAYOUT: ShaderLayout = ShaderLayout {
    family: ShaderFamily::Standard,
    size: 0x44,
    base_color: 0x04,
    layers: 0x24,
    layer_size: 0x8,
    layer_count: 0x41,
    flags: 0x3c,
    attr_flags: 0x40,
    probes: Some(ProbeFields {
        hemispheric_enabled: 0x08,
        hemispheric_tex: 0x0c,
        reflective_enabled: 0x10,
        reflective_tex: 0x14,
        reflective_factor: 0x18,
    }),
    nbt_tex: Some(0x1c),
    fur_region_tex: Some(0x20),
};

pub const LEGACY_SHADER_LAYOUT: ShaderLayout = ShaderLayout {
    family: ShaderFamily::Legacy,
    size: 0x38,
    base_color: 0x04,
    layers: 0x20,
    layer_size: 0x8,
    layer_count: 0x36,
    flags: 0x30,
    attr_flags: 0x34,
    probes: None,
    nbt_tex: None,
    fur_region_tex: None,
};

pub const ANCIENT_SHADER_LAYOUT: ShaderLayout = ShaderLayout {
    family: ShaderFamily::Ancient,
    size: 0x24,
    base_color: 0x00,
    layers: 0x08,
    layer_size: 0x4,
    layer_count: 0x21,
    flags: 0x1c,
    attr_flags: 0x20,
    probes: None,
    nbt_tex: None,
    fur_region_tex: None,
};

/// Header layout and decoding parameters of one format revision.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FormatDescriptor {
    pub version: ModelVersion,
    /// Bytes required to read every header field
    pub header_size: usize,
    pub is_map_block: bool,
    pub has_normals: bool,
    pub has_bones: bool,
    pub legacy_quantization: bool,
    pub has_y_translate: bool,
    pub shader_layout: ShaderLayout,
    pub textures: TableField,
    pub positions: TableField,
    pub normals: Option<TableField>,
    pub colors: TableField,
    pub tex_coords: TableField,
    pub shaders: TableField,
    pub joints: Option<TableField>,
    pub blends: Option<TableField>,
    pub pos_fine_skinning: Option<FineSkinningFields>,
    pub nrm_fine_skinning_config: Option<usize>,
    pub display_lists: DisplayListFields,
    pub bitstreams: &'static [BitstreamField],
    /// Width of the display-list index operand of CallDL
    pub dl_index_bits: u32,
    /// Command streams realign to a byte boundary after each vertex descriptor
    pub align_after_vcd: bool,
    pub water_pass: WaterPass,
    pub normal_flags: Option<usize>,
    pub light_flags: Option<usize>,
    pub tex_mtx_count: Option<usize>,
    pub y_translate: Option<usize>,
    pub pos_shift: Option<usize>,
    /// (file size, bits) patches for assets known to use a different index width
    pub dl_index_bits_overrides: &'static [(usize, u32)],
}

impl FormatDescriptor {
    /// Returns a copy with any per-asset patches applied.
    pub fn for_asset(&self, asset_len: usize) -> FormatDescriptor {
        let mut out = self.clone();
        if let Some(&(_, bits)) =
            self.dl_index_bits_overrides.iter().find(|(len, _)| *len == asset_len)
        {
            log::debug!(
                "{}: using {bits}-bit display list indices for {asset_len:#x} byte asset",
                self.version
            );
            out.dl_index_bits = bits;
        }
        out
    }
}

const FINAL: FormatDescriptor = FormatDescriptor {
    version: ModelVersion::Final,
    header_size: 0x100,
    is_map_block: false,
    has_normals: true,
    has_bones: true,
    legacy_quantization: false,
    has_y_translate: false,
    shader_layout: STANDARD_SHADER_LAYOUT,
    textures: table(0x20, 0xf2, CountWidth::U8),
    positions: table(0x28, 0xe4, CountWidth::U16),
    normals: Some(table(0x2c, 0xe6, CountWidth::U16)),
    colors: table(0x30, 0xe8, CountWidth::U16),
    tex_coords: table(0x34, 0xea, CountWidth::U16),
    shaders: table(0x38, 0xf8, CountWidth::U8),
    joints: Some(table(0x3c, 0xf3, CountWidth::U8)),
    blends: Some(table(0x54, 0xf4, CountWidth::U8)),
    pos_fine_skinning: Some(FineSkinningFields { config: 0x88, pieces: 0xa4, weights: 0xa8 }),
    nrm_fine_skinning_config: Some(0xac),
    display_lists: DisplayListFields {
        table: table(0xd0, 0xf5, CountWidth::U8),
        stride: Some(0x1c),
    },
    bitstreams: &[bits(0xd4, 0xd8)],
    dl_index_bits: 8,
    align_after_vcd: false,
    water_pass: WaterPass::ShaderOnly,
    normal_flags: Some(0x24),
    light_flags: Some(0xf6),
    tex_mtx_count: Some(0xfa),
    y_translate: None,
    pos_shift: None,
    dl_index_bits_overrides: &[],
};

const FINAL_MAP: FormatDescriptor = FormatDescriptor {
    version: ModelVersion::FinalMap,
    header_size: 0xa4,
    is_map_block: true,
    has_normals: false,
    has_bones: false,
    legacy_quantization: false,
    has_y_translate: false,
    shader_layout: STANDARD_SHADER_LAYOUT,
    textures: table(0x54, 0xa0, CountWidth::U8),
    positions: table(0x58, 0x90, CountWidth::U16),
    normals: None,
    colors: table(0x5c, 0x94, CountWidth::U16),
    tex_coords: table(0x60, 0x96, CountWidth::U16),
    shaders: table(0x64, 0xa2, CountWidth::U8),
    joints: None,
    blends: None,
    pos_fine_skinning: None,
    nrm_fine_skinning_config: None,
    display_lists: DisplayListFields {
        table: table(0x68, 0x9f, CountWidth::U8),
        stride: Some(0x1c),
    },
    bitstreams: &[bits(0x78, 0x84), bits(0x7c, 0x86), bits(0x80, 0x88)],
    dl_index_bits: 8,
    align_after_vcd: false,
    water_pass: WaterPass::ShaderOnly,
    normal_flags: None,
    light_flags: None,
    tex_mtx_count: None,
    y_translate: None,
    pos_shift: Some(0x9e),
    dl_index_bits_overrides: &[],
};

const DEMO: FormatDescriptor = FormatDescriptor {
    version: ModelVersion::Demo,
    shader_layout: LEGACY_SHADER_LAYOUT,
    // One demo model was built with the beta list index width
    dl_index_bits_overrides: &[(0x1b60, 6)],
    ..FINAL
};

const DEMO_MAP: FormatDescriptor = FormatDescriptor {
    version: ModelVersion::DemoMap,
    shader_layout: LEGACY_SHADER_LAYOUT,
    shaders: table(0x64, 0x9a, CountWidth::U8),
    display_lists: DisplayListFields {
        table: table(0x68, 0x99, CountWidth::U8),
        stride: Some(0x1c),
    },
    water_pass: WaterPass::Fixed(2),
    pos_shift: None,
    ..FINAL_MAP
};

const BETA: FormatDescriptor = FormatDescriptor {
    version: ModelVersion::Beta,
    header_size: 0xb0,
    is_map_block: false,
    has_normals: true,
    has_bones: true,
    legacy_quantization: true,
    has_y_translate: true,
    shader_layout: LEGACY_SHADER_LAYOUT,
    textures: table(0x1c, 0x98, CountWidth::U8),
    positions: table(0x24, 0x9c, CountWidth::U16),
    normals: Some(table(0x28, 0x9e, CountWidth::U16)),
    colors: table(0x2c, 0xa0, CountWidth::U16),
    tex_coords: table(0x30, 0xa2, CountWidth::U16),
    shaders: table(0x34, 0xae, CountWidth::U8),
    joints: Some(table(0x38, 0xab, CountWidth::U8)),
    blends: Some(table(0x3c, 0xac, CountWidth::U8)),
    pos_fine_skinning: None,
    nrm_fine_skinning_config: None,
    display_lists: DisplayListFields {
        table: table(0x58, 0xad, CountWidth::U8),
        stride: None,
    },
    bitstreams: &[bits(0x5c, 0x60)],
    dl_index_bits: 6,
    align_after_vcd: false,
    water_pass: WaterPass::ShaderOnly,
    normal_flags: Some(0x20),
    light_flags: None,
    tex_mtx_count: None,
    y_translate: Some(0x8c),
    pos_shift: None,
    dl_index_bits_overrides: &[],
};

const BETA_MAP: FormatDescriptor = FormatDescriptor {
    version: ModelVersion::BetaMap,
    header_size: 0x90,
    is_map_block: true,
    has_normals: false,
    has_bones: false,
    legacy_quantization: true,
    has_y_translate: false,
    shader_layout: LEGACY_SHADER_LAYOUT,
    textures: table(0x3c, 0x84, CountWidth::U8),
    positions: table(0x40, 0x7c, CountWidth::U16),
    normals: None,
    colors: table(0x44, 0x7e, CountWidth::U16),
    tex_coords: table(0x48, 0x80, CountWidth::U16),
    shaders: table(0x4c, 0x85, CountWidth::U8),
    joints: None,
    blends: None,
    pos_fine_skinning: None,
    nrm_fine_skinning_config: None,
    display_lists: DisplayListFields {
        table: table(0x50, 0x86, CountWidth::U8),
        stride: None,
    },
    bitstreams: &[bits(0x54, 0x70), bits(0x58, 0x72), bits(0x5c, 0x74)],
    dl_index_bits: 6,
    align_after_vcd: false,
    water_pass: WaterPass::Fixed(2),
    normal_flags: None,
    light_flags: None,
    tex_mtx_count: None,
    y_translate: None,
    pos_shift: None,
    dl_index_bits_overrides: &[],
};

const ANCIENT: FormatDescriptor = FormatDescriptor {
    version: ModelVersion::Ancient,
    header_size: 0x90,
    is_map_block: false,
    has_normals: true,
    has_bones: true,
    legacy_quantization: true,
    has_y_translate: false,
    shader_layout: ANCIENT_SHADER_LAYOUT,
    textures: table(0x08, 0x6c, CountWidth::U8),
    positions: table(0x0c, 0x60, CountWidth::U16),
    normals: Some(table(0x10, 0x62, CountWidth::U16)),
    colors: table(0x14, 0x64, CountWidth::U16),
    tex_coords: table(0x18, 0x66, CountWidth::U16),
    shaders: table(0x1c, 0x6d, CountWidth::U8),
    joints: Some(table(0x20, 0x6e, CountWidth::U8)),
    blends: None,
    pos_fine_skinning: None,
    nrm_fine_skinning_config: None,
    display_lists: DisplayListFields {
        table: table(0x28, 0x6f, CountWidth::U8),
        stride: None,
    },
    bitstreams: &[bits(0x2c, 0x68)],
    dl_index_bits: 6,
    align_after_vcd: true,
    water_pass: WaterPass::ShaderOnly,
    normal_flags: None,
    light_flags: None,
    tex_mtx_count: None,
    y_translate: None,
    pos_shift: None,
    dl_index_bits_overrides: &[],
};

const ANCIENT_MAP: FormatDescriptor = FormatDescriptor {
    version: ModelVersion::AncientMap,
    header_size: 0x80,
    is_map_block: true,
    has_normals: false,
    has_bones: false,
    legacy_quantization: true,
    has_y_translate: false,
    shader_layout: ANCIENT_SHADER_LAYOUT,
    textures: table(0x08, 0x70, CountWidth::U8),
    positions: table(0x0c, 0x60, CountWidth::U16),
    normals: None,
    colors: table(0x10, 0x62, CountWidth::U16),
    tex_coords: table(0x14, 0x64, CountWidth::U16),
    shaders: table(0x18, 0x71, CountWidth::U8),
    joints: None,
    blends: None,
    pos_fine_skinning: None,
    nrm_fine_skinning_config: None,
    display_lists: DisplayListFields {
        table: table(0x1c, 0x72, CountWidth::U8),
        stride: None,
    },
    bitstreams: &[bits(0x20, 0x66), bits(0x24, 0x68), bits(0x28, 0x6a)],
    dl_index_bits: 6,
    align_after_vcd: true,
    water_pass: WaterPass::LastNonEmpty,
    normal_flags: None,
    light_flags: None,
    tex_mtx_count: None,
    y_translate: None,
    pos_shift: None,
    dl_index_bits_overrides: &[],
};

/// Returns the field layout of a format revision.
pub fn lookup(version: ModelVersion) -> FormatDescriptor {
    match version {
        ModelVersion::AncientMap => ANCIENT_MAP,
        ModelVersion::Ancient => ANCIENT,
        ModelVersion::Beta => BETA,
        ModelVersion::BetaMap => BETA_MAP,
        ModelVersion::Demo => DEMO,
        ModelVersion::DemoMap => DEMO_MAP,
        ModelVersion::Final => FINAL,
        ModelVersion::FinalMap => FINAL_MAP,
    }
}

/// Returns the field layout for a revision tag such as `final-map`.
pub fn lookup_tag(tag: &str) -> Result<FormatDescriptor> {
    let version: ModelVersion =
        tag.parse().map_err(|_| anyhow!("Unknown model format revision '{tag}'"))?;
    Ok(lookup(version))
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn every_revision_is_registered() {
        for version in ModelVersion::iter() {
            let desc = lookup(version);
            assert_eq!(desc.version, version);
            assert!(!desc.bitstreams.is_empty() && desc.bitstreams.len() <= 3);
            assert!(desc.dl_index_bits == 6 || desc.dl_index_bits == 8);
            assert_eq!(desc.is_map_block, desc.joints.is_none());
        }
    }

    #[test]
    fn header_fields_fit_header() {
        for version in ModelVersion::iter() {
            let desc = lookup(version);
            let mut fields = vec![
                (desc.textures.offset + 4, desc.textures.count),
                (desc.positions.offset + 4, desc.positions.count),
                (desc.colors.offset + 4, desc.colors.count),
                (desc.tex_coords.offset + 4, desc.tex_coords.count),
                (desc.shaders.offset + 4, desc.shaders.count),
                (desc.display_lists.table.offset + 4, desc.display_lists.table.count),
            ];
            fields.extend(desc.normals.map(|t| (t.offset + 4, t.count)));
            fields.extend(desc.joints.map(|t| (t.offset + 4, t.count)));
            for (end, count) in fields {
                assert!(end <= desc.header_size, "{version}: {end:#x}");
                assert!(count + 2 <= desc.header_size, "{version}: {count:#x}");
            }
            for b in desc.bitstreams {
                assert!(b.offset + 4 <= desc.header_size);
                assert!(b.byte_count + 2 <= desc.header_size);
            }
        }
    }

    #[test]
    fn tags_round_trip() {
        assert_eq!(ModelVersion::FinalMap.to_string(), "final-map");
        assert_eq!(lookup_tag("ancient-map").unwrap().version, ModelVersion::AncientMap);
        assert!(lookup_tag("prototype").is_err());
    }

    #[test]
    fn per_asset_patch_does_not_touch_registry() {
        let demo = lookup(ModelVersion::Demo);
        assert_eq!(demo.for_asset(0x1b60).dl_index_bits, 6);
        assert_eq!(demo.for_asset(0x1b64).dl_index_bits, 8);
        assert_eq!(lookup(ModelVersion::Demo).dl_index_bits, 8);
    }

    #[test]
    fn families_follow_revision() {
        assert_eq!(lookup(ModelVersion::Final).shader_layout.family, ShaderFamily::Standard);
        assert_eq!(lookup(ModelVersion::DemoMap).shader_layout.family, ShaderFamily::Legacy);
        assert_eq!(lookup(ModelVersion::AncientMap).shader_layout.family, ShaderFamily::Ancient);
        assert!(lookup(ModelVersion::Ancient).align_after_vcd);
        assert_eq!(lookup(ModelVersion::AncientMap).water_pass, WaterPass::LastNonEmpty);
        assert_eq!(lookup(ModelVersion::BetaMap).water_pass, WaterPass::Fixed(2));
    }
}
