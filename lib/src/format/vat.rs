use std::sync::OnceLock;

/// GX vertex component storage type.
///
/// The color variants describe a whole color element rather than a single component.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CompType {
    U8,
    S8,
    U16,
    S16,
    F32,
    Rgb565,
    Rgb8,
    Rgbx8,
    Rgba4,
    Rgba6,
    Rgba8,
}

impl CompType {
    /// Size of one component, or of the whole element for color types.
    pub fn byte_size(self) -> usize {
        match self {
            CompType::U8 | CompType::S8 => 1,
            CompType::U16 | CompType::S16 | CompType::Rgb565 | CompType::Rgba4 => 2,
            CompType::Rgb8 | CompType::Rgba6 => 3,
            CompType::F32 | CompType::Rgbx8 | CompType::Rgba8 => 4,
        }
    }

    pub fn is_color(self) -> bool {
        matches!(
            self,
            CompType::Rgb565
                | CompType::Rgb8
                | CompType::Rgbx8
                | CompType::Rgba4
                | CompType::Rgba6
                | CompType::Rgba8
        )
    }
}

/// GX vertex component count.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CompCnt {
    PosXy,
    PosXyz,
    NrmXyz,
    /// Normal, binormal, tangent packed in one element.
    NrmNbt,
    ClrRgb,
    ClrRgba,
    TexS,
    TexSt,
}

impl CompCnt {
    pub fn count(self) -> usize {
        match self {
            CompCnt::TexS => 1,
            CompCnt::PosXy | CompCnt::TexSt => 2,
            CompCnt::PosXyz | CompCnt::NrmXyz | CompCnt::ClrRgb => 3,
            CompCnt::ClrRgba => 4,
            CompCnt::NrmNbt => 9,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct AttrFormat {
    pub comp_type: CompType,
    pub shift: u8,
    pub count: CompCnt,
}

impl AttrFormat {
    pub const fn new(comp_type: CompType, shift: u8, count: CompCnt) -> Self {
        Self { comp_type, shift, count }
    }

    /// Size in bytes of one element of this attribute, as stored in an array or inline.
    pub fn element_size(&self) -> usize {
        if self.comp_type.is_color() {
            self.comp_type.byte_size()
        } else {
            self.comp_type.byte_size() * self.count.count()
        }
    }
}

/// Per-attribute formats for one of the eight hardware VAT slots.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VatPreset {
    pub pos: AttrFormat,
    pub nrm: AttrFormat,
    pub clr: AttrFormat,
    pub tex: [AttrFormat; 8],
}

impl Default for VatPreset {
    fn default() -> Self {
        // Zeroed hardware state
        Self {
            pos: AttrFormat::new(CompType::U8, 0, CompCnt::PosXy),
            nrm: AttrFormat::new(CompType::U8, 0, CompCnt::NrmXyz),
            clr: AttrFormat::new(CompType::Rgb565, 0, CompCnt::ClrRgb),
            tex: [AttrFormat::new(CompType::U8, 0, CompCnt::TexS); 8],
        }
    }
}

pub const NUM_VAT_PRESETS: usize = 8;

pub type VertexAttributeTable = [VatPreset; NUM_VAT_PRESETS];

const fn pos(comp_type: CompType, shift: u8) -> AttrFormat {
    AttrFormat::new(comp_type, shift, CompCnt::PosXyz)
}

const fn st(comp_type: CompType, shift: u8) -> AttrFormat {
    AttrFormat::new(comp_type, shift, CompCnt::TexSt)
}

const RGBA8: AttrFormat = AttrFormat::new(CompType::Rgba8, 0, CompCnt::ClrRgba);
const RGBA4: AttrFormat = AttrFormat::new(CompType::Rgba4, 0, CompCnt::ClrRgba);

/// Builds the VAT presets the game programs at boot.
///
/// `legacy_quantization` selects the older position quantization used by early
/// revisions; `nbt_normals` switches the compact normal presets to packed NBT.
pub fn generate(legacy_quantization: bool, nbt_normals: bool) -> VertexAttributeTable {
    let mut vat = [VatPreset::default(); NUM_VAT_PRESETS];
    let compact_nrm = AttrFormat::new(
        CompType::S8,
        0,
        if nbt_normals { CompCnt::NrmNbt } else { CompCnt::NrmXyz },
    );

    vat[0].pos = pos(CompType::S16, 0);
    vat[0].clr = RGBA8;
    vat[0].tex[0] = st(CompType::S16, 7);

    vat[1].pos = pos(CompType::S16, 2);
    vat[1].clr = RGBA8;
    vat[1].tex[0] = st(CompType::F32, 0);

    vat[2].pos = pos(CompType::F32, 0);
    vat[2].clr = RGBA8;
    vat[2].tex[0] = st(CompType::F32, 0);
    vat[2].tex[1] = st(CompType::F32, 0);

    vat[3].pos = pos(CompType::S16, 8);
    vat[3].nrm = AttrFormat::new(CompType::S8, 0, CompCnt::NrmNbt);
    vat[3].clr = RGBA4;
    for tex in &mut vat[3].tex[..4] {
        *tex = st(CompType::S16, 10);
    }

    vat[4].pos = pos(CompType::F32, 0);
    vat[4].nrm = AttrFormat::new(CompType::F32, 0, CompCnt::NrmXyz);
    vat[4].clr = RGBA8;
    vat[4].tex[0] = st(CompType::S16, 7);

    vat[5].pos = pos(CompType::S16, if legacy_quantization { 0 } else { 3 });
    vat[5].nrm = compact_nrm;
    vat[5].clr = RGBA4;
    for tex in &mut vat[5].tex[..4] {
        *tex = st(CompType::S16, 8);
    }

    vat[6].pos = pos(CompType::S16, 8);
    vat[6].nrm = compact_nrm;
    vat[6].clr = RGBA4;
    for tex in &mut vat[6].tex[..4] {
        *tex = st(CompType::S16, 10);
    }

    vat[7].pos = pos(CompType::S16, if legacy_quantization { 0 } else { 8 });
    vat[7].nrm = compact_nrm;
    vat[7].clr = RGBA4;
    for tex in &mut vat[7].tex[..4] {
        *tex = st(CompType::S16, 10);
    }

    vat
}

static VAT_VARIANTS: OnceLock<[VertexAttributeTable; 4]> = OnceLock::new();

/// Returns a private copy of one of the four precomputed VAT variants.
pub fn vat_for(legacy_quantization: bool, nbt_normals: bool) -> VertexAttributeTable {
    let variants = VAT_VARIANTS.get_or_init(|| {
        [generate(false, false), generate(false, true), generate(true, false), generate(true, true)]
    });
    variants[(legacy_quantization as usize) << 1 | nbt_normals as usize]
}

/// Overrides the position shift of every preset (map blocks store their own quantization).
pub fn override_pos_shift(vat: &mut VertexAttributeTable, shift: u8) {
    for preset in vat.iter_mut() {
        preset.pos.shift = shift;
    }
}
