use std::io::Cursor;

use anyhow::Result;
use binrw::{binrw, BinReaderExt, Endian};
use bitflags::bitflags;
use zerocopy::BigEndian;

use crate::{
    format::{
        texclass::{TextureClassTable, ANCIENT_TEXTURE_CLASSES, LEGACY_TEXTURE_CLASSES},
        version::{ShaderFamily, ShaderLayout},
    },
    util::read::{read_u32, read_u8, slice_at},
};

bitflags! {
    /// Render flags of a shader record.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct ShaderFlags: u32 {
        const DEV_GEOMETRY = 0x2;
        const FOG = 0x4;
        const CULL_BACKFACE = 0x8;
        const REFLECT_SKYSCAPE = 0x20;
        const CAUSTIC = 0x40;
        const LAVA = 0x80;
        const REFLECTIVE = 0x100;
        const ALPHA_COMPARE = 0x400;
        const STREAKING_FUR = 0x2000;
        const SHORT_FUR = 0x4000;
        const MEDIUM_FUR = 0x8000;
        const LONG_FUR = 0x10000;
        const WATER = 0x8000_0000;
    }
}

impl ShaderFlags {
    pub const FUR: ShaderFlags = ShaderFlags::SHORT_FUR
        .union(ShaderFlags::MEDIUM_FUR)
        .union(ShaderFlags::LONG_FUR);

    /// Marks the shader as water. Water and lava are mutually exclusive.
    pub fn set_water(&mut self) {
        self.remove(ShaderFlags::LAVA);
        self.insert(ShaderFlags::WATER);
    }

    /// Marks the shader as lava. Water and lava are mutually exclusive.
    pub fn set_lava(&mut self) {
        self.remove(ShaderFlags::WATER);
        self.insert(ShaderFlags::LAVA);
    }
}

bitflags! {
    /// Vertex attributes a shader consumes beyond position and texcoords.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct ShaderAttrFlags: u8 {
        const NRM = 0x1;
        const CLR = 0x2;
    }
}

bitflags! {
    /// Model-wide normal flags from the header.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct NormalFlags: u8 {
        const HAS_VERTEX_COLOR = 0x2;
        const NBT = 0x8;
    }
}

bitflags! {
    /// Model-wide lighting flags from the header.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct LightFlags: u8 {
        const OVERRIDE_LIGHTING = 0x2;
    }
}

/// Layer blend (TEV) mode.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct BlendMode(pub u8);

impl BlendMode {
    pub const OPAQUE: BlendMode = BlendMode(0x00);
    pub const ALPHA_TEST: BlendMode = BlendMode(0x02);
    pub const ADDITIVE: BlendMode = BlendMode(0x04);
    pub const TRANSLUCENT: BlendMode = BlendMode(0x06);
}

pub const MAX_SHADER_LAYERS: usize = 2;

pub(crate) const NO_SCROLL: u8 = 0xff;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ShaderLayer {
    /// Texture id resolved through the model's texture table
    pub texture: Option<u32>,
    pub blend: BlendMode,
    /// Texture scroll matrix slot
    pub scroll_slot: Option<u8>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LightingProbes {
    pub hemispheric_tex: Option<u32>,
    pub reflective_tex: Option<u32>,
    pub reflective_factor: f32,
}

/// Decoded material record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShaderDescriptor {
    pub layers: Vec<ShaderLayer>,
    pub flags: ShaderFlags,
    pub attr_flags: ShaderAttrFlags,
    pub base_color: [u8; 4],
    pub probes: Option<LightingProbes>,
    pub nbt_tex: Option<u32>,
    pub fur_region_tex: Option<u32>,
    pub normal_flags: NormalFlags,
    pub light_flags: LightFlags,
    /// Object-space texture matrices addressed per vertex
    pub tex_mtx_count: u8,
}

impl ShaderDescriptor {
    pub fn is_water(&self) -> bool {
        self.flags.contains(ShaderFlags::WATER) && !self.flags.contains(ShaderFlags::LAVA)
    }

    pub fn is_fur(&self) -> bool { self.flags.intersects(ShaderFlags::FUR) }

    pub fn is_dev_geometry(&self) -> bool { self.flags.contains(ShaderFlags::DEV_GEOMETRY) }

    /// Number of fur shells, from the longest fur flag present.
    pub fn fur_layers(&self) -> Option<u32> {
        if self.flags.contains(ShaderFlags::LONG_FUR) {
            Some(16)
        } else if self.flags.contains(ShaderFlags::MEDIUM_FUR) {
            Some(8)
        } else if self.flags.contains(ShaderFlags::SHORT_FUR) {
            Some(4)
        } else {
            None
        }
    }

    pub fn has_nbt(&self) -> bool { self.nbt_tex.is_some() }

    /// Texture matrix index slots used by lighting probes and NBT lookups.
    pub fn probe_tex_mtx_slots(&self) -> usize {
        let lookups = self.probes.as_ref().map_or(0, |p| {
            p.hemispheric_tex.is_some() as usize + p.reflective_tex.is_some() as usize
        });
        lookups + self.has_nbt() as usize
    }

    pub fn texture_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.layers.iter().filter_map(|l| l.texture)
    }
}

#[binrw]
#[derive(Clone, Debug)]
pub(crate) struct LayerRecord {
    pub tex_index: u32,
    pub blend: u8,
    #[brw(pad_after = 2)]
    pub scroll_slot: u8,
}

#[binrw]
#[derive(Clone, Debug)]
pub(crate) struct AncientLayerRecord {
    pub tex_index: u16,
    pub blend: u8,
    pub scroll_slot: u8,
}

fn resolve_texture(index: u32, texture_ids: &[u32]) -> Option<u32> {
    if index == u32::MAX || index == u16::MAX as u32 {
        return None;
    }
    let id = texture_ids.get(index as usize).copied();
    if id.is_none() {
        log::warn!("Shader references texture slot {index} of {}", texture_ids.len());
    }
    id
}

fn read_layers(
    record: &[u8],
    layout: &ShaderLayout,
    texture_ids: &[u32],
) -> Result<Vec<ShaderLayer>> {
    let mut count = read_u8(record, layout.layer_count)? as usize;
    if count > MAX_SHADER_LAYERS {
        log::warn!("Shader declares {count} layers, clamping to {MAX_SHADER_LAYERS}");
        count = MAX_SHADER_LAYERS;
    }
    let mut reader = Cursor::new(slice_at(record, layout.layers, layout.layer_size * count)?);
    let mut layers = Vec::with_capacity(count);
    for _ in 0..count {
        let (tex_index, blend, scroll_slot) = if layout.family == ShaderFamily::Ancient {
            let r: AncientLayerRecord = reader.read_type(Endian::Big)?;
            (r.tex_index as u32, r.blend, r.scroll_slot)
        } else {
            let r: LayerRecord = reader.read_type(Endian::Big)?;
            (r.tex_index, r.blend, r.scroll_slot)
        };
        layers.push(ShaderLayer {
            texture: resolve_texture(tex_index, texture_ids),
            blend: BlendMode(blend),
            scroll_slot: (scroll_slot != NO_SCROLL).then_some(scroll_slot),
        });
    }
    Ok(layers)
}

/// Derives water, lava and cutout flags from layer textures and blend modes.
fn classify_by_texture(flags: &mut ShaderFlags, layers: &[ShaderLayer], table: &TextureClassTable) {
    let Some(first) = layers.first() else { return };
    if layers.iter().filter_map(|l| l.texture).any(|id| table.is_lava(id)) {
        flags.set_lava();
    } else if layers.iter().filter_map(|l| l.texture).any(|id| table.is_water(id))
        && (layers.len() == MAX_SHADER_LAYERS || first.blend == BlendMode::TRANSLUCENT)
    {
        flags.set_water();
    }
    if layers.len() == 1
        && first.blend == BlendMode::ALPHA_TEST
        && first.texture.map_or(false, |id| table.is_cutout(id))
    {
        flags.insert(ShaderFlags::ALPHA_COMPARE);
    }
}

/// Decodes one shader record.
///
/// Fails only when the record is shorter than the layout requires.
pub fn parse_shader(
    record: &[u8],
    layout: &ShaderLayout,
    texture_ids: &[u32],
    normal_flags: NormalFlags,
    light_flags: LightFlags,
    tex_mtx_count: u8,
) -> Result<ShaderDescriptor> {
    let raw_flags = read_u32::<BigEndian>(record, layout.flags)?;
    let attr_flags = ShaderAttrFlags::from_bits_truncate(read_u8(record, layout.attr_flags)?);
    let mut base_color = [0u8; 4];
    base_color.copy_from_slice(slice_at(record, layout.base_color, 4)?);
    let layers = read_layers(record, layout, texture_ids)?;

    let flags = match layout.family {
        ShaderFamily::Standard => {
            let raw = ShaderFlags::from_bits_retain(raw_flags);
            let mut flags = raw.difference(ShaderFlags::WATER | ShaderFlags::LAVA);
            if raw.contains(ShaderFlags::WATER) {
                flags.set_water();
            }
            // Lava wins when a record carries both bits
            if raw.contains(ShaderFlags::LAVA) {
                flags.set_lava();
            }
            flags
        }
        ShaderFamily::Legacy => {
            let mut flags = ShaderFlags::from_bits_retain(raw_flags)
                .difference(ShaderFlags::WATER | ShaderFlags::LAVA | ShaderFlags::ALPHA_COMPARE);
            classify_by_texture(&mut flags, &layers, &LEGACY_TEXTURE_CLASSES);
            flags
        }
        ShaderFamily::Ancient => {
            let mut flags = ShaderFlags::from_bits_retain(raw_flags)
                & (ShaderFlags::CULL_BACKFACE | ShaderFlags::FOG | ShaderFlags::DEV_GEOMETRY);
            classify_by_texture(&mut flags, &layers, &ANCIENT_TEXTURE_CLASSES);
            flags
        }
    };

    let probes = match layout.probes {
        Some(fields) => {
            let hemispheric = read_u32::<BigEndian>(record, fields.hemispheric_enabled)? == 1;
            let reflective = read_u32::<BigEndian>(record, fields.reflective_enabled)? == 1;
            let hemispheric_tex = if hemispheric {
                resolve_texture(read_u32::<BigEndian>(record, fields.hemispheric_tex)?, texture_ids)
            } else {
                None
            };
            let reflective_tex = if reflective {
                resolve_texture(read_u32::<BigEndian>(record, fields.reflective_tex)?, texture_ids)
            } else {
                None
            };
            let reflective_factor = read_u8(record, fields.reflective_factor)? as f32 / 255.0;
            (hemispheric || reflective)
                .then_some(LightingProbes { hemispheric_tex, reflective_tex, reflective_factor })
        }
        None => None,
    };

    let nbt_tex = match layout.nbt_tex {
        Some(offset) if normal_flags.contains(NormalFlags::NBT) => {
            resolve_texture(read_u32::<BigEndian>(record, offset)?, texture_ids)
        }
        _ => None,
    };
    let fur_region_tex = match layout.fur_region_tex {
        Some(offset) if flags.intersects(ShaderFlags::FUR) => {
            resolve_texture(read_u32::<BigEndian>(record, offset)?, texture_ids)
        }
        _ => None,
    };

    Ok(ShaderDescriptor {
        layers,
        flags,
        attr_flags,
        base_color,
        probes,
        nbt_tex,
        fur_region_tex,
        normal_flags,
        light_flags,
        tex_mtx_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{
        testing::ShaderRecordBuilder,
        version::{ANCIENT_SHADER_LAYOUT, LEGACY_SHADER_LAYOUT, STANDARD_SHADER_LAYOUT},
    };

    const TEXTURES: [u32; 4] = [0x0021, 0x0513, 0x05ab, 0x0900];

    fn parse(record: &[u8], layout: &ShaderLayout) -> ShaderDescriptor {
        parse_shader(record, layout, &TEXTURES, NormalFlags::empty(), LightFlags::empty(), 0)
            .unwrap()
    }

    #[test]
    fn ancient_single_layer_cutout() {
        let record = ShaderRecordBuilder::new(ANCIENT_SHADER_LAYOUT)
            .layer(0, BlendMode::ALPHA_TEST, None)
            .build();
        let shader = parse(&record, &ANCIENT_SHADER_LAYOUT);
        assert_eq!(shader.layers.len(), 1);
        assert_eq!(shader.layers[0].texture, Some(0x0021));
        assert!(shader.flags.contains(ShaderFlags::ALPHA_COMPARE));
        assert!(!shader.flags.contains(ShaderFlags::WATER));
        assert!(!shader.flags.contains(ShaderFlags::LAVA));
    }

    #[test]
    fn cutout_requires_single_alpha_tested_layer() {
        let record = ShaderRecordBuilder::new(ANCIENT_SHADER_LAYOUT)
            .layer(0, BlendMode::OPAQUE, None)
            .build();
        assert!(!parse(&record, &ANCIENT_SHADER_LAYOUT).flags.contains(ShaderFlags::ALPHA_COMPARE));
        let record = ShaderRecordBuilder::new(ANCIENT_SHADER_LAYOUT)
            .layer(0, BlendMode::ALPHA_TEST, None)
            .layer(3, BlendMode::OPAQUE, None)
            .build();
        assert!(!parse(&record, &ANCIENT_SHADER_LAYOUT).flags.contains(ShaderFlags::ALPHA_COMPARE));
    }

    #[test]
    fn legacy_water_and_lava_heuristics() {
        let water = ShaderRecordBuilder::new(LEGACY_SHADER_LAYOUT)
            .layer(1, BlendMode::OPAQUE, Some(2))
            .layer(3, BlendMode::OPAQUE, None)
            .flags(ShaderFlags::LAVA.bits() | ShaderFlags::FOG.bits())
            .build();
        let shader = parse(&water, &LEGACY_SHADER_LAYOUT);
        assert!(shader.is_water());
        assert!(!shader.flags.contains(ShaderFlags::LAVA));
        assert!(shader.flags.contains(ShaderFlags::FOG));
        assert_eq!(shader.layers[0].scroll_slot, Some(2));

        // Single opaque layer is not enough for water
        let plain = ShaderRecordBuilder::new(LEGACY_SHADER_LAYOUT)
            .layer(1, BlendMode::OPAQUE, None)
            .build();
        assert!(!parse(&plain, &LEGACY_SHADER_LAYOUT).is_water());

        let lava = ShaderRecordBuilder::new(LEGACY_SHADER_LAYOUT)
            .layer(1, BlendMode::TRANSLUCENT, None)
            .layer(2, BlendMode::OPAQUE, None)
            .build();
        let shader = parse(&lava, &LEGACY_SHADER_LAYOUT);
        assert!(shader.flags.contains(ShaderFlags::LAVA));
        assert!(!shader.flags.contains(ShaderFlags::WATER));
    }

    #[test]
    fn standard_flags_are_exclusive() {
        let record = ShaderRecordBuilder::new(STANDARD_SHADER_LAYOUT)
            .layer(3, BlendMode::OPAQUE, None)
            .flags((ShaderFlags::WATER | ShaderFlags::LAVA | ShaderFlags::CULL_BACKFACE).bits())
            .build();
        let shader = parse(&record, &STANDARD_SHADER_LAYOUT);
        assert!(shader.flags.contains(ShaderFlags::LAVA));
        assert!(!shader.flags.contains(ShaderFlags::WATER));
        assert!(shader.flags.contains(ShaderFlags::CULL_BACKFACE));

        let record = ShaderRecordBuilder::new(STANDARD_SHADER_LAYOUT)
            .flags(ShaderFlags::WATER.bits())
            .build();
        assert!(parse(&record, &STANDARD_SHADER_LAYOUT).is_water());
    }

    #[test]
    fn standard_reads_probes_nbt_and_fur() {
        let record = ShaderRecordBuilder::new(STANDARD_SHADER_LAYOUT)
            .layer(3, BlendMode::OPAQUE, None)
            .flags(ShaderFlags::MEDIUM_FUR.bits())
            .hemispheric_probe(1)
            .nbt_tex(2)
            .fur_region_tex(0)
            .build();
        let shader = parse_shader(
            &record,
            &STANDARD_SHADER_LAYOUT,
            &TEXTURES,
            NormalFlags::NBT,
            LightFlags::empty(),
            2,
        )
        .unwrap();
        let probes = shader.probes.as_ref().unwrap();
        assert_eq!(probes.hemispheric_tex, Some(0x0513));
        assert_eq!(probes.reflective_tex, None);
        assert_eq!(shader.nbt_tex, Some(0x05ab));
        assert_eq!(shader.fur_region_tex, Some(0x0021));
        assert_eq!(shader.fur_layers(), Some(8));
        assert_eq!(shader.probe_tex_mtx_slots(), 2);
        assert_eq!(shader.tex_mtx_count, 2);

        // NBT texture ignored without the model-wide NBT flag
        assert_eq!(parse(&record, &STANDARD_SHADER_LAYOUT).nbt_tex, None);
    }

    #[test]
    fn reads_attribute_flags() {
        for layout in [ANCIENT_SHADER_LAYOUT, LEGACY_SHADER_LAYOUT, STANDARD_SHADER_LAYOUT] {
            let record = ShaderRecordBuilder::new(layout).attr_flags(0x3).build();
            let shader = parse(&record, &layout);
            assert_eq!(shader.attr_flags, ShaderAttrFlags::NRM | ShaderAttrFlags::CLR);

            let record = ShaderRecordBuilder::new(layout).attr_flags(0x2).build();
            let shader = parse(&record, &layout);
            assert!(shader.attr_flags.contains(ShaderAttrFlags::CLR));
            assert!(!shader.attr_flags.contains(ShaderAttrFlags::NRM));
        }
    }

    #[test]
    fn layer_count_is_clamped() {
        let mut record = ShaderRecordBuilder::new(STANDARD_SHADER_LAYOUT)
            .layer(0, BlendMode::OPAQUE, None)
            .layer(1, BlendMode::OPAQUE, None)
            .build();
        record[STANDARD_SHADER_LAYOUT.layer_count] = 5;
        assert_eq!(parse(&record, &STANDARD_SHADER_LAYOUT).layers.len(), MAX_SHADER_LAYERS);
    }

    #[test]
    fn missing_texture_slot_is_none() {
        let record = ShaderRecordBuilder::new(STANDARD_SHADER_LAYOUT)
            .layer(9, BlendMode::OPAQUE, None)
            .layer(u32::MAX, BlendMode::OPAQUE, None)
            .build();
        let shader = parse(&record, &STANDARD_SHADER_LAYOUT);
        assert_eq!(shader.layers.len(), 2);
        assert!(shader.layers.iter().all(|l| l.texture.is_none()));
    }

    #[test]
    fn short_record_fails() {
        assert!(parse_shader(
            &[0u8; 0x10],
            &STANDARD_SHADER_LAYOUT,
            &TEXTURES,
            NormalFlags::empty(),
            LightFlags::empty(),
            0
        )
        .is_err());
    }
}
