//! Texture ids that mark a material as water, lava or alpha-cutout in revisions
//! whose shader records carry no reliable bits for these.
//!
//! Ids were collected by viewing each revision's assets. They are data: extend the
//! lists for new assets rather than adding conditions to the parser.

/// Texture-id allow-lists for one shader family.
#[derive(Copy, Clone, Debug)]
pub struct TextureClassTable {
    pub water: &'static [u32],
    pub lava: &'static [u32],
    pub cutout: &'static [u32],
}

impl TextureClassTable {
    #[inline]
    pub fn is_water(&self, id: u32) -> bool { self.water.contains(&id) }

    #[inline]
    pub fn is_lava(&self, id: u32) -> bool { self.lava.contains(&id) }

    #[inline]
    pub fn is_cutout(&self, id: u32) -> bool { self.cutout.contains(&id) }
}

pub static ANCIENT_TEXTURE_CLASSES: TextureClassTable = TextureClassTable {
    water: &[
        0x0016, 0x0017, 0x0145, 0x02c3, 0x02c4,
        0x05e1, // uncertain: may be a waterfall overlay
    ],
    lava: &[0x0150, 0x0151, 0x0391],
    cutout: &[
        0x0021, 0x0022, 0x0073, 0x00b4, 0x0132,
        0x0205, 0x0206, // uncertain
        0x03a0,
    ],
};

pub static LEGACY_TEXTURE_CLASSES: TextureClassTable = TextureClassTable {
    water: &[0x0513, 0x0514, 0x0a8f, 0x0d3e],
    lava: &[0x05ab, 0x0c32],
    cutout: &[
        0x0152, 0x01dc, 0x0433, 0x0620,
        0x0cde, // uncertain
    ],
};
