pub mod bitstream;
pub mod display_list;
pub mod gx;
pub mod material;
pub mod model;
pub mod recovery;
pub mod shader;
pub mod skin;
pub mod texclass;
pub mod vat;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

use binrw::binrw;

/// Quantized bounding box as stored in display-list records.
#[binrw]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CAABoxS16 {
    pub min: [i16; 3],
    pub max: [i16; 3],
}

impl CAABoxS16 {
    #[inline]
    pub fn is_zero(&self) -> bool { self.min == [0; 3] && self.max == [0; 3] }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    pub fn union(self, other: Aabb) -> Aabb {
        let mut out = self;
        for i in 0..3 {
            out.min[i] = out.min[i].min(other.min[i]);
            out.max[i] = out.max[i].max(other.max[i]);
        }
        out
    }
}

impl From<CAABoxS16> for Aabb {
    fn from(value: CAABoxS16) -> Self {
        Self { min: value.min.map(|v| v as f32), max: value.max.map(|v| v as f32) }
    }
}
