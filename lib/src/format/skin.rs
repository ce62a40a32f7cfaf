use std::io::Cursor;

use anyhow::{ensure, Result};
use binrw::{binrw, BinReaderExt, Endian};
use zerocopy::{BigEndian, ByteOrder};

use crate::{format::model::POS_STRIDE, util::read::slice_at};

pub const JOINT_RECORD_SIZE: usize = 0x1c;
pub const BLEND_RECORD_SIZE: usize = 0x4;
pub const FINE_SKIN_CONFIG_SIZE: usize = 0x10;
pub const PIECE_RECORD_SIZE: usize = 0x10;

/// Bytes of weight data per vertex in a fine-skinning piece.
const PIECE_WEIGHT_SIZE: usize = 2;
/// Fixed-point scale of blend and piece weights.
const WEIGHT_ONE: f32 = 128.0;

#[binrw]
#[derive(Clone, Debug, Default)]
pub(crate) struct JointRecord {
    pub parent: i8,
    #[brw(pad_after = 2)]
    pub index: u8,
    pub bind_translation: [f32; 3],
    pub rest_translation: [f32; 3],
}

#[derive(Clone, Debug, PartialEq)]
pub struct Joint {
    pub parent: Option<usize>,
    pub bind_translation: [f32; 3],
    pub rest_translation: [f32; 3],
}

/// Reads the joint hierarchy.
///
/// A table that doesn't fit the file is skipped with a warning. A joint whose
/// declared index differs from its position means the table offsets are wrong and
/// fails the load.
pub fn read_joints(data: &[u8], offset: usize, count: usize) -> Result<Vec<Joint>> {
    if count == 0 {
        return Ok(vec![]);
    }
    let Ok(table) = slice_at(data, offset, count * JOINT_RECORD_SIZE) else {
        log::warn!("Joint table ({count} joints at {offset:#x}) out of bounds, skipping");
        return Ok(vec![]);
    };
    let mut reader = Cursor::new(table);
    let mut joints = Vec::with_capacity(count);
    for i in 0..count {
        let record: JointRecord = reader.read_type(Endian::Big)?;
        ensure!(
            record.index as usize == i,
            "Joint {i} declares index {}; joint table layout is wrong",
            record.index
        );
        let parent = match usize::try_from(record.parent) {
            Ok(p) if p < count => Some(p),
            Ok(p) => {
                log::warn!("Joint {i} parent {p} out of range");
                None
            }
            Err(_) => None,
        };
        joints.push(Joint {
            parent,
            bind_translation: record.bind_translation,
            rest_translation: record.rest_translation,
        });
    }
    Ok(joints)
}

#[binrw]
#[derive(Clone, Debug, Default)]
pub(crate) struct BlendRecord {
    pub joints: [u8; 2],
    #[brw(pad_after = 1)]
    pub influence: u8,
}

/// Two-joint blend addressed by matrix slots past the joint count.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SkinBlend {
    pub joints: [u8; 2],
    pub weights: [f32; 2],
}

pub fn read_blends(data: &[u8], offset: usize, count: usize) -> Vec<SkinBlend> {
    if count == 0 {
        return vec![];
    }
    let Ok(table) = slice_at(data, offset, count * BLEND_RECORD_SIZE) else {
        log::warn!("Blend table ({count} blends at {offset:#x}) out of bounds, skipping");
        return vec![];
    };
    let mut reader = Cursor::new(table);
    let mut blends = Vec::with_capacity(count);
    for _ in 0..count {
        let Ok(record) = reader.read_type::<BlendRecord>(Endian::Big) else { break };
        let w = (record.influence as f32 / WEIGHT_ONE).min(1.0);
        blends.push(SkinBlend { joints: record.joints, weights: [1.0 - w, w] });
    }
    blends
}

#[binrw]
#[derive(Clone, Debug, Default)]
pub(crate) struct FineSkinConfig {
    pub unk0: u16,
    pub num_pieces: u16,
    pub unk4: u16,
    pub quantize_shift: u8,
    pub unk7: u8,
    pub pieces_ptr: u32,
    pub weights_ptr: u32,
}

#[binrw]
#[derive(Clone, Debug, Default)]
pub(crate) struct PieceRecord {
    pub vertex_start: u16,
    pub vertex_count: u16,
    pub bones: [u8; 2],
    #[brw(pad_before = 2, pad_after = 4)]
    pub weights_offset: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FineSkinPiece {
    pub vertex_start: usize,
    pub vertex_count: usize,
    pub bones: [u8; 2],
    /// Per-vertex weights of both bones
    pub weights: Vec<[f32; 2]>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FineSkinning {
    pub quantize_shift: u8,
    pub pieces: Vec<FineSkinPiece>,
}

/// Reads a fine-skinning piece list.
///
/// `tables` overrides the piece and weight table pointers stored in the config
/// block (position skinning keeps them in the header). Missing or truncated tables
/// disable the feature or drop the affected piece; they never fail the load.
pub fn read_fine_skinning(
    data: &[u8],
    config_offset: usize,
    tables: Option<(usize, usize)>,
    vertex_count: usize,
) -> Option<FineSkinning> {
    let raw_config = slice_at(data, config_offset, FINE_SKIN_CONFIG_SIZE).ok()?;
    let config: FineSkinConfig = Cursor::new(raw_config).read_type(Endian::Big).ok()?;
    if config.num_pieces == 0 {
        return None;
    }
    let (pieces_ptr, weights_ptr) =
        tables.unwrap_or((config.pieces_ptr as usize, config.weights_ptr as usize));
    let num_pieces = config.num_pieces as usize;
    let Ok(table) = slice_at(data, pieces_ptr, num_pieces * PIECE_RECORD_SIZE) else {
        log::warn!(
            "Fine skinning declares {num_pieces} pieces but table at {pieces_ptr:#x} is missing"
        );
        return None;
    };
    let mut reader = Cursor::new(table);
    let mut pieces = Vec::with_capacity(num_pieces);
    for i in 0..num_pieces {
        let record: PieceRecord = reader.read_type(Endian::Big).ok()?;
        let start = record.vertex_start as usize;
        let count = record.vertex_count as usize;
        if start + count > vertex_count {
            log::warn!(
                "Fine skinning piece {i} covers vertices {start}..{} of {vertex_count}",
                start + count
            );
            continue;
        }
        let weights_at = weights_ptr + record.weights_offset as usize;
        let Ok(raw) = slice_at(data, weights_at, count * PIECE_WEIGHT_SIZE) else {
            log::warn!("Fine skinning piece {i} weights at {weights_at:#x} out of bounds");
            continue;
        };
        let weights = raw
            .chunks_exact(PIECE_WEIGHT_SIZE)
            .map(|w| [w[0] as f32 / WEIGHT_ONE, w[1] as f32 / WEIGHT_ONE])
            .collect();
        pieces.push(FineSkinPiece {
            vertex_start: start,
            vertex_count: count,
            bones: record.bones,
            weights,
        });
    }
    Some(FineSkinning { quantize_shift: config.quantize_shift, pieces })
}

/// Instance-owned copies of the buffers fine skinning rewrites.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FineSkinInstance {
    pub positions: Vec<u8>,
    pub normals: Vec<u8>,
}

impl FineSkinInstance {
    pub fn new(positions: &[u8], normals: &[u8]) -> Self {
        Self { positions: positions.to_vec(), normals: normals.to_vec() }
    }

    /// Offsets skinned positions by the weighted translations of their bones.
    pub fn apply_translations(&mut self, skin: &FineSkinning, translations: &[[f32; 3]]) {
        let scale = 2f32.powi(skin.quantize_shift as i32);
        let bone = |b: u8| translations.get(b as usize).copied().unwrap_or_default();
        for piece in &skin.pieces {
            let (t0, t1) = (bone(piece.bones[0]), bone(piece.bones[1]));
            for (i, w) in piece.weights.iter().enumerate() {
                let at = (piece.vertex_start + i) * POS_STRIDE;
                let Some(v) = self.positions.get_mut(at..at + POS_STRIDE) else { break };
                for c in 0..3 {
                    let p = BigEndian::read_i16(&v[c * 2..]) as f32;
                    let moved = p + (w[0] * t0[c] + w[1] * t1[c]) * scale;
                    let moved = moved.round().clamp(-32768.0, 32767.0) as i16;
                    BigEndian::write_i16(&mut v[c * 2..], moved);
                }
            }
        }
    }
}
