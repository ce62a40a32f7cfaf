use anyhow::Result;

use crate::format::{
    gx::{
        build_geometry, first_draw, is_aux_command, is_draw_opcode, Attr, AttrType, Geometry,
        VertexArrays, VertexDescriptor, DRAW_HEADER_SIZE, TEX_MTX_IDX,
    },
    vat::VertexAttributeTable,
};

/// Preamble some legacy display lists carry before their first command.
pub const LEGACY_PREAMBLE_SIZE: usize = 0x20;

/// Per-vertex byte strides tried when scanning for the next draw command.
pub const STRIDE_SCAN_RANGE: std::ops::RangeInclusive<usize> = 2..=24;

/// How a display list was finally decoded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Attempt {
    Original,
    Stride(usize),
    SkipHeader,
    NoMatrixIndex,
    NoMatrixIndexSkipHeader,
}

#[derive(Clone, Debug)]
pub struct DecodedList {
    pub geometry: Geometry,
    /// Descriptor the geometry was decoded with
    pub vcd: VertexDescriptor,
    pub attempt: Attempt,
    /// Bytes skipped at the start of the display list
    pub skipped: usize,
}

/// Scans for per-vertex strides at which the first draw is followed by a plausible
/// command. Returned best first: same primitive, any draw, auxiliary command; ties
/// broken by distance from `implied`.
pub fn rank_strides(dl: &[u8], implied: usize) -> Vec<usize> {
    let Some((start, op, count)) = first_draw(dl) else { return vec![] };
    if count == 0 {
        return vec![];
    }
    let mut ranked = STRIDE_SCAN_RANGE
        .filter_map(|stride| {
            let next = start + DRAW_HEADER_SIZE + count * stride;
            let rank = match dl.get(next) {
                Some(&b) if b & 0xf8 == op & 0xf8 => 0,
                Some(&b) if is_draw_opcode(b) => 1,
                Some(&b) if is_aux_command(b) => 2,
                // Draw ends exactly at the end of the list
                None if next == dl.len() => 2,
                _ => return None,
            };
            Some((rank, stride.abs_diff(implied), stride))
        })
        .collect::<Vec<_>>();
    ranked.sort_unstable();
    ranked.into_iter().map(|(_, _, stride)| stride).collect()
}

/// Adds or removes direct matrix index slots until the descriptor's vertex size is
/// `target`. Texture matrix slots are adjusted before the position matrix slot.
pub fn force_vertex_size(
    vcd: &VertexDescriptor,
    vat: &VertexAttributeTable,
    vat_index: usize,
    target: usize,
) -> Option<VertexDescriptor> {
    let preset = &vat[vat_index];
    let mut out = *vcd;
    let mut size = out.vertex_size(preset);
    let order = TEX_MTX_IDX.iter().rev().copied().chain(std::iter::once(Attr::PnMtxIdx));
    if size < target {
        for attr in order {
            if size == target {
                break;
            }
            if out.get(attr) == AttrType::None {
                out.set(attr, AttrType::Direct);
                size += 1;
            }
        }
    } else if size > target {
        for attr in order {
            if size == target {
                break;
            }
            if out.get(attr) == AttrType::Direct {
                out.set(attr, AttrType::None);
                size -= 1;
            }
        }
    }
    (size == target).then_some(out)
}

fn without_matrix_index(vcd: &VertexDescriptor) -> Option<VertexDescriptor> {
    if vcd.get(Attr::PnMtxIdx) != AttrType::Direct {
        return None;
    }
    let mut out = *vcd;
    out.set(Attr::PnMtxIdx, AttrType::None);
    Some(out)
}

/// Builds the ordered list of alternative decodings for a display list.
fn recovery_attempts(
    dl: &[u8],
    vcd: &VertexDescriptor,
    vat: &VertexAttributeTable,
) -> Vec<(Attempt, VertexDescriptor, usize)> {
    let mut attempts = vec![];
    if let Some((_, op, _)) = first_draw(dl) {
        let vat_index = (op & 7) as usize;
        let implied = vcd.vertex_size(&vat[vat_index]);
        for stride in rank_strides(dl, implied) {
            if stride == implied {
                continue;
            }
            match force_vertex_size(vcd, vat, vat_index, stride) {
                Some(forced) => attempts.push((Attempt::Stride(stride), forced, 0)),
                None => log::trace!("Stride {stride} unreachable from {vcd:?}"),
            }
        }
    }
    if dl.len() > LEGACY_PREAMBLE_SIZE {
        attempts.push((Attempt::SkipHeader, *vcd, LEGACY_PREAMBLE_SIZE));
    }
    if let Some(no_mtx) = without_matrix_index(vcd) {
        attempts.push((Attempt::NoMatrixIndex, no_mtx, 0));
        if dl.len() > LEGACY_PREAMBLE_SIZE {
            attempts.push((Attempt::NoMatrixIndexSkipHeader, no_mtx, LEGACY_PREAMBLE_SIZE));
        }
    }
    attempts
}

fn try_build(
    dl: &[u8],
    vcd: &VertexDescriptor,
    vat: &VertexAttributeTable,
    arrays: &VertexArrays,
    matrices: &[Option<u8>],
) -> Result<Geometry> {
    build_geometry(dl, vcd, vat, arrays, matrices)
}

/// Decodes a display list, falling back to the recovery attempts when the
/// descriptor's decoding fails. Returns `None` when every attempt fails.
pub fn decode_display_list(
    dl: &[u8],
    vcd: &VertexDescriptor,
    vat: &VertexAttributeTable,
    arrays: &VertexArrays,
    matrices: &[Option<u8>],
) -> Option<DecodedList> {
    let err = match try_build(dl, vcd, vat, arrays, matrices) {
        Ok(geometry) => {
            return Some(DecodedList { geometry, vcd: *vcd, attempt: Attempt::Original, skipped: 0 })
        }
        Err(e) => e,
    };
    log::debug!("Display list decode failed ({err}), attempting recovery");
    for (attempt, candidate, skipped) in recovery_attempts(dl, vcd, vat) {
        match try_build(&dl[skipped..], &candidate, vat, arrays, matrices) {
            Ok(geometry) => {
                log::debug!("Recovered display list with {attempt:?}");
                return Some(DecodedList { geometry, vcd: candidate, attempt, skipped });
            }
            Err(e) => log::trace!("{attempt:?} failed: {e}"),
        }
    }
    log::warn!("Dropping display list of {:#x} bytes: {err}", dl.len());
    None
}
