use std::fmt;

use anyhow::{bail, ensure, Result};
use zerocopy::{BigEndian, ByteOrder};

use crate::{
    format::vat::{AttrFormat, CompCnt, CompType, VatPreset, VertexAttributeTable},
    util::read::{read_u16, read_u32, read_u8, slice_at},
};

/// GX vertex attributes, in the order they appear within a vertex.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(usize)]
pub enum Attr {
    PnMtxIdx,
    Tex0MtxIdx,
    Tex1MtxIdx,
    Tex2MtxIdx,
    Tex3MtxIdx,
    Tex4MtxIdx,
    Tex5MtxIdx,
    Tex6MtxIdx,
    Tex7MtxIdx,
    Pos,
    Nrm,
    Clr0,
    Clr1,
    Tex0,
    Tex1,
    Tex2,
    Tex3,
    Tex4,
    Tex5,
    Tex6,
    Tex7,
}

pub const ATTR_COUNT: usize = 21;
pub const MAX_TEX_COORDS: usize = 8;

pub const TEX_MTX_IDX: [Attr; 8] = [
    Attr::Tex0MtxIdx,
    Attr::Tex1MtxIdx,
    Attr::Tex2MtxIdx,
    Attr::Tex3MtxIdx,
    Attr::Tex4MtxIdx,
    Attr::Tex5MtxIdx,
    Attr::Tex6MtxIdx,
    Attr::Tex7MtxIdx,
];

pub const TEX: [Attr; MAX_TEX_COORDS] = [
    Attr::Tex0,
    Attr::Tex1,
    Attr::Tex2,
    Attr::Tex3,
    Attr::Tex4,
    Attr::Tex5,
    Attr::Tex6,
    Attr::Tex7,
];

const ALL_ATTRS: [Attr; ATTR_COUNT] = [
    Attr::PnMtxIdx,
    Attr::Tex0MtxIdx,
    Attr::Tex1MtxIdx,
    Attr::Tex2MtxIdx,
    Attr::Tex3MtxIdx,
    Attr::Tex4MtxIdx,
    Attr::Tex5MtxIdx,
    Attr::Tex6MtxIdx,
    Attr::Tex7MtxIdx,
    Attr::Pos,
    Attr::Nrm,
    Attr::Clr0,
    Attr::Clr1,
    Attr::Tex0,
    Attr::Tex1,
    Attr::Tex2,
    Attr::Tex3,
    Attr::Tex4,
    Attr::Tex5,
    Attr::Tex6,
    Attr::Tex7,
];

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum AttrType {
    #[default]
    None,
    Direct,
    Index8,
    Index16,
}

impl AttrType {
    /// Index width selected by a single descriptor bit.
    #[inline]
    pub fn index(wide: bool) -> AttrType { if wide { AttrType::Index16 } else { AttrType::Index8 } }
}

/// Vertex descriptor (VCD): how each attribute is encoded in a display list.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct VertexDescriptor {
    attrs: [AttrType; ATTR_COUNT],
}

impl VertexDescriptor {
    #[inline]
    pub fn get(&self, attr: Attr) -> AttrType { self.attrs[attr as usize] }

    #[inline]
    pub fn set(&mut self, attr: Attr, ty: AttrType) { self.attrs[attr as usize] = ty; }

    #[inline]
    pub fn has(&self, attr: Attr) -> bool { self.get(attr) != AttrType::None }

    /// Bytes of index data per vertex.
    pub fn index_bytes(&self) -> usize {
        self.attrs
            .iter()
            .map(|ty| match ty {
                AttrType::Index8 => 1,
                AttrType::Index16 => 2,
                _ => 0,
            })
            .sum()
    }

    /// Bytes of inline (direct) data per vertex for the given preset.
    pub fn direct_bytes(&self, preset: &VatPreset) -> usize {
        ALL_ATTRS
            .iter()
            .filter(|&&attr| self.get(attr) == AttrType::Direct)
            .map(|&attr| match attr_format(preset, attr) {
                Some(format) => format.element_size(),
                None => 1,
            })
            .sum()
    }

    pub fn vertex_size(&self, preset: &VatPreset) -> usize {
        self.index_bytes() + self.direct_bytes(preset)
    }

    /// Number of direct texture matrix index slots.
    pub fn tex_mtx_slots(&self) -> usize {
        TEX_MTX_IDX.iter().filter(|&&attr| self.get(attr) == AttrType::Direct).count()
    }
}

impl fmt::Debug for VertexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for attr in ALL_ATTRS {
            if self.has(attr) {
                map.entry(&attr, &self.get(attr));
            }
        }
        map.finish()
    }
}

fn attr_format(preset: &VatPreset, attr: Attr) -> Option<&AttrFormat> {
    match attr {
        Attr::Pos => Some(&preset.pos),
        Attr::Nrm => Some(&preset.nrm),
        Attr::Clr0 | Attr::Clr1 => Some(&preset.clr),
        _ => TEX.iter().position(|&t| t == attr).map(|i| &preset.tex[i]),
    }
}

/// Draw primitive, from the high five bits of a draw command.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Primitive {
    Quads,
    Quads2,
    Triangles,
    TriangleStrip,
    TriangleFan,
    Lines,
    LineStrip,
    Points,
}

impl Primitive {
    pub fn from_opcode(op: u8) -> Option<Primitive> {
        Some(match op & 0xf8 {
            0x80 => Primitive::Quads,
            0x88 => Primitive::Quads2,
            0x90 => Primitive::Triangles,
            0x98 => Primitive::TriangleStrip,
            0xa0 => Primitive::TriangleFan,
            0xa8 => Primitive::Lines,
            0xb0 => Primitive::LineStrip,
            0xb8 => Primitive::Points,
            _ => return None,
        })
    }
}

pub const GX_NOP: u8 = 0x00;
pub const GX_LOAD_CP_REG: u8 = 0x08;
pub const GX_LOAD_XF_REG: u8 = 0x10;
pub const GX_LOAD_INDX_A: u8 = 0x20;
pub const GX_LOAD_INDX_B: u8 = 0x28;
pub const GX_LOAD_INDX_C: u8 = 0x30;
pub const GX_LOAD_INDX_D: u8 = 0x38;
pub const GX_CALL_DL: u8 = 0x40;
pub const GX_INVAL_VTX_CACHE: u8 = 0x48;

/// Size of a draw command header: opcode and big-endian vertex count.
pub const DRAW_HEADER_SIZE: usize = 3;

#[inline]
pub fn is_draw_opcode(op: u8) -> bool { Primitive::from_opcode(op).is_some() }

/// Non-draw command bytes that may legitimately follow a draw.
#[inline]
pub fn is_aux_command(op: u8) -> bool {
    matches!(
        op,
        GX_NOP
            | GX_LOAD_CP_REG
            | GX_LOAD_XF_REG
            | GX_LOAD_INDX_A
            | GX_LOAD_INDX_B
            | GX_LOAD_INDX_C
            | GX_LOAD_INDX_D
            | GX_CALL_DL
            | GX_INVAL_VTX_CACHE
    )
}

/// Size of a non-draw command at `pos`, or `None` for unknown opcodes.
fn aux_command_size(dl: &[u8], pos: usize) -> Result<Option<usize>> {
    Ok(Some(match dl[pos] {
        GX_NOP | GX_INVAL_VTX_CACHE => 1,
        GX_LOAD_CP_REG => 6,
        GX_LOAD_XF_REG => {
            let header = read_u32::<BigEndian>(dl, pos + 1)?;
            5 + (((header >> 16) & 0xf) as usize + 1) * 4
        }
        GX_LOAD_INDX_A | GX_LOAD_INDX_B | GX_LOAD_INDX_C | GX_LOAD_INDX_D => 5,
        GX_CALL_DL => 9,
        _ => return Ok(None),
    }))
}

/// Locates the first draw command of a display list: (offset, opcode, vertex count).
pub fn first_draw(dl: &[u8]) -> Option<(usize, u8, usize)> {
    let mut pos = 0;
    while pos < dl.len() {
        let op = dl[pos];
        if is_draw_opcode(op) {
            let count = read_u16::<BigEndian>(dl, pos + 1).ok()?;
            return Some((pos, op, count as usize));
        }
        pos += aux_command_size(dl, pos).ok()??;
    }
    None
}

/// A view of one indexed vertex array.
#[derive(Copy, Clone, Debug, Default)]
pub struct ArrayView<'a> {
    pub data: &'a [u8],
    pub stride: usize,
    pub count: usize,
}

impl<'a> ArrayView<'a> {
    pub fn new(data: &'a [u8], stride: usize, count: usize) -> Self { Self { data, stride, count } }

    fn element(&self, index: usize, size: usize, attr: Attr) -> Result<&'a [u8]> {
        ensure!(
            index < self.count,
            "{attr:?} index {index} out of range ({} elements)",
            self.count
        );
        slice_at(self.data, index * self.stride, size)
    }
}

/// The model arrays indexed attributes refer to.
#[derive(Copy, Clone, Debug, Default)]
pub struct VertexArrays<'a> {
    pub positions: ArrayView<'a>,
    pub normals: ArrayView<'a>,
    pub colors: ArrayView<'a>,
    pub tex_coords: ArrayView<'a>,
}

impl<'a> VertexArrays<'a> {
    fn array(&self, attr: Attr) -> &ArrayView<'a> {
        match attr {
            Attr::Pos => &self.positions,
            Attr::Nrm => &self.normals,
            Attr::Clr0 | Attr::Clr1 => &self.colors,
            _ => &self.tex_coords,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 4],
    pub tex_coords: [[f32; 2]; MAX_TEX_COORDS],
    /// Position array index, for re-skinning
    pub pos_index: Option<u32>,
    /// Bone or blend index from the matrix table
    pub matrix: Option<u8>,
    pub tex_matrices: [Option<u8>; 8],
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            normal: [0.0; 3],
            color: [1.0; 4],
            tex_coords: [[0.0; 2]; MAX_TEX_COORDS],
            pos_index: None,
            matrix: None,
            tex_matrices: [None; 8],
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DrawCall {
    pub primitive: Primitive,
    pub vat: u8,
    pub first_vertex: usize,
    pub vertex_count: usize,
}

/// Decoded display list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Geometry {
    pub vertices: Vec<Vertex>,
    /// Triangle list over `vertices`
    pub indices: Vec<u32>,
    pub draws: Vec<DrawCall>,
}

impl Geometry {
    #[inline]
    pub fn vertex_count(&self) -> usize { self.vertices.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.vertices.is_empty() }
}

fn read_component(data: &[u8], offset: usize, comp_type: CompType, shift: u8) -> Result<f32> {
    let scale = 2f32.powi(-(shift as i32));
    Ok(match comp_type {
        CompType::U8 => read_u8(data, offset)? as f32 * scale,
        CompType::S8 => read_u8(data, offset)? as i8 as f32 * scale,
        CompType::U16 => read_u16::<BigEndian>(data, offset)? as f32 * scale,
        CompType::S16 => read_u16::<BigEndian>(data, offset)? as i16 as f32 * scale,
        CompType::F32 => BigEndian::read_f32(slice_at(data, offset, 4)?),
        other => bail!("Color component type {other:?} used for a numeric attribute"),
    })
}

fn read_components<const N: usize>(
    data: &[u8],
    format: &AttrFormat,
    shift: u8,
) -> Result<[f32; N]> {
    let size = format.comp_type.byte_size();
    let mut out = [0f32; N];
    for (i, v) in out.iter_mut().enumerate().take(format.count.count()) {
        *v = read_component(data, i * size, format.comp_type, shift)?;
    }
    Ok(out)
}

fn decode_normal(data: &[u8], format: &AttrFormat) -> Result<[f32; 3]> {
    // Normal quantization is fixed by hardware
    let shift = match format.comp_type {
        CompType::U8 | CompType::S8 => 6,
        CompType::U16 | CompType::S16 => 14,
        _ => 0,
    };
    let fmt = AttrFormat { count: CompCnt::NrmXyz, ..*format };
    read_components::<3>(data, &fmt, shift)
}

fn decode_color(data: &[u8], format: &AttrFormat) -> Result<[f32; 4]> {
    let b = slice_at(data, 0, format.comp_type.byte_size())?;
    let n = |v: u32, max: u32| v as f32 / max as f32;
    Ok(match format.comp_type {
        CompType::Rgb565 => {
            let v = BigEndian::read_u16(b) as u32;
            [n(v >> 11, 31), n((v >> 5) & 0x3f, 63), n(v & 0x1f, 31), 1.0]
        }
        CompType::Rgb8 | CompType::Rgbx8 => {
            [n(b[0] as u32, 255), n(b[1] as u32, 255), n(b[2] as u32, 255), 1.0]
        }
        CompType::Rgba4 => {
            let v = BigEndian::read_u16(b) as u32;
            [n(v >> 12, 15), n((v >> 8) & 0xf, 15), n((v >> 4) & 0xf, 15), n(v & 0xf, 15)]
        }
        CompType::Rgba6 => {
            let v = (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
            [n(v >> 18, 63), n((v >> 12) & 0x3f, 63), n((v >> 6) & 0x3f, 63), n(v & 0x3f, 63)]
        }
        CompType::Rgba8 => {
            [n(b[0] as u32, 255), n(b[1] as u32, 255), n(b[2] as u32, 255), n(b[3] as u32, 255)]
        }
        other => bail!("Numeric component type {other:?} used for color"),
    })
}

/// Attribute element bytes: inline for direct attributes, from the array otherwise.
fn attr_data<'a>(
    dl: &'a [u8],
    pos: &mut usize,
    ty: AttrType,
    attr: Attr,
    size: usize,
    arrays: &VertexArrays<'a>,
) -> Result<Option<(&'a [u8], Option<u32>)>> {
    let index = match ty {
        AttrType::None => return Ok(None),
        AttrType::Direct => {
            let data = slice_at(dl, *pos, size)?;
            *pos += size;
            return Ok(Some((data, None)));
        }
        AttrType::Index8 => {
            let v = read_u8(dl, *pos)? as usize;
            *pos += 1;
            v
        }
        AttrType::Index16 => {
            let v = read_u16::<BigEndian>(dl, *pos)? as usize;
            *pos += 2;
            v
        }
    };
    Ok(Some((arrays.array(attr).element(index, size, attr)?, Some(index as u32))))
}

fn read_vertex<'a>(
    dl: &'a [u8],
    pos: &mut usize,
    vcd: &VertexDescriptor,
    preset: &VatPreset,
    arrays: &VertexArrays<'a>,
    matrices: &[Option<u8>],
) -> Result<Vertex> {
    let mut vertex = Vertex::default();
    if vcd.get(Attr::PnMtxIdx) == AttrType::Direct {
        let slot = read_u8(dl, *pos)? as usize / 3;
        *pos += 1;
        vertex.matrix = matrices.get(slot).copied().flatten();
    }
    for (i, &attr) in TEX_MTX_IDX.iter().enumerate() {
        if vcd.get(attr) == AttrType::Direct {
            vertex.tex_matrices[i] = Some(read_u8(dl, *pos)?);
            *pos += 1;
        }
    }
    if let Some((data, index)) =
        attr_data(dl, pos, vcd.get(Attr::Pos), Attr::Pos, preset.pos.element_size(), arrays)?
    {
        vertex.position = read_components::<3>(data, &preset.pos, preset.pos.shift)?;
        vertex.pos_index = index;
    }
    if let Some((data, _)) =
        attr_data(dl, pos, vcd.get(Attr::Nrm), Attr::Nrm, preset.nrm.element_size(), arrays)?
    {
        vertex.normal = decode_normal(data, &preset.nrm)?;
    }
    for attr in [Attr::Clr0, Attr::Clr1] {
        if let Some((data, _)) =
            attr_data(dl, pos, vcd.get(attr), attr, preset.clr.element_size(), arrays)?
        {
            if attr == Attr::Clr0 {
                vertex.color = decode_color(data, &preset.clr)?;
            }
        }
    }
    for (i, &attr) in TEX.iter().enumerate() {
        let format = &preset.tex[i];
        if let Some((data, _)) =
            attr_data(dl, pos, vcd.get(attr), attr, format.element_size(), arrays)?
        {
            vertex.tex_coords[i] = read_components::<2>(data, format, format.shift)?;
        }
    }
    Ok(vertex)
}

fn triangulate(primitive: Primitive, first: u32, count: u32, out: &mut Vec<u32>) {
    match primitive {
        Primitive::Quads | Primitive::Quads2 => {
            for q in (0..count / 4).map(|i| first + i * 4) {
                out.extend_from_slice(&[q, q + 1, q + 2, q, q + 2, q + 3]);
            }
        }
        Primitive::Triangles => out.extend(first..first + count / 3 * 3),
        Primitive::TriangleStrip => {
            for i in 2..count {
                let v = first + i;
                if i % 2 == 0 {
                    out.extend_from_slice(&[v - 2, v - 1, v]);
                } else {
                    out.extend_from_slice(&[v - 1, v - 2, v]);
                }
            }
        }
        Primitive::TriangleFan => {
            for i in 2..count {
                out.extend_from_slice(&[first, first + i - 1, first + i]);
            }
        }
        Primitive::Lines | Primitive::LineStrip | Primitive::Points => {}
    }
}

/// Decodes a GX display list into triangles.
///
/// Fails on unknown commands, truncated draws and out-of-range array indices; the
/// caller decides whether to retry with a different descriptor.
pub fn build_geometry(
    dl: &[u8],
    vcd: &VertexDescriptor,
    vat: &VertexAttributeTable,
    arrays: &VertexArrays,
    matrices: &[Option<u8>],
) -> Result<Geometry> {
    let mut geometry = Geometry::default();
    let mut pos = 0usize;
    while pos < dl.len() {
        let op = dl[pos];
        let Some(primitive) = Primitive::from_opcode(op) else {
            match aux_command_size(dl, pos)? {
                Some(size) => {
                    pos += size;
                    continue;
                }
                None => bail!("Unknown display list command {op:#04x} at {pos:#x}"),
            }
        };
        let vat_idx = op & 7;
        let preset = &vat[vat_idx as usize];
        let count = read_u16::<BigEndian>(dl, pos + 1)? as usize;
        let stride = vcd.vertex_size(preset);
        ensure!(
            pos + DRAW_HEADER_SIZE + count * stride <= dl.len(),
            "Draw at {pos:#x} needs {:#x} bytes of vertex data, {:#x} available",
            count * stride,
            dl.len() - (pos + DRAW_HEADER_SIZE)
        );
        pos += DRAW_HEADER_SIZE;
        let first_vertex = geometry.vertices.len();
        for _ in 0..count {
            let vertex = read_vertex(dl, &mut pos, vcd, preset, arrays, matrices)?;
            geometry.vertices.push(vertex);
        }
        triangulate(primitive, first_vertex as u32, count as u32, &mut geometry.indices);
        geometry.draws.push(DrawCall {
            primitive,
            vat: vat_idx,
            first_vertex,
            vertex_count: count,
        });
    }
    Ok(geometry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::vat::generate;

    fn arrays<'a>(pos: &'a [u8], clr: &'a [u8]) -> VertexArrays<'a> {
        VertexArrays {
            positions: ArrayView::new(pos, 6, pos.len() / 6),
            colors: ArrayView::new(clr, 2, clr.len() / 2),
            ..Default::default()
        }
    }

    fn pos_clr_vcd() -> VertexDescriptor {
        let mut vcd = VertexDescriptor::default();
        vcd.set(Attr::Pos, AttrType::Index8);
        vcd.set(Attr::Clr0, AttrType::Index8);
        vcd
    }

    // Four S16 positions: (i, 2i, -i) for i in 0..4
    fn positions() -> Vec<u8> {
        (0..4i16).flat_map(|i| [i, 2 * i, -i]).flat_map(|v| v.to_be_bytes()).collect()
    }

    #[test]
    fn descriptor_sizes() {
        let vat = generate(false, false);
        let mut vcd = pos_clr_vcd();
        assert_eq!(vcd.index_bytes(), 2);
        vcd.set(Attr::Pos, AttrType::Index16);
        vcd.set(Attr::PnMtxIdx, AttrType::Direct);
        vcd.set(Attr::Tex7MtxIdx, AttrType::Direct);
        assert_eq!(vcd.index_bytes(), 3);
        assert_eq!(vcd.direct_bytes(&vat[5]), 2);
        assert_eq!(vcd.vertex_size(&vat[5]), 5);
        assert_eq!(vcd.tex_mtx_slots(), 1);
        vcd.set(Attr::Clr0, AttrType::Direct);
        assert_eq!(vcd.direct_bytes(&vat[0]), 6);
    }

    #[test]
    fn decodes_triangles_and_strips() {
        let vat = generate(false, false);
        let pos = positions();
        let clr = [0xf0, 0x0f, 0xff, 0xff];
        let dl = [
            0x95, 0x00, 0x03, 0, 0, 1, 1, 2, 0, // triangles, vat 5
            0x9d, 0x00, 0x04, 0, 0, 1, 0, 2, 0, 3, 1, // strip, vat 5
            0x00, 0x00, 0x00, // padding
        ];
        let g = build_geometry(&dl, &pos_clr_vcd(), &vat, &arrays(&pos, &clr), &[]).unwrap();
        assert_eq!(g.vertex_count(), 7);
        assert_eq!(g.draws.len(), 2);
        assert_eq!(g.indices, vec![0, 1, 2, 3, 4, 5, 5, 4, 6]);
        // vat 5 positions use a shift of 3
        assert_eq!(g.vertices[1].position, [1.0 / 8.0, 2.0 / 8.0, -1.0 / 8.0]);
        assert_eq!(g.vertices[0].color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(g.vertices[1].pos_index, Some(1));
    }

    #[test]
    fn quads_and_fans() {
        let mut out = vec![];
        triangulate(Primitive::Quads, 0, 4, &mut out);
        assert_eq!(out, vec![0, 1, 2, 0, 2, 3]);
        out.clear();
        triangulate(Primitive::TriangleFan, 10, 4, &mut out);
        assert_eq!(out, vec![10, 11, 12, 10, 12, 13]);
        out.clear();
        triangulate(Primitive::Points, 0, 4, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn out_of_range_index_fails() {
        let vat = generate(false, false);
        let pos = positions();
        let clr = [0u8; 4];
        let dl = [0x90, 0x00, 0x01, 7, 0];
        let err = build_geometry(&dl, &pos_clr_vcd(), &vat, &arrays(&pos, &clr), &[]).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn truncated_draw_fails() {
        let vat = generate(false, false);
        let pos = positions();
        let clr = [0u8; 4];
        let dl = [0x90, 0x00, 0x03, 0, 0, 1, 1];
        assert!(build_geometry(&dl, &pos_clr_vcd(), &vat, &arrays(&pos, &clr), &[]).is_err());
        let dl = [0x90, 0x00, 0x01, 0, 0, 0x61];
        assert!(build_geometry(&dl, &pos_clr_vcd(), &vat, &arrays(&pos, &clr), &[]).is_err());
    }

    #[test]
    fn skips_aux_commands_and_resolves_matrices() {
        let vat = generate(false, false);
        let pos = positions();
        let clr = [0u8; 4];
        let mut vcd = pos_clr_vcd();
        vcd.set(Attr::PnMtxIdx, AttrType::Direct);
        let dl = [
            0x08, 0x50, 0, 0, 0, 0, // LOAD_CP_REG
            0x20, 0, 0, 0, 0, // LOAD_INDX_A
            0x10, 0x00, 0x00, 0x10, 0x00, 0, 0, 0, 0, // LOAD_XF_REG, one word
            0x90, 0x00, 0x03, 3, 0, 0, 0, 1, 0, 6, 2, 0,
        ];
        let matrices = [Some(4), Some(9)];
        let g = build_geometry(&dl, &vcd, &vat, &arrays(&pos, &clr), &matrices).unwrap();
        assert_eq!(g.vertex_count(), 3);
        assert_eq!(g.vertices[0].matrix, Some(9));
        assert_eq!(g.vertices[1].matrix, Some(4));
        assert_eq!(g.vertices[2].matrix, None);
    }

    #[test]
    fn finds_first_draw() {
        let dl = [0x00, 0x48, 0x98, 0x00, 0x05];
        assert_eq!(first_draw(&dl), Some((2, 0x98, 5)));
        assert_eq!(first_draw(&[0x00, 0x00]), None);
        assert_eq!(first_draw(&[0x61]), None);
    }
}
