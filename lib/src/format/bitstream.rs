//! Command stream interpreter.
//!
//! Each draw pass has a bit-packed stream of 4-bit opcodes:
//!
//! | Opcode | Command     | Operands                                   |
//! |--------|-------------|--------------------------------------------|
//! | 1      | SetShader   | 6-bit shader index                         |
//! | 2      | CallDL      | display-list index (6 or 8 bits)           |
//! | 3      | SetVCD      | one index-width bit per present attribute  |
//! | 4      | SetMatrices | 4-bit count, then an 8-bit bone per slot   |
//! | 5      | End         |                                            |
//!
//! Anything else ends the stream: legacy assets carry garbage after their last
//! command.

use std::rc::Rc;

use anyhow::Result;

use crate::{
    format::{
        display_list::{DisplayListInfo, DisplayListTable},
        gx::{Attr, AttrType, Geometry, VertexArrays, VertexDescriptor, TEX, TEX_MTX_IDX},
        recovery::{decode_display_list, Attempt},
        shader::{ShaderAttrFlags, ShaderDescriptor},
        vat::VertexAttributeTable,
        version::FormatDescriptor,
    },
    util::bits::BitReader,
};

pub const OP_SET_SHADER: u32 = 1;
pub const OP_CALL_DL: u32 = 2;
pub const OP_SET_VCD: u32 = 3;
pub const OP_SET_MATRICES: u32 = 4;
pub const OP_END: u32 = 5;

const OPCODE_BITS: u32 = 4;
const SHADER_INDEX_BITS: u32 = 6;
const MATRIX_COUNT_BITS: u32 = 4;
const MATRIX_INDEX_BITS: u32 = 8;
/// Direct texture matrix slots reserved for probe and NBT lookups.
const MAX_PROBE_TEX_MTX_SLOTS: usize = 3;

/// Index widths read by SetVCD. `None` means the attribute's bit isn't in the stream.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct VcdBits {
    pub pos16: bool,
    pub nrm16: Option<bool>,
    pub clr16: Option<bool>,
    pub tex16: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    SetShader(usize),
    CallDisplayList(usize),
    SetVertexDescriptor(VcdBits),
    SetMatrices(Vec<u8>),
    End,
}

/// Stream framing and descriptor rules for one model.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StreamParams {
    pub dl_index_bits: u32,
    pub align_after_vcd: bool,
    pub has_normals: bool,
    pub is_map_block: bool,
    /// Per-vertex matrix indices (object model with two or more joints)
    pub skinned: bool,
    /// Map geometry with a non-empty color array
    pub has_color_palette: bool,
}

impl StreamParams {
    pub fn new(desc: &FormatDescriptor, skinned: bool, color_count: usize) -> Self {
        Self {
            dl_index_bits: desc.dl_index_bits,
            align_after_vcd: desc.align_after_vcd,
            has_normals: desc.has_normals,
            is_map_block: desc.is_map_block,
            skinned,
            has_color_palette: desc.is_map_block && color_count > 0,
        }
    }
}

fn read_vcd_bits(
    reader: &mut BitReader,
    params: &StreamParams,
    shader: &ShaderDescriptor,
) -> Result<VcdBits> {
    let pos16 = reader.read_bit()?;
    let nrm16 = if params.has_normals && shader.attr_flags.contains(ShaderAttrFlags::NRM) {
        Some(reader.read_bit()?)
    } else {
        None
    };
    // Palette-bearing map blocks always encode the color bit
    let clr16 = if shader.attr_flags.contains(ShaderAttrFlags::CLR) || params.has_color_palette {
        Some(reader.read_bit()?)
    } else {
        None
    };
    let tex16 = reader.read_bit()?;
    if params.align_after_vcd {
        reader.align_to_byte();
    }
    Ok(VcdBits { pos16, nrm16, clr16, tex16 })
}

/// Reads one command. Unknown opcodes decode as [`Command::End`].
pub fn read_command(
    reader: &mut BitReader,
    params: &StreamParams,
    shader: &ShaderDescriptor,
) -> Result<Command> {
    let at = reader.position();
    Ok(match reader.read_bits(OPCODE_BITS)? {
        OP_SET_SHADER => Command::SetShader(reader.read_bits(SHADER_INDEX_BITS)? as usize),
        OP_CALL_DL => Command::CallDisplayList(reader.read_bits(params.dl_index_bits)? as usize),
        OP_SET_VCD => Command::SetVertexDescriptor(read_vcd_bits(reader, params, shader)?),
        OP_SET_MATRICES => {
            let count = reader.read_bits(MATRIX_COUNT_BITS)?;
            let mut bones = Vec::with_capacity(count as usize);
            for _ in 0..count {
                bones.push(reader.read_bits(MATRIX_INDEX_BITS)? as u8);
            }
            Command::SetMatrices(bones)
        }
        OP_END => Command::End,
        op => {
            log::debug!("Unknown opcode {op} at bit {at:#x}, ending stream");
            Command::End
        }
    })
}

/// Builds the vertex descriptor for a draw from the last SetVCD and the active shader.
pub fn assemble_vcd(
    bits: &VcdBits,
    shader: &ShaderDescriptor,
    params: &StreamParams,
) -> VertexDescriptor {
    let mut vcd = VertexDescriptor::default();
    if params.skinned {
        vcd.set(Attr::PnMtxIdx, AttrType::Direct);
        let probe_slots = shader.probe_tex_mtx_slots().min(MAX_PROBE_TEX_MTX_SLOTS);
        for &attr in &TEX_MTX_IDX[..probe_slots] {
            vcd.set(attr, AttrType::Direct);
        }
        // Object-space texture matrices pack down from the last slot
        for &attr in TEX_MTX_IDX.iter().rev().take(shader.tex_mtx_count as usize) {
            vcd.set(attr, AttrType::Direct);
        }
    }
    vcd.set(Attr::Pos, AttrType::index(bits.pos16));
    if let Some(wide) = bits.nrm16 {
        vcd.set(Attr::Nrm, AttrType::index(wide));
    }
    if let Some(wide) = bits.clr16 {
        vcd.set(Attr::Clr0, AttrType::index(wide));
    }
    for &attr in TEX.iter().take(shader.layers.len()) {
        vcd.set(attr, AttrType::index(bits.tex16));
    }
    vcd
}

/// One decoded CallDL.
#[derive(Clone, Debug)]
pub struct DrawStep {
    pub geometry: Rc<Geometry>,
    pub shader: usize,
    pub display_list: usize,
    pub vcd: VertexDescriptor,
    pub attempt: Attempt,
}

#[derive(Clone, Debug)]
pub struct FurStep {
    pub step: DrawStep,
    pub layers: u32,
}

/// Draw steps collected from one pass.
#[derive(Clone, Debug, Default)]
pub struct PassOutput {
    pub shapes: Vec<DrawStep>,
    pub water: Vec<DrawStep>,
    pub fur: Vec<FurStep>,
}

impl PassOutput {
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty() && self.water.is_empty() && self.fur.is_empty()
    }
}

/// Mutable state of one stream walk.
#[derive(Clone, Debug, Default)]
pub struct DecodeContext {
    pub shader: Option<usize>,
    pub vcd: Option<VcdBits>,
    /// Matrix slot to bone index, from the last SetMatrices
    pub matrices: Vec<Option<u8>>,
    pub output: PassOutput,
}

/// Walks command streams against one model's tables.
pub struct Interpreter<'a> {
    pub params: StreamParams,
    pub data: &'a [u8],
    pub shaders: &'a [ShaderDescriptor],
    pub display_lists: &'a DisplayListTable,
    pub vat: &'a VertexAttributeTable,
    pub arrays: VertexArrays<'a>,
    /// Pass 0 stream, which holds the fur and water variants of display lists
    pub special_stream: &'a [u8],
    no_shader: ShaderDescriptor,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        params: StreamParams,
        data: &'a [u8],
        shaders: &'a [ShaderDescriptor],
        display_lists: &'a DisplayListTable,
        vat: &'a VertexAttributeTable,
        arrays: VertexArrays<'a>,
        special_stream: &'a [u8],
    ) -> Self {
        Self {
            params,
            data,
            shaders,
            display_lists,
            vat,
            arrays,
            special_stream,
            no_shader: ShaderDescriptor::default(),
        }
    }

    fn shader(&self, index: Option<usize>) -> &ShaderDescriptor {
        index.and_then(|i| self.shaders.get(i)).unwrap_or(&self.no_shader)
    }

    fn select_shader(&self, index: usize) -> Option<usize> {
        if index < self.shaders.len() {
            Some(index)
        } else {
            log::warn!("SetShader {index} out of range ({} shaders)", self.shaders.len());
            None
        }
    }

    fn matrix_table(&self, bones: &[u8]) -> Option<Vec<Option<u8>>> {
        // Map geometry is static; the bits are still consumed
        (!self.params.is_map_block).then(|| bones.iter().map(|&b| Some(b)).collect())
    }

    /// Interprets one pass. Never fails: a stream that runs out ends the pass.
    pub fn run(&self, stream: &[u8], pass: usize, water_pass: bool) -> PassOutput {
        let mut ctx = DecodeContext::default();
        let mut reader = BitReader::new(stream);
        loop {
            let command = match read_command(&mut reader, &self.params, self.shader(ctx.shader)) {
                Ok(command) => command,
                Err(e) => {
                    log::debug!("Pass {pass} stream ended without End: {e}");
                    break;
                }
            };
            log::trace!("Pass {pass} @{:#x}: {command:?}", reader.position());
            match command {
                Command::SetShader(index) => ctx.shader = self.select_shader(index),
                Command::SetVertexDescriptor(bits) => ctx.vcd = Some(bits),
                Command::SetMatrices(bones) => {
                    if let Some(table) = self.matrix_table(&bones) {
                        ctx.matrices = table;
                    }
                }
                Command::CallDisplayList(index) => {
                    self.call_display_list(&mut ctx, pass, water_pass, index)
                }
                Command::End => break,
            }
        }
        ctx.output
    }

    fn call_display_list(
        &self,
        ctx: &mut DecodeContext,
        pass: usize,
        water_pass: bool,
        index: usize,
    ) {
        let (Some(shader_index), Some(bits)) = (ctx.shader, ctx.vcd) else {
            log::warn!("Pass {pass}: CallDL {index} before SetShader/SetVCD, skipping");
            return;
        };
        let Some(info) = self.display_lists.get(index).filter(|info| !info.is_sentinel()) else {
            log::debug!("Pass {pass}: CallDL {index} references an empty display list");
            return;
        };
        let shader = self.shader(Some(shader_index));
        let vcd = assemble_vcd(&bits, shader, &self.params);

        if water_pass || shader.is_water() {
            let special = self.run_special(info, &ctx.matrices, ShaderDescriptor::is_water);
            if special.is_empty() {
                ctx.output.water.extend(self.build(index, info, &vcd, shader_index, &ctx.matrices));
            } else {
                ctx.output.water.extend(special);
            }
            return;
        }

        ctx.output.shapes.extend(self.build(index, info, &vcd, shader_index, &ctx.matrices));
        if pass == 0 && shader.is_fur() {
            for step in self.run_special(info, &ctx.matrices, ShaderDescriptor::is_fur) {
                let layers = self.shader(Some(step.shader)).fur_layers().unwrap_or_default();
                ctx.output.fur.push(FurStep { step, layers });
            }
        }
    }

    fn build(
        &self,
        index: usize,
        info: &DisplayListInfo,
        vcd: &VertexDescriptor,
        shader: usize,
        matrices: &[Option<u8>],
    ) -> Option<DrawStep> {
        let dl = info.data(self.data);
        let decoded = decode_display_list(dl, vcd, self.vat, &self.arrays, matrices)?;
        if decoded.geometry.is_empty() {
            return None;
        }
        Some(DrawStep {
            geometry: Rc::new(decoded.geometry),
            shader,
            display_list: index,
            vcd: decoded.vcd,
            attempt: decoded.attempt,
        })
    }

    /// Walks the special stream of a display list, decoding the draws whose shader
    /// passes `filter`. Special streams keep their own shader and descriptor state and
    /// never route further.
    fn run_special(
        &self,
        info: &DisplayListInfo,
        matrices: &[Option<u8>],
        filter: fn(&ShaderDescriptor) -> bool,
    ) -> Vec<DrawStep> {
        let Some(addr) = info.special_bit_addr else { return vec![] };
        let mut reader = BitReader::new(self.special_stream);
        if let Err(e) = reader.seek_bit(addr) {
            log::warn!("Special stream address invalid: {e}");
            return vec![];
        }
        let mut shader_index = None;
        let mut bits = None;
        let mut matrices = matrices.to_vec();
        let mut steps = vec![];
        loop {
            let command = match read_command(&mut reader, &self.params, self.shader(shader_index)) {
                Ok(command) => command,
                Err(e) => {
                    log::debug!("Special stream at bit {addr:#x} ended without End: {e}");
                    break;
                }
            };
            match command {
                Command::SetShader(index) => shader_index = self.select_shader(index),
                Command::SetVertexDescriptor(b) => bits = Some(b),
                Command::SetMatrices(bones) => {
                    if let Some(table) = self.matrix_table(&bones) {
                        matrices = table;
                    }
                }
                Command::CallDisplayList(index) => {
                    let (Some(si), Some(b)) = (shader_index, bits) else { continue };
                    let shader = self.shader(Some(si));
                    if !filter(shader) {
                        continue;
                    }
                    let info = self.display_lists.get(index).filter(|i| !i.is_sentinel());
                    let Some(info) = info else { continue };
                    let vcd = assemble_vcd(&b, shader, &self.params);
                    steps.extend(self.build(index, info, &vcd, si, &matrices));
                }
                Command::End => break,
            }
        }
        steps
    }
}
