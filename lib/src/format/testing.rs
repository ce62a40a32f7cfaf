//! Synthetic model files for unit tests.

use std::io::Cursor;

use binrw::BinWriterExt;
use zerocopy::{BigEndian, ByteOrder};

use crate::{
    format::{
        bitstream::{OP_CALL_DL, OP_END, OP_SET_MATRICES, OP_SET_SHADER, OP_SET_VCD},
        display_list::DisplayListInfo,
        material::{MaterialFactory, MaterialKind, TextureResolver},
        shader::{AncientLayerRecord, BlendMode, LayerRecord, ShaderDescriptor, NO_SCROLL},
        skin::JointRecord,
        version::{
            lookup, CountWidth, FormatDescriptor, ModelVersion, ShaderFamily, ShaderLayout,
            TableField,
        },
        CAABoxS16,
    },
    util::bits::BitWriter,
};

pub struct ShaderRecordBuilder {
    layout: ShaderLayout,
    record: Vec<u8>,
    layers: usize,
}

impl ShaderRecordBuilder {
    pub fn new(layout: ShaderLayout) -> Self {
        let mut record = vec![0u8; layout.size];
        for offset in [layout.nbt_tex, layout.fur_region_tex].into_iter().flatten() {
            BigEndian::write_u32(&mut record[offset..], u32::MAX);
        }
        Self { layout, record, layers: 0 }
    }

    pub fn layer(mut self, tex_index: u32, blend: BlendMode, scroll_slot: Option<u8>) -> Self {
        let offset = self.layout.layers + self.layers * self.layout.layer_size;
        let scroll_slot = scroll_slot.unwrap_or(NO_SCROLL);
        if self.layout.family == ShaderFamily::Ancient {
            let record =
                AncientLayerRecord { tex_index: tex_index as u16, blend: blend.0, scroll_slot };
            Cursor::new(&mut self.record[offset..]).write_be(&record).unwrap();
        } else {
            let record = LayerRecord { tex_index, blend: blend.0, scroll_slot };
            Cursor::new(&mut self.record[offset..]).write_be(&record).unwrap();
        }
        self.layers += 1;
        self.record[self.layout.layer_count] = self.layers as u8;
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        BigEndian::write_u32(&mut self.record[self.layout.flags..], flags);
        self
    }

    pub fn attr_flags(mut self, flags: u8) -> Self {
        self.record[self.layout.attr_flags] = flags;
        self
    }

    pub fn hemispheric_probe(mut self, tex_index: u32) -> Self {
        let Some(probes) = self.layout.probes else { return self };
        BigEndian::write_u32(&mut self.record[probes.hemispheric_enabled..], 1);
        BigEndian::write_u32(&mut self.record[probes.hemispheric_tex..], tex_index);
        self
    }

    pub fn nbt_tex(mut self, tex_index: u32) -> Self {
        if let Some(offset) = self.layout.nbt_tex {
            BigEndian::write_u32(&mut self.record[offset..], tex_index);
        }
        self
    }

    pub fn fur_region_tex(mut self, tex_index: u32) -> Self {
        if let Some(offset) = self.layout.fur_region_tex {
            BigEndian::write_u32(&mut self.record[offset..], tex_index);
        }
        self
    }

    pub fn build(self) -> Vec<u8> { self.record }
}

/// Writes the fields of `entry` that fit a table row of `record.len()` bytes.
pub fn write_dl_entry(record: &mut [u8], entry: &DisplayListInfo) {
    BigEndian::write_u32(&mut record[0..], entry.offset as u32);
    BigEndian::write_u16(&mut record[4..], entry.size as u16);
    if record.len() >= 0x12 {
        Cursor::new(&mut record[0x06..]).write_be(&entry.bbox.unwrap_or_default()).unwrap();
    }
    if record.len() >= 0x18 {
        BigEndian::write_u16(&mut record[0x14..], entry.special_bit_addr.unwrap_or(0) as u16);
    }
    if record.len() >= 0x1c {
        record[0x18] = entry.sort_layer.unwrap_or(0);
    }
}

/// Command stream writer mirroring the interpreter's encoding.
pub struct CommandWriter {
    bits: BitWriter,
    dl_index_bits: u32,
    align_after_vcd: bool,
}

impl CommandWriter {
    pub fn new(desc: &FormatDescriptor) -> Self {
        Self {
            bits: BitWriter::new(),
            dl_index_bits: desc.dl_index_bits,
            align_after_vcd: desc.align_after_vcd,
        }
    }

    pub fn position(&self) -> usize { self.bits.position() }

    pub fn set_shader(mut self, index: u32) -> Self {
        self.bits.write_bits(OP_SET_SHADER, 4);
        self.bits.write_bits(index, 6);
        self
    }

    pub fn call_dl(mut self, index: u32) -> Self {
        self.bits.write_bits(OP_CALL_DL, 4);
        self.bits.write_bits(index, self.dl_index_bits);
        self
    }

    /// Writes a descriptor; `None` leaves an attribute's bit out of the stream.
    pub fn set_vcd(
        mut self,
        pos16: bool,
        nrm16: Option<bool>,
        clr16: Option<bool>,
        tex16: bool,
    ) -> Self {
        self.bits.write_bits(OP_SET_VCD, 4);
        self.bits.write_bits(pos16 as u32, 1);
        if let Some(b) = nrm16 {
            self.bits.write_bits(b as u32, 1);
        }
        if let Some(b) = clr16 {
            self.bits.write_bits(b as u32, 1);
        }
        self.bits.write_bits(tex16 as u32, 1);
        if self.align_after_vcd {
            self.bits.align_to_byte();
        }
        self
    }

    pub fn set_matrices(mut self, bones: &[u8]) -> Self {
        self.bits.write_bits(OP_SET_MATRICES, 4);
        self.bits.write_bits(bones.len() as u32, 4);
        for &bone in bones {
            self.bits.write_bits(bone as u32, 8);
        }
        self
    }

    pub fn end(mut self) -> Self {
        self.bits.write_bits(OP_END, 4);
        self
    }

    pub fn raw(mut self, value: u32, n: u32) -> Self {
        self.bits.write_bits(value, n);
        self
    }

    pub fn finish(self) -> Vec<u8> { self.bits.finish() }
}

#[derive(Clone, Debug, Default)]
pub struct TestDisplayList {
    /// `None` writes a zero/zero row
    pub data: Option<Vec<u8>>,
    pub special_bit_addr: u16,
    pub bbox: CAABoxS16,
    pub sort_layer: u8,
}

impl TestDisplayList {
    pub fn new(data: Vec<u8>) -> Self { Self { data: Some(data), ..Default::default() } }

    pub fn sentinel() -> Self { Self::default() }

    pub fn special(mut self, bit_addr: usize) -> Self {
        self.special_bit_addr = bit_addr as u16;
        self
    }

    pub fn bbox(mut self, min: [i16; 3], max: [i16; 3]) -> Self {
        self.bbox = CAABoxS16 { min, max };
        self
    }
}

/// Lays out a model file for one revision, patching header fields as sections are added.
pub struct ModelBuilder {
    desc: FormatDescriptor,
    data: Vec<u8>,
    dl_stride: usize,
}

impl ModelBuilder {
    pub fn new(version: ModelVersion) -> Self {
        let desc = lookup(version);
        let data = vec![0u8; desc.header_size];
        let dl_stride = desc.display_lists.stride.unwrap_or(0x1c);
        Self { desc, data, dl_stride }
    }

    pub fn desc(&self) -> &FormatDescriptor { &self.desc }

    pub fn commands(&self) -> CommandWriter { CommandWriter::new(&self.desc) }

    pub fn dl_stride(mut self, stride: usize) -> Self {
        self.dl_stride = stride;
        self
    }

    /// Appends 4-byte aligned data, returning its offset.
    pub fn append(&mut self, bytes: &[u8]) -> usize { self.append_aligned(bytes, 4) }

    fn append_aligned(&mut self, bytes: &[u8], align: usize) -> usize {
        let offset = (self.data.len() + align - 1) & !(align - 1);
        self.data.resize(offset, 0);
        self.data.extend_from_slice(bytes);
        offset
    }

    fn set_table(&mut self, field: TableField, offset: usize, count: usize) {
        BigEndian::write_u32(&mut self.data[field.offset..], offset as u32);
        match field.count_width {
            CountWidth::U8 => self.data[field.count] = count as u8,
            CountWidth::U16 => BigEndian::write_u16(&mut self.data[field.count..], count as u16),
        }
    }

    pub fn header_u8(mut self, offset: usize, value: u8) -> Self {
        self.data[offset] = value;
        self
    }

    pub fn header_u32(mut self, offset: usize, value: u32) -> Self {
        BigEndian::write_u32(&mut self.data[offset..], value);
        self
    }

    pub fn header_f32(mut self, offset: usize, value: f32) -> Self {
        BigEndian::write_f32(&mut self.data[offset..], value);
        self
    }

    pub fn header_bytes(mut self, offset: usize, bytes: &[u8]) -> Self {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn textures(mut self, ids: &[u32]) -> Self {
        let bytes: Vec<u8> = ids.iter().flat_map(|id| id.to_be_bytes()).collect();
        let offset = self.append(&bytes);
        self.set_table(self.desc.textures, offset, ids.len());
        self
    }

    pub fn positions(mut self, positions: &[[i16; 3]]) -> Self {
        let bytes: Vec<u8> = positions.iter().flatten().flat_map(|v| v.to_be_bytes()).collect();
        let offset = self.append(&bytes);
        self.set_table(self.desc.positions, offset, positions.len());
        self
    }

    pub fn normals(mut self, raw: &[u8], count: usize) -> Self {
        let field = self.desc.normals.expect("revision has no normals");
        let offset = self.append(raw);
        self.set_table(field, offset, count);
        self
    }

    pub fn colors(mut self, colors: &[u16]) -> Self {
        let bytes: Vec<u8> = colors.iter().flat_map(|c| c.to_be_bytes()).collect();
        let offset = self.append(&bytes);
        self.set_table(self.desc.colors, offset, colors.len());
        self
    }

    pub fn tex_coords(mut self, coords: &[[i16; 2]]) -> Self {
        let bytes: Vec<u8> = coords.iter().flatten().flat_map(|v| v.to_be_bytes()).collect();
        let offset = self.append(&bytes);
        self.set_table(self.desc.tex_coords, offset, coords.len());
        self
    }

    pub fn shaders(mut self, records: &[Vec<u8>]) -> Self {
        let offset = self.append(&records.concat());
        self.set_table(self.desc.shaders, offset, records.len());
        self
    }

    pub fn joints(mut self, joints: &[(i8, u8)]) -> Self {
        let field = self.desc.joints.expect("revision has no joints");
        let mut out = Cursor::new(Vec::new());
        for (i, &(parent, index)) in joints.iter().enumerate() {
            let record = JointRecord {
                parent,
                index,
                bind_translation: [i as f32, 0.0, 0.0],
                rest_translation: [0.0; 3],
            };
            out.write_be(&record).unwrap();
        }
        let offset = self.append(&out.into_inner());
        self.set_table(field, offset, joints.len());
        self
    }

    pub fn display_lists(mut self, lists: &[TestDisplayList]) -> Self {
        let mut entries = Vec::with_capacity(lists.len());
        for list in lists {
            let (offset, size) = match &list.data {
                Some(data) => (self.append_aligned(data, 0x20), data.len()),
                None => (0, 0),
            };
            entries.push(DisplayListInfo {
                offset,
                size,
                bbox: Some(list.bbox),
                special_bit_addr: Some(list.special_bit_addr as usize),
                sort_layer: Some(list.sort_layer),
            });
        }
        let mut table = vec![0u8; lists.len() * self.dl_stride];
        for (entry, record) in entries.iter().zip(table.chunks_exact_mut(self.dl_stride)) {
            write_dl_entry(record, entry);
        }
        let offset = self.append(&table);
        self.set_table(self.desc.display_lists.table, offset, lists.len());
        self
    }

    pub fn stream(mut self, pass: usize, bytes: &[u8]) -> Self {
        let field = self.desc.bitstreams[pass];
        let offset = self.append(bytes);
        BigEndian::write_u32(&mut self.data[field.offset..], offset as u32);
        BigEndian::write_u16(&mut self.data[field.byte_count..], bytes.len() as u16);
        self
    }

    pub fn build(self) -> Vec<u8> { self.data }
}

/// Material factory recording every call; materials are (kind, call number).
#[derive(Debug, Default)]
pub struct RecordingMaterials {
    pub calls: Vec<MaterialKind>,
    pub fur_textures: Vec<Vec<u32>>,
}

impl RecordingMaterials {
    fn record(&mut self, kind: MaterialKind) -> (MaterialKind, usize) {
        self.calls.push(kind);
        (kind, self.calls.len() - 1)
    }
}

impl MaterialFactory for RecordingMaterials {
    type Material = (MaterialKind, usize);

    fn build_map_material<R>(&mut self, _shader: &ShaderDescriptor, _textures: &R) -> Self::Material
    where R: TextureResolver + ?Sized {
        self.record(MaterialKind::Map)
    }

    fn build_object_material<R>(
        &mut self,
        _shader: &ShaderDescriptor,
        _textures: &R,
        _is_skinned: bool,
    ) -> Self::Material
    where
        R: TextureResolver + ?Sized,
    {
        self.record(MaterialKind::Object)
    }

    fn build_water_material(&mut self, _shader: &ShaderDescriptor) -> Self::Material {
        self.record(MaterialKind::Water)
    }

    fn build_fur_material<R>(
        &mut self,
        _shader: &ShaderDescriptor,
        _textures: &R,
        tex_ids: &[u32],
        _is_map_block: bool,
    ) -> Self::Material
    where
        R: TextureResolver + ?Sized,
    {
        self.fur_textures.push(tex_ids.to_vec());
        self.record(MaterialKind::Fur)
    }
}

/// Resolves every id to itself.
pub struct IdentityTextures;

impl TextureResolver for IdentityTextures {
    type Texture = u32;

    fn resolve(&self, id: u32) -> Option<u32> { Some(id) }
}
