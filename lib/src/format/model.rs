use std::{borrow::Cow, collections::BTreeMap, rc::Rc};

use anyhow::{ensure, Result};
use zerocopy::BigEndian;

use crate::{
    format::{
        bitstream::{DrawStep, Interpreter, PassOutput, StreamParams},
        display_list::{resolve_table, DisplayListTable},
        gx::{ArrayView, Geometry, VertexArrays},
        material::{MaterialFactory, MaterialKind, TextureResolver},
        shader::{parse_shader, LightFlags, NormalFlags, ShaderDescriptor},
        skin::{
            read_blends, read_fine_skinning, read_joints, FineSkinInstance, FineSkinning, Joint,
            SkinBlend,
        },
        vat::{override_pos_shift, vat_for, VertexAttributeTable},
        version::{lookup, CountWidth, FormatDescriptor, ModelVersion, TableField, WaterPass},
        Aabb,
    },
    util::read::{read_f32, read_u16, read_u32, read_u8, slice_at},
};

/// Array element sizes: S16 positions, S8 normals (x3 for NBT), 16-bit colors and
/// S16 texture coordinates.
pub const POS_STRIDE: usize = 6;
pub const NRM_STRIDE: usize = 3;
pub const NBT_STRIDE: usize = 9;
pub const CLR_STRIDE: usize = 2;
pub const TEX_STRIDE: usize = 4;

/// One drawable: decoded geometry with its material.
#[derive(Clone, Debug)]
pub struct Shape<M> {
    pub geometry: Rc<Geometry>,
    pub material: M,
    pub shader: usize,
    pub display_list: usize,
    /// Only drawn in editor/debug views
    pub dev_only: bool,
    pub sort_layer: Option<u8>,
}

#[derive(Clone, Debug)]
pub struct FurShape<M> {
    pub shape: Shape<M>,
    pub layers: u32,
}

/// Materialized draw lists of a model.
#[derive(Clone, Debug)]
pub struct ModelShapes<M> {
    /// One list per draw pass: opaque first, then the auxiliary passes
    pub passes: Vec<Vec<Shape<M>>>,
    pub water: Vec<Shape<M>>,
    pub fur: Vec<FurShape<M>>,
    /// Materials by shader slot and factory entry point
    pub materials: BTreeMap<(usize, MaterialKind), M>,
    /// Posed buffers, for fine-skinned models
    pub instance: Option<FineSkinInstance>,
}

impl<M> ModelShapes<M> {
    pub fn shape_count(&self) -> usize {
        self.passes.iter().map(Vec::len).sum::<usize>() + self.water.len() + self.fur.len()
    }
}

/// A decoded model asset.
///
/// Vertex arrays borrow from the asset; only padded normals and fine-skinning
/// instances are copied.
pub struct Model<'a, M> {
    pub desc: FormatDescriptor,
    pub data: &'a [u8],
    pub texture_ids: Vec<u32>,
    pub positions: &'a [u8],
    pub normals: Cow<'a, [u8]>,
    pub normal_stride: usize,
    pub colors: &'a [u8],
    pub tex_coords: &'a [u8],
    pub normal_flags: NormalFlags,
    pub light_flags: LightFlags,
    pub tex_mtx_count: u8,
    pub y_translate: Option<f32>,
    pub vat: VertexAttributeTable,
    pub joints: Vec<Joint>,
    pub blends: Vec<SkinBlend>,
    pub pos_fine_skinning: Option<FineSkinning>,
    pub nrm_fine_skinning: Option<FineSkinning>,
    pub shaders: Vec<ShaderDescriptor>,
    pub display_lists: DisplayListTable,
    /// Command stream of each draw pass
    pub streams: Vec<&'a [u8]>,
    pub water_pass: Option<usize>,
    /// Draw steps decoded from the unposed arrays
    pub passes: Vec<PassOutput>,
    pub bbox: Option<Aabb>,
    shared_shapes: Option<Rc<ModelShapes<M>>>,
}

fn read_count(data: &[u8], field: TableField) -> Result<usize> {
    Ok(match field.count_width {
        CountWidth::U8 => read_u8(data, field.count)? as usize,
        CountWidth::U16 => read_u16::<BigEndian>(data, field.count)? as usize,
    })
}

/// Reads a header table as (count, bytes). Tables that don't fit the file
/// come back empty.
fn read_table<'a>(
    data: &'a [u8],
    field: TableField,
    stride: usize,
    name: &str,
) -> Result<(usize, &'a [u8])> {
    let offset = read_u32::<BigEndian>(data, field.offset)? as usize;
    let count = read_count(data, field)?;
    if count == 0 {
        return Ok((0, &[]));
    }
    match slice_at(data, offset, count * stride) {
        Ok(bytes) => Ok((count, bytes)),
        Err(e) => {
            log::warn!("{name} table ({count} entries) unreadable: {e}");
            Ok((0, &[]))
        }
    }
}

/// Grows a record buffer to `count` records by repeating its last record.
fn pad_records(buf: &[u8], stride: usize, count: usize) -> Cow<'_, [u8]> {
    let required = count * stride;
    if buf.len() >= required || buf.len() < stride {
        return Cow::Borrowed(buf);
    }
    log::warn!(
        "Normal array has {} records for {count} positions, repeating the last",
        buf.len() / stride
    );
    let last = &buf[buf.len() - stride..];
    let mut out = Vec::with_capacity(required);
    out.extend_from_slice(buf);
    while out.len() < required {
        out.extend_from_slice(last);
    }
    Cow::Owned(out)
}

/// Picks the pass whose draws all go to the water list, per revision rule.
pub fn dedicated_water_pass(rule: WaterPass, streams: &[&[u8]]) -> Option<usize> {
    match rule {
        WaterPass::ShaderOnly => None,
        WaterPass::Fixed(pass) => streams.get(pass).filter(|s| !s.is_empty()).map(|_| pass),
        WaterPass::LastNonEmpty => {
            streams.iter().rposition(|s| !s.is_empty()).filter(|&pass| pass > 0)
        }
    }
}

impl<'a, M: Clone> Model<'a, M> {
    pub fn load_version(data: &'a [u8], version: ModelVersion) -> Result<Self> {
        Self::load(data, &lookup(version))
    }

    /// Decodes a model and interprets every draw pass.
    ///
    /// Fails only when the header is truncated or the joint table is inconsistent;
    /// other damage is logged and degrades the affected feature.
    pub fn load(data: &'a [u8], desc: &FormatDescriptor) -> Result<Self> {
        ensure!(
            data.len() >= desc.header_size,
            "{} model is {:#x} bytes, header needs {:#x}",
            desc.version,
            data.len(),
            desc.header_size
        );
        let desc = desc.for_asset(data.len());

        let (texture_count, texture_table) = read_table(data, desc.textures, 4, "Texture")?;
        let texture_ids = (0..texture_count)
            .map(|i| read_u32::<BigEndian>(texture_table, i * 4))
            .collect::<Result<Vec<_>>>()?;

        let normal_flags = match desc.normal_flags {
            Some(offset) => NormalFlags::from_bits_truncate(read_u8(data, offset)?),
            None => NormalFlags::empty(),
        };
        let light_flags = match desc.light_flags {
            Some(offset) => LightFlags::from_bits_truncate(read_u8(data, offset)?),
            None => LightFlags::empty(),
        };
        let tex_mtx_count = desc.tex_mtx_count.map(|o| read_u8(data, o)).transpose()?.unwrap_or(0);
        let y_translate = match desc.y_translate {
            Some(offset) if desc.has_y_translate => Some(read_f32::<BigEndian>(data, offset)?),
            _ => None,
        };
        let nbt = normal_flags.contains(NormalFlags::NBT);

        let (pos_count, positions) = read_table(data, desc.positions, POS_STRIDE, "Position")?;
        let normal_stride = if nbt { NBT_STRIDE } else { NRM_STRIDE };
        let normals = match desc.normals {
            Some(field) if desc.has_normals => {
                let (_, normals) = read_table(data, field, normal_stride, "Normal")?;
                pad_records(normals, normal_stride, pos_count)
            }
            _ => Cow::Borrowed(&[][..]),
        };
        let (_, colors) = read_table(data, desc.colors, CLR_STRIDE, "Color")?;
        let (_, tex_coords) = read_table(data, desc.tex_coords, TEX_STRIDE, "Texture coordinate")?;

        let mut vat = vat_for(desc.legacy_quantization, nbt);
        if let Some(offset) = desc.pos_shift {
            override_pos_shift(&mut vat, read_u8(data, offset)?);
        }

        let joints = match desc.joints {
            Some(field) if desc.has_bones => {
                let offset = read_u32::<BigEndian>(data, field.offset)? as usize;
                read_joints(data, offset, read_count(data, field)?)?
            }
            _ => vec![],
        };
        let blends = match desc.blends {
            Some(field) if desc.has_bones => {
                let offset = read_u32::<BigEndian>(data, field.offset)? as usize;
                read_blends(data, offset, read_count(data, field)?)
            }
            _ => vec![],
        };
        let pos_fine_skinning = match desc.pos_fine_skinning {
            Some(fields) => {
                let pieces = read_u32::<BigEndian>(data, fields.pieces)? as usize;
                let weights = read_u32::<BigEndian>(data, fields.weights)? as usize;
                read_fine_skinning(data, fields.config, Some((pieces, weights)), pos_count)
            }
            None => None,
        };
        let nrm_count = normals.len() / normal_stride;
        let nrm_fine_skinning = desc
            .nrm_fine_skinning_config
            .and_then(|config| read_fine_skinning(data, config, None, nrm_count));

        let shaders = Self::read_shaders(
            data,
            &desc,
            &texture_ids,
            normal_flags,
            light_flags,
            tex_mtx_count,
        )?;

        let dl_offset = read_u32::<BigEndian>(data, desc.display_lists.table.offset)? as usize;
        let dl_count = read_count(data, desc.display_lists.table)?;
        let display_lists =
            resolve_table(data, dl_offset, dl_count, desc.display_lists.stride, desc.is_map_block);
        if display_lists.valid_count() < dl_count {
            log::debug!(
                "{} of {dl_count} display lists are empty",
                dl_count - display_lists.valid_count()
            );
        }

        let mut streams = Vec::with_capacity(desc.bitstreams.len());
        for (pass, field) in desc.bitstreams.iter().enumerate() {
            let offset = read_u32::<BigEndian>(data, field.offset)? as usize;
            let size = read_u16::<BigEndian>(data, field.byte_count)? as usize;
            let stream = if size == 0 {
                &[][..]
            } else {
                slice_at(data, offset, size).unwrap_or_else(|e| {
                    log::warn!("Pass {pass} command stream unreadable: {e}");
                    &[]
                })
            };
            streams.push(stream);
        }
        let water_pass = dedicated_water_pass(desc.water_pass, &streams);
        let bbox = display_lists.bounds();

        let mut model = Self {
            desc,
            data,
            texture_ids,
            positions,
            normals,
            normal_stride,
            colors,
            tex_coords,
            normal_flags,
            light_flags,
            tex_mtx_count,
            y_translate,
            vat,
            joints,
            blends,
            pos_fine_skinning,
            nrm_fine_skinning,
            shaders,
            display_lists,
            streams,
            water_pass,
            passes: vec![],
            bbox,
            shared_shapes: None,
        };
        let passes = model.decode_passes(model.arrays());
        model.passes = passes;
        Ok(model)
    }

    fn read_shaders(
        data: &[u8],
        desc: &FormatDescriptor,
        texture_ids: &[u32],
        normal_flags: NormalFlags,
        light_flags: LightFlags,
        tex_mtx_count: u8,
    ) -> Result<Vec<ShaderDescriptor>> {
        let layout = &desc.shader_layout;
        let offset = read_u32::<BigEndian>(data, desc.shaders.offset)? as usize;
        let count = read_count(data, desc.shaders)?;
        let mut shaders = Vec::with_capacity(count);
        for i in 0..count {
            let shader = slice_at(data, offset + i * layout.size, layout.size).and_then(|record| {
                parse_shader(record, layout, texture_ids, normal_flags, light_flags, tex_mtx_count)
            });
            shaders.push(shader.unwrap_or_else(|e| {
                log::warn!("Shader {i}: {e}");
                ShaderDescriptor { normal_flags, light_flags, tex_mtx_count, ..Default::default() }
            }));
        }
        Ok(shaders)
    }

    /// Object model with per-vertex matrix indices.
    pub fn is_skinned(&self) -> bool { self.desc.has_bones && self.joints.len() >= 2 }

    pub fn has_fine_skinning(&self) -> bool {
        self.pos_fine_skinning.is_some() || self.nrm_fine_skinning.is_some()
    }

    pub fn position_count(&self) -> usize { self.positions.len() / POS_STRIDE }

    pub fn normal_count(&self) -> usize { self.normals.len() / self.normal_stride }

    pub fn color_count(&self) -> usize { self.colors.len() / CLR_STRIDE }

    pub fn tex_coord_count(&self) -> usize { self.tex_coords.len() / TEX_STRIDE }

    pub fn arrays(&self) -> VertexArrays<'_> {
        VertexArrays {
            positions: ArrayView::new(self.positions, POS_STRIDE, self.position_count()),
            normals: ArrayView::new(&self.normals, self.normal_stride, self.normal_count()),
            colors: ArrayView::new(self.colors, CLR_STRIDE, self.color_count()),
            tex_coords: ArrayView::new(self.tex_coords, TEX_STRIDE, self.tex_coord_count()),
        }
    }

    fn decode_passes(&self, arrays: VertexArrays<'_>) -> Vec<PassOutput> {
        let params = StreamParams::new(&self.desc, self.is_skinned(), self.color_count());
        let special = self.streams.first().copied().unwrap_or_default();
        let interpreter = Interpreter::new(
            params,
            self.data,
            &self.shaders,
            &self.display_lists,
            &self.vat,
            arrays,
            special,
        );
        self.streams
            .iter()
            .enumerate()
            .map(|(pass, stream)| interpreter.run(stream, pass, self.water_pass == Some(pass)))
            .collect()
    }

    /// Builds the model's shapes in bind pose.
    ///
    /// Without fine skinning the result is shared: later calls return the same
    /// shapes without consulting `factory` again.
    pub fn create_model_shapes<F, R>(&mut self, factory: &mut F, textures: &R) -> Rc<ModelShapes<M>>
    where
        F: MaterialFactory<Material = M>,
        R: TextureResolver + ?Sized,
    {
        self.create_posed_shapes(factory, textures, &[])
    }

    /// Builds shapes for a pose given as per-bone translations.
    ///
    /// Fine-skinned models get a fresh copy of their position and normal arrays with
    /// the pose applied; the asset's own arrays are never modified.
    pub fn create_posed_shapes<F, R>(
        &mut self,
        factory: &mut F,
        textures: &R,
        translations: &[[f32; 3]],
    ) -> Rc<ModelShapes<M>>
    where
        F: MaterialFactory<Material = M>,
        R: TextureResolver + ?Sized,
    {
        if !self.has_fine_skinning() {
            if let Some(shapes) = &self.shared_shapes {
                return shapes.clone();
            }
            let shapes = Rc::new(self.build_shapes(&self.passes, None, factory, textures));
            self.shared_shapes = Some(shapes.clone());
            return shapes;
        }

        let mut instance = FineSkinInstance::new(self.positions, &self.normals);
        if let Some(skin) = &self.pos_fine_skinning {
            instance.apply_translations(skin, translations);
        }
        let arrays = VertexArrays {
            positions: ArrayView::new(&instance.positions, POS_STRIDE, self.position_count()),
            normals: ArrayView::new(&instance.normals, self.normal_stride, self.normal_count()),
            ..self.arrays()
        };
        let passes = self.decode_passes(arrays);
        Rc::new(self.build_shapes(&passes, Some(instance), factory, textures))
    }

    fn build_shapes<F, R>(
        &self,
        passes: &[PassOutput],
        instance: Option<FineSkinInstance>,
        factory: &mut F,
        textures: &R,
    ) -> ModelShapes<M>
    where
        F: MaterialFactory<Material = M>,
        R: TextureResolver + ?Sized,
    {
        let mut materials = BTreeMap::new();
        let opaque_kind =
            if self.desc.is_map_block { MaterialKind::Map } else { MaterialKind::Object };
        let mut shapes = ModelShapes {
            passes: Vec::with_capacity(passes.len()),
            water: vec![],
            fur: vec![],
            materials: BTreeMap::new(),
            instance,
        };
        for pass in passes {
            let list = pass
                .shapes
                .iter()
                .map(|step| self.shape(step, opaque_kind, &mut materials, factory, textures))
                .collect();
            shapes.passes.push(list);
            for step in &pass.water {
                let shape =
                    self.shape(step, MaterialKind::Water, &mut materials, factory, textures);
                shapes.water.push(shape);
            }
            for fur in &pass.fur {
                let shape =
                    self.shape(&fur.step, MaterialKind::Fur, &mut materials, factory, textures);
                shapes.fur.push(FurShape { shape, layers: fur.layers });
            }
        }
        shapes.materials = materials;
        shapes
    }

    fn shape<F, R>(
        &self,
        step: &DrawStep,
        kind: MaterialKind,
        materials: &mut BTreeMap<(usize, MaterialKind), M>,
        factory: &mut F,
        textures: &R,
    ) -> Shape<M>
    where
        F: MaterialFactory<Material = M>,
        R: TextureResolver + ?Sized,
    {
        let fallback = ShaderDescriptor::default();
        let shader = self.shaders.get(step.shader).unwrap_or(&fallback);
        let material = materials
            .entry((step.shader, kind))
            .or_insert_with(|| match kind {
                MaterialKind::Map => factory.build_map_material(shader, textures),
                MaterialKind::Object => {
                    factory.build_object_material(shader, textures, self.is_skinned())
                }
                MaterialKind::Water => factory.build_water_material(shader),
                MaterialKind::Fur => {
                    let tex_ids =
                        shader.texture_ids().chain(shader.fur_region_tex).collect::<Vec<_>>();
                    factory.build_fur_material(shader, textures, &tex_ids, self.desc.is_map_block)
                }
            })
            .clone();
        Shape {
            geometry: step.geometry.clone(),
            material,
            shader: step.shader,
            display_list: step.display_list,
            dev_only: shader.is_dev_geometry(),
            sort_layer: self.display_lists.get(step.display_list).and_then(|info| info.sort_layer),
        }
    }
}
