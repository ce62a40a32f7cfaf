use std::{
    collections::BTreeMap,
    fs::{self, DirBuilder},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use argh::FromArgs;
use dinolib::{
    format::{
        gx::Geometry,
        material::{MaterialFactory, MaterialKind, TextureResolver},
        model::{Model, ModelShapes, Shape},
        recovery::Attempt,
        shader::{ShaderDescriptor, ShaderFlags},
        version::{lookup_tag, FormatDescriptor},
    },
    util::{compression::decompress_asset, file::map_asset},
};
use gltf_json::{self as json, validation::USize64};
use json::validation::Checked::Valid;
use serde_json::json;

#[derive(FromArgs, PartialEq, Debug)]
/// process model files
#[argh(subcommand, name = "model")]
pub struct Args {
    #[argh(subcommand)]
    command: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum SubCommand {
    Info(InfoArgs),
    Convert(ConvertArgs),
}

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// prints a summary of a model
#[argh(subcommand, name = "info")]
pub struct InfoArgs {
    #[argh(positional)]
    /// input model
    input: PathBuf,
    #[argh(option, short = 'v', default = "String::from(\"final\")")]
    /// format revision (ancient, ancient-map, beta, beta-map, demo, demo-map, final, final-map)
    version: String,
}

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// converts a model to glTF
#[argh(subcommand, name = "convert")]
pub struct ConvertArgs {
    #[argh(positional)]
    /// input model
    input: PathBuf,
    #[argh(positional)]
    /// output directory
    out_dir: PathBuf,
    #[argh(option, short = 'v', default = "String::from(\"final\")")]
    /// format revision (ancient, ancient-map, beta, beta-map, demo, demo-map, final, final-map)
    version: String,
    #[argh(switch)]
    /// include dev-only geometry
    dev: bool,
}

pub fn run(args: Args) -> Result<()> {
    match args.command {
        SubCommand::Info(c_args) => info(c_args),
        SubCommand::Convert(c_args) => convert(c_args),
    }
}

fn load_asset(input: &Path, version: &str) -> Result<(FormatDescriptor, Vec<u8>)> {
    let desc = lookup_tag(version)?;
    let file = map_asset(input)?;
    let data = decompress_asset(&file)
        .with_context(|| format!("Failed to decompress '{}'", input.display()))?
        .into_owned();
    Ok((desc, data))
}

fn info(args: InfoArgs) -> Result<()> {
    let (desc, data) = load_asset(&args.input, &args.version)?;
    let model: Model<()> = Model::load(&data, &desc)
        .with_context(|| format!("Failed to decode '{}'", args.input.display()))?;

    log::info!("{}: {} model, {:#x} bytes", args.input.display(), desc.version, data.len());
    log::info!(
        "Positions: {}, normals: {} ({}), colors: {}, texcoords: {}",
        model.position_count(),
        model.normal_count(),
        if model.normal_stride == 9 { "NBT" } else { "XYZ" },
        model.color_count(),
        model.tex_coord_count()
    );
    log::info!("Textures: {:x?}", model.texture_ids);
    if desc.has_bones {
        log::info!(
            "Joints: {}, blends: {}, skinned: {}",
            model.joints.len(),
            model.blends.len(),
            model.is_skinned()
        );
    }
    let skins = [("Position", &model.pos_fine_skinning), ("Normal", &model.nrm_fine_skinning)];
    for (name, skin) in skins {
        if let Some(skin) = skin {
            log::info!(
                "{name} fine skinning: {} pieces, shift {}",
                skin.pieces.len(),
                skin.quantize_shift
            );
        }
    }
    if let Some(y) = model.y_translate {
        log::info!("Y translation: {y}");
    }
    for (i, shader) in model.shaders.iter().enumerate() {
        let textures = shader.layers.iter().map(|l| l.texture).collect::<Vec<_>>();
        log::info!("Shader {i}: {:?} layers {textures:x?}", shader.flags);
    }
    let lists = &model.display_lists;
    log::info!(
        "Display lists: {} ({} empty), stride {:#x}",
        lists.entries.len(),
        lists.entries.len() - lists.valid_count(),
        lists.stride
    );
    if let Some(bbox) = model.bbox {
        log::info!("Bounds: {:?} - {:?}", bbox.min, bbox.max);
    }
    for (pass, output) in model.passes.iter().enumerate() {
        let recovered = output
            .shapes
            .iter()
            .chain(&output.water)
            .filter(|s| s.attempt != Attempt::Original)
            .count();
        log::info!(
            "Pass {pass}{}: {} shapes, {} water, {} fur, {recovered} recovered",
            if model.water_pass == Some(pass) { " (water)" } else { "" },
            output.shapes.len(),
            output.water.len(),
            output.fur.len()
        );
    }
    Ok(())
}

/// Texture ids stand in for images; textures are not exported.
struct TextureIds;

impl TextureResolver for TextureIds {
    type Texture = u32;

    fn resolve(&self, id: u32) -> Option<u32> { Some(id) }
}

/// Builds name-only glTF materials, describing the shader in `extras`.
#[derive(Default)]
struct GltfMaterials {
    materials: Vec<(json::Material, serde_json::Value)>,
}

impl GltfMaterials {
    fn push(
        &mut self,
        shader: &ShaderDescriptor,
        kind: MaterialKind,
        extra: serde_json::Value,
    ) -> u32 {
        let flags = shader.flags.iter_names().map(|(name, _)| name).collect::<Vec<_>>();
        let textures = shader.layers.iter().map(|l| l.texture).collect::<Vec<_>>();
        let alpha_mode = if kind == MaterialKind::Water {
            json::material::AlphaMode::Blend
        } else if shader.flags.contains(ShaderFlags::ALPHA_COMPARE) {
            json::material::AlphaMode::Mask
        } else {
            json::material::AlphaMode::Opaque
        };
        let material = json::Material {
            alpha_mode: Valid(alpha_mode),
            double_sided: !shader.flags.contains(ShaderFlags::CULL_BACKFACE),
            ..Default::default()
        };
        let mut extras =
            json!({ "kind": format!("{kind:?}"), "flags": flags, "textures": textures });
        if let (Some(out), serde_json::Value::Object(extra)) = (extras.as_object_mut(), extra) {
            out.extend(extra);
        }
        self.materials.push((material, extras));
        (self.materials.len() - 1) as u32
    }

    /// Names materials after their shader slot.
    fn finish(self, slots: &BTreeMap<(usize, MaterialKind), u32>) -> Result<Vec<json::Material>> {
        let mut materials = self.materials;
        for (&(slot, kind), &index) in slots {
            let (material, extras) = &mut materials[index as usize];
            material.name = Some(format!("shader{slot}_{kind:?}").to_lowercase());
            extras["slot"] = json!(slot);
        }
        materials
            .into_iter()
            .map(|(mut material, extras)| -> Result<json::Material> {
                material.extras = Some(serde_json::value::to_raw_value(&extras)?);
                Ok(material)
            })
            .collect()
    }
}

impl MaterialFactory for GltfMaterials {
    type Material = u32;

    fn build_map_material<R>(&mut self, shader: &ShaderDescriptor, _textures: &R) -> u32
    where R: TextureResolver + ?Sized {
        self.push(shader, MaterialKind::Map, json!({}))
    }

    fn build_object_material<R>(
        &mut self,
        shader: &ShaderDescriptor,
        _textures: &R,
        is_skinned: bool,
    ) -> u32
    where
        R: TextureResolver + ?Sized,
    {
        self.push(shader, MaterialKind::Object, json!({ "skinned": is_skinned }))
    }

    fn build_water_material(&mut self, shader: &ShaderDescriptor) -> u32 {
        self.push(shader, MaterialKind::Water, json!({}))
    }

    fn build_fur_material<R>(
        &mut self,
        shader: &ShaderDescriptor,
        _textures: &R,
        tex_ids: &[u32],
        is_map_block: bool,
    ) -> u32
    where
        R: TextureResolver + ?Sized,
    {
        let extra = json!({ "fur_textures": tex_ids, "map": is_map_block });
        self.push(shader, MaterialKind::Fur, extra)
    }
}

/// Accumulates the single binary buffer with its views and accessors.
#[derive(Default)]
struct GltfBuffer {
    data: Vec<u8>,
    views: Vec<json::buffer::View>,
    accessors: Vec<json::Accessor>,
}

impl GltfBuffer {
    fn push_accessor(
        &mut self,
        bytes: &[u8],
        count: usize,
        component_type: json::accessor::ComponentType,
        type_: json::accessor::Type,
        target: json::buffer::Target,
        bounds: Option<([f32; 3], [f32; 3])>,
    ) -> json::Index<json::Accessor> {
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
        let offset = self.data.len();
        self.data.extend_from_slice(bytes);
        let view = json::Index::new(self.views.len() as u32);
        self.views.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: bytes.len().into(),
            byte_offset: Some(USize64(offset as u64)),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            target: Some(Valid(target)),
        });
        let index = json::Index::new(self.accessors.len() as u32);
        self.accessors.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: None,
            count: USize64(count as u64),
            component_type: Valid(json::accessor::GenericComponentType(component_type)),
            extensions: None,
            extras: Default::default(),
            type_: Valid(type_),
            min: bounds.map(|(min, _)| json!(min)),
            max: bounds.map(|(_, max)| json!(max)),
            name: None,
            normalized: false,
            sparse: None,
        });
        index
    }

    fn push_vertices<const N: usize>(
        &mut self,
        values: &[[f32; N]],
        type_: json::accessor::Type,
    ) -> json::Index<json::Accessor> {
        self.push_accessor(
            bytemuck::cast_slice(values),
            values.len(),
            json::accessor::ComponentType::F32,
            type_,
            json::buffer::Target::ArrayBuffer,
            None,
        )
    }

    fn push_geometry(&mut self, geometry: &Geometry, material: u32) -> json::mesh::Primitive {
        use json::{accessor::Type, mesh::Semantic};

        let vertices = &geometry.vertices;
        let positions = vertices.iter().map(|v| v.position).collect::<Vec<_>>();
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for p in &positions {
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }
        let mut attributes = BTreeMap::new();
        let position = self.push_accessor(
            bytemuck::cast_slice(&positions),
            positions.len(),
            json::accessor::ComponentType::F32,
            Type::Vec3,
            json::buffer::Target::ArrayBuffer,
            Some((min, max)),
        );
        attributes.insert(Valid(Semantic::Positions), position);
        if vertices.iter().any(|v| v.normal != [0.0; 3]) {
            let normals = vertices.iter().map(|v| v.normal).collect::<Vec<_>>();
            attributes.insert(Valid(Semantic::Normals), self.push_vertices(&normals, Type::Vec3));
        }
        let colors = vertices.iter().map(|v| v.color).collect::<Vec<_>>();
        attributes.insert(Valid(Semantic::Colors(0)), self.push_vertices(&colors, Type::Vec4));
        let tex_coords = vertices.iter().map(|v| v.tex_coords[0]).collect::<Vec<_>>();
        let tex_coords = self.push_vertices(&tex_coords, Type::Vec2);
        attributes.insert(Valid(Semantic::TexCoords(0)), tex_coords);
        let indices = self.push_accessor(
            bytemuck::cast_slice(&geometry.indices),
            geometry.indices.len(),
            json::accessor::ComponentType::U32,
            Type::Scalar,
            json::buffer::Target::ElementArrayBuffer,
            None,
        );
        json::mesh::Primitive {
            attributes,
            extensions: None,
            extras: Default::default(),
            indices: Some(indices),
            material: Some(json::Index::new(material)),
            mode: Default::default(),
            targets: None,
        }
    }
}

fn mesh(name: String, primitives: Vec<json::mesh::Primitive>) -> json::Mesh {
    json::Mesh {
        extensions: None,
        extras: Default::default(),
        name: Some(name),
        primitives,
        weights: None,
    }
}

fn convert(args: ConvertArgs) -> Result<()> {
    let (desc, data) = load_asset(&args.input, &args.version)?;
    let mut model: Model<u32> = Model::load(&data, &desc)
        .with_context(|| format!("Failed to decode '{}'", args.input.display()))?;
    let mut factory = GltfMaterials::default();
    let shapes = model.create_model_shapes(&mut factory, &TextureIds);
    let ModelShapes { passes, water, fur, materials, .. } = &*shapes;

    let keep = |shape: &&Shape<u32>| {
        (args.dev || !shape.dev_only) && !shape.geometry.indices.is_empty()
    };
    let mut buffer = GltfBuffer::default();
    let mut meshes = vec![];
    for (pass, list) in passes.iter().enumerate() {
        let primitives = list
            .iter()
            .filter(keep)
            .map(|shape| buffer.push_geometry(&shape.geometry, shape.material))
            .collect::<Vec<_>>();
        meshes.push(mesh(format!("pass{pass}"), primitives));
    }
    let primitives = water
        .iter()
        .filter(keep)
        .map(|shape| buffer.push_geometry(&shape.geometry, shape.material))
        .collect::<Vec<_>>();
    meshes.push(mesh("water".into(), primitives));
    let primitives = fur
        .iter()
        .filter(|f| keep(&&f.shape))
        .map(|f| -> Result<json::mesh::Primitive> {
            let mut primitive = buffer.push_geometry(&f.shape.geometry, f.shape.material);
            let layers = serde_json::value::to_raw_value(&json!({ "layers": f.layers }))?;
            primitive.extras = Some(layers);
            Ok(primitive)
        })
        .collect::<Result<Vec<_>>>()?;
    meshes.push(mesh("fur".into(), primitives));
    meshes.retain(|m| !m.primitives.is_empty());
    log::info!("Writing {} meshes, {} materials", meshes.len(), materials.len());

    DirBuilder::new().recursive(true).create(&args.out_dir)?;
    let bin_name = "model.bin";
    fs::write(args.out_dir.join(bin_name), &buffer.data)?;

    let nodes = (0..meshes.len())
        .map(|idx| json::Node {
            camera: None,
            children: None,
            extensions: None,
            extras: Default::default(),
            matrix: None,
            mesh: Some(json::Index::new(idx as u32)),
            name: None,
            rotation: None,
            scale: None,
            translation: None,
            skin: None,
            weights: None,
        })
        .collect::<Vec<_>>();
    let root = json::Root {
        accessors: buffer.accessors,
        buffers: vec![json::Buffer {
            byte_length: buffer.data.len().into(),
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            uri: Some(bin_name.into()),
        }],
        buffer_views: buffer.views,
        materials: factory.finish(materials)?,
        meshes,
        scene: Some(json::Index::new(0)),
        scenes: vec![json::Scene {
            extensions: Default::default(),
            extras: Default::default(),
            name: Some("Scene".into()),
            nodes: (0..nodes.len()).map(|idx| json::Index::new(idx as u32)).collect(),
        }],
        nodes,
        ..Default::default()
    };
    let writer = fs::File::create(args.out_dir.join("model.gltf"))?;
    json::serialize::to_writer_pretty(writer, &root)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use dinolib::format::gx::Vertex;

    use super::*;

    fn triangle(normal: [f32; 3]) -> Geometry {
        let positions = [[0.0, 0.0, 0.0], [4.0, 0.0, 0.0], [0.0, 2.0, -1.0]];
        Geometry {
            vertices: positions
                .into_iter()
                .map(|position| Vertex { position, normal, ..Default::default() })
                .collect(),
            indices: vec![0, 1, 2],
            ..Default::default()
        }
    }

    fn offsets(buffer: &GltfBuffer) -> Vec<Option<u64>> {
        buffer.views.iter().map(|v| v.byte_offset.map(|o| o.0)).collect()
    }

    #[test]
    fn packs_vertex_attributes() {
        let mut buffer = GltfBuffer::default();
        let primitive = buffer.push_geometry(&triangle([0.0; 3]), 7);
        // POSITION, COLOR_0, TEXCOORD_0 and indices
        assert_eq!(primitive.attributes.len(), 3);
        assert_eq!(buffer.accessors.len(), 4);
        assert_eq!(primitive.material.map(|m| m.value()), Some(7));
        assert_eq!(offsets(&buffer), vec![Some(0), Some(36), Some(84), Some(108)]);
        assert_eq!(buffer.data.len(), 120);
        assert_eq!(buffer.accessors[0].min, Some(json!([0.0, 0.0, -1.0])));
        assert_eq!(buffer.accessors[0].max, Some(json!([4.0, 2.0, 0.0])));
        assert_eq!(buffer.accessors[3].count.0, 3);
    }

    #[test]
    fn exports_normals_when_present() {
        let mut buffer = GltfBuffer::default();
        buffer.push_geometry(&triangle([0.0, 1.0, 0.0]), 0);
        let primitive = buffer.push_geometry(&triangle([0.0, 1.0, 0.0]), 0);
        assert_eq!(primitive.attributes.len(), 4);
        assert_eq!(buffer.accessors.len(), 10);
        assert_eq!(buffer.data.len(), 2 * 156);
        assert!(offsets(&buffer).iter().all(|o| o.map_or(false, |o| o % 4 == 0)));
    }
}
