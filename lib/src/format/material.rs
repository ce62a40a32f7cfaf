//! Renderer-facing collaborators used when turning shader records into materials.
//!
//! The decoder treats texture ids as opaque and never builds GPU state itself; callers
//! plug in their own texture store and material representation.

use crate::format::shader::ShaderDescriptor;

/// Looks up textures by id.
pub trait TextureResolver {
    type Texture;

    fn resolve(&self, id: u32) -> Option<Self::Texture>;
}

/// Builds renderer materials from decoded shader records.
pub trait MaterialFactory {
    type Material: Clone;

    fn build_map_material<R>(&mut self, shader: &ShaderDescriptor, textures: &R) -> Self::Material
    where R: TextureResolver + ?Sized;

    fn build_object_material<R>(
        &mut self,
        shader: &ShaderDescriptor,
        textures: &R,
        is_skinned: bool,
    ) -> Self::Material
    where
        R: TextureResolver + ?Sized;

    fn build_water_material(&mut self, shader: &ShaderDescriptor) -> Self::Material;

    fn build_fur_material<R>(
        &mut self,
        shader: &ShaderDescriptor,
        textures: &R,
        tex_ids: &[u32],
        is_map_block: bool,
    ) -> Self::Material
    where
        R: TextureResolver + ?Sized;
}

/// Which factory entry point produced a material.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum MaterialKind {
    Map,
    Object,
    Water,
    Fur,
}
