use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use dualis_core::core_object::{CoreArc, CoreDirtyFlags, CoreObject, CoreObjectBase, CoreObjectId};
use indexmap::IndexMap;

use crate::render_context::RenderContext;
use crate::shader::Shader;
use crate::texture::Texture;

/// shader + 参数
///
/// 依赖它的 shader 和所有绑定的贴图；同步时重新挑选当前后端能运行的 technique
pub struct Material {
    base: CoreObjectBase,
    ctx: Arc<RenderContext>,

    shader: Mutex<Option<CoreArc<Shader>>>,
    vec4_params: Mutex<IndexMap<String, glam::Vec4>>,
    textures: Mutex<IndexMap<String, CoreArc<Texture>>>,

    /// 同步阶段选出的 technique
    active_technique: Mutex<Option<CoreObjectId>>,
    rebuild_count: AtomicU32,
}
// new & init
impl Material {
    pub fn create(ctx: &Arc<RenderContext>, shader: Option<CoreArc<Shader>>) -> CoreArc<Self> {
        let material = CoreArc::new_initialized(Self {
            base: CoreObjectBase::new(ctx.registry()),
            ctx: ctx.clone(),
            shader: Mutex::new(shader),
            vec4_params: Mutex::new(IndexMap::new()),
            textures: Mutex::new(IndexMap::new()),
            active_technique: Mutex::new(None),
            rebuild_count: AtomicU32::new(0),
        });
        material.mark_dependencies_dirty();
        material.mark_core_dirty(CoreDirtyFlags::PROPERTIES);
        material
    }
}
// getters
impl Material {
    pub fn shader(&self) -> Option<CoreArc<Shader>> {
        self.shader.lock().unwrap().clone()
    }

    pub fn vec4(&self, name: &str) -> Option<glam::Vec4> {
        self.vec4_params.lock().unwrap().get(name).copied()
    }

    pub fn texture(&self, name: &str) -> Option<CoreArc<Texture>> {
        self.textures.lock().unwrap().get(name).cloned()
    }

    /// 最近一次同步选出的 technique
    pub fn active_technique(&self) -> Option<CoreObjectId> {
        *self.active_technique.lock().unwrap()
    }

    #[inline]
    pub fn rebuild_count(&self) -> u32 {
        self.rebuild_count.load(Ordering::Acquire)
    }
}
impl Material {
    pub fn set_shader(&self, shader: Option<CoreArc<Shader>>) {
        if !self.base.check_usable("Material::set_shader") {
            return;
        }
        *self.shader.lock().unwrap() = shader;
        self.mark_dependencies_dirty();
        self.mark_core_dirty(CoreDirtyFlags::PROPERTIES);
    }

    pub fn set_vec4(&self, name: impl Into<String>, value: glam::Vec4) {
        if !self.base.check_usable("Material::set_vec4") {
            return;
        }
        self.vec4_params.lock().unwrap().insert(name.into(), value);
        self.mark_core_dirty(CoreDirtyFlags::DATA);
    }

    pub fn set_texture(&self, name: impl Into<String>, texture: CoreArc<Texture>) {
        if !self.base.check_usable("Material::set_texture") {
            return;
        }
        self.textures.lock().unwrap().insert(name.into(), texture);
        self.mark_dependencies_dirty();
        self.mark_core_dirty(CoreDirtyFlags::PROPERTIES);
    }
}
impl CoreObject for Material {
    fn base(&self) -> &CoreObjectBase {
        &self.base
    }

    fn type_name(&self) -> &'static str {
        "Material"
    }

    fn core_dependencies(&self) -> Vec<Arc<dyn CoreObject>> {
        let mut dependencies: Vec<Arc<dyn CoreObject>> = self.shader.lock().unwrap().iter().map(CoreArc::as_dyn).collect();
        dependencies.extend(self.textures.lock().unwrap().values().map(CoreArc::as_dyn));
        dependencies
    }

    fn sync_to_core(&self, flags: CoreDirtyFlags) {
        let technique = self
            .shader()
            .and_then(|shader| shader.best_technique(self.ctx.capabilities(), &[]))
            .map(|technique| technique.id());
        if technique.is_none() {
            log::warn!("material {}: no technique supported by backend '{}'", self.id(), self.ctx.backend_name());
        }
        *self.active_technique.lock().unwrap() = technique;

        let rebuilds = self.rebuild_count.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!("material {} rebuilt ({flags:?}), {rebuilds} rebuild(s)", self.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_data::PixelFormat;
    use crate::render_context::test_utils::soft_context;
    use crate::shader::test_utils::forward_shader;
    use crate::texture_desc::TextureDesc;

    #[test]
    fn test_sync_selects_technique() {
        let (ctx, _) = soft_context();
        let shader = forward_shader(&ctx);
        let material = Material::create(&ctx, Some(shader.clone()));
        assert!(material.active_technique().is_none());

        ctx.sync_dirty_objects();
        let hlsl = shader.best_technique(ctx.capabilities(), &[]).unwrap();
        assert_eq!(material.active_technique(), Some(hlsl.id()));
        assert_eq!(material.rebuild_count(), 1);

        shader.recompile();
        assert!(material.base().dirty_flags().contains(CoreDirtyFlags::DEPENDENCY));
        ctx.sync_dirty_objects();
        assert_eq!(material.rebuild_count(), 2);

        drop((hlsl, material, shader));
        ctx.shutdown();
    }

    #[test]
    fn test_texture_dependency() {
        let (ctx, _) = soft_context();
        let material = Material::create(&ctx, None);
        let texture = Texture::create(&ctx, TextureDesc::new_2d(2, 2, PixelFormat::RGBA8)).unwrap();

        material.set_texture("albedo", texture.clone());
        material.set_vec4("tint", glam::Vec4::ONE);
        assert_eq!(ctx.registry().listeners_of(texture.id()), vec![material.id()]);
        assert_eq!(material.vec4("tint"), Some(glam::Vec4::ONE));
        assert!(material.texture("albedo").is_some());

        ctx.sync_dirty_objects();
        assert!(material.active_technique().is_none());
        assert!(!material.base().is_dirty());

        texture.mark_core_dirty(CoreDirtyFlags::DATA);
        assert!(material.base().is_dirty());

        drop((material, texture));
        ctx.shutdown();
    }
}
