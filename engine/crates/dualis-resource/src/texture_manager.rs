use std::sync::Arc;

use dualis_core::core_object::{CoreArc, CoreObject};
use dualis_crate_tools::profile_span;
use indexmap::IndexMap;

use crate::pixel_data::{PixelData, PixelFormat};
use crate::render_context::RenderContext;
use crate::texture::Texture;
use crate::texture_desc::{TextureDesc, TextureUsage};

/// 引擎内置的贴图
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinTexture {
    White,
    Black,
    /// 切线空间下指向 +Z 的法线
    Normal,
}
impl BuiltinTexture {
    pub const ALL: [BuiltinTexture; 3] = [Self::White, Self::Black, Self::Normal];

    pub fn color(self) -> glam::Vec4 {
        match self {
            Self::White => glam::Vec4::ONE,
            Self::Black => glam::Vec4::new(0.0, 0.0, 0.0, 1.0),
            Self::Normal => glam::Vec4::new(0.5, 0.5, 1.0, 1.0),
        }
    }
}

pub struct DefaultTextureManagerSettings;
impl DefaultTextureManagerSettings {
    pub const BUILTIN_SIZE: u32 = 2;
    pub const BUILTIN_FORMAT: PixelFormat = PixelFormat::RGBA8;
}

/// 贴图的工厂，并持有内置贴图
pub struct TextureManager {
    ctx: Arc<RenderContext>,
    builtins: IndexMap<BuiltinTexture, CoreArc<Texture>>,
    shut_down: bool,
}
// new & init
impl TextureManager {
    pub fn start_up(ctx: &Arc<RenderContext>) -> anyhow::Result<Self> {
        let _span = profile_span!("TextureManager::start_up");

        let mut builtins = IndexMap::new();
        if ctx.settings().create_builtin_textures {
            for builtin in BuiltinTexture::ALL {
                let size = DefaultTextureManagerSettings::BUILTIN_SIZE;
                let mut pixels = PixelData::new(size, size, 1, DefaultTextureManagerSettings::BUILTIN_FORMAT);
                pixels.set_colors(builtin.color());
                builtins.insert(builtin, Texture::create_from_pixels(ctx, &pixels, TextureUsage::STATIC, false)?);
            }
            log::info!("created {} builtin texture(s)", builtins.len());
        }

        Ok(Self {
            ctx: ctx.clone(),
            builtins,
            shut_down: false,
        })
    }
}
// destroy
impl TextureManager {
    pub fn shut_down(&mut self) {
        for (builtin, texture) in self.builtins.drain(..) {
            log::debug!("destroying builtin texture {builtin:?} ({})", texture.id());
            texture.destroy();
        }
        self.shut_down = true;
    }
}
impl Drop for TextureManager {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        assert!(self.shut_down, "TextureManager dropped without shut_down()");
    }
}
// Subsystem API
impl TextureManager {
    pub fn create_texture(&self, desc: TextureDesc) -> anyhow::Result<CoreArc<Texture>> {
        Texture::create(&self.ctx, desc)
    }

    pub fn create_texture_from_pixels(
        &self,
        pixels: &PixelData,
        usage: TextureUsage,
        hw_gamma: bool,
    ) -> anyhow::Result<CoreArc<Texture>> {
        Texture::create_from_pixels(&self.ctx, pixels, usage, hw_gamma)
    }

    /// 未创建内置贴图时返回 `None`
    pub fn builtin(&self, builtin: BuiltinTexture) -> Option<&CoreArc<Texture>> {
        self.builtins.get(&builtin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RenderCore;
    use crate::settings::RenderContextSettings;
    use crate::soft_backend::SoftBackend;

    #[test]
    fn test_builtin_textures() {
        dualis_crate_tools::init_log::init_log_with_level(log::LevelFilter::Debug);
        let backend: RenderCore = Box::new(SoftBackend::default());
        let ctx = RenderContext::new(RenderContextSettings::default(), backend).unwrap();
        let mut manager = TextureManager::start_up(&ctx).unwrap();

        let normal = manager.builtin(BuiltinTexture::Normal).unwrap();
        let pixels = normal.read_data(0, 0).return_value().unwrap();
        assert_eq!((pixels.width(), pixels.height()), (2, 2));
        for color in pixels.colors() {
            assert!(color.abs_diff_eq(BuiltinTexture::Normal.color(), 1.0 / 255.0), "{color}");
        }
        assert_eq!(ctx.registry().object_count(), 3);

        manager.shut_down();
        assert_eq!(ctx.registry().object_count(), 0);
        ctx.shutdown();
    }

    #[test]
    fn test_builtins_disabled() {
        let (ctx, _) = crate::render_context::test_utils::soft_context();
        let mut manager = TextureManager::start_up(&ctx).unwrap();
        assert!(manager.builtin(BuiltinTexture::White).is_none());

        let texture = manager.create_texture(TextureDesc::new_2d(4, 4, PixelFormat::R8)).unwrap();
        assert!(texture.is_initialized());
        drop(texture);

        manager.shut_down();
        ctx.shutdown();
    }

    #[test]
    #[should_panic(expected = "without shut_down")]
    fn test_drop_without_shut_down() {
        let (ctx, _) = crate::render_context::test_utils::soft_context();
        let _manager = TextureManager::start_up(&ctx).unwrap();
    }
}
