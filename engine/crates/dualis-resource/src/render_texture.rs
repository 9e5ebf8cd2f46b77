use std::sync::Arc;

use anyhow::Context;
use dualis_core::core_object::{CoreArc, CoreObject, CoreObjectBase};

use crate::render_context::RenderContext;
use crate::texture::Texture;
use crate::texture_desc::TextureUsage;
use crate::texture_view::{GpuViewUsage, TextureView, TextureViewDesc};

/// 同时绑定的颜色附件上限
pub const MAX_COLOR_SURFACES: usize = 8;

/// 渲染到贴图的哪一部分
#[derive(Clone)]
pub struct RenderSurfaceDesc {
    pub texture: CoreArc<Texture>,
    pub face: u32,
    /// 0 表示从 `face` 开始的所有 face
    pub num_faces: u32,
    pub mip: u32,
}
impl RenderSurfaceDesc {
    /// 第一个 face 的最高精度 mip
    pub fn new(texture: CoreArc<Texture>) -> Self {
        Self {
            texture,
            face: 0,
            num_faces: 1,
            mip: 0,
        }
    }

    fn view_desc(&self, usage: GpuViewUsage) -> TextureViewDesc {
        TextureViewDesc::new(self.mip, 1, self.face, self.num_faces, usage)
    }
}

#[derive(Clone, Default)]
pub struct RenderTextureDesc {
    pub color_surfaces: Vec<RenderSurfaceDesc>,
    pub depth_stencil_surface: Option<RenderSurfaceDesc>,
}

/// 以若干贴图作为附件的离屏渲染目标
///
/// 创建时为每个附件请求对应用途的 [`TextureView`]，并依赖所有附件贴图：
/// 贴图内容变化时 render texture 会被标记为 dirty
pub struct RenderTexture {
    base: CoreObjectBase,

    desc: RenderTextureDesc,
    color_views: Vec<Arc<TextureView>>,
    depth_stencil_view: Option<Arc<TextureView>>,

    width: u32,
    height: u32,
}
// new & init
impl RenderTexture {
    /// 所有附件的尺寸必须一致；颜色附件需要 [`TextureUsage::RENDERTARGET`]，
    /// 深度附件需要 [`TextureUsage::DEPTHSTENCIL`]
    pub fn create(ctx: &Arc<RenderContext>, desc: RenderTextureDesc) -> anyhow::Result<CoreArc<Self>> {
        anyhow::ensure!(
            desc.color_surfaces.len() <= MAX_COLOR_SURFACES,
            "render texture supports at most {MAX_COLOR_SURFACES} color surfaces, got {}",
            desc.color_surfaces.len()
        );

        let surfaces = desc
            .color_surfaces
            .iter()
            .map(|surface| (surface, TextureUsage::RENDERTARGET, GpuViewUsage::RENDERTARGET))
            .chain(
                desc.depth_stencil_surface
                    .iter()
                    .map(|surface| (surface, TextureUsage::DEPTHSTENCIL, GpuViewUsage::DEPTHSTENCIL)),
            )
            .collect::<Vec<_>>();
        anyhow::ensure!(!surfaces.is_empty(), "render texture needs at least one surface");

        let mut extent = None;
        for (surface, required_usage, view_usage) in &surfaces {
            let properties = surface.texture.properties();
            anyhow::ensure!(
                properties.usage().contains(*required_usage),
                "texture {} cannot be bound as {view_usage:?}, its usage is {:?}",
                surface.texture.id(),
                properties.usage()
            );
            anyhow::ensure!(
                surface.view_desc(*view_usage).resolve(properties).is_some(),
                "texture {}: surface (face {}+{}, mip {}) is out of range",
                surface.texture.id(),
                surface.face,
                surface.num_faces,
                surface.mip
            );

            let (width, height, _) = properties.mip_extent(surface.mip);
            match extent {
                None => extent = Some((width, height)),
                Some(expected) => anyhow::ensure!(
                    expected == (width, height),
                    "render texture surfaces must match in size: expected {}x{}, texture {} is {width}x{height}",
                    expected.0,
                    expected.1,
                    surface.texture.id()
                ),
            }
        }
        let Some((width, height)) = extent else {
            anyhow::bail!("render texture needs at least one surface");
        };

        let request = |surface: &RenderSurfaceDesc, usage: GpuViewUsage| {
            surface
                .texture
                .request_view(surface.view_desc(usage))
                .with_context(|| format!("failed to create {usage:?} view of texture {}", surface.texture.id()))
        };
        let color_views = desc
            .color_surfaces
            .iter()
            .map(|surface| request(surface, GpuViewUsage::RENDERTARGET))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let depth_stencil_view = desc
            .depth_stencil_surface
            .as_ref()
            .map(|surface| request(surface, GpuViewUsage::DEPTHSTENCIL))
            .transpose()?;

        let render_texture = CoreArc::new_initialized(Self {
            base: CoreObjectBase::new(ctx.registry()),
            desc,
            color_views,
            depth_stencil_view,
            width,
            height,
        });
        render_texture.mark_dependencies_dirty();
        Ok(render_texture)
    }
}
// getters
impl RenderTexture {
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn num_color_surfaces(&self) -> usize {
        self.color_views.len()
    }

    pub fn color_texture(&self, idx: usize) -> Option<&CoreArc<Texture>> {
        self.desc.color_surfaces.get(idx).map(|surface| &surface.texture)
    }

    pub fn color_view(&self, idx: usize) -> Option<&Arc<TextureView>> {
        self.color_views.get(idx)
    }

    pub fn depth_stencil_texture(&self) -> Option<&CoreArc<Texture>> {
        self.desc.depth_stencil_surface.as_ref().map(|surface| &surface.texture)
    }

    pub fn depth_stencil_view(&self) -> Option<&Arc<TextureView>> {
        self.depth_stencil_view.as_ref()
    }
}
impl CoreObject for RenderTexture {
    fn base(&self) -> &CoreObjectBase {
        &self.base
    }

    fn type_name(&self) -> &'static str {
        "RenderTexture"
    }

    fn core_dependencies(&self) -> Vec<Arc<dyn CoreObject>> {
        self.desc
            .color_surfaces
            .iter()
            .chain(self.desc.depth_stencil_surface.iter())
            .map(|surface| surface.texture.as_dyn())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualis_core::core_object::CoreDirtyFlags;

    use crate::pixel_data::PixelFormat;
    use crate::render_context::test_utils::soft_context;
    use crate::soft_backend::SoftBackendEvent;
    use crate::texture_desc::TextureDesc;

    fn color_target(ctx: &Arc<RenderContext>, width: u32, height: u32) -> CoreArc<Texture> {
        let desc = TextureDesc {
            width,
            height,
            num_mips: 1,
            usage: TextureUsage::RENDERTARGET,
            ..Default::default()
        };
        Texture::create(ctx, desc).unwrap()
    }

    fn depth_target(ctx: &Arc<RenderContext>, width: u32, height: u32) -> CoreArc<Texture> {
        let desc = TextureDesc {
            format: PixelFormat::D32,
            width,
            height,
            usage: TextureUsage::DEPTHSTENCIL,
            ..Default::default()
        };
        Texture::create(ctx, desc).unwrap()
    }

    #[test]
    fn test_create_with_color_and_depth() {
        let (ctx, events) = soft_context();
        let color = color_target(&ctx, 8, 4);
        let depth = depth_target(&ctx, 8, 4);
        let render_texture = RenderTexture::create(
            &ctx,
            RenderTextureDesc {
                color_surfaces: vec![RenderSurfaceDesc::new(color.clone())],
                depth_stencil_surface: Some(RenderSurfaceDesc::new(depth.clone())),
            },
        )
        .unwrap();

        assert_eq!((render_texture.width(), render_texture.height()), (8, 4));
        assert_eq!(render_texture.num_color_surfaces(), 1);
        let color_view = render_texture.color_view(0).unwrap();
        assert_eq!(color_view.texture(), color.id());
        assert_eq!(color_view.desc().usage, GpuViewUsage::RENDERTARGET);
        assert_eq!(render_texture.depth_stencil_view().unwrap().desc().usage, GpuViewUsage::DEPTHSTENCIL);
        assert_eq!(render_texture.depth_stencil_texture().map(|t| t.id()), Some(depth.id()));

        ctx.core_thread().block_until_idle();
        assert!(events.contains(&SoftBackendEvent::TextureViewCreated {
            view: color_view.id(),
            texture: color.id()
        }));

        let mut expected = vec![color.id(), depth.id()];
        expected.sort();
        assert_eq!(ctx.registry().dependencies_of(render_texture.id()), expected);

        drop((render_texture, color, depth));
        ctx.shutdown();
    }

    #[test]
    fn test_texture_change_dirties_render_texture() {
        let (ctx, _) = soft_context();
        let color = color_target(&ctx, 4, 4);
        let render_texture = RenderTexture::create(
            &ctx,
            RenderTextureDesc {
                color_surfaces: vec![RenderSurfaceDesc::new(color.clone())],
                ..Default::default()
            },
        )
        .unwrap();
        ctx.sync_dirty_objects();
        assert!(!render_texture.base().is_dirty());

        color.mark_core_dirty(CoreDirtyFlags::DATA);
        assert!(render_texture.base().dirty_flags().contains(CoreDirtyFlags::DEPENDENCY));

        drop((render_texture, color));
        ctx.shutdown();
    }

    #[test]
    fn test_surfaces_must_match_in_size() {
        let (ctx, _) = soft_context();
        let color = color_target(&ctx, 8, 8);
        let depth = depth_target(&ctx, 4, 4);

        let mismatched = RenderTexture::create(
            &ctx,
            RenderTextureDesc {
                color_surfaces: vec![RenderSurfaceDesc::new(color.clone())],
                depth_stencil_surface: Some(RenderSurfaceDesc::new(depth.clone())),
            },
        );
        assert!(mismatched.is_err());

        // mip 1 的尺寸与深度贴图一致
        let surface = RenderSurfaceDesc {
            mip: 1,
            ..RenderSurfaceDesc::new(color.clone())
        };
        let render_texture = RenderTexture::create(
            &ctx,
            RenderTextureDesc {
                color_surfaces: vec![surface],
                depth_stencil_surface: Some(RenderSurfaceDesc::new(depth.clone())),
            },
        )
        .unwrap();
        assert_eq!((render_texture.width(), render_texture.height()), (4, 4));

        drop((render_texture, color, depth));
        assert_eq!(ctx.registry().object_count(), 0);
        ctx.shutdown();
    }

    #[test]
    fn test_invalid_surfaces_are_rejected() {
        let (ctx, _) = soft_context();
        let sampled = Texture::create(&ctx, TextureDesc::new_2d(4, 4, PixelFormat::RGBA8)).unwrap();
        let color = color_target(&ctx, 4, 4);

        let wrong_usage = RenderTexture::create(
            &ctx,
            RenderTextureDesc {
                color_surfaces: vec![RenderSurfaceDesc::new(sampled.clone())],
                ..Default::default()
            },
        );
        assert!(wrong_usage.is_err());
        assert_eq!(sampled.view_count(), 0);

        let color_as_depth = RenderTexture::create(
            &ctx,
            RenderTextureDesc {
                depth_stencil_surface: Some(RenderSurfaceDesc::new(color.clone())),
                ..Default::default()
            },
        );
        assert!(color_as_depth.is_err());

        let bad_mip = RenderSurfaceDesc {
            mip: 5,
            ..RenderSurfaceDesc::new(color.clone())
        };
        let out_of_range = RenderTexture::create(
            &ctx,
            RenderTextureDesc {
                color_surfaces: vec![bad_mip],
                ..Default::default()
            },
        );
        assert!(out_of_range.is_err());

        assert!(RenderTexture::create(&ctx, RenderTextureDesc::default()).is_err());
        assert_eq!(color.view_count(), 0);

        drop((sampled, color));
        ctx.shutdown();
    }
}
