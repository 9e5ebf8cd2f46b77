use std::sync::atomic::{AtomicBool, Ordering};

use dualis_core::core_object::CoreObjectId;

use crate::texture_desc::TextureProperties;

bitflags::bitflags! {
    /// view 绑定到管线时的用途
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct GpuViewUsage: u32 {
        /// 作为着色器资源读取
        const DEFAULT = 1 << 0;
        const RENDERTARGET = 1 << 1;
        const DEPTHSTENCIL = 1 << 2;
        /// 可读写的 storage 资源
        const RANDOMWRITE = 1 << 3;
    }
}
impl Default for GpuViewUsage {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// view 的 key，缓存时按全部字段做结构比较
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureViewDesc {
    pub most_detail_mip: u32,
    /// 0 表示从 `most_detail_mip` 开始的所有 mip
    pub num_mips: u32,
    pub first_array_slice: u32,
    /// 0 表示从 `first_array_slice` 开始的所有 face
    pub num_array_slices: u32,
    pub usage: GpuViewUsage,
}
impl TextureViewDesc {
    pub fn new(
        most_detail_mip: u32,
        num_mips: u32,
        first_array_slice: u32,
        num_array_slices: u32,
        usage: GpuViewUsage,
    ) -> Self {
        Self {
            most_detail_mip,
            num_mips,
            first_array_slice,
            num_array_slices,
            usage,
        }
    }

    /// 把 0 展开为实际数量，并检查范围；越界返回 `None`
    pub fn resolve(&self, properties: &TextureProperties) -> Option<TextureViewDesc> {
        let total_mips = properties.num_mips().saturating_add(1);
        let total_faces = properties.num_faces();
        if self.most_detail_mip >= total_mips || self.first_array_slice >= total_faces {
            return None;
        }

        let num_mips = if self.num_mips == 0 { total_mips - self.most_detail_mip } else { self.num_mips };
        let num_array_slices = if self.num_array_slices == 0 {
            total_faces - self.first_array_slice
        } else {
            self.num_array_slices
        };
        let fits = |first: u32, count: u32, total: u32| first.checked_add(count).is_some_and(|end| end <= total);
        if !fits(self.most_detail_mip, num_mips, total_mips) || !fits(self.first_array_slice, num_array_slices, total_faces) {
            return None;
        }

        Some(TextureViewDesc {
            num_mips,
            num_array_slices,
            ..*self
        })
    }
}

/// Texture 的一个 mip/array 子范围
///
/// 由 [`crate::texture::Texture::request_view`] 创建并缓存，texture 销毁时先于 texture 释放
pub struct TextureView {
    id: CoreObjectId,
    texture: CoreObjectId,

    /// 请求时使用的 key
    desc: TextureViewDesc,
    /// 展开后的实际范围
    resolved: TextureViewDesc,

    released: AtomicBool,
}
impl TextureView {
    pub(crate) fn new(id: CoreObjectId, texture: CoreObjectId, desc: TextureViewDesc, resolved: TextureViewDesc) -> Self {
        Self {
            id,
            texture,
            desc,
            resolved,
            released: AtomicBool::new(false),
        }
    }

    pub(crate) fn release(&self) {
        self.released.store(true, Ordering::Release);
    }
}
// getters
impl TextureView {
    #[inline]
    pub fn id(&self) -> CoreObjectId {
        self.id
    }
    #[inline]
    pub fn texture(&self) -> CoreObjectId {
        self.texture
    }
    #[inline]
    pub fn desc(&self) -> &TextureViewDesc {
        &self.desc
    }
    #[inline]
    pub fn resolved(&self) -> &TextureViewDesc {
        &self.resolved
    }
    #[inline]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}
impl std::fmt::Display for TextureView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TextureView({} of {}, mips {}+{}, slices {}+{})",
            self.id,
            self.texture,
            self.resolved.most_detail_mip,
            self.resolved.num_mips,
            self.resolved.first_array_slice,
            self.resolved.num_array_slices
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture_desc::{TextureDesc, TextureType};

    #[test]
    fn test_resolve_all() {
        let props = TextureProperties::new(TextureDesc {
            ty: TextureType::TexCube,
            width: 8,
            height: 8,
            num_mips: 3,
            ..Default::default()
        });
        let resolved = TextureViewDesc::default().resolve(&props).unwrap();
        assert_eq!(resolved.num_mips, 4);
        assert_eq!(resolved.num_array_slices, 6);

        let partial = TextureViewDesc::new(1, 0, 2, 0, GpuViewUsage::DEFAULT).resolve(&props).unwrap();
        assert_eq!((partial.num_mips, partial.num_array_slices), (3, 4));
    }

    #[test]
    fn test_resolve_out_of_range() {
        let props = TextureProperties::new(TextureDesc::default());
        assert!(TextureViewDesc::new(1, 0, 0, 0, GpuViewUsage::DEFAULT).resolve(&props).is_none());
        assert!(TextureViewDesc::new(0, 2, 0, 0, GpuViewUsage::DEFAULT).resolve(&props).is_none());
        assert!(TextureViewDesc::new(0, 0, 1, 0, GpuViewUsage::DEFAULT).resolve(&props).is_none());
    }

    #[test]
    fn test_resolve_huge_counts() {
        let props = TextureProperties::new(TextureDesc {
            ty: TextureType::TexCube,
            width: 8,
            height: 8,
            num_mips: 3,
            ..Default::default()
        });
        assert!(TextureViewDesc::new(1, u32::MAX, 0, 0, GpuViewUsage::DEFAULT).resolve(&props).is_none());
        assert!(TextureViewDesc::new(0, 0, 2, u32::MAX, GpuViewUsage::DEFAULT).resolve(&props).is_none());
    }
}
