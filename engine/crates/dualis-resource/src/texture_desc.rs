use crate::pixel_data::{PixelData, PixelFormat, PixelVolume};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureType {
    Tex1D,
    Tex2D,
    Tex3D,
    TexCube,
}

bitflags::bitflags! {
    /// Texture 的用途，创建后不可修改
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// 很少或从不修改
        const STATIC = 1 << 0;
        /// 经常修改，允许 discard
        const DYNAMIC = 1 << 1;
        const RENDERTARGET = 1 << 2;
        const DEPTHSTENCIL = 1 << 3;
        const LOADSTORE = 1 << 4;
        /// 在 CPU 侧保留一份数据镜像，支持 `read_cached_data`
        const CPUCACHED = 1 << 5;
        const CPUREADABLE = 1 << 6;
        /// 允许 view 使用不同的格式重新解释
        const MUTABLEFORMAT = 1 << 7;
    }
}
impl Default for TextureUsage {
    fn default() -> Self {
        Self::STATIC
    }
}

/// Texture 的创建描述，sim 侧和 core 侧各自持有一份快照
#[derive(Clone, Debug, PartialEq)]
pub struct TextureDesc {
    pub ty: TextureType,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// 不包括最高精度的那一级 mip
    pub num_mips: u32,
    pub usage: TextureUsage,
    /// 采样时是否需要做 gamma 校正
    pub hw_gamma: bool,
    pub num_samples: u32,
    pub num_array_slices: u32,
}
impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            ty: TextureType::Tex2D,
            format: PixelFormat::RGBA8,
            width: 1,
            height: 1,
            depth: 1,
            num_mips: 0,
            usage: TextureUsage::default(),
            hw_gamma: false,
            num_samples: 0,
            num_array_slices: 1,
        }
    }
}
impl TextureDesc {
    pub fn new_2d(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            ..Default::default()
        }
    }

    /// 从像素数据推导类型、尺寸和格式：depth 大于 1 时为 3D，否则为 2D
    pub fn from_pixel_data(pixel_data: &PixelData, usage: TextureUsage, hw_gamma: bool) -> Self {
        Self {
            ty: if pixel_data.depth() > 1 { TextureType::Tex3D } else { TextureType::Tex2D },
            format: pixel_data.format(),
            width: pixel_data.width(),
            height: pixel_data.height(),
            depth: pixel_data.depth(),
            usage,
            hw_gamma,
            ..Default::default()
        }
    }

    /// 创建前的检查
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.width > 0 && self.height > 0 && self.depth > 0,
            "texture extent must be non-zero, got {}x{}x{}",
            self.width,
            self.height,
            self.depth
        );
        anyhow::ensure!(self.num_array_slices > 0, "texture needs at least one array slice");
        match self.ty {
            TextureType::Tex1D => anyhow::ensure!(self.height == 1 && self.depth == 1, "1D texture must have height and depth 1"),
            TextureType::Tex2D => anyhow::ensure!(self.depth == 1, "2D texture must have depth 1"),
            TextureType::Tex3D => anyhow::ensure!(self.num_array_slices == 1, "3D texture cannot be an array"),
            TextureType::TexCube => {
                anyhow::ensure!(self.width == self.height && self.depth == 1, "cube texture faces must be square")
            }
        }

        let max_mips = max_mip_count(self.width, self.height, self.depth);
        anyhow::ensure!(
            self.num_mips <= max_mips,
            "texture {}x{}x{} supports at most {max_mips} mips, got {}",
            self.width,
            self.height,
            self.depth,
            self.num_mips
        );
        anyhow::ensure!(
            !(self.usage.contains(TextureUsage::DEPTHSTENCIL) && !self.format.is_depth()),
            "depth stencil texture needs a depth format, got {:?}",
            self.format
        );
        anyhow::ensure!(
            self.num_samples <= 1 || self.num_mips == 0,
            "multisampled texture cannot have mips"
        );
        Ok(())
    }
}

/// 最高精度之下还能生成多少级 mip
pub fn max_mip_count(width: u32, height: u32, depth: u32) -> u32 {
    let largest = width.max(height).max(depth).max(1);
    31 - largest.leading_zeros()
}

/// 由描述派生出的只读属性，subresource 的索引规则在这里定义
#[derive(Clone, Debug, PartialEq)]
pub struct TextureProperties {
    desc: TextureDesc,
}
impl TextureProperties {
    pub fn new(desc: TextureDesc) -> Self {
        Self { desc }
    }

    #[inline]
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }
    #[inline]
    pub fn ty(&self) -> TextureType {
        self.desc.ty
    }
    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.desc.format
    }
    #[inline]
    pub fn width(&self) -> u32 {
        self.desc.width
    }
    #[inline]
    pub fn height(&self) -> u32 {
        self.desc.height
    }
    #[inline]
    pub fn depth(&self) -> u32 {
        self.desc.depth
    }
    #[inline]
    pub fn num_mips(&self) -> u32 {
        self.desc.num_mips
    }
    #[inline]
    pub fn usage(&self) -> TextureUsage {
        self.desc.usage
    }
    #[inline]
    pub fn num_samples(&self) -> u32 {
        self.desc.num_samples
    }
    #[inline]
    pub fn is_hardware_gamma_enabled(&self) -> bool {
        self.desc.hw_gamma
    }

    /// cube 每个 array slice 有 6 个面
    #[inline]
    pub fn num_faces(&self) -> u32 {
        let faces_per_slice = if self.desc.ty == TextureType::TexCube { 6 } else { 1 };
        faces_per_slice * self.desc.num_array_slices
    }

    #[inline]
    pub fn num_subresources(&self) -> u32 {
        self.num_faces() * (self.desc.num_mips + 1)
    }

    #[inline]
    pub fn is_valid_subresource(&self, face: u32, mip: u32) -> bool {
        face < self.num_faces() && mip <= self.desc.num_mips
    }

    /// `(face, mip)` -> 线性 subresource 索引
    #[inline]
    pub fn map_to_subresource_idx(&self, face: u32, mip: u32) -> u32 {
        face * (self.desc.num_mips + 1) + mip
    }

    /// 线性 subresource 索引 -> `(face, mip)`
    #[inline]
    pub fn map_from_subresource_idx(&self, subresource_idx: u32) -> (u32, u32) {
        let mips_per_face = self.desc.num_mips + 1;
        (subresource_idx / mips_per_face, subresource_idx % mips_per_face)
    }

    /// 指定 mip 的尺寸，每一级减半，最小为 1
    pub fn mip_extent(&self, mip: u32) -> (u32, u32, u32) {
        let shrink = |v: u32| (v >> mip).max(1);
        (shrink(self.desc.width), shrink(self.desc.height), shrink(self.desc.depth))
    }

    /// 分配一块与 `(face, mip)` 尺寸、格式一致的缓冲
    pub fn alloc_buffer(&self, face: u32, mip: u32) -> PixelData {
        debug_assert!(self.is_valid_subresource(face, mip));
        let (width, height, depth) = self.mip_extent(mip);
        PixelData::new(width, height, depth, self.desc.format)
    }

    /// 检查缓冲是否与 `(face, mip)` 的尺寸和格式一致
    pub fn matches_subresource(&self, data: &PixelData, mip: u32) -> bool {
        let (width, height, depth) = self.mip_extent(mip);
        data.width() == width && data.height() == height && data.depth() == depth && data.format() == self.desc.format
    }
}

/// Texture 之间拷贝的描述
///
/// `src_volume` 为空时表示整个源 subresource
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextureCopyDesc {
    pub src_face: u32,
    pub src_mip: u32,
    pub src_volume: PixelVolume,

    pub dst_face: u32,
    pub dst_mip: u32,
    pub dst_position: glam::IVec3,
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::iproduct;

    fn cube_props() -> TextureProperties {
        TextureProperties::new(TextureDesc {
            ty: TextureType::TexCube,
            width: 16,
            height: 16,
            num_mips: 4,
            num_array_slices: 2,
            ..Default::default()
        })
    }

    #[test]
    fn test_num_faces() {
        assert_eq!(cube_props().num_faces(), 12);
        let array = TextureProperties::new(TextureDesc {
            num_array_slices: 3,
            ..Default::default()
        });
        assert_eq!(array.num_faces(), 3);
    }

    #[test]
    fn test_subresource_bijection() {
        let props = cube_props();
        for (face, mip) in iproduct!(0..props.num_faces(), 0..=props.num_mips()) {
            let idx = props.map_to_subresource_idx(face, mip);
            assert!(idx < props.num_subresources());
            assert_eq!(props.map_from_subresource_idx(idx), (face, mip));
        }
        assert_eq!(props.map_to_subresource_idx(2, 3), 2 * 5 + 3);
    }

    #[test]
    fn test_mip_extent_clamps_to_one() {
        let props = TextureProperties::new(TextureDesc {
            width: 8,
            height: 2,
            num_mips: 3,
            ..Default::default()
        });
        assert_eq!(props.mip_extent(0), (8, 2, 1));
        assert_eq!(props.mip_extent(1), (4, 1, 1));
        assert_eq!(props.mip_extent(3), (1, 1, 1));

        let buffer = props.alloc_buffer(0, 2);
        assert_eq!((buffer.width(), buffer.height(), buffer.depth()), (2, 1, 1));
        assert_eq!(buffer.format(), PixelFormat::RGBA8);
    }

    #[test]
    fn test_max_mip_count() {
        assert_eq!(max_mip_count(1, 1, 1), 0);
        assert_eq!(max_mip_count(2, 2, 1), 1);
        assert_eq!(max_mip_count(256, 16, 1), 8);
        assert_eq!(max_mip_count(300, 1, 1), 8);
    }

    #[test]
    fn test_validate() {
        assert!(TextureDesc::new_2d(2, 2, PixelFormat::RGBA8).validate().is_ok());
        assert!(TextureDesc::new_2d(0, 2, PixelFormat::RGBA8).validate().is_err());
        assert!(
            TextureDesc {
                num_mips: 5,
                ..TextureDesc::new_2d(4, 4, PixelFormat::RGBA8)
            }
            .validate()
            .is_err()
        );
        assert!(
            TextureDesc {
                ty: TextureType::TexCube,
                ..TextureDesc::new_2d(4, 2, PixelFormat::RGBA8)
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_from_pixel_data() {
        let volume = PixelData::new(4, 4, 4, PixelFormat::R8);
        let desc = TextureDesc::from_pixel_data(&volume, TextureUsage::DYNAMIC, true);
        assert_eq!(desc.ty, TextureType::Tex3D);
        assert_eq!((desc.width, desc.height, desc.depth), (4, 4, 4));
        assert_eq!(desc.format, PixelFormat::R8);
        assert!(desc.hw_gamma);

        let flat = PixelData::new(4, 4, 1, PixelFormat::R8);
        assert_eq!(TextureDesc::from_pixel_data(&flat, TextureUsage::STATIC, false).ty, TextureType::Tex2D);
    }
}
