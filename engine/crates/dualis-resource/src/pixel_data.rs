/// 主机内存中的像素格式
///
/// 只负责把颜色打包为对应格式的字节，不做格式之间的转换
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8,
    RG8,
    RGBA8,
    BGRA8,
    R32F,
    RG32F,
    RGBA32F,
    D32,
}
impl PixelFormat {
    #[inline]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::R8 => 1,
            Self::RG8 => 2,
            Self::RGBA8 | Self::BGRA8 | Self::R32F | Self::D32 => 4,
            Self::RG32F => 8,
            Self::RGBA32F => 16,
        }
    }

    #[inline]
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::D32)
    }

    #[inline]
    pub const fn num_channels(self) -> usize {
        match self {
            Self::R8 | Self::R32F | Self::D32 => 1,
            Self::RG8 | Self::RG32F => 2,
            Self::RGBA8 | Self::BGRA8 | Self::RGBA32F => 4,
        }
    }

    fn encode(self, color: glam::Vec4, out: &mut [u8]) {
        let unorm = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        match self {
            Self::R8 => out[0] = unorm(color.x),
            Self::RG8 => out.copy_from_slice(&[unorm(color.x), unorm(color.y)]),
            Self::RGBA8 => out.copy_from_slice(&[unorm(color.x), unorm(color.y), unorm(color.z), unorm(color.w)]),
            Self::BGRA8 => out.copy_from_slice(&[unorm(color.z), unorm(color.y), unorm(color.x), unorm(color.w)]),
            Self::R32F | Self::D32 => out.copy_from_slice(bytemuck::bytes_of(&color.x)),
            Self::RG32F => out.copy_from_slice(bytemuck::cast_slice(&[color.x, color.y])),
            Self::RGBA32F => out.copy_from_slice(bytemuck::cast_slice(&color.to_array())),
        }
    }

    fn decode(self, bytes: &[u8]) -> glam::Vec4 {
        let unorm = |b: u8| b as f32 / 255.0;
        let float = |i: usize| bytemuck::pod_read_unaligned::<f32>(&bytes[i * 4..i * 4 + 4]);
        match self {
            Self::R8 => glam::vec4(unorm(bytes[0]), 0.0, 0.0, 1.0),
            Self::RG8 => glam::vec4(unorm(bytes[0]), unorm(bytes[1]), 0.0, 1.0),
            Self::RGBA8 => glam::vec4(unorm(bytes[0]), unorm(bytes[1]), unorm(bytes[2]), unorm(bytes[3])),
            Self::BGRA8 => glam::vec4(unorm(bytes[2]), unorm(bytes[1]), unorm(bytes[0]), unorm(bytes[3])),
            Self::R32F | Self::D32 => glam::vec4(float(0), 0.0, 0.0, 1.0),
            Self::RG32F => glam::vec4(float(0), float(1), 0.0, 1.0),
            Self::RGBA32F => glam::vec4(float(0), float(1), float(2), float(3)),
        }
    }
}

/// 像素空间中的一个长方体，`[left, right) x [top, bottom) x [front, back)`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelVolume {
    pub left: u32,
    pub top: u32,
    pub front: u32,
    pub right: u32,
    pub bottom: u32,
    pub back: u32,
}
impl PixelVolume {
    pub const fn new(left: u32, top: u32, front: u32, right: u32, bottom: u32, back: u32) -> Self {
        Self {
            left,
            top,
            front,
            right,
            bottom,
            back,
        }
    }

    /// 从原点开始的完整范围
    pub const fn from_extent(width: u32, height: u32, depth: u32) -> Self {
        Self::new(0, 0, 0, width, height, depth)
    }

    #[inline]
    pub const fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    #[inline]
    pub const fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    #[inline]
    pub const fn depth(&self) -> u32 {
        self.back.saturating_sub(self.front)
    }

    /// 任意一个维度为空
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0 || self.depth() == 0
    }

    /// 是否完全位于 `width x height x depth` 之内
    #[inline]
    pub const fn fits_within(&self, width: u32, height: u32, depth: u32) -> bool {
        self.left < self.right
            && self.top < self.bottom
            && self.front < self.back
            && self.right <= width
            && self.bottom <= height
            && self.back <= depth
    }
}

/// 一个 subresource 的像素数据
#[derive(Clone, PartialEq)]
pub struct PixelData {
    width: u32,
    height: u32,
    depth: u32,
    format: PixelFormat,

    data: Vec<u8>,
}
// new & init
impl PixelData {
    /// 分配一块填充为 0 的缓冲
    pub fn new(width: u32, height: u32, depth: u32, format: PixelFormat) -> Self {
        let size = Self::compute_size(width, height, depth, format);
        Self {
            width,
            height,
            depth,
            format,
            data: vec![0; size],
        }
    }

    /// 使用已有的字节，长度必须与尺寸和格式一致
    pub fn from_bytes(width: u32, height: u32, depth: u32, format: PixelFormat, data: Vec<u8>) -> anyhow::Result<Self> {
        let expected = Self::compute_size(width, height, depth, format);
        anyhow::ensure!(
            data.len() == expected,
            "pixel data for {width}x{height}x{depth} {format:?} needs {expected} bytes, got {}",
            data.len()
        );
        Ok(Self {
            width,
            height,
            depth,
            format,
            data,
        })
    }

    #[inline]
    pub const fn compute_size(width: u32, height: u32, depth: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * depth as usize * format.bytes_per_pixel()
    }
}
// getters
impl PixelData {
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }
    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }
    #[inline]
    pub fn extent(&self) -> PixelVolume {
        PixelVolume::from_extent(self.width, self.height, self.depth)
    }
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }
    #[inline]
    pub fn row_pitch(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }
    #[inline]
    pub fn slice_pitch(&self) -> usize {
        self.row_pitch() * self.height as usize
    }
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// 尺寸与格式是否和另一块缓冲一致
    #[inline]
    pub fn matches_layout(&self, other: &PixelData) -> bool {
        self.width == other.width && self.height == other.height && self.depth == other.depth && self.format == other.format
    }
}
// Pixel API
impl PixelData {
    #[inline]
    fn pixel_offset(&self, x: u32, y: u32, z: u32) -> usize {
        z as usize * self.slice_pitch() + y as usize * self.row_pitch() + x as usize * self.format.bytes_per_pixel()
    }

    pub fn color_at(&self, x: u32, y: u32, z: u32) -> glam::Vec4 {
        let offset = self.pixel_offset(x, y, z);
        self.format.decode(&self.data[offset..offset + self.format.bytes_per_pixel()])
    }

    pub fn set_color_at(&mut self, color: glam::Vec4, x: u32, y: u32, z: u32) {
        let offset = self.pixel_offset(x, y, z);
        let bpp = self.format.bytes_per_pixel();
        self.format.encode(color, &mut self.data[offset..offset + bpp]);
    }

    /// 所有像素填充为同一个颜色
    pub fn set_colors(&mut self, color: glam::Vec4) {
        let bpp = self.format.bytes_per_pixel();
        let mut pixel = vec![0u8; bpp];
        self.format.encode(color, &mut pixel);
        for chunk in self.data.chunks_exact_mut(bpp) {
            chunk.copy_from_slice(&pixel);
        }
    }

    /// 按 x, y, z 顺序返回所有像素的颜色
    pub fn colors(&self) -> Vec<glam::Vec4> {
        self.data.chunks_exact(self.format.bytes_per_pixel()).map(|p| self.format.decode(p)).collect()
    }

    /// 把 `src` 中 `src_volume` 的像素拷贝到自身 `dst_position` 处，格式必须一致，越界由调用者保证
    pub fn copy_volume_from(&mut self, src: &PixelData, src_volume: PixelVolume, dst_position: (u32, u32, u32)) {
        debug_assert_eq!(self.format, src.format);

        let bpp = self.format.bytes_per_pixel();
        let row_bytes = src_volume.width() as usize * bpp;
        for z in 0..src_volume.depth() {
            for y in 0..src_volume.height() {
                let src_offset = src.pixel_offset(src_volume.left, src_volume.top + y, src_volume.front + z);
                let dst_offset = self.pixel_offset(dst_position.0, dst_position.1 + y, dst_position.2 + z);
                self.data[dst_offset..dst_offset + row_bytes].copy_from_slice(&src.data[src_offset..src_offset + row_bytes]);
            }
        }
    }
}
impl std::fmt::Debug for PixelData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelData")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("depth", &self.depth)
            .field("format", &self.format)
            .field("size", &self.data.len())
            .finish()
    }
}
