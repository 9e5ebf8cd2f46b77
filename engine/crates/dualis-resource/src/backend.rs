use dualis_core::core_object::CoreObjectId;

use crate::command_buffer::CommandBufferDesc;
use crate::hardware_buffer::HardwareBufferDesc;
use crate::pixel_data::PixelData;
use crate::render_window::RenderWindowDesc;
use crate::texture_desc::{TextureCopyDesc, TextureDesc};
use crate::texture_view::TextureViewDesc;

/// 后端能力，在 sim 侧用于提前拒绝不支持的操作
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub supports_secondary_command_buffers: bool,
    /// 例如 `"hlsl"`、`"glsl"`、`"spirv"`
    pub shader_languages: Vec<String>,
}
impl BackendCapabilities {
    pub fn supports_language(&self, language: &str) -> bool {
        language.eq_ignore_ascii_case("any") || self.shader_languages.iter().any(|l| l.eq_ignore_ascii_case(language))
    }
}

/// 一个具体图形 API 的 core 侧实现
///
/// 所有方法都只会在 core 线程上调用；core 侧对象由 sim 侧对象的 [`CoreObjectId`] 标识，
/// 后端负责维护 id 到真实 GPU 对象的映射。
///
/// 写操作可以先记录在后端内部，`flush` 之后才保证对读操作可见。
pub trait RenderBackend: Send + 'static {
    fn name(&self) -> &str;

    fn capabilities(&self) -> BackendCapabilities;

    /// 提交所有尚未提交的工作
    fn flush(&mut self);

    // texture
    fn create_texture(&mut self, id: CoreObjectId, desc: &TextureDesc, initial_data: Option<&PixelData>)
    -> anyhow::Result<()>;
    fn write_subresource(
        &mut self,
        id: CoreObjectId,
        face: u32,
        mip: u32,
        data: &PixelData,
        discard: bool,
        queue_index: u32,
    ) -> anyhow::Result<()>;
    fn read_subresource(&mut self, id: CoreObjectId, face: u32, mip: u32) -> anyhow::Result<PixelData>;
    fn copy_texture(
        &mut self,
        src: CoreObjectId,
        dst: CoreObjectId,
        desc: &TextureCopyDesc,
        command_buffer: Option<CoreObjectId>,
    ) -> anyhow::Result<()>;
    fn destroy_texture(&mut self, id: CoreObjectId);

    // texture view
    fn create_texture_view(
        &mut self,
        texture: CoreObjectId,
        view: CoreObjectId,
        desc: &TextureViewDesc,
    ) -> anyhow::Result<()>;
    fn destroy_texture_view(&mut self, view: CoreObjectId);

    // buffer
    fn create_buffer(&mut self, id: CoreObjectId, desc: &HardwareBufferDesc) -> anyhow::Result<()>;
    fn write_buffer(&mut self, id: CoreObjectId, offset: usize, data: &[u8], discard: bool) -> anyhow::Result<()>;
    fn read_buffer(&mut self, id: CoreObjectId, offset: usize, len: usize) -> anyhow::Result<Vec<u8>>;
    fn copy_buffer(
        &mut self,
        src: CoreObjectId,
        dst: CoreObjectId,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
    ) -> anyhow::Result<()>;
    fn destroy_buffer(&mut self, id: CoreObjectId);

    // command buffer
    fn create_command_buffer(&mut self, id: CoreObjectId, desc: &CommandBufferDesc) -> anyhow::Result<()>;
    fn submit_command_buffer(&mut self, id: CoreObjectId) -> anyhow::Result<()>;
    fn destroy_command_buffer(&mut self, id: CoreObjectId);

    // swap chain
    fn create_swap_chain(&mut self, id: CoreObjectId, desc: &RenderWindowDesc) -> anyhow::Result<()>;
    fn resize_swap_chain(&mut self, id: CoreObjectId, width: u32, height: u32) -> anyhow::Result<()>;
    fn destroy_swap_chain(&mut self, id: CoreObjectId);
}

/// core 线程独占的状态
pub type RenderCore = Box<dyn RenderBackend>;
