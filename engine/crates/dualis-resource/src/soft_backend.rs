use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use dualis_core::core_object::CoreObjectId;
use dualis_crate_tools::profile_span;
use itertools::iproduct;
use slotmap::{SecondaryMap, SlotMap};

use crate::backend::{BackendCapabilities, RenderBackend};
use crate::command_buffer::CommandBufferDesc;
use crate::hardware_buffer::HardwareBufferDesc;
use crate::pixel_data::{PixelData, PixelVolume};
use crate::render_window::RenderWindowDesc;
use crate::settings::SoftBackendSettings;
use crate::texture_desc::{TextureCopyDesc, TextureDesc, TextureProperties};
use crate::texture_view::TextureViewDesc;

slotmap::new_key_type! {
    pub struct SoftTextureHandle;
    pub struct SoftTextureViewHandle;
    pub struct SoftBufferHandle;
}

/// 软件后端执行过的操作，用于测试观察执行顺序
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SoftBackendEvent {
    TextureCreated(CoreObjectId),
    TextureDestroyed(CoreObjectId),
    TextureViewCreated { view: CoreObjectId, texture: CoreObjectId },
    TextureViewDestroyed(CoreObjectId),
    BufferCreated(CoreObjectId),
    BufferDestroyed(CoreObjectId),
    CommandBufferCreated(CoreObjectId),
    CommandBufferSubmitted(CoreObjectId),
    CommandBufferDestroyed(CoreObjectId),
    SwapChainCreated(CoreObjectId),
    SwapChainResized { id: CoreObjectId, width: u32, height: u32 },
    SwapChainDestroyed(CoreObjectId),
    /// 提交了多少条暂存的写操作
    Flushed(usize),
}

/// 共享的事件记录，后端移交给 core 线程后仍然可以在 sim 侧读取
#[derive(Clone, Default)]
pub struct SoftBackendEvents {
    events: Arc<Mutex<Vec<SoftBackendEvent>>>,
}
impl SoftBackendEvents {
    fn push(&self, event: SoftBackendEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn snapshot(&self) -> Vec<SoftBackendEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn position(&self, event: &SoftBackendEvent) -> Option<usize> {
        self.events.lock().unwrap().iter().position(|e| e == event)
    }

    pub fn contains(&self, event: &SoftBackendEvent) -> bool {
        self.position(event).is_some()
    }
}

struct SoftTexture {
    id: CoreObjectId,
    properties: TextureProperties,
    /// 按 subresource 索引存放
    subresources: Vec<PixelData>,
}

struct SoftTextureView {
    texture: SoftTextureHandle,
    _desc: TextureViewDesc,
}

struct SoftBuffer {
    _desc: HardwareBufferDesc,
    data: Vec<u8>,
}

/// 暂存的写操作，`flush` 时按顺序应用
enum PendingWrite {
    Subresource {
        texture: SoftTextureHandle,
        subresource_idx: usize,
        data: PixelData,
    },
    Buffer {
        buffer: SoftBufferHandle,
        offset: usize,
        data: Vec<u8>,
    },
}

/// 在主机内存中模拟 GPU 资源的后端
///
/// 使用 SlotMap 存储资源，对外以 [`CoreObjectId`] 查找。
/// 写操作先暂存，`flush` 之后才对读操作可见，与真实 GPU 队列的可见性规则一致。
pub struct SoftBackend {
    settings: SoftBackendSettings,

    texture_pool: SlotMap<SoftTextureHandle, SoftTexture>,
    texture_view_pool: SlotMap<SoftTextureViewHandle, SoftTextureView>,
    buffer_pool: SlotMap<SoftBufferHandle, SoftBuffer>,

    /// 用于快速查询：CoreObjectId -> Handle
    texture_lookup: HashMap<CoreObjectId, SoftTextureHandle>,
    texture_view_lookup: HashMap<CoreObjectId, SoftTextureViewHandle>,
    buffer_lookup: HashMap<CoreObjectId, SoftBufferHandle>,
    /// TextureHandle -> 所有关联的 view
    texture_to_views: SecondaryMap<SoftTextureHandle, Vec<CoreObjectId>>,

    command_buffers: HashMap<CoreObjectId, CommandBufferDesc>,
    swap_chains: HashMap<CoreObjectId, (u32, u32)>,

    pending_writes: Vec<PendingWrite>,

    events: SoftBackendEvents,
}
impl Default for SoftBackend {
    fn default() -> Self {
        Self::new(SoftBackendSettings::default())
    }
}
// new & init
impl SoftBackend {
    pub fn new(settings: SoftBackendSettings) -> Self {
        Self {
            settings,

            texture_pool: SlotMap::with_key(),
            texture_view_pool: SlotMap::with_key(),
            buffer_pool: SlotMap::with_key(),

            texture_lookup: HashMap::new(),
            texture_view_lookup: HashMap::new(),
            buffer_lookup: HashMap::new(),
            texture_to_views: SecondaryMap::new(),

            command_buffers: HashMap::new(),
            swap_chains: HashMap::new(),

            pending_writes: Vec::new(),

            events: SoftBackendEvents::default(),
        }
    }
}
// getters
impl SoftBackend {
    #[inline]
    pub fn events(&self) -> SoftBackendEvents {
        self.events.clone()
    }

    #[inline]
    pub fn pending_write_count(&self) -> usize {
        self.pending_writes.len()
    }

    #[inline]
    pub fn live_texture_count(&self) -> usize {
        self.texture_pool.len()
    }

    #[inline]
    pub fn live_buffer_count(&self) -> usize {
        self.buffer_pool.len()
    }

    fn texture_handle(&self, id: CoreObjectId) -> anyhow::Result<SoftTextureHandle> {
        self.texture_lookup.get(&id).copied().with_context(|| format!("unknown texture {id}"))
    }

    fn buffer_handle(&self, id: CoreObjectId) -> anyhow::Result<SoftBufferHandle> {
        self.buffer_lookup.get(&id).copied().with_context(|| format!("unknown buffer {id}"))
    }

    fn subresource_index(texture: &SoftTexture, face: u32, mip: u32) -> anyhow::Result<usize> {
        anyhow::ensure!(
            texture.properties.is_valid_subresource(face, mip),
            "texture {} has no subresource (face {face}, mip {mip})",
            texture.id
        );
        Ok(texture.properties.map_to_subresource_idx(face, mip) as usize)
    }

    fn check_buffer_range(buffer: &SoftBuffer, offset: usize, len: usize) -> anyhow::Result<()> {
        anyhow::ensure!(
            offset.checked_add(len).is_some_and(|end| end <= buffer.data.len()),
            "buffer range {offset}+{len} exceeds size {}",
            buffer.data.len()
        );
        Ok(())
    }
}
impl RenderBackend for SoftBackend {
    fn name(&self) -> &str {
        "soft"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_secondary_command_buffers: self.settings.supports_secondary_command_buffers,
            shader_languages: self.settings.shader_languages.clone(),
        }
    }

    fn flush(&mut self) {
        let _span = profile_span!("SoftBackend::flush");

        let pending = std::mem::take(&mut self.pending_writes);
        let count = pending.len();
        for write in pending {
            match write {
                PendingWrite::Subresource {
                    texture,
                    subresource_idx,
                    data,
                } => {
                    if let Some(texture) = self.texture_pool.get_mut(texture) {
                        texture.subresources[subresource_idx] = data;
                    }
                }
                PendingWrite::Buffer { buffer, offset, data } => {
                    if let Some(buffer) = self.buffer_pool.get_mut(buffer) {
                        buffer.data[offset..offset + data.len()].copy_from_slice(&data);
                    }
                }
            }
        }
        self.events.push(SoftBackendEvent::Flushed(count));
    }

    fn create_texture(
        &mut self,
        id: CoreObjectId,
        desc: &TextureDesc,
        initial_data: Option<&PixelData>,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(!self.texture_lookup.contains_key(&id), "texture {id} already exists");

        let properties = TextureProperties::new(desc.clone());
        let mut subresources: Vec<PixelData> = iproduct!(0..properties.num_faces(), 0..=properties.num_mips())
            .map(|(face, mip)| properties.alloc_buffer(face, mip))
            .collect();
        if let Some(initial_data) = initial_data {
            anyhow::ensure!(
                properties.matches_subresource(initial_data, 0),
                "initial data {initial_data:?} does not match texture {id}"
            );
            subresources[0] = initial_data.clone();
        }

        let handle = self.texture_pool.insert(SoftTexture {
            id,
            properties,
            subresources,
        });
        self.texture_lookup.insert(id, handle);
        self.texture_to_views.insert(handle, Vec::new());
        self.events.push(SoftBackendEvent::TextureCreated(id));
        Ok(())
    }

    fn write_subresource(
        &mut self,
        id: CoreObjectId,
        face: u32,
        mip: u32,
        data: &PixelData,
        discard: bool,
        queue_index: u32,
    ) -> anyhow::Result<()> {
        let handle = self.texture_handle(id)?;
        let texture = &self.texture_pool[handle];
        let subresource_idx = Self::subresource_index(texture, face, mip)?;
        anyhow::ensure!(
            texture.properties.matches_subresource(data, mip),
            "data {data:?} does not match texture {id} mip {mip}"
        );

        if discard {
            // discard 之后旧内容不再需要，丢弃同一 subresource 上尚未提交的写
            self.pending_writes.retain(|w| {
                !matches!(w, PendingWrite::Subresource { texture, subresource_idx: idx, .. }
                    if *texture == handle && *idx == subresource_idx)
            });
        }
        log::trace!("texture {id} write (face {face}, mip {mip}) on queue {queue_index}");
        self.pending_writes.push(PendingWrite::Subresource {
            texture: handle,
            subresource_idx,
            data: data.clone(),
        });
        Ok(())
    }

    fn read_subresource(&mut self, id: CoreObjectId, face: u32, mip: u32) -> anyhow::Result<PixelData> {
        let texture = &self.texture_pool[self.texture_handle(id)?];
        let subresource_idx = Self::subresource_index(texture, face, mip)?;
        Ok(texture.subresources[subresource_idx].clone())
    }

    fn copy_texture(
        &mut self,
        src: CoreObjectId,
        dst: CoreObjectId,
        desc: &TextureCopyDesc,
        command_buffer: Option<CoreObjectId>,
    ) -> anyhow::Result<()> {
        if let Some(command_buffer) = command_buffer {
            anyhow::ensure!(self.command_buffers.contains_key(&command_buffer), "unknown command buffer {command_buffer}");
        }
        // 拷贝按队列顺序执行，之前暂存的写必须先生效
        self.flush();

        let src_handle = self.texture_handle(src)?;
        let dst_handle = self.texture_handle(dst)?;

        let src_texture = &self.texture_pool[src_handle];
        let src_idx = Self::subresource_index(src_texture, desc.src_face, desc.src_mip)?;
        let src_data = src_texture.subresources[src_idx].clone();
        let src_volume = if desc.src_volume.is_empty() { src_data.extent() } else { desc.src_volume };

        let dst_texture = &mut self.texture_pool[dst_handle];
        let dst_idx = Self::subresource_index(dst_texture, desc.dst_face, desc.dst_mip)?;
        let dst_position = desc.dst_position.max(glam::IVec3::ZERO).as_uvec3();
        let dst_data = &mut dst_texture.subresources[dst_idx];
        anyhow::ensure!(
            PixelVolume::new(
                dst_position.x,
                dst_position.y,
                dst_position.z,
                dst_position.x + src_volume.width(),
                dst_position.y + src_volume.height(),
                dst_position.z + src_volume.depth(),
            )
            .fits_within(dst_data.width(), dst_data.height(), dst_data.depth()),
            "copy destination out of range"
        );
        dst_data.copy_volume_from(&src_data, src_volume, (dst_position.x, dst_position.y, dst_position.z));
        Ok(())
    }

    fn destroy_texture(&mut self, id: CoreObjectId) {
        let Some(handle) = self.texture_lookup.remove(&id) else {
            log::error!("destroying unknown texture {id}");
            return;
        };

        if let Some(views) = self.texture_to_views.remove(handle)
            && !views.is_empty()
        {
            log::error!("texture {id} destroyed while {} view(s) are still alive", views.len());
            for view in views {
                self.destroy_texture_view(view);
            }
        }
        self.pending_writes
            .retain(|w| !matches!(w, PendingWrite::Subresource { texture, .. } if *texture == handle));
        self.texture_pool.remove(handle);
        self.events.push(SoftBackendEvent::TextureDestroyed(id));
    }

    fn create_texture_view(
        &mut self,
        texture: CoreObjectId,
        view: CoreObjectId,
        desc: &TextureViewDesc,
    ) -> anyhow::Result<()> {
        let texture_handle = self.texture_handle(texture)?;
        let view_handle = self.texture_view_pool.insert(SoftTextureView {
            texture: texture_handle,
            _desc: *desc,
        });
        self.texture_view_lookup.insert(view, view_handle);
        if let Some(views) = self.texture_to_views.get_mut(texture_handle) {
            views.push(view);
        }
        self.events.push(SoftBackendEvent::TextureViewCreated { view, texture });
        Ok(())
    }

    fn destroy_texture_view(&mut self, view: CoreObjectId) {
        let Some(handle) = self.texture_view_lookup.remove(&view) else {
            log::error!("destroying unknown texture view {view}");
            return;
        };
        if let Some(removed) = self.texture_view_pool.remove(handle)
            && let Some(views) = self.texture_to_views.get_mut(removed.texture)
        {
            views.retain(|v| *v != view);
        }
        self.events.push(SoftBackendEvent::TextureViewDestroyed(view));
    }

    fn create_buffer(&mut self, id: CoreObjectId, desc: &HardwareBufferDesc) -> anyhow::Result<()> {
        anyhow::ensure!(!self.buffer_lookup.contains_key(&id), "buffer {id} already exists");
        let handle = self.buffer_pool.insert(SoftBuffer {
            _desc: desc.clone(),
            data: vec![0; desc.size],
        });
        self.buffer_lookup.insert(id, handle);
        self.events.push(SoftBackendEvent::BufferCreated(id));
        Ok(())
    }

    fn write_buffer(&mut self, id: CoreObjectId, offset: usize, data: &[u8], discard: bool) -> anyhow::Result<()> {
        let handle = self.buffer_handle(id)?;
        Self::check_buffer_range(&self.buffer_pool[handle], offset, data.len())?;

        if discard {
            self.pending_writes
                .retain(|w| !matches!(w, PendingWrite::Buffer { buffer, .. } if *buffer == handle));
        }
        self.pending_writes.push(PendingWrite::Buffer {
            buffer: handle,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn read_buffer(&mut self, id: CoreObjectId, offset: usize, len: usize) -> anyhow::Result<Vec<u8>> {
        let buffer = &self.buffer_pool[self.buffer_handle(id)?];
        Self::check_buffer_range(buffer, offset, len)?;
        Ok(buffer.data[offset..offset + len].to_vec())
    }

    fn copy_buffer(
        &mut self,
        src: CoreObjectId,
        dst: CoreObjectId,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
    ) -> anyhow::Result<()> {
        self.flush();

        let src_handle = self.buffer_handle(src)?;
        let dst_handle = self.buffer_handle(dst)?;
        let src_buffer = &self.buffer_pool[src_handle];
        Self::check_buffer_range(src_buffer, src_offset, len)?;
        let bytes = src_buffer.data[src_offset..src_offset + len].to_vec();

        let dst_buffer = &mut self.buffer_pool[dst_handle];
        Self::check_buffer_range(dst_buffer, dst_offset, len)?;
        dst_buffer.data[dst_offset..dst_offset + len].copy_from_slice(&bytes);
        Ok(())
    }

    fn destroy_buffer(&mut self, id: CoreObjectId) {
        let Some(handle) = self.buffer_lookup.remove(&id) else {
            log::error!("destroying unknown buffer {id}");
            return;
        };
        self.pending_writes
            .retain(|w| !matches!(w, PendingWrite::Buffer { buffer, .. } if *buffer == handle));
        self.buffer_pool.remove(handle);
        self.events.push(SoftBackendEvent::BufferDestroyed(id));
    }

    fn create_command_buffer(&mut self, id: CoreObjectId, desc: &CommandBufferDesc) -> anyhow::Result<()> {
        if desc.secondary && !self.settings.supports_secondary_command_buffers {
            anyhow::bail!("soft backend does not support secondary command buffers");
        }
        self.command_buffers.insert(id, desc.clone());
        self.events.push(SoftBackendEvent::CommandBufferCreated(id));
        Ok(())
    }

    fn submit_command_buffer(&mut self, id: CoreObjectId) -> anyhow::Result<()> {
        anyhow::ensure!(self.command_buffers.contains_key(&id), "unknown command buffer {id}");
        self.flush();
        self.events.push(SoftBackendEvent::CommandBufferSubmitted(id));
        Ok(())
    }

    fn destroy_command_buffer(&mut self, id: CoreObjectId) {
        if self.command_buffers.remove(&id).is_some() {
            self.events.push(SoftBackendEvent::CommandBufferDestroyed(id));
        }
    }

    fn create_swap_chain(&mut self, id: CoreObjectId, desc: &RenderWindowDesc) -> anyhow::Result<()> {
        anyhow::ensure!(desc.width > 0 && desc.height > 0, "swap chain extent must be non-zero");
        self.swap_chains.insert(id, (desc.width, desc.height));
        self.events.push(SoftBackendEvent::SwapChainCreated(id));
        Ok(())
    }

    fn resize_swap_chain(&mut self, id: CoreObjectId, width: u32, height: u32) -> anyhow::Result<()> {
        let extent = self.swap_chains.get_mut(&id).with_context(|| format!("unknown swap chain {id}"))?;
        *extent = (width.max(1), height.max(1));
        self.events.push(SoftBackendEvent::SwapChainResized { id, width, height });
        Ok(())
    }

    fn destroy_swap_chain(&mut self, id: CoreObjectId) {
        if self.swap_chains.remove(&id).is_some() {
            self.events.push(SoftBackendEvent::SwapChainDestroyed(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_data::PixelFormat;

    fn id(raw: u64) -> CoreObjectId {
        CoreObjectId::from_raw(raw)
    }

    #[test]
    fn test_write_visible_after_flush() {
        let mut backend = SoftBackend::default();
        backend.create_texture(id(1), &TextureDesc::new_2d(2, 2, PixelFormat::RGBA8), None).unwrap();

        let mut data = PixelData::new(2, 2, 1, PixelFormat::RGBA8);
        data.set_colors(glam::vec4(0.0, 1.0, 0.0, 1.0));
        backend.write_subresource(id(1), 0, 0, &data, false, 0).unwrap();
        assert_eq!(backend.pending_write_count(), 1);
        assert_ne!(backend.read_subresource(id(1), 0, 0).unwrap(), data);

        backend.flush();
        assert_eq!(backend.read_subresource(id(1), 0, 0).unwrap(), data);
        assert!(backend.events().contains(&SoftBackendEvent::Flushed(1)));
    }

    #[test]
    fn test_destroy_texture_releases_views() {
        let mut backend = SoftBackend::default();
        backend.create_texture(id(1), &TextureDesc::new_2d(4, 4, PixelFormat::R8), None).unwrap();
        backend.create_texture_view(id(1), id(2), &TextureViewDesc::default()).unwrap();

        backend.destroy_texture(id(1));
        let events = backend.events();
        let view_destroyed = events.position(&SoftBackendEvent::TextureViewDestroyed(id(2))).unwrap();
        let texture_destroyed = events.position(&SoftBackendEvent::TextureDestroyed(id(1))).unwrap();
        assert!(view_destroyed < texture_destroyed);
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_secondary_command_buffer_unsupported() {
        let mut backend = SoftBackend::default();
        let desc = CommandBufferDesc {
            secondary: true,
            ..Default::default()
        };
        assert!(backend.create_command_buffer(id(1), &desc).is_err());
    }

    #[test]
    fn test_buffer_range_checked() {
        let mut backend = SoftBackend::default();
        backend.create_buffer(id(1), &HardwareBufferDesc::generic(4, 4, Default::default())).unwrap();
        assert!(backend.write_buffer(id(1), 12, &[1, 2, 3, 4], false).is_ok());
        assert!(backend.write_buffer(id(1), 13, &[1, 2, 3, 4], false).is_err());
        backend.flush();
        assert_eq!(backend.read_buffer(id(1), 12, 4).unwrap(), vec![1, 2, 3, 4]);
        backend.destroy_buffer(id(1));
        assert_eq!(backend.live_buffer_count(), 0);
    }
}
