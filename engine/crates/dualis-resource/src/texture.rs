use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dualis_core::async_op::AsyncOp;
use dualis_core::core_object::{CoreArc, CoreObject, CoreObjectBase};
use itertools::iproduct;

use crate::command_buffer::CommandBuffer;
use crate::pixel_data::{PixelData, PixelVolume};
use crate::render_context::{RenderContext, report_backend_result};
use crate::texture_desc::{TextureCopyDesc, TextureDesc, TextureProperties, TextureUsage};
use crate::texture_view::{TextureView, TextureViewDesc};

/// `Texture::lock` 的访问方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpuLockOptions {
    ReadOnly,
    WriteOnly,
    /// 写入，并丢弃原有内容
    WriteDiscard,
    ReadWrite,
}
impl GpuLockOptions {
    #[inline]
    fn reads(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    #[inline]
    fn writes(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

#[derive(Clone, Copy, Debug)]
struct TextureLock {
    face: u32,
    mip: u32,
    options: GpuLockOptions,
}

/// 一张 GPU 贴图的 sim 侧句柄
///
/// 描述在创建时固定；core 侧对象由后端按 id 创建。
/// 设置了 [`TextureUsage::CPUCACHED`] 时，sim 侧为每个 subresource 保留一份 CPU 镜像，
/// 所有公开的写路径都会先更新镜像，再发出 GPU 写。
pub struct Texture {
    base: CoreObjectBase,
    ctx: Arc<RenderContext>,

    properties: TextureProperties,
    /// 创建时随 core 对象一起上传
    initial_data: Option<PixelData>,

    /// 按 subresource 索引存放
    cpu_cache: Option<Mutex<Vec<PixelData>>>,
    /// key 按结构比较
    views: Mutex<HashMap<TextureViewDesc, Arc<TextureView>>>,
    lock: Mutex<Option<TextureLock>>,
}
// new & init
impl Texture {
    pub fn create(ctx: &Arc<RenderContext>, desc: TextureDesc) -> anyhow::Result<CoreArc<Self>> {
        Self::create_internal(ctx, desc, None)
    }

    /// 从像素数据推导尺寸和格式，数据作为 mip 0 的初始内容
    pub fn create_from_pixels(
        ctx: &Arc<RenderContext>,
        pixels: &PixelData,
        usage: TextureUsage,
        hw_gamma: bool,
    ) -> anyhow::Result<CoreArc<Self>> {
        let desc = TextureDesc::from_pixel_data(pixels, usage, hw_gamma);
        Self::create_internal(ctx, desc, Some(pixels.clone()))
    }

    fn create_internal(
        ctx: &Arc<RenderContext>,
        desc: TextureDesc,
        initial_data: Option<PixelData>,
    ) -> anyhow::Result<CoreArc<Self>> {
        desc.validate()?;
        let properties = TextureProperties::new(desc);

        let cpu_cache = properties.usage().contains(TextureUsage::CPUCACHED).then(|| {
            let mut subresources: Vec<PixelData> = iproduct!(0..properties.num_faces(), 0..=properties.num_mips())
                .map(|(face, mip)| properties.alloc_buffer(face, mip))
                .collect();
            if let Some(initial_data) = &initial_data {
                subresources[0] = initial_data.clone();
            }
            Mutex::new(subresources)
        });

        Ok(CoreArc::new_initialized(Self {
            base: CoreObjectBase::new(ctx.registry()),
            ctx: ctx.clone(),
            properties,
            initial_data,
            cpu_cache,
            views: Mutex::new(HashMap::new()),
            lock: Mutex::new(None),
        }))
    }
}
// getters
impl Texture {
    #[inline]
    pub fn properties(&self) -> &TextureProperties {
        &self.properties
    }

    #[inline]
    pub fn has_cpu_cache(&self) -> bool {
        self.cpu_cache.is_some()
    }

    #[inline]
    pub fn view_count(&self) -> usize {
        self.views.lock().unwrap().len()
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock.lock().unwrap().is_some()
    }

    fn check_subresource(&self, operation: &str, face: u32, mip: u32) -> bool {
        let valid = self.properties.is_valid_subresource(face, mip);
        if !valid {
            log::error!(
                "{operation} on texture {}: invalid subresource (face {face}, mip {mip}), texture has {} face(s) and {} mip(s)",
                self.id(),
                self.properties.num_faces(),
                self.properties.num_mips()
            );
        }
        valid
    }

    fn check_pixel_data(&self, operation: &str, data: &PixelData, mip: u32) -> bool {
        let matches = self.properties.matches_subresource(data, mip);
        if !matches {
            let (width, height, depth) = self.properties.mip_extent(mip);
            log::error!(
                "{operation} on texture {}: expected {width}x{height}x{depth} {:?}, got {data:?}",
                self.id(),
                self.properties.format()
            );
        }
        matches
    }
}
// write
impl Texture {
    /// 写入一个 subresource
    ///
    /// 返回的 [`AsyncOp`] 在返回时已经完成，值表示写入是否成功。
    /// 没有 [`TextureUsage::DYNAMIC`] 的贴图会忽略 `discard`
    pub fn write_data(&self, data: &PixelData, face: u32, mip: u32, discard: bool) -> AsyncOp<bool> {
        if !self.base.check_usable("Texture::write_data")
            || !self.check_subresource("write_data", face, mip)
            || !self.check_pixel_data("write_data", data, mip)
        {
            return AsyncOp::completed(false);
        }

        let discard = if discard && !self.properties.usage().contains(TextureUsage::DYNAMIC) {
            log::debug!("texture {} is not DYNAMIC, discard ignored", self.id());
            false
        } else {
            discard
        };
        AsyncOp::completed(self.write_subresource(data, face, mip, discard, 0))
    }

    /// 用一个颜色填满 subresource
    pub fn clear(&self, color: glam::Vec4, mip: u32, face: u32, queue_index: u32) -> AsyncOp<bool> {
        if !self.base.check_usable("Texture::clear") || !self.check_subresource("clear", face, mip) {
            return AsyncOp::completed(false);
        }

        let mut data = self.properties.alloc_buffer(face, mip);
        data.set_colors(color);
        let discard = self.properties.usage().contains(TextureUsage::DYNAMIC);
        AsyncOp::completed(self.write_subresource(&data, face, mip, discard, queue_index))
    }

    /// 在 core 线程上执行写入，后端接受之后才更新 CPU 镜像
    fn write_subresource(&self, data: &PixelData, face: u32, mip: u32, discard: bool, queue_index: u32) -> bool {
        let id = self.id();
        let written = {
            let data = data.clone();
            self.ctx.execute_blocking(move |backend| {
                report_backend_result(
                    backend.write_subresource(id, face, mip, &data, discard, queue_index),
                    "write_subresource",
                    id,
                )
            })
        };
        if written {
            self.update_cache(data, face, mip);
        }
        written
    }

    fn update_cache(&self, data: &PixelData, face: u32, mip: u32) {
        if let Some(cache) = &self.cpu_cache {
            let idx = self.properties.map_to_subresource_idx(face, mip) as usize;
            cache.lock().unwrap()[idx] = data.clone();
        }
    }
}
// read
impl Texture {
    /// 从 GPU 读取一个 subresource；读之前先提交所有尚未提交的写
    ///
    /// 校验失败或后端读取失败时结果为 `None`
    pub fn read_data(&self, face: u32, mip: u32) -> AsyncOp<Option<PixelData>> {
        if !self.base.check_usable("Texture::read_data") || !self.check_subresource("read_data", face, mip) {
            return AsyncOp::completed(None);
        }

        let id = self.id();
        self.ctx.core_thread().queue_return_command(move |backend| {
            backend.flush();
            backend
                .read_subresource(id, face, mip)
                .inspect_err(|err| log::error!("read_subresource failed on texture {id}: {err:#}"))
                .ok()
        })
    }

    /// `read_data` 的阻塞版本，结果写入 `dest`
    pub fn read_data_into(&self, dest: &mut PixelData, face: u32, mip: u32) -> bool {
        if !self.base.check_usable("Texture::read_data_into")
            || !self.check_subresource("read_data_into", face, mip)
            || !self.check_pixel_data("read_data_into", dest, mip)
        {
            return false;
        }

        match self.read_data(face, mip).return_value() {
            Some(data) => {
                *dest = data;
                true
            }
            None => false,
        }
    }

    /// 只读 CPU 镜像，不访问 GPU
    pub fn read_cached_data(&self, dest: &mut PixelData, face: u32, mip: u32) -> bool {
        if !self.base.check_usable("Texture::read_cached_data") {
            return false;
        }
        let Some(cache) = &self.cpu_cache else {
            log::error!(
                "read_cached_data on texture {}: texture was not created with CPUCACHED usage",
                self.id()
            );
            return false;
        };
        if !self.check_subresource("read_cached_data", face, mip) || !self.check_pixel_data("read_cached_data", dest, mip)
        {
            return false;
        }

        let idx = self.properties.map_to_subresource_idx(face, mip) as usize;
        dest.clone_from(&cache.lock().unwrap()[idx]);
        true
    }
}
// copy
impl Texture {
    /// 拷贝到 `target`
    ///
    /// 所有检查都在派发之前完成，任何一项失败都不会产生部分效果
    pub fn copy(&self, target: &Texture, desc: &TextureCopyDesc, command_buffer: Option<&CommandBuffer>) -> bool {
        if !self.base.check_usable("Texture::copy") || !target.base.check_usable("Texture::copy") {
            return false;
        }
        let Some(src_volume) = self.validate_copy(target, desc) else {
            return false;
        };

        let (src_id, dst_id) = (self.id(), target.id());
        let command_buffer = command_buffer.map(|cmd| cmd.id());
        let desc = TextureCopyDesc { src_volume, ..*desc };
        let ok = self.ctx.execute_blocking(move |backend| {
            report_backend_result(backend.copy_texture(src_id, dst_id, &desc, command_buffer), "copy_texture", dst_id)
        });

        if ok && target.has_cpu_cache() {
            // 目标镜像需要与 GPU 保持一致，拷贝之后整块回读
            if let Some(data) = target.read_data(desc.dst_face, desc.dst_mip).return_value() {
                target.update_cache(&data, desc.dst_face, desc.dst_mip);
            }
        }
        ok
    }

    /// 返回实际拷贝的源范围
    fn validate_copy(&self, target: &Texture, desc: &TextureCopyDesc) -> Option<PixelVolume> {
        let (src, dst) = (&self.properties, &target.properties);
        if src.ty() != dst.ty() {
            log::error!(
                "copy from texture {} to {}: type mismatch {:?} vs {:?}",
                self.id(),
                target.id(),
                src.ty(),
                dst.ty()
            );
            return None;
        }
        if src.format() != dst.format() {
            log::error!(
                "copy from texture {} to {}: format mismatch {:?} vs {:?}",
                self.id(),
                target.id(),
                src.format(),
                dst.format()
            );
            return None;
        }
        if src.num_samples() != dst.num_samples() {
            log::error!(
                "copy from texture {} to {}: sample count mismatch {} vs {}",
                self.id(),
                target.id(),
                src.num_samples(),
                dst.num_samples()
            );
            return None;
        }
        if !self.check_subresource("copy (source)", desc.src_face, desc.src_mip)
            || !target.check_subresource("copy (destination)", desc.dst_face, desc.dst_mip)
        {
            return None;
        }

        let (src_width, src_height, src_depth) = src.mip_extent(desc.src_mip);
        let src_volume = if desc.src_volume.is_empty() {
            PixelVolume::from_extent(src_width, src_height, src_depth)
        } else {
            desc.src_volume
        };
        if !src_volume.fits_within(src_width, src_height, src_depth) {
            log::error!(
                "copy from texture {}: source volume {src_volume:?} exceeds {src_width}x{src_height}x{src_depth}",
                self.id()
            );
            return None;
        }

        let (dst_width, dst_height, dst_depth) = dst.mip_extent(desc.dst_mip);
        let position = desc.dst_position;
        let fits = position.cmpge(glam::IVec3::ZERO).all() && {
            let position = position.as_uvec3();
            PixelVolume::new(
                position.x,
                position.y,
                position.z,
                position.x + src_volume.width(),
                position.y + src_volume.height(),
                position.z + src_volume.depth(),
            )
            .fits_within(dst_width, dst_height, dst_depth)
        };
        if !fits {
            log::error!(
                "copy to texture {}: {}x{}x{} at {position} exceeds {dst_width}x{dst_height}x{dst_depth}",
                target.id(),
                src_volume.width(),
                src_volume.height(),
                src_volume.depth()
            );
            return None;
        }

        Some(src_volume)
    }
}
// views
impl Texture {
    /// 获取或创建一个 view；结构相同的 desc 总是返回同一个实例
    ///
    /// desc 超出贴图范围时返回 `None`
    pub fn request_view(&self, desc: TextureViewDesc) -> Option<Arc<TextureView>> {
        if !self.base.check_usable("Texture::request_view") {
            return None;
        }
        let Some(resolved) = desc.resolve(&self.properties) else {
            log::error!("request_view on texture {}: {desc:?} is out of range", self.id());
            return None;
        };

        let mut views = self.views.lock().unwrap();
        let view = views.entry(desc).or_insert_with(|| {
            let view = Arc::new(TextureView::new(self.ctx.registry().generate_id(), self.id(), desc, resolved));
            let (texture_id, view_id) = (self.id(), view.id());
            self.ctx.core_thread().queue_command(move |backend| {
                report_backend_result(
                    backend.create_texture_view(texture_id, view_id, &resolved),
                    "create_texture_view",
                    view_id,
                );
            });
            view
        });
        Some(view.clone())
    }
}
// lock
impl Texture {
    /// 锁定一个 subresource，返回一份可以修改的 CPU 数据
    ///
    /// 读方式会先从 GPU 回读；同一时间只能锁定一个 subresource
    pub fn lock(&self, options: GpuLockOptions, face: u32, mip: u32) -> Option<PixelData> {
        if !self.base.check_usable("Texture::lock") || !self.check_subresource("lock", face, mip) {
            return None;
        }

        let mut lock = self.lock.lock().unwrap();
        if let Some(current) = *lock {
            log::error!(
                "lock on texture {}: already locked (face {}, mip {})",
                self.id(),
                current.face,
                current.mip
            );
            return None;
        }

        let data = if options.reads() {
            self.read_data(face, mip).return_value()?
        } else {
            self.properties.alloc_buffer(face, mip)
        };
        *lock = Some(TextureLock { face, mip, options });
        Some(data)
    }

    /// 解除锁定；写方式会把 `data` 写回被锁定的 subresource
    pub fn unlock(&self, data: &PixelData) -> bool {
        let Some(lock) = self.lock.lock().unwrap().take() else {
            log::error!("unlock on texture {}: texture is not locked", self.id());
            return false;
        };
        if !lock.options.writes() {
            return true;
        }
        let discard = lock.options == GpuLockOptions::WriteDiscard;
        self.write_data(data, lock.face, lock.mip, discard).return_value()
    }
}
impl CoreObject for Texture {
    fn base(&self) -> &CoreObjectBase {
        &self.base
    }

    fn type_name(&self) -> &'static str {
        "Texture"
    }

    fn initialize(&self) {
        let id = self.id();
        let desc = self.properties.desc().clone();
        let initial_data = self.initial_data.clone();
        self.ctx.core_thread().queue_command(move |backend| {
            report_backend_result(backend.create_texture(id, &desc, initial_data.as_ref()), "create_texture", id);
        });
        self.base.initialize(self.type_name());
    }

    /// view 先于贴图释放
    fn destroy(&self) {
        self.base.destroy();

        let views: Vec<Arc<TextureView>> = self.views.lock().unwrap().drain().map(|(_, view)| view).collect();
        for view in views {
            view.release();
            let view_id = view.id();
            self.ctx.core_thread().queue_command(move |backend| backend.destroy_texture_view(view_id));
        }

        let id = self.id();
        self.ctx.core_thread().queue_command(move |backend| backend.destroy_texture(id));
    }
}
