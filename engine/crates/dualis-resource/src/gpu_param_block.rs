use std::sync::{Arc, Mutex};

use dualis_core::core_object::{CoreArc, CoreDirtyFlags, CoreObject, CoreObjectBase};

use crate::hardware_buffer::{BufferUsage, HardwareBuffer, HardwareBufferDesc};
use crate::render_context::RenderContext;

/// shader 参数块
///
/// sim 侧保留一份 staging 数据，修改只标记 dirty；同步阶段或显式调用 `flush_to_gpu` 时整体上传
pub struct GpuParamBlockBuffer {
    base: CoreObjectBase,
    buffer: CoreArc<HardwareBuffer>,
    staging: Mutex<Vec<u8>>,
}
// new & init
impl GpuParamBlockBuffer {
    pub fn create(ctx: &Arc<RenderContext>, size: usize, usage: BufferUsage) -> anyhow::Result<CoreArc<Self>> {
        let buffer = HardwareBuffer::create(ctx, HardwareBufferDesc::param_block(size, usage))?;
        Ok(CoreArc::new_initialized(Self {
            base: CoreObjectBase::new(ctx.registry()),
            buffer,
            staging: Mutex::new(vec![0; size]),
        }))
    }
}
// getters
impl GpuParamBlockBuffer {
    #[inline]
    pub fn size(&self) -> usize {
        self.buffer.size()
    }

    #[inline]
    pub fn buffer(&self) -> &CoreArc<HardwareBuffer> {
        &self.buffer
    }
}
// staging
impl GpuParamBlockBuffer {
    /// 写入 staging 数据，越界时记录错误并忽略
    pub fn write(&self, offset: usize, data: &[u8]) {
        if !self.base.check_usable("GpuParamBlockBuffer::write") {
            return;
        }
        {
            let mut staging = self.staging.lock().unwrap();
            let size = staging.len();
            let Some(dst) = offset.checked_add(data.len()).and_then(|end| staging.get_mut(offset..end)) else {
                log::error!(
                    "param block {}: write {offset}+{} exceeds size {}",
                    self.id(),
                    data.len(),
                    size
                );
                return;
            };
            dst.copy_from_slice(data);
        }
        self.mark_core_dirty(CoreDirtyFlags::DATA);
    }

    /// 写入一个 POD 值
    pub fn write_pod<T: bytemuck::Pod>(&self, offset: usize, value: &T) {
        self.write(offset, bytemuck::bytes_of(value));
    }

    /// 从 staging 读取，越界返回 `None`
    pub fn read(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        let staging = self.staging.lock().unwrap();
        let bytes = offset.checked_add(len).and_then(|end| staging.get(offset..end));
        if bytes.is_none() {
            log::error!("param block {}: read {offset}+{len} exceeds size {}", self.id(), staging.len());
        }
        bytes.map(<[u8]>::to_vec)
    }

    pub fn zero_out(&self) {
        if !self.base.check_usable("GpuParamBlockBuffer::zero_out") {
            return;
        }
        self.staging.lock().unwrap().fill(0);
        self.mark_core_dirty(CoreDirtyFlags::DATA);
    }

    /// 立即上传 staging 数据，返回时已经写入
    pub fn flush_to_gpu(&self) -> bool {
        if !self.base.check_usable("GpuParamBlockBuffer::flush_to_gpu") {
            return false;
        }
        let data = self.staging.lock().unwrap().clone();
        self.buffer.write_data(0, &data, true).return_value()
    }
}
impl CoreObject for GpuParamBlockBuffer {
    fn base(&self) -> &CoreObjectBase {
        &self.base
    }

    fn type_name(&self) -> &'static str {
        "GpuParamBlockBuffer"
    }

    fn destroy(&self) {
        self.base.destroy();
        self.buffer.destroy();
    }

    fn sync_to_core(&self, flags: CoreDirtyFlags) {
        if flags.contains(CoreDirtyFlags::DATA) {
            self.flush_to_gpu();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_context::test_utils::soft_context;

    #[test]
    fn test_sync_uploads_staging() {
        let (ctx, _) = soft_context();
        let block = GpuParamBlockBuffer::create(&ctx, 16, BufferUsage::DYNAMIC).unwrap();

        block.write_pod(4, &7u32);
        assert!(block.base().is_dirty());
        assert_eq!(block.read(4, 4), Some(7u32.to_ne_bytes().to_vec()));
        assert_eq!(block.buffer().read_data(4, 4).return_value(), Some(vec![0; 4]));

        assert_eq!(ctx.sync_dirty_objects(), 1);
        assert!(!block.base().is_dirty());
        assert_eq!(block.buffer().read_data(4, 4).return_value(), Some(7u32.to_ne_bytes().to_vec()));

        block.zero_out();
        assert!(block.flush_to_gpu());
        assert_eq!(block.buffer().read_data(0, 16).return_value(), Some(vec![0; 16]));

        drop(block);
        ctx.shutdown();
    }

    #[test]
    fn test_out_of_range_write_is_ignored() {
        let (ctx, _) = soft_context();
        let block = GpuParamBlockBuffer::create(&ctx, 8, BufferUsage::default()).unwrap();

        block.write(6, &[1, 2, 3, 4]);
        assert!(!block.base().is_dirty());
        assert_eq!(block.read(6, 4), None);
        assert_eq!(block.read(0, 8), Some(vec![0; 8]));

        drop(block);
        ctx.shutdown();
    }
}
