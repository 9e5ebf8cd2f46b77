use std::sync::Arc;

use dualis_core::async_op::AsyncOp;
use dualis_core::core_object::{CoreArc, CoreObject, CoreObjectBase};

use crate::render_context::{RenderContext, report_backend_result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    /// shader 参数块（uniform buffer）
    ParamBlock,
    Generic,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const STATIC = 1 << 0;
        /// 经常修改，写入时允许 discard
        const DYNAMIC = 1 << 1;
        const LOADSTORE = 1 << 2;
        const CPUREADABLE = 1 << 3;
    }
}
impl Default for BufferUsage {
    fn default() -> Self {
        Self::STATIC
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    U32,
}
impl IndexType {
    #[inline]
    pub fn size(self) -> usize {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HardwareBufferDesc {
    pub kind: BufferKind,
    pub element_size: usize,
    pub num_elements: usize,
    /// 字节数，等于 `element_size * num_elements`；乘积溢出时为 0，创建时会被拒绝
    pub size: usize,
    pub usage: BufferUsage,
}
impl HardwareBufferDesc {
    fn new(kind: BufferKind, element_size: usize, num_elements: usize, usage: BufferUsage) -> Self {
        Self {
            kind,
            element_size,
            num_elements,
            size: element_size.checked_mul(num_elements).unwrap_or(0),
            usage,
        }
    }

    pub fn vertex(vertex_size: usize, num_vertices: usize, usage: BufferUsage) -> Self {
        Self::new(BufferKind::Vertex, vertex_size, num_vertices, usage)
    }

    pub fn index(index_type: IndexType, num_indices: usize, usage: BufferUsage) -> Self {
        Self::new(BufferKind::Index, index_type.size(), num_indices, usage)
    }

    pub fn param_block(size: usize, usage: BufferUsage) -> Self {
        Self::new(BufferKind::ParamBlock, size, 1, usage)
    }

    pub fn generic(element_size: usize, num_elements: usize, usage: BufferUsage) -> Self {
        Self::new(BufferKind::Generic, element_size, num_elements, usage)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let Some(expected) = self.element_size.checked_mul(self.num_elements) else {
            anyhow::bail!(
                "{:?} buffer size {} x {} overflows",
                self.kind,
                self.element_size,
                self.num_elements
            );
        };
        anyhow::ensure!(self.size > 0, "{:?} buffer must not be empty", self.kind);
        anyhow::ensure!(
            self.size == expected,
            "{:?} buffer size {} does not match {} x {}",
            self.kind,
            self.size,
            self.element_size,
            self.num_elements
        );
        Ok(())
    }
}

/// GPU 上的一段线性内存
///
/// 所有访问都在 sim 侧做范围检查，越界时记录错误且不产生任何效果
pub struct HardwareBuffer {
    base: CoreObjectBase,
    ctx: Arc<RenderContext>,
    desc: HardwareBufferDesc,
}
// new & init
impl HardwareBuffer {
    pub fn create(ctx: &Arc<RenderContext>, desc: HardwareBufferDesc) -> anyhow::Result<CoreArc<Self>> {
        desc.validate()?;
        Ok(CoreArc::new_initialized(Self {
            base: CoreObjectBase::new(ctx.registry()),
            ctx: ctx.clone(),
            desc,
        }))
    }
}
// getters
impl HardwareBuffer {
    #[inline]
    pub fn desc(&self) -> &HardwareBufferDesc {
        &self.desc
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.desc.size
    }

    fn check_range(&self, operation: &str, offset: usize, len: usize) -> bool {
        let in_range = offset.checked_add(len).is_some_and(|end| end <= self.desc.size);
        if !in_range {
            log::error!(
                "{operation} on buffer {}: range {offset}+{len} exceeds size {}",
                self.id(),
                self.desc.size
            );
        }
        in_range
    }
}
// data access
impl HardwareBuffer {
    /// 写入 `[offset, offset + data.len())`，返回时已经执行完成
    pub fn write_data(&self, offset: usize, data: &[u8], discard: bool) -> AsyncOp<bool> {
        if !self.base.check_usable("HardwareBuffer::write_data") || !self.check_range("write_data", offset, data.len())
        {
            return AsyncOp::completed(false);
        }

        let discard = discard && self.desc.usage.contains(BufferUsage::DYNAMIC);
        let id = self.id();
        let data = data.to_vec();
        let ok = self.ctx.execute_blocking(move |backend| {
            report_backend_result(backend.write_buffer(id, offset, &data, discard), "write_buffer", id)
        });
        AsyncOp::completed(ok)
    }

    /// 读取之前会先提交所有尚未提交的写
    pub fn read_data(&self, offset: usize, len: usize) -> AsyncOp<Option<Vec<u8>>> {
        if !self.base.check_usable("HardwareBuffer::read_data") || !self.check_range("read_data", offset, len) {
            return AsyncOp::completed(None);
        }

        let id = self.id();
        self.ctx.core_thread().queue_return_command(move |backend| {
            backend.flush();
            backend
                .read_buffer(id, offset, len)
                .inspect_err(|err| log::error!("read_buffer failed on core object {id}: {err:#}"))
                .ok()
        })
    }

    /// 从 `src` 拷贝 `len` 字节，返回是否成功
    pub fn copy_data(&self, src: &HardwareBuffer, src_offset: usize, dst_offset: usize, len: usize) -> bool {
        if !self.base.check_usable("HardwareBuffer::copy_data") || !src.base.check_usable("HardwareBuffer::copy_data")
        {
            return false;
        }
        if !src.check_range("copy_data (source)", src_offset, len) || !self.check_range("copy_data", dst_offset, len) {
            return false;
        }

        let (src_id, dst_id) = (src.id(), self.id());
        self.ctx.execute_blocking(move |backend| {
            report_backend_result(
                backend.copy_buffer(src_id, dst_id, src_offset, dst_offset, len),
                "copy_buffer",
                dst_id,
            )
        })
    }
}
impl CoreObject for HardwareBuffer {
    fn base(&self) -> &CoreObjectBase {
        &self.base
    }

    fn type_name(&self) -> &'static str {
        "HardwareBuffer"
    }

    fn initialize(&self) {
        let (id, desc) = (self.id(), self.desc.clone());
        self.ctx.core_thread().queue_command(move |backend| {
            report_backend_result(backend.create_buffer(id, &desc), "create_buffer", id);
        });
        self.base.initialize(self.type_name());
    }

    fn destroy(&self) {
        self.base.destroy();
        let id = self.id();
        self.ctx.core_thread().queue_command(move |backend| backend.destroy_buffer(id));
    }
}
