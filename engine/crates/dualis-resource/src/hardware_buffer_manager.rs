use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dualis_core::core_object::CoreArc;

use crate::gpu_param_block::GpuParamBlockBuffer;
use crate::hardware_buffer::{BufferUsage, HardwareBuffer, HardwareBufferDesc, IndexType};
use crate::render_context::RenderContext;
use crate::vertex_declaration::{VertexDataDesc, VertexDeclaration, VertexElement};

/// 创建各种 buffer，并按元素列表缓存 [`VertexDeclaration`]
pub struct HardwareBufferManager {
    ctx: Arc<RenderContext>,
    declarations: Mutex<HashMap<Vec<VertexElement>, Arc<VertexDeclaration>>>,
}
impl HardwareBufferManager {
    pub fn new(ctx: &Arc<RenderContext>) -> Self {
        Self {
            ctx: ctx.clone(),
            declarations: Mutex::new(HashMap::new()),
        }
    }
}
// getters
impl HardwareBufferManager {
    #[inline]
    pub fn ctx(&self) -> &Arc<RenderContext> {
        &self.ctx
    }
}
// Subsystem API
impl HardwareBufferManager {
    pub fn create_vertex_buffer(
        &self,
        vertex_size: usize,
        num_vertices: usize,
        usage: BufferUsage,
    ) -> anyhow::Result<CoreArc<HardwareBuffer>> {
        HardwareBuffer::create(&self.ctx, HardwareBufferDesc::vertex(vertex_size, num_vertices, usage))
    }

    pub fn create_index_buffer(
        &self,
        index_type: IndexType,
        num_indices: usize,
        usage: BufferUsage,
    ) -> anyhow::Result<CoreArc<HardwareBuffer>> {
        HardwareBuffer::create(&self.ctx, HardwareBufferDesc::index(index_type, num_indices, usage))
    }

    pub fn create_generic_buffer(&self, desc: HardwareBufferDesc) -> anyhow::Result<CoreArc<HardwareBuffer>> {
        HardwareBuffer::create(&self.ctx, desc)
    }

    pub fn create_param_block_buffer(
        &self,
        size: usize,
        usage: BufferUsage,
    ) -> anyhow::Result<CoreArc<GpuParamBlockBuffer>> {
        GpuParamBlockBuffer::create(&self.ctx, size, usage)
    }

    /// 相同元素列表返回同一个声明
    pub fn create_vertex_declaration(&self, desc: &VertexDataDesc) -> Arc<VertexDeclaration> {
        let mut declarations = self.declarations.lock().unwrap();
        declarations
            .entry(desc.elements().to_vec())
            .or_insert_with(|| Arc::new(VertexDeclaration::new(self.ctx.registry().generate_id(), desc.clone())))
            .clone()
    }

    #[inline]
    pub fn vertex_declaration_count(&self) -> usize {
        self.declarations.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_context::test_utils::soft_context;
    use crate::vertex_declaration::{VertexElementSemantic, VertexElementType};

    #[test]
    fn test_vertex_declaration_cache() {
        let (ctx, _) = soft_context();
        let manager = HardwareBufferManager::new(&ctx);

        let position =
            VertexDataDesc::new().add_element(VertexElementType::Float3, VertexElementSemantic::Position, 0);
        let with_uv = position.clone().add_element(VertexElementType::Float2, VertexElementSemantic::TexCoord, 0);

        let a = manager.create_vertex_declaration(&position);
        let b = manager.create_vertex_declaration(&position.clone());
        let c = manager.create_vertex_declaration(&with_uv);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_ne!(a.id(), c.id());
        assert_eq!(manager.vertex_declaration_count(), 2);

        drop(manager);
        ctx.shutdown();
    }

    #[test]
    fn test_create_buffers() {
        let (ctx, _) = soft_context();
        let manager = HardwareBufferManager::new(&ctx);

        let vb = manager.create_vertex_buffer(32, 3, BufferUsage::STATIC).unwrap();
        let ib = manager.create_index_buffer(IndexType::U32, 3, BufferUsage::STATIC).unwrap();
        let pb = manager.create_param_block_buffer(64, BufferUsage::DYNAMIC).unwrap();
        assert_eq!((vb.size(), ib.size(), pb.size()), (96, 12, 64));
        assert_eq!(ctx.registry().object_count(), 4);

        drop((vb, ib, pb));
        assert_eq!(ctx.registry().object_count(), 0);
        ctx.shutdown();
    }
}
