use std::sync::Arc;

use dualis_core::async_op::AsyncOp;
use dualis_core::core_object::{CoreArc, CoreDirtyFlags, CoreObject, CoreObjectBase};

use crate::hardware_buffer::{BufferUsage, HardwareBuffer, IndexType};
use crate::hardware_buffer_manager::HardwareBufferManager;
use crate::render_context::RenderContext;
use crate::vertex_declaration::{VertexDataDesc, VertexDeclaration};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DrawOperation {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// 一次 draw call 使用的索引范围
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubMesh {
    pub index_offset: u32,
    pub index_count: u32,
    pub draw_op: DrawOperation,
}
impl SubMesh {
    pub fn new(index_offset: u32, index_count: u32, draw_op: DrawOperation) -> Self {
        Self {
            index_offset,
            index_count,
            draw_op,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeshDesc {
    pub num_vertices: u32,
    pub num_indices: u32,
    pub index_type: IndexType,
    pub vertex_desc: VertexDataDesc,
    /// 为空时整个索引范围作为一个 `TriangleList`
    pub sub_meshes: Vec<SubMesh>,
    pub usage: BufferUsage,
}
impl MeshDesc {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.num_vertices > 0, "mesh needs at least one vertex");
        anyhow::ensure!(self.num_indices > 0, "mesh needs at least one index");
        anyhow::ensure!(self.vertex_desc.vertex_stride(0) > 0, "mesh vertex layout is empty");
        if let Some(sub_mesh) =
            self.sub_meshes.iter().find(|s| s.index_offset.saturating_add(s.index_count) > self.num_indices)
        {
            anyhow::bail!("sub mesh {sub_mesh:?} exceeds {} indices", self.num_indices);
        }
        Ok(())
    }
}

pub struct MeshProperties {
    desc: MeshDesc,
}
impl MeshProperties {
    fn new(mut desc: MeshDesc) -> Self {
        if desc.sub_meshes.is_empty() {
            desc.sub_meshes.push(SubMesh::new(0, desc.num_indices, DrawOperation::TriangleList));
        }
        Self { desc }
    }

    #[inline]
    pub fn num_vertices(&self) -> u32 {
        self.desc.num_vertices
    }

    #[inline]
    pub fn num_indices(&self) -> u32 {
        self.desc.num_indices
    }

    #[inline]
    pub fn index_type(&self) -> IndexType {
        self.desc.index_type
    }

    #[inline]
    pub fn vertex_desc(&self) -> &VertexDataDesc {
        &self.desc.vertex_desc
    }

    #[inline]
    pub fn num_sub_meshes(&self) -> usize {
        self.desc.sub_meshes.len()
    }

    /// 越界时记录错误并返回 `None`
    pub fn sub_mesh(&self, idx: usize) -> Option<&SubMesh> {
        let sub_mesh = self.desc.sub_meshes.get(idx);
        if sub_mesh.is_none() {
            log::error!("invalid sub mesh index {idx}, mesh has {} sub mesh(es)", self.desc.sub_meshes.len());
        }
        sub_mesh
    }
}

/// mesh 的 CPU 侧数据，顶点按 stream 0 的布局紧密排列
#[derive(Clone, Debug, PartialEq)]
pub struct MeshData {
    vertex_desc: VertexDataDesc,
    index_type: IndexType,
    num_vertices: u32,
    num_indices: u32,

    vertices: Vec<u8>,
    indices: Vec<u8>,
}
// new & init
impl MeshData {
    pub fn new(num_vertices: u32, num_indices: u32, vertex_desc: VertexDataDesc, index_type: IndexType) -> Self {
        let stride = vertex_desc.vertex_stride(0) as usize;
        Self {
            vertices: vec![0; stride * num_vertices as usize],
            indices: vec![0; index_type.size() * num_indices as usize],
            vertex_desc,
            index_type,
            num_vertices,
            num_indices,
        }
    }
}
// getters
impl MeshData {
    #[inline]
    pub fn num_vertices(&self) -> u32 {
        self.num_vertices
    }

    #[inline]
    pub fn num_indices(&self) -> u32 {
        self.num_indices
    }

    #[inline]
    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    #[inline]
    pub fn vertex_desc(&self) -> &VertexDataDesc {
        &self.vertex_desc
    }

    #[inline]
    pub fn vertex_bytes(&self) -> &[u8] {
        &self.vertices
    }

    #[inline]
    pub fn index_bytes(&self) -> &[u8] {
        &self.indices
    }

    pub fn indices(&self) -> Vec<u32> {
        match self.index_type {
            IndexType::U16 => {
                self.indices.chunks_exact(2).map(|c| u32::from(u16::from_ne_bytes([c[0], c[1]]))).collect()
            }
            IndexType::U32 => {
                self.indices.chunks_exact(4).map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]])).collect()
            }
        }
    }
}
// tools
impl MeshData {
    /// 写入全部顶点，`T` 的大小必须与顶点 stride 一致
    pub fn set_vertices<T: bytemuck::Pod>(&mut self, vertices: &[T]) -> anyhow::Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        anyhow::ensure!(
            bytes.len() == self.vertices.len(),
            "expected {} vertex bytes, got {}",
            self.vertices.len(),
            bytes.len()
        );
        self.vertices.copy_from_slice(bytes);
        Ok(())
    }

    /// 写入全部索引，按 `index_type` 打包；越过顶点数量的索引视为错误
    pub fn set_indices(&mut self, indices: &[u32]) -> anyhow::Result<()> {
        anyhow::ensure!(
            indices.len() == self.num_indices as usize,
            "expected {} indices, got {}",
            self.num_indices,
            indices.len()
        );
        if let Some(bad) = indices.iter().find(|i| **i >= self.num_vertices) {
            anyhow::bail!("index {bad} out of range for {} vertices", self.num_vertices);
        }

        self.indices = match self.index_type {
            IndexType::U16 => {
                let packed = indices
                    .iter()
                    .map(|i| u16::try_from(*i))
                    .collect::<Result<Vec<u16>, _>>()
                    .map_err(|_| anyhow::anyhow!("index does not fit into u16"))?;
                bytemuck::cast_slice(&packed).to_vec()
            }
            IndexType::U32 => bytemuck::cast_slice(indices).to_vec(),
        };
        Ok(())
    }
}

/// 一个 vertex buffer 和一个 index buffer，两者都是它的 core 依赖
pub struct Mesh {
    base: CoreObjectBase,
    ctx: Arc<RenderContext>,

    properties: MeshProperties,
    vertex_declaration: Arc<VertexDeclaration>,

    vertex_buffer: CoreArc<HardwareBuffer>,
    index_buffer: CoreArc<HardwareBuffer>,
}
// new & init
impl Mesh {
    pub fn create(buffer_manager: &HardwareBufferManager, desc: MeshDesc) -> anyhow::Result<CoreArc<Self>> {
        desc.validate()?;

        let ctx = buffer_manager.ctx();
        let vertex_declaration = buffer_manager.create_vertex_declaration(&desc.vertex_desc);
        let vertex_buffer = buffer_manager.create_vertex_buffer(
            desc.vertex_desc.vertex_stride(0) as usize,
            desc.num_vertices as usize,
            desc.usage,
        )?;
        let index_buffer =
            buffer_manager.create_index_buffer(desc.index_type, desc.num_indices as usize, desc.usage)?;

        let mesh = CoreArc::new_initialized(Self {
            base: CoreObjectBase::new(ctx.registry()),
            ctx: ctx.clone(),
            properties: MeshProperties::new(desc),
            vertex_declaration,
            vertex_buffer,
            index_buffer,
        });
        mesh.mark_dependencies_dirty();
        Ok(mesh)
    }

    /// 创建并上传初始数据
    pub fn create_with_data(
        buffer_manager: &HardwareBufferManager,
        data: &MeshData,
        sub_meshes: Vec<SubMesh>,
        usage: BufferUsage,
    ) -> anyhow::Result<CoreArc<Self>> {
        let mesh = Self::create(
            buffer_manager,
            MeshDesc {
                num_vertices: data.num_vertices(),
                num_indices: data.num_indices(),
                index_type: data.index_type(),
                vertex_desc: data.vertex_desc().clone(),
                sub_meshes,
                usage,
            },
        )?;
        anyhow::ensure!(mesh.write_data(data, false).return_value(), "failed to upload mesh {} data", mesh.id());
        Ok(mesh)
    }
}
// getters
impl Mesh {
    #[inline]
    pub fn properties(&self) -> &MeshProperties {
        &self.properties
    }

    #[inline]
    pub fn vertex_declaration(&self) -> &Arc<VertexDeclaration> {
        &self.vertex_declaration
    }

    #[inline]
    pub fn vertex_buffer(&self) -> &CoreArc<HardwareBuffer> {
        &self.vertex_buffer
    }

    #[inline]
    pub fn index_buffer(&self) -> &CoreArc<HardwareBuffer> {
        &self.index_buffer
    }
}
// data access
impl Mesh {
    /// 上传顶点和索引，返回时已经执行完成；成功后通知依赖这个 mesh 的对象
    pub fn write_data(&self, data: &MeshData, discard: bool) -> AsyncOp<bool> {
        if !self.base.check_usable("Mesh::write_data") {
            return AsyncOp::completed(false);
        }
        let props = &self.properties;
        if data.num_vertices() != props.num_vertices()
            || data.num_indices() != props.num_indices()
            || data.index_type() != props.index_type()
            || data.vertex_desc() != props.vertex_desc()
        {
            log::error!(
                "write_data on mesh {}: expected {} vertices / {} {:?} indices, got {} / {} {:?}",
                self.id(),
                props.num_vertices(),
                props.num_indices(),
                props.index_type(),
                data.num_vertices(),
                data.num_indices(),
                data.index_type()
            );
            return AsyncOp::completed(false);
        }

        let ok = self.vertex_buffer.write_data(0, data.vertex_bytes(), discard).return_value()
            && self.index_buffer.write_data(0, data.index_bytes(), discard).return_value();
        if ok {
            self.mark_core_dirty(CoreDirtyFlags::DATA);
        }
        AsyncOp::completed(ok)
    }

    /// 在一条 core 命令里回读顶点和索引
    pub fn read_data(&self) -> AsyncOp<Option<MeshData>> {
        if !self.base.check_usable("Mesh::read_data") {
            return AsyncOp::completed(None);
        }

        let mut data = MeshData::new(
            self.properties.num_vertices(),
            self.properties.num_indices(),
            self.properties.vertex_desc().clone(),
            self.properties.index_type(),
        );
        let (vb, ib) = (self.vertex_buffer.id(), self.index_buffer.id());
        let (vb_len, ib_len) = (data.vertices.len(), data.indices.len());
        self.ctx.core_thread().queue_return_command(move |backend| {
            backend.flush();
            let result = backend.read_buffer(vb, 0, vb_len).and_then(|vertices| {
                let indices = backend.read_buffer(ib, 0, ib_len)?;
                Ok((vertices, indices))
            });
            match result {
                Ok((vertices, indices)) => {
                    data.vertices = vertices;
                    data.indices = indices;
                    Some(data)
                }
                Err(err) => {
                    log::error!("mesh read back failed: {err:#}");
                    None
                }
            }
        })
    }
}
impl CoreObject for Mesh {
    fn base(&self) -> &CoreObjectBase {
        &self.base
    }

    fn type_name(&self) -> &'static str {
        "Mesh"
    }

    fn destroy(&self) {
        self.base.destroy();
        self.vertex_buffer.destroy();
        self.index_buffer.destroy();
    }

    fn core_dependencies(&self) -> Vec<Arc<dyn CoreObject>> {
        vec![self.vertex_buffer.as_dyn(), self.index_buffer.as_dyn()]
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::vertex_declaration::{VertexElementSemantic, VertexElementType};

    /// 一个 position + uv 的四边形
    pub fn quad_data() -> MeshData {
        let desc = VertexDataDesc::new()
            .add_element(VertexElementType::Float3, VertexElementSemantic::Position, 0)
            .add_element(VertexElementType::Float2, VertexElementSemantic::TexCoord, 0);
        let mut data = MeshData::new(4, 6, desc, IndexType::U16);

        let vertices: [[f32; 5]; 4] = [
            [-1.0, -1.0, 0.0, 0.0, 1.0],
            [1.0, -1.0, 0.0, 1.0, 1.0],
            [1.0, 1.0, 0.0, 1.0, 0.0],
            [-1.0, 1.0, 0.0, 0.0, 0.0],
        ];
        data.set_vertices(&vertices).unwrap();
        data.set_indices(&[0, 1, 2, 0, 2, 3]).unwrap();
        data
    }
}
