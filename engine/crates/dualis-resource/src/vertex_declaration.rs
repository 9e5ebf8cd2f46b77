use dualis_core::core_object::CoreObjectId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexElementType {
    Float1,
    Float2,
    Float3,
    Float4,
    UByte4Norm,
    UInt1,
    UInt4,
}
impl VertexElementType {
    pub fn size(self) -> u32 {
        match self {
            Self::Float1 | Self::UByte4Norm | Self::UInt1 => 4,
            Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 | Self::UInt4 => 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexElementSemantic {
    Position,
    Normal,
    Tangent,
    Color,
    TexCoord,
    BlendIndices,
    BlendWeights,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexElement {
    pub stream: u32,
    pub offset: u32,
    pub ty: VertexElementType,
    pub semantic: VertexElementSemantic,
    /// 同一语义出现多次时的序号，例如第二套 uv
    pub semantic_idx: u32,
}

/// 按顺序描述一个顶点的布局，offset 自动累加
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexDataDesc {
    elements: Vec<VertexElement>,
}
impl VertexDataDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_element(mut self, ty: VertexElementType, semantic: VertexElementSemantic, semantic_idx: u32) -> Self {
        self.add_element_to_stream(0, ty, semantic, semantic_idx);
        self
    }

    pub fn add_element_to_stream(
        &mut self,
        stream: u32,
        ty: VertexElementType,
        semantic: VertexElementSemantic,
        semantic_idx: u32,
    ) {
        let offset = self.vertex_stride(stream);
        self.elements.push(VertexElement {
            stream,
            offset,
            ty,
            semantic,
            semantic_idx,
        });
    }

    /// 某个 stream 中一个顶点的字节数
    pub fn vertex_stride(&self, stream: u32) -> u32 {
        self.elements.iter().filter(|e| e.stream == stream).map(|e| e.ty.size()).sum()
    }

    pub fn has_element(&self, semantic: VertexElementSemantic, semantic_idx: u32) -> bool {
        self.elements.iter().any(|e| e.semantic == semantic && e.semantic_idx == semantic_idx)
    }

    #[inline]
    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }
}

/// 不可变的顶点布局，由 [`crate::hardware_buffer_manager::HardwareBufferManager`] 按元素列表去重缓存
#[derive(Debug)]
pub struct VertexDeclaration {
    id: CoreObjectId,
    properties: VertexDataDesc,
}
impl VertexDeclaration {
    pub(crate) fn new(id: CoreObjectId, properties: VertexDataDesc) -> Self {
        Self { id, properties }
    }

    #[inline]
    pub fn id(&self) -> CoreObjectId {
        self.id
    }

    #[inline]
    pub fn properties(&self) -> &VertexDataDesc {
        &self.properties
    }

    #[inline]
    pub fn elements(&self) -> &[VertexElement] {
        self.properties.elements()
    }
}
