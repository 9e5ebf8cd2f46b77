use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use dualis_core::core_object::{CoreArc, CoreDirtyFlags, CoreObject, CoreObjectBase, CoreObjectId};
use itertools::Itertools;

use crate::material::Material;
use crate::mesh::{Mesh, SubMesh};
use crate::render_context::RenderContext;

/// 一个 sub mesh 的 draw call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawCommand {
    pub sub_mesh: SubMesh,
    pub material: CoreObjectId,
    /// 材质当前没有可用 technique 时为 `None`，这个 draw call 会被跳过
    pub technique: Option<CoreObjectId>,
}

/// 由 mesh 和材质派生出的 core 侧状态，每次同步整体重建
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrawState {
    pub mesh: Option<CoreObjectId>,
    pub commands: Vec<DrawCommand>,
}

/// 场景中可以绘制的对象，依赖它的 mesh 和所有材质
///
/// 第 i 个 sub mesh 使用第 i 个材质，材质不足时使用最后一个
pub struct Renderable {
    base: CoreObjectBase,

    mesh: Mutex<Option<CoreArc<Mesh>>>,
    materials: Mutex<Vec<CoreArc<Material>>>,

    draw_state: Mutex<DrawState>,
    /// draw state 被重建的次数
    version: AtomicU32,
}
// new & init
impl Renderable {
    pub fn create(
        ctx: &Arc<RenderContext>,
        mesh: Option<CoreArc<Mesh>>,
        materials: Vec<CoreArc<Material>>,
    ) -> CoreArc<Self> {
        let renderable = CoreArc::new_initialized(Self {
            base: CoreObjectBase::new(ctx.registry()),
            mesh: Mutex::new(mesh),
            materials: Mutex::new(materials),
            draw_state: Mutex::new(DrawState::default()),
            version: AtomicU32::new(0),
        });
        renderable.mark_dependencies_dirty();
        renderable.mark_core_dirty(CoreDirtyFlags::PROPERTIES);
        renderable
    }
}
// getters
impl Renderable {
    pub fn draw_state(&self) -> DrawState {
        self.draw_state.lock().unwrap().clone()
    }

    #[inline]
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }
}
impl Renderable {
    pub fn set_mesh(&self, mesh: Option<CoreArc<Mesh>>) {
        if !self.base.check_usable("Renderable::set_mesh") {
            return;
        }
        *self.mesh.lock().unwrap() = mesh;
        self.mark_dependencies_dirty();
        self.mark_core_dirty(CoreDirtyFlags::PROPERTIES);
    }

    pub fn set_materials(&self, materials: Vec<CoreArc<Material>>) {
        if !self.base.check_usable("Renderable::set_materials") {
            return;
        }
        *self.materials.lock().unwrap() = materials;
        self.mark_dependencies_dirty();
        self.mark_core_dirty(CoreDirtyFlags::PROPERTIES);
    }

    fn build_draw_state(&self) -> DrawState {
        let mesh = self.mesh.lock().unwrap().clone();
        let materials = self.materials.lock().unwrap().clone();
        let (Some(mesh), Some(last_material)) = (mesh, materials.last()) else {
            return DrawState::default();
        };

        let props = mesh.properties();
        let commands = (0..props.num_sub_meshes())
            .filter_map(|idx| {
                let sub_mesh = *props.sub_mesh(idx)?;
                let material = materials.get(idx).unwrap_or(last_material);
                Some(DrawCommand {
                    sub_mesh,
                    material: material.id(),
                    technique: material.active_technique(),
                })
            })
            .collect_vec();
        DrawState {
            mesh: Some(mesh.id()),
            commands,
        }
    }
}
impl CoreObject for Renderable {
    fn base(&self) -> &CoreObjectBase {
        &self.base
    }

    fn type_name(&self) -> &'static str {
        "Renderable"
    }

    fn core_dependencies(&self) -> Vec<Arc<dyn CoreObject>> {
        let mut dependencies: Vec<Arc<dyn CoreObject>> = self.mesh.lock().unwrap().iter().map(CoreArc::as_dyn).collect();
        dependencies.extend(self.materials.lock().unwrap().iter().map(CoreArc::as_dyn));
        dependencies
    }

    /// 不做细粒度比较，整体重建
    fn sync_to_core(&self, _flags: CoreDirtyFlags) {
        let draw_state = self.build_draw_state();
        *self.draw_state.lock().unwrap() = draw_state;
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}
