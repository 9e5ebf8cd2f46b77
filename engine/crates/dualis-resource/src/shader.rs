use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use dualis_core::core_object::{CoreArc, CoreDirtyFlags, CoreObject, CoreObjectBase};

use crate::backend::BackendCapabilities;
use crate::render_context::RenderContext;

/// 一个 pass 的描述，着色器源码只作为不透明的字符串保存
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassDesc {
    pub name: String,
    pub vertex_program: String,
    pub fragment_program: String,
    pub blend_enabled: bool,
    pub depth_write: bool,
}

pub struct Pass {
    base: CoreObjectBase,
    desc: Mutex<PassDesc>,
}
impl Pass {
    pub fn create(ctx: &Arc<RenderContext>, desc: PassDesc) -> CoreArc<Self> {
        CoreArc::new_initialized(Self {
            base: CoreObjectBase::new(ctx.registry()),
            desc: Mutex::new(desc),
        })
    }

    pub fn desc(&self) -> PassDesc {
        self.desc.lock().unwrap().clone()
    }

    /// 替换程序，依赖这个 pass 的 technique / shader 都会变 dirty
    pub fn set_programs(&self, vertex_program: impl Into<String>, fragment_program: impl Into<String>) {
        if !self.base.check_usable("Pass::set_programs") {
            return;
        }
        {
            let mut desc = self.desc.lock().unwrap();
            desc.vertex_program = vertex_program.into();
            desc.fragment_program = fragment_program.into();
        }
        self.mark_core_dirty(CoreDirtyFlags::PROPERTIES);
    }
}
impl CoreObject for Pass {
    fn base(&self) -> &CoreObjectBase {
        &self.base
    }

    fn type_name(&self) -> &'static str {
        "Pass"
    }
}

/// 一组 pass，面向某种着色语言
pub struct Technique {
    base: CoreObjectBase,
    language: String,
    tags: Vec<String>,
    passes: Vec<CoreArc<Pass>>,
}
impl Technique {
    pub fn create(
        ctx: &Arc<RenderContext>,
        language: impl Into<String>,
        tags: Vec<String>,
        passes: Vec<CoreArc<Pass>>,
    ) -> CoreArc<Self> {
        let technique = CoreArc::new_initialized(Self {
            base: CoreObjectBase::new(ctx.registry()),
            language: language.into(),
            tags,
            passes,
        });
        technique.mark_dependencies_dirty();
        technique
    }

    #[inline]
    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    #[inline]
    pub fn num_passes(&self) -> usize {
        self.passes.len()
    }

    pub fn get_pass(&self, idx: usize) -> anyhow::Result<&CoreArc<Pass>> {
        self.passes.get(idx).ok_or_else(|| {
            anyhow::anyhow!("pass index {idx} out of range, technique {} has {} pass(es)", self.id(), self.passes.len())
        })
    }

    /// 当前后端是否能运行这个 technique
    pub fn is_supported(&self, capabilities: &BackendCapabilities) -> bool {
        capabilities.supports_language(&self.language)
    }
}
impl CoreObject for Technique {
    fn base(&self) -> &CoreObjectBase {
        &self.base
    }

    fn type_name(&self) -> &'static str {
        "Technique"
    }

    fn core_dependencies(&self) -> Vec<Arc<dyn CoreObject>> {
        self.passes.iter().map(CoreArc::as_dyn).collect()
    }
}

/// 按后端能力和 tag 挑选 technique 的着色器
pub struct Shader {
    base: CoreObjectBase,
    name: String,
    techniques: Mutex<Vec<CoreArc<Technique>>>,
    /// 每次重新编译加一
    version: AtomicU32,
}
// new & init
impl Shader {
    pub fn create(ctx: &Arc<RenderContext>, name: impl Into<String>, techniques: Vec<CoreArc<Technique>>) -> CoreArc<Self> {
        let shader = CoreArc::new_initialized(Self {
            base: CoreObjectBase::new(ctx.registry()),
            name: name.into(),
            techniques: Mutex::new(techniques),
            version: AtomicU32::new(0),
        });
        shader.mark_dependencies_dirty();
        shader
    }
}
// getters
impl Shader {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    pub fn techniques(&self) -> Vec<CoreArc<Technique>> {
        self.techniques.lock().unwrap().clone()
    }

    /// 第一个被后端支持、并且带有全部 `tags` 的 technique
    pub fn best_technique(&self, capabilities: &BackendCapabilities, tags: &[&str]) -> Option<CoreArc<Technique>> {
        self.techniques
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.is_supported(capabilities) && tags.iter().all(|tag| t.has_tag(tag)))
            .cloned()
    }
}
impl Shader {
    pub fn set_techniques(&self, techniques: Vec<CoreArc<Technique>>) {
        if !self.base.check_usable("Shader::set_techniques") {
            return;
        }
        *self.techniques.lock().unwrap() = techniques;
        self.mark_dependencies_dirty();
        self.mark_core_dirty(CoreDirtyFlags::PROPERTIES);
    }

    /// 重新编译后，所有依赖这个 shader 的对象在下一次同步时重建
    pub fn recompile(&self) {
        if !self.base.check_usable("Shader::recompile") {
            return;
        }
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        log::info!("shader '{}' recompiled, version {version}", self.name);
        self.mark_core_dirty(CoreDirtyFlags::PROPERTIES);
    }
}
impl CoreObject for Shader {
    fn base(&self) -> &CoreObjectBase {
        &self.base
    }

    fn type_name(&self) -> &'static str {
        "Shader"
    }

    fn core_dependencies(&self) -> Vec<Arc<dyn CoreObject>> {
        self.techniques.lock().unwrap().iter().map(CoreArc::as_dyn).collect()
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    /// 一个 hlsl technique（带 "forward" tag）和一个 metal technique
    pub fn forward_shader(ctx: &Arc<RenderContext>) -> CoreArc<Shader> {
        let pass = Pass::create(
            ctx,
            PassDesc {
                name: "forward".to_string(),
                depth_write: true,
                ..Default::default()
            },
        );
        let hlsl = Technique::create(ctx, "hlsl", vec!["forward".to_string()], vec![pass]);
        let metal = Technique::create(ctx, "metal", vec!["forward".to_string()], Vec::new());
        Shader::create(ctx, "forward", vec![metal, hlsl])
    }
}
