use std::sync::Arc;

use dualis_core::core_object::{CoreArc, CoreObject, CoreObjectBase};

use crate::render_context::{RenderContext, report_backend_result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GpuQueueType {
    #[default]
    Graphics,
    Compute,
    Transfer,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandBufferDesc {
    pub queue_type: GpuQueueType,
    pub queue_index: u32,
    /// secondary command buffer 只能在 primary 中执行
    pub secondary: bool,
}

/// 记录 GPU 命令的容器，提交后由后端按队列顺序执行
pub struct CommandBuffer {
    base: CoreObjectBase,
    ctx: Arc<RenderContext>,
    desc: CommandBufferDesc,
}
// new & init
impl CommandBuffer {
    /// 后端不支持 secondary command buffer 时返回错误
    pub fn create(ctx: &Arc<RenderContext>, desc: CommandBufferDesc) -> anyhow::Result<CoreArc<Self>> {
        if desc.secondary && !ctx.capabilities().supports_secondary_command_buffers {
            anyhow::bail!("backend '{}' does not support secondary command buffers", ctx.backend_name());
        }

        Ok(CoreArc::new_initialized(Self {
            base: CoreObjectBase::new(ctx.registry()),
            ctx: ctx.clone(),
            desc,
        }))
    }
}
// getters
impl CommandBuffer {
    #[inline]
    pub fn desc(&self) -> &CommandBufferDesc {
        &self.desc
    }
}
impl CommandBuffer {
    /// 提交到 core 线程，不等待执行
    pub fn submit(&self) {
        if !self.base.check_usable("CommandBuffer::submit") {
            return;
        }
        let id = self.id();
        self.ctx.core_thread().queue_command(move |backend| {
            report_backend_result(backend.submit_command_buffer(id), "submit_command_buffer", id);
        });
    }
}
impl CoreObject for CommandBuffer {
    fn base(&self) -> &CoreObjectBase {
        &self.base
    }

    fn type_name(&self) -> &'static str {
        "CommandBuffer"
    }

    fn initialize(&self) {
        let (id, desc) = (self.id(), self.desc.clone());
        self.ctx.core_thread().queue_command(move |backend| {
            report_backend_result(backend.create_command_buffer(id, &desc), "create_command_buffer", id);
        });
        self.base.initialize(self.type_name());
    }

    fn destroy(&self) {
        self.base.destroy();
        let id = self.id();
        self.ctx.core_thread().queue_command(move |backend| backend.destroy_command_buffer(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_context::test_utils::soft_context;
    use crate::soft_backend::SoftBackendEvent;

    #[test]
    fn test_secondary_is_unsupported() {
        let (ctx, _) = soft_context();
        let desc = CommandBufferDesc {
            secondary: true,
            ..Default::default()
        };
        let err = CommandBuffer::create(&ctx, desc).err().unwrap();
        assert!(err.to_string().contains("secondary"));
        assert_eq!(ctx.registry().object_count(), 0);
        ctx.shutdown();
    }

    #[test]
    fn test_submit() {
        let (ctx, events) = soft_context();
        let cmd = CommandBuffer::create(&ctx, CommandBufferDesc::default()).unwrap();
        let id = cmd.id();
        cmd.submit();
        cmd.destroy();
        ctx.core_thread().block_until_idle();

        let submitted = events.position(&SoftBackendEvent::CommandBufferSubmitted(id)).unwrap();
        let destroyed = events.position(&SoftBackendEvent::CommandBufferDestroyed(id)).unwrap();
        assert!(events.position(&SoftBackendEvent::CommandBufferCreated(id)).unwrap() < submitted);
        assert!(submitted < destroyed);

        drop(cmd);
        ctx.shutdown();
    }
}
