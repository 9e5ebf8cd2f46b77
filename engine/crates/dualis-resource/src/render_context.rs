use std::sync::Arc;

use dualis_core::core_object::CoreObjectId;
use dualis_core::core_object_registry::CoreObjectRegistry;
use dualis_core::core_thread::CoreThread;

use crate::backend::{BackendCapabilities, RenderCore};
use crate::settings::RenderContextSettings;

/// 所有资源共享的上下文：注册表 + 持有渲染后端的 core 线程
///
/// 资源在构造时注入 `Arc<RenderContext>`，不存在全局单例，测试之间互不影响
pub struct RenderContext {
    registry: Arc<CoreObjectRegistry>,
    core_thread: CoreThread<RenderCore>,

    capabilities: BackendCapabilities,
    backend_name: String,
    settings: RenderContextSettings,
}
// new & init
impl RenderContext {
    /// 启动 core 线程，并把后端的所有权交给它
    pub fn new(settings: RenderContextSettings, backend: RenderCore) -> anyhow::Result<Arc<Self>> {
        let capabilities = backend.capabilities();
        let backend_name = backend.name().to_string();
        let core_thread = CoreThread::spawn(&settings.core_thread, backend)?;

        log::info!("render context created with backend: {backend_name}");
        Ok(Arc::new(Self {
            registry: CoreObjectRegistry::new(),
            core_thread,
            capabilities,
            backend_name,
            settings,
        }))
    }
}
// destroy
impl RenderContext {
    /// 关闭顺序：处理延迟销毁 -> 等待 core 线程空闲 -> 泄漏检查 -> 停止 core 线程
    ///
    /// 泄漏检查在后端卸载之前进行；存在泄漏时 panic
    pub fn shutdown(&self) -> Option<RenderCore> {
        let destroyed = self.registry.process_destroy_queue();
        if destroyed > 0 {
            log::info!("destroyed {destroyed} queued core object(s) during shutdown");
        }
        self.core_thread.block_until_idle();

        self.registry.shutdown();
        self.core_thread.shutdown()
    }
}
// Subsystem API
impl RenderContext {
    /// 执行一次同步：所有 dirty 的对象重建 core 侧的派生状态
    pub fn sync_dirty_objects(&self) -> usize {
        self.registry.sync_dirty_objects()
    }

    /// 处理延迟销毁队列，返回销毁的对象数量
    pub fn process_destroy_queue(&self) -> usize {
        self.registry.process_destroy_queue()
    }

    /// 在 core 线程上执行并阻塞等待结果
    ///
    /// # Panics
    /// 在 core 线程上调用
    pub fn execute_blocking<R: Clone + Send + 'static>(
        &self,
        work: impl FnOnce(&mut RenderCore) -> R + Send + 'static,
    ) -> R {
        self.core_thread.queue_return_command(work).return_value()
    }
}

/// 在 core 线程上记录后端返回的错误，转换为 `AsyncOp` 使用的 `bool`
pub(crate) fn report_backend_result(result: anyhow::Result<()>, operation: &str, id: CoreObjectId) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            log::error!("{operation} failed on core object {id}: {err:#}");
            false
        }
    }
}
// getters
impl RenderContext {
    #[inline]
    pub fn registry(&self) -> &Arc<CoreObjectRegistry> {
        &self.registry
    }

    #[inline]
    pub fn core_thread(&self) -> &CoreThread<RenderCore> {
        &self.core_thread
    }

    #[inline]
    pub fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    #[inline]
    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    #[inline]
    pub fn settings(&self) -> &RenderContextSettings {
        &self.settings
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::soft_backend::{SoftBackend, SoftBackendEvents};

    /// 使用软件后端创建上下文，同时返回后端的事件记录
    pub fn soft_context() -> (Arc<RenderContext>, SoftBackendEvents) {
        dualis_crate_tools::init_log::init_log_with_level(log::LevelFilter::Debug);

        let backend = SoftBackend::default();
        let events = backend.events();
        let settings = RenderContextSettings {
            create_builtin_textures: false,
            ..Default::default()
        };
        (RenderContext::new(settings, Box::new(backend)).unwrap(), events)
    }
}
