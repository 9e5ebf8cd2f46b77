use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use dualis_core::core_object::{CoreArc, CoreObject, CoreObjectBase};
use indexmap::IndexMap;

use crate::render_context::{RenderContext, report_backend_result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderWindowId(u32);
impl std::fmt::Display for RenderWindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderWindowDesc {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
    pub fullscreen: bool,
    pub vsync: bool,
    pub hidden: bool,
}
impl Default for RenderWindowDesc {
    fn default() -> Self {
        Self {
            title: "dualis".to_string(),
            width: 1280,
            height: 720,
            left: 0,
            top: 0,
            fullscreen: false,
            vsync: true,
            hidden: false,
        }
    }
}

/// 窗口的当前状态，由 [`RenderWindowManager::update`] 根据平台事件更新
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderWindowProperties {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
    pub has_focus: bool,
    pub is_hidden: bool,
    pub close_requested: bool,
}

/// 平台层投递给窗口管理器的通知
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderWindowEvent {
    FocusGained(RenderWindowId),
    FocusLost(RenderWindowId),
    Moved { window: RenderWindowId, left: i32, top: i32 },
    Resized { window: RenderWindowId, width: u32, height: u32 },
    CloseRequested(RenderWindowId),
}
impl RenderWindowEvent {
    pub fn window(&self) -> RenderWindowId {
        match *self {
            Self::FocusGained(window) | Self::FocusLost(window) | Self::CloseRequested(window) => window,
            Self::Moved { window, .. } | Self::Resized { window, .. } => window,
        }
    }
}

/// 一个窗口及其 swap chain
pub struct RenderWindow {
    base: CoreObjectBase,
    ctx: Arc<RenderContext>,

    window_id: RenderWindowId,
    desc: RenderWindowDesc,
    properties: Mutex<RenderWindowProperties>,
}
// new & init
impl RenderWindow {
    fn create(ctx: &Arc<RenderContext>, window_id: RenderWindowId, desc: RenderWindowDesc) -> anyhow::Result<CoreArc<Self>> {
        anyhow::ensure!(
            desc.width > 0 && desc.height > 0,
            "window '{}' must have a non-zero size, got {}x{}",
            desc.title,
            desc.width,
            desc.height
        );

        let properties = RenderWindowProperties {
            width: desc.width,
            height: desc.height,
            left: desc.left,
            top: desc.top,
            is_hidden: desc.hidden,
            ..Default::default()
        };
        Ok(CoreArc::new_initialized(Self {
            base: CoreObjectBase::new(ctx.registry()),
            ctx: ctx.clone(),
            window_id,
            desc,
            properties: Mutex::new(properties),
        }))
    }
}
// getters
impl RenderWindow {
    #[inline]
    pub fn window_id(&self) -> RenderWindowId {
        self.window_id
    }

    #[inline]
    pub fn desc(&self) -> &RenderWindowDesc {
        &self.desc
    }

    pub fn properties(&self) -> RenderWindowProperties {
        self.properties.lock().unwrap().clone()
    }
}
impl RenderWindow {
    /// 修改尺寸并重建 swap chain；尺寸为 0 时忽略
    pub fn resize(&self, width: u32, height: u32) {
        if !self.base.check_usable("RenderWindow::resize") {
            return;
        }
        if width == 0 || height == 0 {
            log::warn!("{}: ignoring resize to {width}x{height}", self.window_id);
            return;
        }

        {
            let mut properties = self.properties.lock().unwrap();
            if (properties.width, properties.height) == (width, height) {
                return;
            }
            properties.width = width;
            properties.height = height;
        }
        let id = self.id();
        self.ctx.core_thread().queue_command(move |backend| {
            report_backend_result(backend.resize_swap_chain(id, width, height), "resize_swap_chain", id);
        });
    }

    pub fn move_to(&self, left: i32, top: i32) {
        if !self.base.check_usable("RenderWindow::move_to") {
            return;
        }
        let mut properties = self.properties.lock().unwrap();
        properties.left = left;
        properties.top = top;
    }

    fn set_focus(&self, has_focus: bool) {
        self.properties.lock().unwrap().has_focus = has_focus;
    }

    fn request_close(&self) {
        self.properties.lock().unwrap().close_requested = true;
    }
}
impl CoreObject for RenderWindow {
    fn base(&self) -> &CoreObjectBase {
        &self.base
    }

    fn type_name(&self) -> &'static str {
        "RenderWindow"
    }

    fn initialize(&self) {
        let (id, desc) = (self.id(), self.desc.clone());
        self.ctx.core_thread().queue_command(move |backend| {
            report_backend_result(backend.create_swap_chain(id, &desc), "create_swap_chain", id);
        });
        self.base.initialize(self.type_name());
    }

    fn destroy(&self) {
        self.base.destroy();
        let id = self.id();
        self.ctx.core_thread().queue_command(move |backend| backend.destroy_swap_chain(id));
    }
}

/// 窗口管理器
///
/// 平台层可以在任意线程投递通知，`update` 在 sim 线程上统一处理
pub struct RenderWindowManager {
    ctx: Arc<RenderContext>,

    next_window_id: AtomicU32,
    windows: Mutex<IndexMap<RenderWindowId, CoreArc<RenderWindow>>>,
    /// 事件队列
    pending_events: Mutex<VecDeque<RenderWindowEvent>>,

    shut_down: bool,
}
// new & init
impl RenderWindowManager {
    pub fn new(ctx: &Arc<RenderContext>) -> Self {
        Self {
            ctx: ctx.clone(),
            next_window_id: AtomicU32::new(1),
            windows: Mutex::new(IndexMap::new()),
            pending_events: Mutex::new(VecDeque::new()),
            shut_down: false,
        }
    }
}
// destroy
impl RenderWindowManager {
    pub fn shut_down(&mut self) {
        let windows: Vec<CoreArc<RenderWindow>> = self.windows.lock().unwrap().drain(..).map(|(_, w)| w).collect();
        for window in windows {
            window.destroy();
        }
        self.pending_events.lock().unwrap().clear();
        self.shut_down = true;
    }
}
impl Drop for RenderWindowManager {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        assert!(self.shut_down, "RenderWindowManager dropped without shut_down()");
    }
}
// getters
impl RenderWindowManager {
    pub fn window(&self, window_id: RenderWindowId) -> Option<CoreArc<RenderWindow>> {
        self.windows.lock().unwrap().get(&window_id).cloned()
    }

    pub fn window_count(&self) -> usize {
        self.windows.lock().unwrap().len()
    }

    /// 当前拥有焦点的窗口
    pub fn focused_window(&self) -> Option<RenderWindowId> {
        self.windows.lock().unwrap().values().find(|w| w.properties().has_focus).map(|w| w.window_id())
    }
}
// Subsystem API
impl RenderWindowManager {
    pub fn create(&self, desc: RenderWindowDesc) -> anyhow::Result<CoreArc<RenderWindow>> {
        let window_id = RenderWindowId(self.next_window_id.fetch_add(1, Ordering::Relaxed));
        let window = RenderWindow::create(&self.ctx, window_id, desc)?;
        self.windows.lock().unwrap().insert(window_id, window.clone());
        log::info!("{window_id} created");
        Ok(window)
    }

    /// 销毁窗口，并丢弃它尚未处理的通知
    pub fn destroy(&self, window_id: RenderWindowId) -> bool {
        let Some(window) = self.windows.lock().unwrap().shift_remove(&window_id) else {
            log::error!("destroying unknown {window_id}");
            return false;
        };
        self.pending_events.lock().unwrap().retain(|e| e.window() != window_id);
        window.destroy();
        true
    }

    /// 任意线程都可以调用
    pub fn push_event(&self, event: RenderWindowEvent) {
        self.pending_events.lock().unwrap().push_back(event);
    }

    pub fn notify_focus_received(&self, window_id: RenderWindowId) {
        self.push_event(RenderWindowEvent::FocusGained(window_id));
    }

    pub fn notify_focus_lost(&self, window_id: RenderWindowId) {
        self.push_event(RenderWindowEvent::FocusLost(window_id));
    }

    pub fn notify_moved_or_resized(&self, window_id: RenderWindowId, left: i32, top: i32, width: u32, height: u32) {
        let mut pending = self.pending_events.lock().unwrap();
        pending.push_back(RenderWindowEvent::Moved {
            window: window_id,
            left,
            top,
        });
        pending.push_back(RenderWindowEvent::Resized {
            window: window_id,
            width,
            height,
        });
    }

    pub fn notify_close_requested(&self, window_id: RenderWindowId) {
        self.push_event(RenderWindowEvent::CloseRequested(window_id));
    }

    /// 取出所有待处理的通知并应用到窗口属性，返回实际处理的通知
    ///
    /// 已经销毁的窗口的通知会被丢弃
    pub fn update(&self) -> Vec<RenderWindowEvent> {
        let events = std::mem::take(&mut *self.pending_events.lock().unwrap());

        let mut processed = Vec::with_capacity(events.len());
        for event in events {
            let Some(window) = self.window(event.window()) else {
                log::warn!("dropping {event:?} for unknown {}", event.window());
                continue;
            };
            match event {
                RenderWindowEvent::FocusGained(window_id) => {
                    for other in self.windows.lock().unwrap().values() {
                        other.set_focus(other.window_id() == window_id);
                    }
                }
                RenderWindowEvent::FocusLost(_) => window.set_focus(false),
                RenderWindowEvent::Moved { left, top, .. } => window.move_to(left, top),
                RenderWindowEvent::Resized { width, height, .. } => window.resize(width, height),
                RenderWindowEvent::CloseRequested(_) => window.request_close(),
            }
            processed.push(event);
        }
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_context::test_utils::soft_context;
    use crate::soft_backend::SoftBackendEvent;

    #[test]
    fn test_events_applied_on_update() {
        let (ctx, events) = soft_context();
        let mut manager = RenderWindowManager::new(&ctx);
        let main = manager.create(RenderWindowDesc::default()).unwrap();
        let tool = manager
            .create(RenderWindowDesc {
                title: "tool".to_string(),
                width: 300,
                height: 200,
                ..Default::default()
            })
            .unwrap();
        assert_ne!(main.window_id(), tool.window_id());

        manager.notify_focus_received(main.window_id());
        manager.notify_moved_or_resized(main.window_id(), 10, 20, 800, 600);
        manager.notify_focus_received(tool.window_id());
        manager.notify_close_requested(tool.window_id());
        assert_eq!(main.properties().width, 1280);

        let processed = manager.update();
        assert_eq!(processed.len(), 5);
        assert!(manager.update().is_empty());

        let props = main.properties();
        assert_eq!((props.left, props.top, props.width, props.height), (10, 20, 800, 600));
        assert!(!props.has_focus);
        assert!(tool.properties().close_requested);
        assert_eq!(manager.focused_window(), Some(tool.window_id()));

        ctx.core_thread().block_until_idle();
        assert!(events.contains(&SoftBackendEvent::SwapChainResized {
            id: main.id(),
            width: 800,
            height: 600
        }));

        drop((main, tool));
        manager.shut_down();
        ctx.shutdown();
    }

    #[test]
    fn test_destroy_drops_pending_events() {
        let (ctx, events) = soft_context();
        let mut manager = RenderWindowManager::new(&ctx);
        let window = manager.create(RenderWindowDesc::default()).unwrap();
        let (window_id, id) = (window.window_id(), window.id());

        manager.notify_close_requested(window_id);
        assert!(manager.destroy(window_id));
        assert!(!manager.destroy(window_id));
        assert!(manager.update().is_empty());
        assert!(window.is_destroyed());
        assert_eq!(manager.window_count(), 0);

        drop(window);
        manager.shut_down();
        ctx.shutdown();
        assert!(events.contains(&SoftBackendEvent::SwapChainDestroyed(id)));
    }

    #[test]
    fn test_notifications_from_other_threads() {
        let (ctx, _) = soft_context();
        let mut manager = RenderWindowManager::new(&ctx);
        let window_id = manager.create(RenderWindowDesc::default()).unwrap().window_id();

        std::thread::scope(|s| {
            for i in 0..4 {
                let manager = &manager;
                s.spawn(move || manager.notify_moved_or_resized(window_id, i, i, 640, 480));
            }
        });
        assert_eq!(manager.update().len(), 8);
        assert_eq!(manager.window(window_id).unwrap().properties().width, 640);

        manager.shut_down();
        ctx.shutdown();
    }

    #[test]
    fn test_zero_sized_window_is_rejected() {
        let (ctx, _) = soft_context();
        let mut manager = RenderWindowManager::new(&ctx);
        let desc = RenderWindowDesc {
            width: 0,
            ..Default::default()
        };
        assert!(manager.create(desc).is_err());
        manager.shut_down();
        ctx.shutdown();
    }
}
