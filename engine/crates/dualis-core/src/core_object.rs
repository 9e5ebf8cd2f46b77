use std::ops::Deref;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crate::core_object_registry::CoreObjectRegistry;

/// core object 的唯一标识，由 [`CoreObjectRegistry::generate_id`] 分配
///
/// 单调递增，`0` 保留为无效值
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreObjectId(u64);
impl CoreObjectId {
    pub const INVALID: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}
impl std::fmt::Display for CoreObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags::bitflags! {
    /// core 侧需要重新同步的内容
    ///
    /// 低 16 位为通用含义，高 16 位留给具体资源自定义
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct CoreDirtyFlags: u32 {
        /// sim 侧属性发生变化
        const PROPERTIES = 1 << 0;
        /// 某个依赖发生变化
        const DEPENDENCY = 1 << 1;
        /// 资源数据发生变化
        const DATA = 1 << 2;

        const _ = !0;
    }
}

/// core object 的生命周期状态
///
/// 只能向前迁移：`Uninitialized -> Initialized -> Destroyed`，`Destroyed` 为终态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoreObjectState {
    Uninitialized,
    Initialized,
    Destroyed,
}

const FLAG_INITIALIZED: u8 = 1 << 0;
const FLAG_DESTROYED: u8 = 1 << 1;

/// 每个 core object 内嵌的公共部分
///
/// 状态使用原子变量存储，状态迁移由生命周期协议在外部串行化（只有持有对象的线程会迁移它）。
pub struct CoreObjectBase {
    id: CoreObjectId,
    flags: AtomicU8,
    dirty: AtomicU32,

    registry: Arc<CoreObjectRegistry>,

    /// 指向自身的弱引用，由 [`CoreArc::new`] 设置一次
    this: OnceLock<Weak<dyn CoreObject>>,
}
// new & init
impl CoreObjectBase {
    /// 构造时从注册表获取 id，此时还没有注册
    pub fn new(registry: &Arc<CoreObjectRegistry>) -> Self {
        Self {
            id: registry.generate_id(),
            flags: AtomicU8::new(0),
            dirty: AtomicU32::new(0),
            registry: registry.clone(),
            this: OnceLock::new(),
        }
    }

    /// 注册到注册表并进入 `Initialized`
    ///
    /// # Panics
    /// 重复初始化，或者初始化一个已经销毁的对象
    pub fn initialize(&self, type_name: &'static str) {
        let state = self.state();
        assert!(
            state == CoreObjectState::Uninitialized,
            "core object {} ({type_name}) initialized twice: state is {state:?}",
            self.id
        );

        self.registry.register_object(self, type_name);
        self.flags.fetch_or(FLAG_INITIALIZED, Ordering::AcqRel);
    }

    fn set_this_ptr(&self, this: Weak<dyn CoreObject>) {
        assert!(self.this.set(this).is_ok(), "this pointer of core object {} set twice", self.id);
    }
}
// destroy
impl CoreObjectBase {
    /// 从注册表移除并进入 `Destroyed`
    ///
    /// 内存在最后一个 [`CoreArc`] 释放时才会回收，队列中尚未执行的 core 命令仍然可以安全地引用该对象
    ///
    /// # Panics
    /// 对象尚未初始化，或者已经销毁
    pub fn destroy(&self) {
        let state = self.state();
        assert!(
            state != CoreObjectState::Uninitialized,
            "core object {} destroyed before initialize",
            self.id
        );

        self.registry.unregister_object(self);
        self.flags.fetch_or(FLAG_DESTROYED, Ordering::AcqRel);
    }
}
impl Drop for CoreObjectBase {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        // 从未初始化的对象没有注册过，也不会被任何 core 命令引用
        assert!(
            !self.is_initialized() || self.is_destroyed(),
            "core object {} dropped without destroy(); queued core commands may still reference it",
            self.id
        );
        if let Some(this) = self.this.get() {
            assert_eq!(this.strong_count(), 0, "core object {} dropped while still shared", self.id);
        }
    }
}
// getters
impl CoreObjectBase {
    #[inline]
    pub fn id(&self) -> CoreObjectId {
        self.id
    }

    #[inline]
    pub fn registry(&self) -> &Arc<CoreObjectRegistry> {
        &self.registry
    }

    pub fn state(&self) -> CoreObjectState {
        let flags = self.flags.load(Ordering::Acquire);
        if flags & FLAG_DESTROYED != 0 {
            CoreObjectState::Destroyed
        } else if flags & FLAG_INITIALIZED != 0 {
            CoreObjectState::Initialized
        } else {
            CoreObjectState::Uninitialized
        }
    }

    /// `initialize` 之后一直为 `true`，销毁后也不会清除
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_INITIALIZED != 0
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_DESTROYED != 0
    }

    /// 获取指向自身的共享引用；所有强引用都已释放时返回 `None`
    pub fn this_ptr(&self) -> Option<Arc<dyn CoreObject>> {
        self.this.get()?.upgrade()
    }

    pub(crate) fn this_weak(&self) -> Option<Weak<dyn CoreObject>> {
        self.this.get().cloned()
    }

    /// 资源操作前的检查
    ///
    /// 对象不处于 `Initialized` 时，debug 下 panic，release 下打印错误并返回 `false`
    pub fn check_usable(&self, operation: &str) -> bool {
        match self.state() {
            CoreObjectState::Initialized => true,
            CoreObjectState::Uninitialized => {
                log::error!("core object {}: {operation} called before initialize", self.id);
                debug_assert!(false, "core object {} used before initialize: {operation}", self.id);
                false
            }
            CoreObjectState::Destroyed => {
                log::error!("core object {}: {operation} called after destroy", self.id);
                debug_assert!(false, "core object {} used after destroyed: {operation}", self.id);
                false
            }
        }
    }
}
// dirty flags
impl CoreObjectBase {
    /// 设置 dirty 标记，返回设置之前的标记
    #[inline]
    pub fn mark_dirty(&self, flags: CoreDirtyFlags) -> CoreDirtyFlags {
        CoreDirtyFlags::from_bits_retain(self.dirty.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    #[inline]
    pub fn dirty_flags(&self) -> CoreDirtyFlags {
        CoreDirtyFlags::from_bits_retain(self.dirty.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        !self.dirty_flags().is_empty()
    }

    /// 取出并清空 dirty 标记
    #[inline]
    pub fn take_dirty(&self) -> CoreDirtyFlags {
        CoreDirtyFlags::from_bits_retain(self.dirty.swap(0, Ordering::AcqRel))
    }
}

/// 所有 GPU 资源都要实现的生命周期约定
///
/// 实现者内嵌一个 [`CoreObjectBase`]，只需要提供 `base` 和 `type_name`；
/// 需要在 core 侧创建/释放资源的类型重写 `initialize` / `destroy`，并在最后调用 base 的同名方法。
pub trait CoreObject: Send + Sync + 'static {
    fn base(&self) -> &CoreObjectBase;

    /// 反射系统使用的类型标识
    fn type_name(&self) -> &'static str;

    fn initialize(&self) {
        self.base().initialize(self.type_name());
    }

    fn destroy(&self) {
        self.base().destroy();
    }

    /// 该对象在 core 侧依赖的其他对象
    fn core_dependencies(&self) -> Vec<Arc<dyn CoreObject>> {
        Vec::new()
    }

    /// 某个依赖变为 dirty；默认将自身标记为 dirty，并继续通知自己的 listener
    fn on_dependency_dirty(&self, _dependency: CoreObjectId, _flags: CoreDirtyFlags) {
        self.mark_core_dirty(CoreDirtyFlags::DEPENDENCY);
    }

    /// 同步阶段回调，用于重建 core 侧的派生状态
    fn sync_to_core(&self, _flags: CoreDirtyFlags) {}

    #[inline]
    fn id(&self) -> CoreObjectId {
        self.base().id()
    }

    #[inline]
    fn is_initialized(&self) -> bool {
        self.base().is_initialized()
    }

    #[inline]
    fn is_destroyed(&self) -> bool {
        self.base().is_destroyed()
    }

    fn this_ptr(&self) -> Option<Arc<dyn CoreObject>> {
        self.base().this_ptr()
    }

    /// 标记为 dirty，并把变化通知给所有依赖自己的对象
    ///
    /// 已经带有同样标记时不会重复通知，依赖图中有环也不会无限递归
    fn mark_core_dirty(&self, flags: CoreDirtyFlags) {
        let previous = self.base().mark_dirty(flags);
        if !previous.contains(flags) {
            self.base().registry().notify_dependency_dirty(self.id(), flags);
        }
    }

    /// 重新收集依赖并更新依赖图，在对象引用的其他资源发生变化后调用
    fn mark_dependencies_dirty(&self) {
        let dependencies = self.core_dependencies();
        self.base().registry().update_dependencies(self.id(), &dependencies);
    }
}

/// [`CoreArc`] 的内部存储，最后一个强引用释放时负责调用 `destroy`
struct CoreSlot<T: CoreObject> {
    object: T,
}
impl<T: CoreObject> CoreObject for CoreSlot<T> {
    fn base(&self) -> &CoreObjectBase {
        self.object.base()
    }
    fn type_name(&self) -> &'static str {
        self.object.type_name()
    }
    fn initialize(&self) {
        self.object.initialize()
    }
    fn destroy(&self) {
        self.object.destroy()
    }
    fn core_dependencies(&self) -> Vec<Arc<dyn CoreObject>> {
        self.object.core_dependencies()
    }
    fn on_dependency_dirty(&self, dependency: CoreObjectId, flags: CoreDirtyFlags) {
        self.object.on_dependency_dirty(dependency, flags)
    }
    fn sync_to_core(&self, flags: CoreDirtyFlags) {
        self.object.sync_to_core(flags)
    }
}
impl<T: CoreObject> Drop for CoreSlot<T> {
    fn drop(&mut self) {
        if self.object.base().state() == CoreObjectState::Initialized {
            self.object.destroy();
        }
    }
}

/// 工厂方法返回的共享句柄
///
/// 最后一个强引用释放时，如果对象已经初始化且还没有销毁，会先调用 [`CoreObject::destroy`]，
/// 所以正常的作用域退出也总是经过显式的销毁路径。
pub struct CoreArc<T: CoreObject> {
    inner: Arc<CoreSlot<T>>,
}
impl<T: CoreObject> CoreArc<T> {
    /// 包装一个尚未初始化的对象，并设置它的 this 指针
    pub fn new(object: T) -> Self {
        let inner = Arc::new(CoreSlot { object });
        let this: Weak<dyn CoreObject> = Arc::downgrade(&inner) as Weak<dyn CoreObject>;
        inner.object.base().set_this_ptr(this);
        Self { inner }
    }

    /// 包装并立即初始化
    pub fn new_initialized(object: T) -> Self {
        let arc = Self::new(object);
        arc.initialize();
        arc
    }

    #[inline]
    pub fn as_dyn(&self) -> Arc<dyn CoreObject> {
        self.inner.clone()
    }

    #[inline]
    pub fn downgrade(&self) -> CoreWeak<T> {
        CoreWeak {
            inner: Arc::downgrade(&self.inner),
        }
    }

    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    #[inline]
    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.inner)
    }

    /// 延迟销毁：加入注册表的销毁队列，在下一次 [`CoreObjectRegistry::process_destroy_queue`] 时销毁
    pub fn queue_for_destroy(&self) {
        self.inner.object.base().registry().queue_for_destroy(self.as_dyn());
    }
}
impl<T: CoreObject> Clone for CoreArc<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
impl<T: CoreObject> Deref for CoreArc<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.inner.object
    }
}

/// [`CoreArc`] 的弱引用
pub struct CoreWeak<T: CoreObject> {
    inner: Weak<CoreSlot<T>>,
}
impl<T: CoreObject> CoreWeak<T> {
    #[inline]
    pub fn upgrade(&self) -> Option<CoreArc<T>> {
        self.inner.upgrade().map(|inner| CoreArc { inner })
    }
}
impl<T: CoreObject> Clone for CoreWeak<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
