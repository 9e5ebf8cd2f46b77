use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use dualis_crate_tools::profile_span;

use crate::core_object::{CoreDirtyFlags, CoreObject, CoreObjectBase, CoreObjectId};

struct RegisteredObject {
    type_name: &'static str,
    object: Option<Weak<dyn CoreObject>>,
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    objects: BTreeMap<CoreObjectId, RegisteredObject>,

    /// 等待 [`CoreObjectRegistry::process_destroy_queue`] 销毁的对象
    destroy_queue: Vec<Arc<dyn CoreObject>>,

    /// listener -> 它依赖的对象
    dependencies: HashMap<CoreObjectId, Vec<CoreObjectId>>,
    /// dependency -> 依赖它的对象
    listeners: HashMap<CoreObjectId, Vec<CoreObjectId>>,

    shut_down: bool,
}
impl RegistryState {
    fn remove_dependency_edges(&mut self, listener: CoreObjectId) {
        if let Some(old_deps) = self.dependencies.remove(&listener) {
            for dep in old_deps {
                if let Some(listeners) = self.listeners.get_mut(&dep) {
                    listeners.retain(|l| *l != listener);
                    if listeners.is_empty() {
                        self.listeners.remove(&dep);
                    }
                }
            }
        }
    }

    fn remove_listener_edges(&mut self, dependency: CoreObjectId) {
        if let Some(listeners) = self.listeners.remove(&dependency) {
            for listener in listeners {
                if let Some(deps) = self.dependencies.get_mut(&listener) {
                    deps.retain(|d| *d != dependency);
                }
            }
        }
    }

    fn upgrade(&self, id: CoreObjectId) -> Option<Arc<dyn CoreObject>> {
        self.objects.get(&id)?.object.as_ref()?.upgrade()
    }

    /// 依赖图的后序遍历：每个对象都排在它依赖的对象之后
    ///
    /// 根按 id 顺序访问；有环时环上的对象按首次访问的顺序排列
    fn sync_order(&self) -> Vec<CoreObjectId> {
        let mut order = Vec::with_capacity(self.objects.len());
        let mut visited = HashSet::with_capacity(self.objects.len());
        let mut stack: Vec<(CoreObjectId, usize)> = Vec::new();

        for root in self.objects.keys() {
            if !visited.insert(*root) {
                continue;
            }
            stack.push((*root, 0));
            while let Some((id, next)) = stack.last_mut() {
                let id = *id;
                let child = self.dependencies.get(&id).and_then(|deps| deps.get(*next)).copied();
                match child {
                    Some(dep) => {
                        *next += 1;
                        if visited.insert(dep) {
                            stack.push((dep, 0));
                        }
                    }
                    None => {
                        stack.pop();
                        if self.objects.contains_key(&id) {
                            order.push(id);
                        }
                    }
                }
            }
        }
        order
    }
}

/// 进程内所有存活 core object 的注册表
///
/// # 职责
/// - 分配唯一 id（从 1 开始单调递增，0 保留为无效值）
/// - 记录所有已初始化且尚未销毁的对象
/// - 延迟销毁队列：任意线程都可以投递，由拥有销毁时机的线程统一处理
/// - 依赖追踪：依赖变 dirty 时通知所有 listener
/// - 关闭时的泄漏检查：表不为空说明有资源泄漏，后端库卸载后会变成悬垂指针，必须直接终止
///
/// 所有状态由同一把锁保护，临界区内只做簿记，不会回调任何对象，
/// 回调（`destroy`、`on_dependency_dirty`、`sync_to_core`）都在释放锁之后执行。
pub struct CoreObjectRegistry {
    state: Mutex<RegistryState>,
}
// new & init
impl CoreObjectRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RegistryState {
                next_id: 1,
                ..Default::default()
            }),
        })
    }

    /// 分配一个新的 id，线程安全，不会返回 0
    pub fn generate_id(&self) -> CoreObjectId {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id = id.checked_add(1).expect("CoreObjectId space exhausted");
        CoreObjectId::from_raw(id)
    }
}
// register
impl CoreObjectRegistry {
    /// 以 id 为 key 记录对象；对同一个 id 重复注册会静默覆盖
    pub fn register_object(&self, object: &CoreObjectBase, type_name: &'static str) {
        let mut state = self.state.lock().unwrap();
        state.objects.insert(
            object.id(),
            RegisteredObject {
                type_name,
                object: object.this_weak(),
            },
        );
    }

    /// 从表中移除对象，同时移除它在依赖图中的所有边
    ///
    /// # Panics
    /// 对象已经被销毁
    pub fn unregister_object(&self, object: &CoreObjectBase) {
        assert!(!object.is_destroyed(), "core object {} already destroyed", object.id());

        let mut state = self.state.lock().unwrap();
        if state.objects.remove(&object.id()).is_none() {
            log::warn!("unregistering core object {} which was never registered", object.id());
        }
        state.remove_dependency_edges(object.id());
        state.remove_listener_edges(object.id());
    }
}
// deferred destroy
impl CoreObjectRegistry {
    /// 任意线程都可以调用，对象在下一次 [`Self::process_destroy_queue`] 时销毁
    pub fn queue_for_destroy(&self, object: Arc<dyn CoreObject>) {
        self.state.lock().unwrap().destroy_queue.push(object);
    }

    /// 销毁所有排队的对象，返回实际销毁的数量
    ///
    /// 已经通过其他路径销毁的对象会被跳过
    pub fn process_destroy_queue(&self) -> usize {
        let _span = profile_span!("CoreObjectRegistry::process_destroy_queue");

        let queue = std::mem::take(&mut self.state.lock().unwrap().destroy_queue);

        let mut destroyed = 0;
        for object in &queue {
            if object.is_destroyed() {
                continue;
            }
            object.destroy();
            destroyed += 1;
        }
        destroyed
    }

    pub fn pending_destroy_count(&self) -> usize {
        self.state.lock().unwrap().destroy_queue.len()
    }
}
// dependencies
impl CoreObjectRegistry {
    /// 用 `dependencies` 替换 `listener` 之前记录的依赖
    pub fn update_dependencies(&self, listener: CoreObjectId, dependencies: &[Arc<dyn CoreObject>]) {
        let mut state = self.state.lock().unwrap();
        state.remove_dependency_edges(listener);

        if dependencies.is_empty() {
            return;
        }
        let mut ids: Vec<CoreObjectId> = dependencies.iter().map(|d| d.id()).collect();
        ids.sort();
        ids.dedup();
        for dep in &ids {
            state.listeners.entry(*dep).or_default().push(listener);
        }
        state.dependencies.insert(listener, ids);
    }

    /// 通知所有依赖 `dependency` 的对象
    pub fn notify_dependency_dirty(&self, dependency: CoreObjectId, flags: CoreDirtyFlags) {
        let listeners: Vec<Arc<dyn CoreObject>> = {
            let state = self.state.lock().unwrap();
            let Some(ids) = state.listeners.get(&dependency) else {
                return;
            };
            ids.iter().filter_map(|id| state.upgrade(*id)).collect()
        };

        for listener in &listeners {
            listener.on_dependency_dirty(dependency, flags);
        }
    }

    pub fn dependencies_of(&self, listener: CoreObjectId) -> Vec<CoreObjectId> {
        self.state.lock().unwrap().dependencies.get(&listener).cloned().unwrap_or_default()
    }

    pub fn listeners_of(&self, dependency: CoreObjectId) -> Vec<CoreObjectId> {
        self.state.lock().unwrap().listeners.get(&dependency).cloned().unwrap_or_default()
    }

    /// 同步阶段：对每个 dirty 的对象调用 `sync_to_core` 并清除标记，返回同步的对象数量
    ///
    /// 按依赖顺序处理：依赖总是先于依赖它的对象同步，与创建顺序无关，
    /// 所以 listener 在 `sync_to_core` 里读到的派生状态都是本轮同步后的
    pub fn sync_dirty_objects(&self) -> usize {
        let _span = profile_span!("CoreObjectRegistry::sync_dirty_objects");

        let objects: Vec<Arc<dyn CoreObject>> = {
            let state = self.state.lock().unwrap();
            state.sync_order().into_iter().filter_map(|id| state.upgrade(id)).collect()
        };

        let mut synced = 0;
        for object in &objects {
            if object.is_destroyed() {
                continue;
            }
            let flags = object.base().take_dirty();
            if flags.is_empty() {
                continue;
            }
            object.sync_to_core(flags);
            synced += 1;
        }
        synced
    }
}
// shutdown
impl CoreObjectRegistry {
    /// 关闭前的泄漏检查
    ///
    /// 先处理延迟销毁队列，之后表中仍然存在的对象都视为泄漏：逐个打印错误日志后 panic
    pub fn shutdown(&self) {
        self.process_destroy_queue();

        let leaked = {
            let mut state = self.state.lock().unwrap();
            state.shut_down = true;
            state
                .objects
                .iter()
                .map(|(id, r)| (*id, r.type_name))
                .collect::<Vec<_>>()
        };

        if leaked.is_empty() {
            log::info!("core object registry shut down cleanly");
            return;
        }
        for (id, type_name) in &leaked {
            log::error!("core object {id} ({type_name}) still alive at shutdown");
        }
        panic!(
            "{} core object(s) leaked at shutdown; every core object must be destroyed before the backend unloads",
            leaked.len()
        );
    }

    /// 当前仍然存活的对象 (id, 类型名)
    pub fn leaked_objects(&self) -> Vec<(CoreObjectId, &'static str)> {
        let state = self.state.lock().unwrap();
        state.objects.iter().map(|(id, r)| (*id, r.type_name)).collect()
    }
}
impl Drop for CoreObjectRegistry {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let shut_down = self.state.get_mut().map(|s| s.shut_down).unwrap_or(true);
        if !shut_down {
            self.shutdown();
        }
    }
}
// getters
impl CoreObjectRegistry {
    #[inline]
    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    #[inline]
    pub fn is_registered(&self, id: CoreObjectId) -> bool {
        self.state.lock().unwrap().objects.contains_key(&id)
    }

    /// 通过 id 查找对象；对象已经释放时返回 `None`，不会延长对象的生命周期
    pub fn find_object(&self, id: CoreObjectId) -> Option<Arc<dyn CoreObject>> {
        self.state.lock().unwrap().upgrade(id)
    }

    pub fn type_name_of(&self, id: CoreObjectId) -> Option<&'static str> {
        self.state.lock().unwrap().objects.get(&id).map(|r| r.type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_object::CoreArc;
    use rayon::prelude::*;

    struct Dummy {
        base: CoreObjectBase,
    }
    impl Dummy {
        fn new(registry: &Arc<CoreObjectRegistry>) -> Self {
            Self {
                base: CoreObjectBase::new(registry),
            }
        }
    }
    impl CoreObject for Dummy {
        fn base(&self) -> &CoreObjectBase {
            &self.base
        }
        fn type_name(&self) -> &'static str {
            "Dummy"
        }
    }

    #[test]
    fn test_generate_id_never_zero() {
        let registry = CoreObjectRegistry::new();
        let first = registry.generate_id();
        assert_eq!(first.raw(), 1);
        assert!(first.is_valid());
        assert!(registry.generate_id() > first);
        registry.shutdown();
    }

    #[test]
    fn test_generate_id_unique_across_threads() {
        let registry = CoreObjectRegistry::new();

        let per_thread: Vec<Vec<CoreObjectId>> = (0..8)
            .into_par_iter()
            .map(|_| (0..1000).map(|_| registry.generate_id()).collect())
            .collect();

        for ids in &per_thread {
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
        }
        let mut all: Vec<CoreObjectId> = per_thread.into_iter().flatten().collect();
        assert!(all.iter().all(|id| id.is_valid()));
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 8000);
        registry.shutdown();
    }

    #[test]
    fn test_register_unregister_all() {
        let registry = CoreObjectRegistry::new();
        let objects: Vec<_> = (0..16).map(|_| CoreArc::new_initialized(Dummy::new(&registry))).collect();
        assert_eq!(registry.object_count(), 16);
        assert_eq!(registry.type_name_of(objects[3].id()), Some("Dummy"));

        for object in &objects {
            object.destroy();
        }
        assert_eq!(registry.object_count(), 0);
        registry.shutdown();
    }

    #[test]
    fn test_find_object_does_not_extend_lifetime() {
        let registry = CoreObjectRegistry::new();
        let object = CoreArc::new_initialized(Dummy::new(&registry));
        let id = object.id();

        let found = registry.find_object(id).unwrap();
        assert_eq!(found.id(), id);
        drop(found);
        assert_eq!(CoreArc::strong_count(&object), 1);

        drop(object);
        assert!(registry.find_object(id).is_none());
        assert!(!registry.is_registered(id));
        registry.shutdown();
    }

    #[test]
    fn test_queue_for_destroy_from_other_threads() {
        let registry = CoreObjectRegistry::new();
        let objects: Vec<_> = (0..8).map(|_| CoreArc::new_initialized(Dummy::new(&registry))).collect();

        std::thread::scope(|s| {
            for object in &objects {
                s.spawn(move || object.queue_for_destroy());
            }
        });
        assert_eq!(registry.pending_destroy_count(), 8);
        assert_eq!(registry.object_count(), 8);

        objects[0].destroy();
        assert_eq!(registry.process_destroy_queue(), 7);
        assert_eq!(registry.object_count(), 0);
        assert!(objects.iter().all(|o| o.is_destroyed()));
        registry.shutdown();
    }

    #[test]
    fn test_unregister_removes_dependency_edges() {
        let registry = CoreObjectRegistry::new();
        let mesh = CoreArc::new_initialized(Dummy::new(&registry));
        let renderable = CoreArc::new_initialized(Dummy::new(&registry));
        registry.update_dependencies(renderable.id(), &[mesh.as_dyn(), mesh.as_dyn()]);
        assert_eq!(registry.dependencies_of(renderable.id()), vec![mesh.id()]);
        assert_eq!(registry.listeners_of(mesh.id()), vec![renderable.id()]);

        mesh.destroy();
        assert!(registry.dependencies_of(renderable.id()).is_empty());
        assert!(registry.listeners_of(mesh.id()).is_empty());

        renderable.destroy();
        registry.shutdown();
    }

    #[test]
    fn test_shutdown_drains_destroy_queue() {
        let registry = CoreObjectRegistry::new();
        let object = CoreArc::new_initialized(Dummy::new(&registry));
        object.queue_for_destroy();
        registry.shutdown();
        assert!(object.is_destroyed());
    }

    #[test]
    #[should_panic(expected = "leaked at shutdown")]
    fn test_shutdown_with_live_objects() {
        let registry = CoreObjectRegistry::new();
        let object = CoreArc::new_initialized(Dummy::new(&registry));
        assert_eq!(registry.leaked_objects(), vec![(object.id(), "Dummy")]);
        registry.shutdown();
    }

    struct Recorder {
        base: CoreObjectBase,
        log: Arc<Mutex<Vec<CoreObjectId>>>,
    }
    impl CoreObject for Recorder {
        fn base(&self) -> &CoreObjectBase {
            &self.base
        }
        fn type_name(&self) -> &'static str {
            "Recorder"
        }
        fn sync_to_core(&self, _flags: CoreDirtyFlags) {
            self.log.lock().unwrap().push(self.id());
        }
    }

    #[test]
    fn test_sync_dependencies_before_listeners() {
        let registry = CoreObjectRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let new_recorder = || {
            CoreArc::new_initialized(Recorder {
                base: CoreObjectBase::new(&registry),
                log: log.clone(),
            })
        };
        // 先创建 listener，再创建它的依赖
        let renderable = new_recorder();
        let material = new_recorder();
        let shader = new_recorder();
        registry.update_dependencies(renderable.id(), &[material.as_dyn()]);
        registry.update_dependencies(material.id(), &[shader.as_dyn()]);

        for object in [&renderable, &material, &shader] {
            object.mark_core_dirty(CoreDirtyFlags::PROPERTIES);
        }
        assert_eq!(registry.sync_dirty_objects(), 3);
        assert_eq!(*log.lock().unwrap(), vec![shader.id(), material.id(), renderable.id()]);
        assert_eq!(registry.sync_dirty_objects(), 0);

        for object in [&renderable, &material, &shader] {
            object.destroy();
        }
        registry.shutdown();
    }

    #[test]
    fn test_sync_with_dependency_cycle() {
        let registry = CoreObjectRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = CoreArc::new_initialized(Recorder {
            base: CoreObjectBase::new(&registry),
            log: log.clone(),
        });
        let b = CoreArc::new_initialized(Recorder {
            base: CoreObjectBase::new(&registry),
            log: log.clone(),
        });
        registry.update_dependencies(a.id(), &[b.as_dyn()]);
        registry.update_dependencies(b.id(), &[a.as_dyn()]);
        a.mark_core_dirty(CoreDirtyFlags::DATA);
        b.mark_core_dirty(CoreDirtyFlags::DATA);

        assert_eq!(registry.sync_dirty_objects(), 2);
        assert_eq!(log.lock().unwrap().len(), 2);

        a.destroy();
        b.destroy();
        registry.shutdown();
    }
}
