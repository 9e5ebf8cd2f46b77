use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::ThreadId;
use std::time::Duration;

enum AsyncOpSlot<T> {
    Pending,
    Ready(T),
    /// 负责完成的一方在写入结果之前就被丢弃了，例如 core 线程上的命令 panic
    Abandoned,
}

struct AsyncOpShared<T> {
    slot: Mutex<AsyncOpSlot<T>>,
    cond: Condvar,
    /// 负责完成该操作的线程；在这个线程上阻塞等待一定会死锁
    completer: Option<ThreadId>,
}

/// 一次性的跨线程结果
///
/// 由 core 线程调用 [`AsyncOp::complete_operation`] 完成且只能完成一次；任意线程都可以轮询或阻塞等待结果。
/// clone 出来的句柄共享同一份结果存储。
///
/// 操作本身不表达失败：需要报告失败的调用方应当让 `T` 携带错误信息，例如 `Option<PixelData>` 或 `bool`。
/// 如果完成方在写入结果之前被丢弃，操作变为 abandoned，所有阻塞等待都会 panic 而不是永远挂起。
pub struct AsyncOp<T = ()> {
    shared: Arc<AsyncOpShared<T>>,
}
impl<T> Clone for AsyncOp<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}
impl<T> Default for AsyncOp<T> {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl<T> AsyncOp<T> {
    /// 未完成的操作，不记录完成线程
    pub fn new() -> Self {
        Self::with_completer(None)
    }

    /// 未完成的操作，由 `thread` 负责完成
    ///
    /// 在 `thread` 上调用阻塞等待会直接 panic，而不是死锁；在其他线程上完成也会 panic
    pub fn for_thread(thread: ThreadId) -> Self {
        Self::with_completer(Some(thread))
    }

    /// 已经完成的操作
    pub fn completed(value: T) -> Self {
        let op = Self::new();
        op.complete_operation(value);
        op
    }

    fn with_completer(completer: Option<ThreadId>) -> Self {
        Self {
            shared: Arc::new(AsyncOpShared {
                slot: Mutex::new(AsyncOpSlot::Pending),
                cond: Condvar::new(),
                completer,
            }),
        }
    }

    /// 完成端句柄，随工作一起交给完成方
    pub fn completer(&self) -> AsyncOpCompleter<T> {
        AsyncOpCompleter { op: self.clone() }
    }
}
// complete
impl<T> AsyncOp<T> {
    /// 写入结果并唤醒所有等待者
    ///
    /// # Panics
    /// - 重复完成同一个操作
    /// - 不在记录的完成线程上完成
    pub fn complete_operation(&self, value: T) {
        if let Some(completer) = self.shared.completer {
            assert_eq!(
                std::thread::current().id(),
                completer,
                "AsyncOp completed off its completer thread"
            );
        }

        let mut slot = self.shared.slot.lock().unwrap();
        match &*slot {
            AsyncOpSlot::Pending => {}
            AsyncOpSlot::Ready(_) => panic!("AsyncOp completed twice"),
            AsyncOpSlot::Abandoned => panic!("AsyncOp completed after it was abandoned"),
        }
        *slot = AsyncOpSlot::Ready(value);
        drop(slot);

        self.shared.cond.notify_all();
    }

    /// 放弃一个尚未完成的操作并唤醒所有等待者；已经完成时什么都不做
    fn abandon(&self) {
        let mut slot = self.shared.slot.lock().unwrap();
        if !matches!(*slot, AsyncOpSlot::Pending) {
            return;
        }
        *slot = AsyncOpSlot::Abandoned;
        drop(slot);

        self.shared.cond.notify_all();
    }
}
// observe
impl<T> AsyncOp<T> {
    #[inline]
    pub fn has_completed(&self) -> bool {
        matches!(*self.shared.slot.lock().unwrap(), AsyncOpSlot::Ready(_))
    }

    #[inline]
    pub fn is_abandoned(&self) -> bool {
        matches!(*self.shared.slot.lock().unwrap(), AsyncOpSlot::Abandoned)
    }

    /// 阻塞当前线程直到操作完成
    ///
    /// # Panics
    /// - 在负责完成该操作的线程上等待一个尚未完成的操作
    /// - 操作被 abandon
    pub fn block_until_complete(&self) {
        let _slot = self.wait_slot();
    }

    /// 最多等待 `timeout`，返回操作是否已经完成
    ///
    /// 超时只是停止等待，core 线程上的工作仍然会执行完毕
    ///
    /// # Panics
    /// 同 [`Self::block_until_complete`]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let slot = self.shared.slot.lock().unwrap();
        if matches!(*slot, AsyncOpSlot::Pending) {
            self.assert_not_completer();
        }

        let (slot, _) = self
            .shared
            .cond
            .wait_timeout_while(slot, timeout, |s| matches!(s, AsyncOpSlot::Pending))
            .unwrap();
        let completed = match &*slot {
            AsyncOpSlot::Pending => Some(false),
            AsyncOpSlot::Ready(_) => Some(true),
            AsyncOpSlot::Abandoned => None,
        };
        drop(slot);
        completed.unwrap_or_else(|| Self::abandoned_panic())
    }

    fn wait_slot(&self) -> MutexGuard<'_, AsyncOpSlot<T>> {
        let slot = self.shared.slot.lock().unwrap();
        if matches!(*slot, AsyncOpSlot::Pending) {
            self.assert_not_completer();
        }

        let slot = self.shared.cond.wait_while(slot, |s| matches!(s, AsyncOpSlot::Pending)).unwrap();
        if matches!(*slot, AsyncOpSlot::Abandoned) {
            drop(slot);
            Self::abandoned_panic();
        }
        slot
    }

    fn assert_not_completer(&self) {
        if let Some(completer) = self.shared.completer {
            assert!(
                completer != std::thread::current().id(),
                "AsyncOp waited on by the thread that must complete it; this would deadlock"
            );
        }
    }

    fn abandoned_panic() -> ! {
        panic!("AsyncOp abandoned: the completing side was dropped before producing a value")
    }
}
impl<T: Clone> AsyncOp<T> {
    /// 轮询：已完成则返回结果的拷贝；未完成或已被 abandon 时返回 `None`
    pub fn try_return_value(&self) -> Option<T> {
        match &*self.shared.slot.lock().unwrap() {
            AsyncOpSlot::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// 阻塞直到完成，然后返回结果的拷贝
    ///
    /// # Panics
    /// 同 [`Self::block_until_complete`]
    pub fn return_value(&self) -> T {
        match &*self.wait_slot() {
            AsyncOpSlot::Ready(value) => value.clone(),
            _ => unreachable!("wait_slot only returns a ready slot"),
        }
    }
}
impl<T> std::fmt::Debug for AsyncOp<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncOp")
            .field("completed", &self.has_completed())
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

/// [`AsyncOp`] 的完成端
///
/// 没有调用 [`AsyncOpCompleter::complete`] 就被 drop（命令 panic、命令没有被执行就被丢弃）时，
/// 操作变为 abandoned，等待者会被唤醒并 panic。
pub struct AsyncOpCompleter<T> {
    op: AsyncOp<T>,
}
impl<T> AsyncOpCompleter<T> {
    pub fn complete(self, value: T) {
        self.op.complete_operation(value);
    }
}
impl<T> Drop for AsyncOpCompleter<T> {
    fn drop(&mut self) {
        self.op.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_complete_then_read() {
        let op = AsyncOp::<u32>::new();
        assert!(!op.has_completed());
        assert_eq!(op.try_return_value(), None);

        op.complete_operation(42);
        assert!(op.has_completed());
        assert_eq!(op.return_value(), 42);
        assert_eq!(op.try_return_value(), Some(42));
    }

    #[test]
    fn test_completed_constructor() {
        let op = AsyncOp::completed(String::from("done"));
        assert!(op.has_completed());
        assert_eq!(op.return_value(), "done");
    }

    #[test]
    fn test_clones_share_result() {
        let op = AsyncOp::<u32>::new();
        let observer = op.clone();
        op.complete_operation(7);
        assert_eq!(observer.return_value(), 7);
    }

    #[test]
    fn test_read_blocks_until_completed() {
        let op = AsyncOp::<u64>::new();
        let completer = op.clone();

        let start = Instant::now();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            completer.complete_operation(99);
        });

        assert_eq!(op.return_value(), 99);
        assert!(start.elapsed() >= Duration::from_millis(100));
        handle.join().unwrap();
    }

    #[test]
    fn test_observe_from_many_threads() {
        let op = AsyncOp::<usize>::new();
        let observers: Vec<_> = (0..4)
            .map(|_| {
                let op = op.clone();
                std::thread::spawn(move || op.return_value())
            })
            .collect();

        op.complete_operation(5);
        for observer in observers {
            assert_eq!(observer.join().unwrap(), 5);
        }
    }

    #[test]
    fn test_wait_timeout() {
        let op = AsyncOp::<()>::new();
        assert!(!op.wait_timeout(Duration::from_millis(10)));
        op.complete_operation(());
        assert!(op.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn test_double_complete() {
        let op = AsyncOp::<u32>::new();
        op.complete_operation(1);
        op.complete_operation(2);
    }

    #[test]
    #[should_panic(expected = "would deadlock")]
    fn test_wait_on_completer_thread() {
        let op = AsyncOp::<u32>::for_thread(std::thread::current().id());
        op.block_until_complete();
    }

    #[test]
    fn test_completer_thread_can_read_completed() {
        let op = AsyncOp::<u32>::for_thread(std::thread::current().id());
        op.complete_operation(3);
        assert_eq!(op.return_value(), 3);
    }

    #[test]
    #[should_panic(expected = "completed off its completer thread")]
    fn test_complete_off_completer_thread() {
        let other = std::thread::spawn(|| std::thread::current().id()).join().unwrap();
        let op = AsyncOp::<u32>::for_thread(other);
        op.complete_operation(1);
    }

    #[test]
    fn test_dropped_completer_abandons() {
        let op = AsyncOp::<u32>::new();
        let waiter = {
            let op = op.clone();
            std::thread::spawn(move || op.return_value())
        };

        let completer = op.completer();
        std::thread::spawn(move || drop(completer)).join().unwrap();

        assert!(waiter.join().is_err());
        assert!(op.is_abandoned());
        assert!(!op.has_completed());
        assert_eq!(op.try_return_value(), None);
    }

    #[test]
    #[should_panic(expected = "AsyncOp abandoned")]
    fn test_wait_timeout_on_abandoned() {
        let op = AsyncOp::<()>::new();
        drop(op.completer());
        op.wait_timeout(Duration::from_millis(10));
    }

    #[test]
    fn test_completer_after_completion_is_noop() {
        let op = AsyncOp::<u32>::new();
        op.completer().complete(8);
        assert!(!op.is_abandoned());
        assert_eq!(op.return_value(), 8);
    }
}
