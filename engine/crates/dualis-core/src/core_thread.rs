use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender};
use dualis_crate_tools::profile_span;

use crate::async_op::{AsyncOp, AsyncOpCompleter};
use crate::settings::CoreThreadSettings;

/// 在 core 线程上执行的工作，参数是 core 线程独占的状态（例如当前使用的渲染后端）
pub type CoreWork<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// 发送给 core 线程的命令
pub enum CoreCommand<S> {
    /// 投递后立即返回
    Submit(CoreWork<S>),
    /// 投递后阻塞，直到 core 线程执行完这条命令
    SubmitAndBlock { work: CoreWork<S>, done: AsyncOpCompleter<()> },
    /// 之前提交的所有命令执行完后完成
    Fence(AsyncOpCompleter<()>),
    /// 退出 core 线程
    Shutdown,
}

/// 唯一的 core 线程，独占状态 `S` 并按提交顺序执行命令
///
/// ## 线程模型
/// - 任意线程都可以提交命令，命令通过 crossbeam channel 传递，同一个提交者的命令按提交顺序执行
/// - `submit` 类接口不等待；`submit_and_block`、`block_until_idle` 只挂起调用线程
/// - core 线程从不等待 sim 线程
/// - 在 core 线程上调用阻塞接口会死锁，[`AsyncOp`] 会检测到这种情况并 panic
/// - 某条命令 panic 后，core 线程不再执行任何命令：之后的命令都被丢弃，
///   它们的等待者（以及 panic 的那条命令的等待者）都会收到 abandoned 并 panic，而不是永远阻塞
pub struct CoreThread<S: Send + 'static> {
    sender: Sender<CoreCommand<S>>,

    thread_id: ThreadId,
    thread_name: String,
    /// 有命令 panic 时线程返回 `None`
    thread_handle: Mutex<Option<JoinHandle<Option<S>>>>,

    running: Arc<AtomicBool>,
    executed_commands: Arc<AtomicU64>,
}
// new & init
impl<S: Send + 'static> CoreThread<S> {
    /// 启动 core 线程，`state` 的所有权转移到 core 线程
    pub fn spawn(settings: &CoreThreadSettings, state: S) -> anyhow::Result<Self> {
        let (sender, receiver) = match settings.queue_capacity {
            Some(capacity) => crossbeam_channel::bounded::<CoreCommand<S>>(capacity),
            None => crossbeam_channel::unbounded::<CoreCommand<S>>(),
        };
        let running = Arc::new(AtomicBool::new(true));
        let executed_commands = Arc::new(AtomicU64::new(0));

        let thread_name = settings.thread_name.clone();
        let thread_handle = {
            let running = running.clone();
            let executed_commands = executed_commands.clone();
            let thread_name = thread_name.clone();
            thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || Self::core_thread_main(&thread_name, state, receiver, running, executed_commands))
                .with_context(|| format!("failed to spawn {}", settings.thread_name))?
        };

        log::info!("{thread_name} started");
        Ok(Self {
            sender,
            thread_id: thread_handle.thread().id(),
            thread_name,
            thread_handle: Mutex::new(Some(thread_handle)),
            running,
            executed_commands,
        })
    }

    fn core_thread_main(
        thread_name: &str,
        mut state: S,
        receiver: Receiver<CoreCommand<S>>,
        running: Arc<AtomicBool>,
        executed_commands: Arc<AtomicU64>,
    ) -> Option<S> {
        dualis_crate_tools::profile::name_current_thread(thread_name);
        scopeguard::defer! {
            running.store(false, Ordering::SeqCst);
        }

        let mut failed = false;
        while let Ok(command) = receiver.recv() {
            if matches!(command, CoreCommand::Shutdown) {
                log::info!("{thread_name} received shutdown");
                break;
            }
            if failed {
                // drop 命令时其中的 completer 会把等待者标记为 abandoned
                log::warn!("{thread_name} failed earlier, command discarded");
                continue;
            }

            let _span = profile_span!("CoreThread::execute");
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| Self::execute(&mut state, command)));
            if let Err(payload) = result {
                log::error!(
                    "{thread_name}: command panicked ({}), all further commands are discarded",
                    panic_message(payload.as_ref())
                );
                failed = true;
                running.store(false, Ordering::SeqCst);
                continue;
            }
            executed_commands.fetch_add(1, Ordering::Relaxed);
        }

        (!failed).then_some(state)
    }

    fn execute(state: &mut S, command: CoreCommand<S>) {
        match command {
            CoreCommand::Submit(work) => work(state),
            CoreCommand::SubmitAndBlock { work, done } => {
                work(state);
                done.complete(());
            }
            CoreCommand::Fence(done) => done.complete(()),
            CoreCommand::Shutdown => {}
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
// submit
impl<S: Send + 'static> CoreThread<S> {
    /// 投递命令，不等待执行
    pub fn queue_command(&self, work: impl FnOnce(&mut S) + Send + 'static) {
        self.send(CoreCommand::Submit(Box::new(work)));
    }

    /// 投递带返回值的命令，返回值在 core 线程执行完后写入 [`AsyncOp`]
    pub fn queue_return_command<R: Send + 'static>(
        &self,
        work: impl FnOnce(&mut S) -> R + Send + 'static,
    ) -> AsyncOp<R> {
        let op = AsyncOp::for_thread(self.thread_id);
        let completer = op.completer();
        self.queue_command(move |state| completer.complete(work(state)));
        op
    }

    /// 投递命令并阻塞，直到 core 线程执行完成
    ///
    /// # Panics
    /// - 在 core 线程上调用
    /// - 命令 panic，或者 core 线程已经因为之前的 panic 停止执行命令
    pub fn submit_and_block(&self, work: impl FnOnce(&mut S) + Send + 'static) {
        let done = AsyncOp::for_thread(self.thread_id);
        self.send(CoreCommand::SubmitAndBlock {
            work: Box::new(work),
            done: done.completer(),
        });
        done.block_until_complete();
    }

    /// 等待之前提交的所有命令执行完毕；在 core 线程上调用时直接返回
    pub fn block_until_idle(&self) {
        if self.is_core_thread() {
            log::debug!("block_until_idle called on {}, ignored", self.thread_name);
            return;
        }

        let fence = AsyncOp::for_thread(self.thread_id);
        self.send(CoreCommand::Fence(fence.completer()));
        fence.block_until_complete();
    }

    /// core 线程已经退出时命令被丢弃，其中的 completer 会让等待者收到 abandoned
    fn send(&self, command: CoreCommand<S>) {
        if self.sender.send(command).is_err() {
            log::error!("{} is not running, command dropped", self.thread_name);
        }
    }
}
// shutdown
impl<S: Send + 'static> CoreThread<S> {
    /// 执行完队列中已有的命令后退出 core 线程，并把状态交还给调用者
    ///
    /// 已经关闭，或者有命令 panic 过时返回 `None`
    pub fn shutdown(&self) -> Option<S> {
        assert!(!self.is_core_thread(), "{} cannot shut itself down", self.thread_name);

        let handle = self.thread_handle.lock().unwrap().take()?;
        let _ = self.sender.send(CoreCommand::Shutdown);

        match handle.join() {
            Ok(Some(state)) => {
                log::info!("{} stopped", self.thread_name);
                Some(state)
            }
            Ok(None) => {
                log::error!("{} stopped after a command panicked", self.thread_name);
                None
            }
            Err(_) => {
                log::error!("{} panicked", self.thread_name);
                None
            }
        }
    }
}
impl<S: Send + 'static> Drop for CoreThread<S> {
    fn drop(&mut self) {
        if self.thread_handle.get_mut().map(|h| h.is_some()).unwrap_or(false) {
            self.shutdown();
        }
    }
}
// getters
impl<S: Send + 'static> CoreThread<S> {
    #[inline]
    pub fn is_core_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    #[inline]
    pub fn core_thread_id(&self) -> ThreadId {
        self.thread_id
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 已执行的命令数量，包括 fence
    #[inline]
    pub fn executed_commands(&self) -> u64 {
        self.executed_commands.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_utils::sync::WaitGroup;
    use std::time::Duration;

    fn spawn_vec_thread() -> CoreThread<Vec<u32>> {
        CoreThread::spawn(&CoreThreadSettings::default(), Vec::new()).unwrap()
    }

    #[test]
    fn test_commands_execute_in_order() {
        let core_thread = spawn_vec_thread();
        for i in 0..100 {
            core_thread.queue_command(move |v| v.push(i));
        }
        core_thread.block_until_idle();

        let state = core_thread.shutdown().unwrap();
        assert_eq!(state, (0..100).collect::<Vec<_>>());
        assert!(!core_thread.is_running());
        assert!(core_thread.shutdown().is_none());
    }

    #[test]
    fn test_queue_return_command() {
        let core_thread = spawn_vec_thread();
        core_thread.queue_command(|v| v.extend([1, 2, 3]));
        let op = core_thread.queue_return_command(|v| v.iter().sum::<u32>());
        assert_eq!(op.return_value(), 6);
        core_thread.shutdown();
    }

    #[test]
    fn test_submit_and_block_returns_after_execution() {
        let core_thread = spawn_vec_thread();
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = flag.clone();

        core_thread.submit_and_block(move |_| {
            thread::sleep(Duration::from_millis(50));
            flag_clone.store(true, Ordering::SeqCst);
        });
        assert!(flag.load(Ordering::SeqCst));
        core_thread.shutdown();
    }

    #[test]
    fn test_is_core_thread() {
        let settings = CoreThreadSettings {
            thread_name: "TestCoreThread".to_string(),
            queue_capacity: Some(4),
        };
        let core_thread = CoreThread::spawn(&settings, ()).unwrap();
        assert!(!core_thread.is_core_thread());

        let core_thread_id = core_thread.core_thread_id();
        let op = core_thread.queue_return_command(move |_| {
            let current = thread::current();
            (current.id() == core_thread_id, current.name().map(str::to_string))
        });
        assert_eq!(op.return_value(), (true, Some("TestCoreThread".to_string())));
        core_thread.shutdown();
    }

    #[test]
    fn test_per_submitter_order_with_many_threads() {
        let core_thread = Arc::new(
            CoreThread::spawn(&CoreThreadSettings::default(), Vec::<(usize, usize)>::new()).unwrap(),
        );

        let wait_group = WaitGroup::new();
        for submitter in 0..4 {
            let core_thread = core_thread.clone();
            let wg = wait_group.clone();
            thread::spawn(move || {
                for seq in 0..50 {
                    core_thread.queue_command(move |v| v.push((submitter, seq)));
                }
                drop(wg);
            });
        }
        wait_group.wait();
        core_thread.block_until_idle();

        let state = core_thread.shutdown().unwrap();
        assert_eq!(state.len(), 200);
        for submitter in 0..4 {
            let seqs: Vec<usize> = state.iter().filter(|(s, _)| *s == submitter).map(|(_, seq)| *seq).collect();
            assert_eq!(seqs, (0..50).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_drop_joins_thread() {
        let counter = Arc::new(AtomicU64::new(0));
        {
            let core_thread = CoreThread::spawn(&CoreThreadSettings::default(), counter.clone()).unwrap();
            for _ in 0..10 {
                core_thread.queue_command(|c| {
                    c.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_panicking_command_abandons_waiters() {
        let core_thread = spawn_vec_thread();
        let failing = core_thread.queue_return_command(|_| -> u32 { panic!("backend failure") });
        let later = core_thread.queue_return_command(|v| v.len());

        assert!(std::panic::catch_unwind(AssertUnwindSafe(|| failing.return_value())).is_err());
        assert!(failing.is_abandoned());
        assert!(std::panic::catch_unwind(AssertUnwindSafe(|| later.return_value())).is_err());
        assert!(later.is_abandoned());

        assert!(!core_thread.is_running());
        assert!(core_thread.shutdown().is_none());
    }

    #[test]
    #[should_panic(expected = "AsyncOp abandoned")]
    fn test_submit_and_block_on_panicking_command() {
        let core_thread = spawn_vec_thread();
        core_thread.submit_and_block(|_| panic!("backend failure"));
    }

    #[test]
    #[should_panic(expected = "AsyncOp abandoned")]
    fn test_wait_after_shutdown() {
        let core_thread = spawn_vec_thread();
        core_thread.shutdown();
        core_thread.queue_return_command(|v| v.len()).return_value();
    }
}
