/// 在 tracy `Client` 运行时创建一个 span，否则返回 `None`
///
/// 返回值需要绑定到一个变量上，span 在变量 drop 时结束：
///
/// ```ignore
/// let _span = dualis_crate_tools::profile_span!("CoreThread::execute");
/// ```
#[macro_export]
macro_rules! profile_span {
    ($name:expr) => {
        $crate::tracy_client::Client::running()
            .map(|client| client.span($crate::tracy_client::span_location!($name), 0))
    };
}

/// 启动 tracy client，并为当前线程命名
pub fn start_profiler(thread_name: &str) {
    let client = tracy_client::Client::start();
    client.set_thread_name(thread_name);
}

/// 如果 tracy client 已经启动，为当前线程命名
pub fn name_current_thread(thread_name: &str) {
    if let Some(client) = tracy_client::Client::running() {
        client.set_thread_name(thread_name);
    }
}
