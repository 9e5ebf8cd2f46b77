/// core 线程的默认配置
pub struct DefaultCoreSettings;
impl DefaultCoreSettings {
    pub const THREAD_NAME: &'static str = "CoreThread";
    /// `None` 表示命令队列无上限
    pub const QUEUE_CAPACITY: Option<usize> = None;
}

#[derive(Clone, Debug)]
pub struct CoreThreadSettings {
    pub thread_name: String,
    /// 有上限时，队列满了以后提交命令的线程会阻塞
    pub queue_capacity: Option<usize>,
}
impl Default for CoreThreadSettings {
    fn default() -> Self {
        Self {
            thread_name: DefaultCoreSettings::THREAD_NAME.to_string(),
            queue_capacity: DefaultCoreSettings::QUEUE_CAPACITY,
        }
    }
}
