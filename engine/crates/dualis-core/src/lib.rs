//! 双线程 core object 生命周期
//!
//! sim 线程持有资源句柄，唯一的 core 线程持有真正的 GPU 对象并按提交顺序执行命令。
//!
//! - [`core_object_registry`]：进程内所有存活 core object 的注册表，负责分配 id、延迟销毁、依赖追踪以及关闭时的泄漏检查
//! - [`core_object`]：`Uninitialized -> Initialized -> Destroyed` 生命周期，以及共享句柄 [`core_object::CoreArc`]
//! - [`async_op`]：跨线程的一次性结果
//! - [`core_thread`]：执行 core 命令的线程

pub mod async_op;
pub mod core_object;
pub mod core_object_registry;
pub mod core_thread;
pub mod settings;
