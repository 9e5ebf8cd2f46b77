//! Dualis 工具集
//!
//! 提供日志初始化、性能分析 span 等在各个 crate 之间共享的工具。
//!
//! # 日志
//! 基于 `env_logger`，带颜色的等级、时间戳和源码位置。
//!
//! # Profiling
//! `profile_span!` 只有在 tracy `Client` 运行时才会创建 span，因此库代码和测试无需启动 profiler。

pub mod init_log;
pub mod profile;

pub use tracy_client;
