use std::io::Write;

/// 以 `Info` 等级初始化日志，`RUST_LOG` 可以覆盖过滤规则
pub fn init_log() {
    init_log_with_level(log::LevelFilter::Info);
}

/// 初始化全局 logger
///
/// 重复调用是安全的：第二次及之后的调用会被忽略，方便各个测试自行初始化
pub fn init_log_with_level(level: log::LevelFilter) {
    let result = env_logger::Builder::new()
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();
            let thread = std::thread::current();
            let thread_name = thread.name().unwrap_or("-");

            writeln!(
                buf,
                "{level_style}[{time}] {level}{level_style:#} {grey_style}[{thread_name}] [{file}:{line}]{grey_style:#} {}",
                record.args()
            )
        })
        .filter(None, level)
        .parse_default_env()
        .is_test(cfg!(test))
        .try_init();

    if result.is_err() {
        log::debug!("logger already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        init_log_with_level(log::LevelFilter::Debug);
        init_log();
        log::info!("logger still usable");
    }
}
