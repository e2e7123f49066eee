#![cfg_attr(not(test), no_std)]

#[macro_use]
mod macros;
mod level;
mod record;

pub use level::{Level, LevelFilter, CLOG};
pub use record::Record;

use core::{
    fmt::{self, Write},
    sync::atomic::{AtomicUsize, Ordering},
};

use anstyle::{AnsiColor, Reset, Style};
use spin::{mutex::SpinMutex, Once};

/// 日志的输出端，由平台层在启动时注册
pub trait Console: Send + Sync {
    fn write_str(&self, s: &str);
}

static CONSOLE: Once<&'static dyn Console> = Once::new();
static MAX_LEVEL: AtomicUsize = AtomicUsize::new(CLOG as usize);
/// 保证一条日志不会被其他核的输出打断
static PRINT_LOCK: SpinMutex<()> = SpinMutex::new(());

/// 注册输出端。只有第一次注册生效，返回是否注册成功
pub fn set_console(console: &'static dyn Console) -> bool {
    let mut first = false;
    CONSOLE.call_once(|| {
        first = true;
        console
    });
    first
}

pub fn set_max_level(level: LevelFilter) {
    MAX_LEVEL.store(level as usize, Ordering::Relaxed);
}

#[inline]
pub fn max_level() -> LevelFilter {
    LevelFilter::from_usize(MAX_LEVEL.load(Ordering::Relaxed))
}

struct ConsoleWriter(&'static dyn Console);

impl Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

fn write_log(writer: &mut impl Write, record: &Record<'_>) -> fmt::Result {
    // 开头部分，即日志级别，如 `[ INFO]`
    let color = match record.level() {
        Level::Error => AnsiColor::Red,
        Level::Warn => AnsiColor::BrightYellow,
        Level::Info => AnsiColor::Blue,
        Level::Debug => AnsiColor::Green,
        Level::Trace => AnsiColor::BrightBlack,
    };
    write!(
        writer,
        "{}[{:>5}]{}",
        color.render_fg(),
        record.level(),
        Reset.render()
    )?;

    const TARGET_COLOR: Style = AnsiColor::White.on_default().bold();
    write!(
        writer,
        " {}{}{}: ",
        TARGET_COLOR.render(),
        record.target(),
        Reset.render()
    )?;

    writeln!(writer, "{}", record.args())
}

#[inline]
#[doc(hidden)]
pub fn log_impl(level: Level, target: &str, args: fmt::Arguments<'_>) {
    let Some(&console) = CONSOLE.get() else {
        return;
    };
    let record = Record::new(level, target, args);
    let _guard = PRINT_LOCK.lock();
    // 输出端自身不会失败，格式化出错时丢弃这一条
    let _ = write_log(&mut ConsoleWriter(console), &record);
}

#[cfg(test)]
mod tests {
    use std::string::String;

    use spin::mutex::SpinMutex;

    use crate::{Console, LevelFilter};

    struct Capture(SpinMutex<String>);

    impl Console for Capture {
        fn write_str(&self, s: &str) {
            self.0.lock().push_str(s);
        }
    }

    static CAPTURE: Capture = Capture(SpinMutex::new(String::new()));

    #[test]
    fn filtered_by_max_level() {
        assert!(crate::set_console(&CAPTURE));
        assert!(!crate::set_console(&CAPTURE));

        crate::set_max_level(LevelFilter::Info);
        info!("frame {} evicted", 3);
        debug!("should not appear");
        warn!("swap is full");

        let out = CAPTURE.0.lock().clone();
        assert!(out.contains("frame 3 evicted"));
        assert!(out.contains("swap is full"));
        assert!(out.contains(" INFO]"));
        assert!(out.contains("kernel_tracer::tests"));
        assert!(!out.contains("should not appear"));
        assert_eq!(out.lines().count(), 2);

        crate::set_max_level(LevelFilter::Off);
        error!("muted");
        assert!(!CAPTURE.0.lock().contains("muted"));
    }
}
