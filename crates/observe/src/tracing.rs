use {
    std::{panic::PanicHookInfo, sync::Once},
    tracing::level_filters::LevelFilter,
    tracing_subscriber::{
        EnvFilter,
        Layer,
        fmt::{time::UtcTime, writer::MakeWriterExt as _},
        layer::SubscriberExt as _,
        util::SubscriberInitExt as _,
    },
};

/// Initializes tracing setup that is shared between the binaries.
/// `env_filter` has similar syntax to env_logger. It is documented at
/// https://docs.rs/tracing-subscriber/0.2.15/tracing_subscriber/filter/struct.EnvFilter.html
///
/// Events at or above `stderr_threshold` go to stderr, everything else to
/// stdout.
pub fn initialize(env_filter: &str, stderr_threshold: LevelFilter, use_json_format: bool) {
    set_tracing_subscriber(env_filter, stderr_threshold, use_json_format);
    std::panic::set_hook(Box::new(tracing_panic_hook));
}

/// Like [`initialize`], but can be called multiple times in a row. Later calls
/// are ignored.
///
/// Useful for tests.
pub fn initialize_reentrant(env_filter: &str) {
    // The tracing subscriber below is global object so initializing it again in
    // the same process by a different thread would fail.
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        set_tracing_subscriber(env_filter, LevelFilter::ERROR, false);
        std::panic::set_hook(Box::new(tracing_panic_hook));
    });
}

fn set_tracing_subscriber(env_filter: &str, stderr_threshold: LevelFilter, use_json_format: bool) {
    let writer = std::io::stderr
        .with_max_level(
            stderr_threshold
                .into_level()
                .unwrap_or(tracing::Level::ERROR),
        )
        .or_else(std::io::stdout);

    let fmt_layer = if use_json_format {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_timer(UtcTime::rfc_3339())
            .with_filter(EnvFilter::new(env_filter))
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_timer(UtcTime::rfc_3339())
            .with_ansi(false)
            .with_filter(EnvFilter::new(env_filter))
            .boxed()
    };

    tracing_subscriber::registry().with(fmt_layer).init();
    tracing::info!(%env_filter, %use_json_format, "initialized tracing");
}

/// Panic hook that prints roughly the same message as the default panic hook
/// but uses tracing::error instead of stderr.
///
/// Useful when we want panic messages to have the proper log format.
fn tracing_panic_hook(panic: &PanicHookInfo) {
    let thread = std::thread::current();
    let name = thread.name().unwrap_or("<unnamed>");
    let backtrace = std::backtrace::Backtrace::force_capture();
    tracing::error!("thread '{name}' {panic}\nstack backtrace:\n{backtrace}");
}
