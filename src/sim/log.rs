use log::LevelFilter;

#[derive(PartialEq, PartialOrd, Debug, Default, Clone, Copy)]
pub enum LogLevel {
    #[default]
    Quiet,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Quiet => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

pub fn to_loglevel(ulevel: u64) -> LogLevel {
    match ulevel {
        0 => LogLevel::Quiet,
        1 => LogLevel::Info,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    }
}

/// Install the global logger. A non-zero `ulevel` wins over `RUST_LOG`; with 0, `RUST_LOG` is
/// honoured when set and warnings are shown otherwise.
pub fn init_logger(ulevel: u64) {
    let mut builder = env_logger::Builder::from_default_env();
    if ulevel > 0 || std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(to_loglevel(ulevel).filter());
    }
    // a second init (tests, embedding) keeps the first logger
    let _ = builder.try_init();
}
