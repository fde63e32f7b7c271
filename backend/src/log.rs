use std::sync::LazyLock;

#[derive(Debug, Default)]
pub struct DebugSettings {
    pub mem: bool,
    pub init: bool,
    pub ops: bool,
    pub session: bool,
}

impl DebugSettings {
    pub fn parse(opts_str: &str) -> Self {
        let mut debug_opts = DebugSettings::default();

        if opts_str.contains("mem") {
            debug_opts.mem = true;
        }
        if opts_str.contains("init") {
            debug_opts.init = true;
        }
        if opts_str.contains("ops") {
            debug_opts.ops = true;
        }
        if opts_str.contains("session") {
            debug_opts.session = true;
        }
        if opts_str.contains("all") {
            debug_opts.mem = true;
            debug_opts.init = true;
            debug_opts.ops = true;
            debug_opts.session = true;
        }

        debug_opts
    }
}

pub static DEBUG_LOG_SETTINGS: LazyLock<DebugSettings> = LazyLock::new(|| {
    match std::env::var("BENCH_DEBUG") {
        Ok(opts_str) => DebugSettings::parse(&opts_str),
        _ => DebugSettings::default(),
    }
});

#[macro_export]
macro_rules! log_mem {
    ( $($arg:tt)+) => {
        {
            use $crate::log::DEBUG_LOG_SETTINGS;
            use tracing::debug;
            if DEBUG_LOG_SETTINGS.mem == true{
                debug!($($arg)+)
            }
        }
    };
}

#[macro_export]
macro_rules! log_init {
    ( $($arg:tt)+) => {
        {
            use $crate::log::DEBUG_LOG_SETTINGS;
            use tracing::debug;
            if DEBUG_LOG_SETTINGS.init == true{
                debug!($($arg)+)
            }
        }
    };
}

#[macro_export]
macro_rules! log_ops {
    ( $($arg:tt)+) => {
        {
            use $crate::log::DEBUG_LOG_SETTINGS;
            use tracing::debug;
            if DEBUG_LOG_SETTINGS.ops == true{
                debug!($($arg)+)
            }
        }
    };
}

#[macro_export]
macro_rules! log_session {
    ( $($arg:tt)+) => {
        {
            use $crate::log::DEBUG_LOG_SETTINGS;
            use tracing::debug;
            if DEBUG_LOG_SETTINGS.session == true{
                debug!($($arg)+)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_categories() {
        let settings = DebugSettings::parse("mem,ops");
        assert!(settings.mem);
        assert!(settings.ops);
        assert!(!settings.init);
        assert!(!settings.session);
    }

    #[test]
    fn parse_all() {
        let settings = DebugSettings::parse("all");
        assert!(settings.mem && settings.init && settings.ops && settings.session);
    }
}
