use thiserror::Error;

pub const N_VAR: &str = "VULTEN_BENCH_N";
pub const ITERS_VAR: &str = "VULTEN_BENCH_ITERS";
pub const DEV_VAR: &str = "VULTEN_BENCH_DEV";
pub const SETTINGS_VAR: &str = "VULTEN_BENCH_SETTINGS";
pub const INSTALL_VAR: &str = "VULTEN_BENCH_INSTALL";

/// Used when `VULTEN_BENCH_INSTALL` is unset. Setting it blank disables
/// provisioning.
#[cfg(target_os = "linux")]
pub const DEFAULT_INSTALLER: Option<&str> = Some("apt-get install -y libvulkan1");
#[cfg(not(target_os = "linux"))]
pub const DEFAULT_INSTALLER: Option<&str> = None;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Defaults {
    pub n: i64,
    pub iterations: u64,
}

pub const ADD_DEFAULTS: Defaults = Defaults {
    n: 28000,
    iterations: 4000,
};

pub const MATMUL_DEFAULTS: Defaults = Defaults {
    n: 10000,
    iterations: 1000,
};

#[derive(Debug, Clone, PartialEq)]
pub struct BenchSettings {
    pub progress: bool,
    pub verify: bool,
    pub opt_l1: bool,
}

impl Default for BenchSettings {
    fn default() -> Self {
        Self {
            progress: true,
            verify: false,
            opt_l1: false,
        }
    }
}

impl BenchSettings {
    pub fn parse(opts_str: &str) -> Self {
        let mut settings = Self::default();

        if opts_str.contains("NO_PROGRESS") {
            settings.progress = false;
        }
        if opts_str.contains("VERIFY") {
            settings.verify = true;
        }
        if opts_str.contains("OPT_L1") {
            settings.opt_l1 = true;
        }

        settings
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfig {
    pub n: i64,
    pub iterations: u64,
    pub device: usize,
    pub settings: BenchSettings,
    pub installer: Option<String>,
}

impl BenchConfig {
    pub fn from_env(defaults: Defaults) -> Result<Self, ConfigError> {
        Self::from_vars(defaults, |var| std::env::var(var).ok())
    }

    pub fn from_vars<F>(defaults: Defaults, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let n = match lookup(N_VAR) {
            Some(value) => parse_positive(N_VAR, &value)? as i64,
            None => defaults.n,
        };
        let iterations = match lookup(ITERS_VAR) {
            Some(value) => parse_positive(ITERS_VAR, &value)?,
            None => defaults.iterations,
        };
        let device = match lookup(DEV_VAR) {
            Some(value) => value.trim().parse::<usize>().map_err(|_| ConfigError::Invalid {
                var: DEV_VAR,
                value,
                reason: "expected a device index",
            })?,
            None => 0,
        };
        let settings = lookup(SETTINGS_VAR)
            .map(|s| BenchSettings::parse(&s))
            .unwrap_or_default();
        let installer = match lookup(INSTALL_VAR) {
            Some(command) => Some(command).filter(|s| !s.trim().is_empty()),
            None => DEFAULT_INSTALLER.map(str::to_string),
        };

        Ok(Self {
            n,
            iterations,
            device,
            settings,
            installer,
        })
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be greater than zero",
        }),
        Ok(v) if v > i64::MAX as u64 => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "too large",
        }),
        Ok(v) => Ok(v),
        Err(_) => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected a positive integer",
        }),
    }
}
