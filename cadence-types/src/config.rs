use serde::Deserialize;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// The recognized options from §6, with their shipped defaults already
/// applied. Construct via [`Config::load`] to pick up a user override file,
/// or [`Config::from_file`] for an in-memory override (e.g. the offline
/// renderer, which has no reason to touch the filesystem).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub ppq: u32,
    pub schedule_ahead_ms: Option<u32>,
    pub tick_driver_interval_ms: u32,
    pub automation_interval_ms: u32,
    pub debounce_idle_ms: u32,
    pub debounce_realtime_ms: u32,
    pub debounce_burst_ms: u32,
    pub stale_horizon_s: f64,
    pub max_voices_default: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ppq: 96,
            schedule_ahead_ms: None,
            tick_driver_interval_ms: 16,
            automation_interval_ms: 10,
            debounce_idle_ms: 16,
            debounce_realtime_ms: 4,
            debounce_burst_ms: 0,
            stale_horizon_s: 1.5,
            max_voices_default: 16,
        }
    }
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    engine: PartialEngineConfig,
}

#[derive(Deserialize, Default)]
struct PartialEngineConfig {
    ppq: Option<u32>,
    schedule_ahead_ms: Option<u32>,
    tick_driver_interval_ms: Option<u32>,
    automation_interval_ms: Option<u32>,
    debounce_idle_ms: Option<u32>,
    debounce_realtime_ms: Option<u32>,
    debounce_burst_ms: Option<u32>,
    stale_horizon_s: Option<f64>,
    max_voices_default: Option<usize>,
}

fn merge(base: &mut EngineConfig, over: PartialEngineConfig) {
    if let Some(v) = over.ppq {
        base.ppq = v;
    }
    if over.schedule_ahead_ms.is_some() {
        base.schedule_ahead_ms = over.schedule_ahead_ms;
    }
    if let Some(v) = over.tick_driver_interval_ms {
        base.tick_driver_interval_ms = v;
    }
    if let Some(v) = over.automation_interval_ms {
        base.automation_interval_ms = v;
    }
    if let Some(v) = over.debounce_idle_ms {
        base.debounce_idle_ms = v;
    }
    if let Some(v) = over.debounce_realtime_ms {
        base.debounce_realtime_ms = v;
    }
    if let Some(v) = over.debounce_burst_ms {
        base.debounce_burst_ms = v;
    }
    if let Some(v) = over.stale_horizon_s {
        base.stale_horizon_s = v;
    }
    if let Some(v) = over.max_voices_default {
        base.max_voices_default = v;
    }
}

pub struct Config {
    engine: EngineConfig,
}

impl Config {
    /// Parses the embedded defaults, then overlays a user config file at
    /// `dirs::config_dir()/cadence-core/config.toml` if one exists. A
    /// malformed or unreadable override is logged and ignored rather than
    /// failing startup.
    pub fn load() -> Self {
        let mut engine = Self::parse_defaults();

        if let Some(path) = user_config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                        Ok(user) => merge(&mut engine, user.engine),
                        Err(e) => log::warn!(
                            target: "config",
                            "ignoring malformed config {}: {e}",
                            path.display()
                        ),
                    },
                    Err(e) => log::warn!(
                        target: "config",
                        "could not read config {}: {e}",
                        path.display()
                    ),
                }
            }
        }

        Config { engine }
    }

    /// Builds a `Config` from an in-memory TOML override, skipping the
    /// filesystem entirely.
    pub fn from_override_str(toml_str: &str) -> Self {
        let mut engine = Self::parse_defaults();
        match toml::from_str::<ConfigFile>(toml_str) {
            Ok(user) => merge(&mut engine, user.engine),
            Err(e) => log::warn!(target: "config", "ignoring malformed inline config: {e}"),
        }
        Config { engine }
    }

    fn parse_defaults() -> EngineConfig {
        let base: ConfigFile =
            toml::from_str(DEFAULT_CONFIG).expect("embedded config.toml must parse");
        let mut engine = EngineConfig::default();
        merge(&mut engine, base.engine);
        engine
    }

    pub fn engine(&self) -> EngineConfig {
        self.engine
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            engine: Self::parse_defaults(),
        }
    }
}

fn user_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|d| d.join("cadence-core").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_parse() {
        let cfg = Config::default();
        assert_eq!(cfg.engine().ppq, 96);
        assert_eq!(cfg.engine().max_voices_default, 16);
    }

    #[test]
    fn inline_override_merges_over_defaults() {
        let cfg = Config::from_override_str("[engine]\nmax_voices_default = 32\n");
        assert_eq!(cfg.engine().max_voices_default, 32);
        assert_eq!(cfg.engine().ppq, 96);
    }

    #[test]
    fn malformed_inline_override_falls_back_to_defaults() {
        let cfg = Config::from_override_str("not valid toml {{{");
        assert_eq!(cfg.engine().max_voices_default, 16);
    }
}
