use std::{collections::HashMap, env, fs};

use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: u32 = 25;

const SETTINGS_FILE: &str = "dashboard.toml";
const ENV_PREFIX: &str = "DASHBOARD__PAGE_SIZE__";

/// Per-table default page sizes, keyed by pagination-setting key
/// (`notificationsShowPer`, `candidatesShowPer`, ...). Keys are compared
/// case-insensitively so environment overrides can reach camelCase keys.
#[derive(Debug, Clone)]
pub struct PageSizeSettings {
    sizes: HashMap<String, u32>,
    fallback: u32,
}

impl Default for PageSizeSettings {
    fn default() -> Self {
        Self {
            sizes: HashMap::new(),
            fallback: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageSizeSettings {
    pub fn with_size(mut self, pagination_key: &str, limit: u32) -> Self {
        self.sizes.insert(pagination_key.to_ascii_lowercase(), limit);
        self
    }

    pub fn limit_for(&self, pagination_key: &str) -> u32 {
        self.sizes
            .get(&pagination_key.to_ascii_lowercase())
            .copied()
            .unwrap_or(self.fallback)
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    default_page_size: Option<u32>,
    #[serde(default)]
    page_sizes: HashMap<String, u32>,
}

/// Built-in defaults, then `dashboard.toml`, then `DASHBOARD__PAGE_SIZE__*`
/// environment variables. Unparseable values fall back to the previous
/// layer instead of failing the load.
pub fn load_settings() -> PageSizeSettings {
    let mut settings = PageSizeSettings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_settings_file(&mut settings, &raw);
    }

    for (name, value) in env::vars() {
        let Some(key) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        match value.parse::<u32>() {
            Ok(limit) if limit > 0 => {
                settings.sizes.insert(key.to_ascii_lowercase(), limit);
            }
            _ => debug!("ignoring unparseable page-size override {name}={value}"),
        }
    }

    settings
}

fn apply_settings_file(settings: &mut PageSizeSettings, raw: &str) {
    let parsed = match toml::from_str::<SettingsFile>(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!("ignoring malformed {SETTINGS_FILE}: {err}");
            return;
        }
    };

    if let Some(fallback) = parsed.default_page_size {
        if fallback > 0 {
            settings.fallback = fallback;
        }
    }
    for (key, limit) in parsed.page_sizes {
        if limit > 0 {
            settings.sizes.insert(key.to_ascii_lowercase(), limit);
        }
    }
}
