use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};

use crate::render::{
    DEFAULT_GRID_SIZE, DEFAULT_LOADED_PAGES, DEFAULT_PAGE_POOL_SIZE, DEFAULT_PART_SIZE,
    DEFAULT_THUMBNAIL_CAPACITY, DEFAULT_THUMBNAIL_RATIO, MAX_ZOOM, MIN_ZOOM, TileConfig,
};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "tileview";

const PART_SIZE_RANGE: (f32, f32) = (16.0, 4096.0);
const MAX_GRID_SIZE: usize = 32;
const ZOOM_FLOOR: f32 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Tile edge in pixels
    #[serde(default = "default_part_size")]
    pub part_size: f32,

    /// The cache holds `grid_size * grid_size` tiles
    #[serde(default = "default_grid_size")]
    pub grid_size: usize,

    #[serde(default = "default_thumbnail_capacity")]
    pub thumbnail_capacity: usize,

    #[serde(default = "default_thumbnail_ratio")]
    pub thumbnail_ratio: f32,

    #[serde(default = "default_loaded_pages")]
    pub loaded_pages: usize,

    #[serde(default = "default_page_pool_size")]
    pub page_pool_size: usize,

    #[serde(default = "default_min_zoom")]
    pub min_zoom: f32,

    #[serde(default = "default_max_zoom")]
    pub max_zoom: f32,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_part_size() -> f32 {
    DEFAULT_PART_SIZE
}

fn default_grid_size() -> usize {
    DEFAULT_GRID_SIZE
}

fn default_thumbnail_capacity() -> usize {
    DEFAULT_THUMBNAIL_CAPACITY
}

fn default_thumbnail_ratio() -> f32 {
    DEFAULT_THUMBNAIL_RATIO
}

fn default_loaded_pages() -> usize {
    DEFAULT_LOADED_PAGES
}

fn default_page_pool_size() -> usize {
    DEFAULT_PAGE_POOL_SIZE
}

fn default_min_zoom() -> f32 {
    MIN_ZOOM
}

fn default_max_zoom() -> f32 {
    MAX_ZOOM
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            part_size: default_part_size(),
            grid_size: default_grid_size(),
            thumbnail_capacity: default_thumbnail_capacity(),
            thumbnail_ratio: default_thumbnail_ratio(),
            loaded_pages: default_loaded_pages(),
            page_pool_size: default_page_pool_size(),
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
        }
    }
}

impl Settings {
    /// Pull every value back into a usable range
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        if !self.part_size.is_finite() {
            self.part_size = default_part_size();
        }
        self.part_size = self.part_size.clamp(PART_SIZE_RANGE.0, PART_SIZE_RANGE.1);
        self.grid_size = self.grid_size.clamp(1, MAX_GRID_SIZE);
        self.thumbnail_capacity = self.thumbnail_capacity.max(1);
        if !(self.thumbnail_ratio > 0.0 && self.thumbnail_ratio <= 1.0) {
            self.thumbnail_ratio = default_thumbnail_ratio();
        }
        self.loaded_pages = self.loaded_pages.max(1);
        self.page_pool_size = self.page_pool_size.max(1);
        if !self.min_zoom.is_finite() || self.min_zoom < ZOOM_FLOOR {
            self.min_zoom = default_min_zoom();
        }
        if !self.max_zoom.is_finite() || self.max_zoom < self.min_zoom {
            self.max_zoom = self.min_zoom.max(default_max_zoom());
        }
        self
    }

    #[must_use]
    pub fn tile_config(&self) -> TileConfig {
        TileConfig {
            part_size: self.part_size,
            cache_capacity: self.grid_size * self.grid_size,
            thumbnail_capacity: self.thumbnail_capacity,
            thumbnail_ratio: self.thumbnail_ratio,
            loaded_pages: self.loaded_pages,
            page_pool_size: self.page_pool_size,
            min_zoom: self.min_zoom,
            max_zoom: self.max_zoom,
        }
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load settings from the default location, writing defaults there on first
/// run
pub fn load_settings() {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };

    if path.exists() {
        load_settings_from_path(&path);
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        if let Ok(settings) = SETTINGS.read() {
            save_settings_to_file(&settings, &path);
        }
    }
}

/// Load settings from `path`. Errors are logged and leave the current
/// settings untouched.
pub fn load_settings_from_path(path: &Path) {
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }

                if let Ok(mut global) = SETTINGS.write() {
                    *global = settings.sanitized();
                }
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );
    settings.version = CURRENT_VERSION;
}

pub fn save_settings() {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, cannot save settings");
        return;
    };

    if let Ok(settings) = SETTINGS.read() {
        save_settings_to_file(&settings, &path);
    }
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let content = generate_settings_yaml(settings);

    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::from(SETTINGS_HEADER);

    content.push_str(&format!("version: {}\n", settings.version));
    content.push_str(&format!("part_size: {}\n", settings.part_size));
    content.push_str(&format!("grid_size: {}\n", settings.grid_size));
    content.push_str(&format!(
        "thumbnail_capacity: {}\n",
        settings.thumbnail_capacity
    ));
    content.push_str(&format!("thumbnail_ratio: {}\n", settings.thumbnail_ratio));
    content.push_str(&format!("loaded_pages: {}\n", settings.loaded_pages));
    content.push_str(&format!("page_pool_size: {}\n", settings.page_pool_size));
    content.push_str(&format!("min_zoom: {}\n", settings.min_zoom));
    content.push_str(&format!("max_zoom: {}\n", settings.max_zoom));

    content
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# tileview settings
# ============================================================================
# part_size:          tile edge in pixels
# grid_size:          tiles per side of the planning grid (cache = grid_size^2)
# thumbnail_capacity: number of page thumbnails kept
# thumbnail_ratio:    thumbnail size relative to the fitted page (0..1]
# loaded_pages:       pages planned around the current one
# page_pool_size:     decoded PDF pages kept open
# min_zoom/max_zoom:  zoom range

"#;

// Public API for accessing settings

pub fn get_settings() -> Settings {
    SETTINGS.read().map(|s| s.clone()).unwrap_or_default()
}

pub fn set_settings(settings: Settings) {
    if let Ok(mut global) = SETTINGS.write() {
        *global = settings.sanitized();
    }
}

pub fn get_tile_config() -> TileConfig {
    SETTINGS
        .read()
        .map(|s| s.tile_config())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn defaults_give_forty_nine_tiles() {
        let config = Settings::default().tile_config();
        assert_eq!(config, TileConfig::default());
        assert_eq!(config.cache_capacity, 49);
    }

    #[test]
    fn sanitize_repairs_bad_values() {
        let settings = Settings {
            part_size: -3.0,
            grid_size: 0,
            thumbnail_capacity: 0,
            thumbnail_ratio: 4.0,
            loaded_pages: 0,
            min_zoom: f32::NAN,
            max_zoom: 0.5,
            ..Settings::default()
        }
        .sanitized();

        assert_eq!(settings.part_size, 16.0);
        assert_eq!(settings.grid_size, 1);
        assert_eq!(settings.thumbnail_capacity, 1);
        assert_eq!(settings.thumbnail_ratio, DEFAULT_THUMBNAIL_RATIO);
        assert_eq!(settings.loaded_pages, 1);
        assert_eq!(settings.min_zoom, MIN_ZOOM);
        assert_eq!(settings.max_zoom, MAX_ZOOM);
    }

    #[test]
    #[serial]
    fn loads_partial_file_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "version: 1\ngrid_size: 5\npart_size: 128\n").unwrap();

        load_settings_from_path(&path);
        let config = get_tile_config();
        assert_eq!(config.cache_capacity, 25);
        assert_eq!(config.part_size, 128.0);
        assert_eq!(config.thumbnail_capacity, DEFAULT_THUMBNAIL_CAPACITY);

        set_settings(Settings::default());
    }

    #[test]
    #[serial]
    fn generated_file_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let settings = Settings {
            grid_size: 9,
            thumbnail_ratio: 0.5,
            ..Settings::default()
        };

        save_settings_to_file(&settings, &path);
        load_settings_from_path(&path);
        assert_eq!(get_settings(), settings);

        set_settings(Settings::default());
    }

    #[test]
    #[serial]
    fn unparsable_file_keeps_current_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "grid_size: [not, a, number]\n").unwrap();

        set_settings(Settings::default());
        load_settings_from_path(&path);
        assert_eq!(get_settings(), Settings::default());
    }

    #[test]
    #[serial]
    fn old_versions_are_migrated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "version: 0\n").unwrap();

        load_settings_from_path(&path);
        assert_eq!(get_settings().version, CURRENT_VERSION);
        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains(&format!("version: {CURRENT_VERSION}")));

        set_settings(Settings::default());
    }
}
