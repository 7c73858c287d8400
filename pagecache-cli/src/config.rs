use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, Map, Source};
use pagecache::config::CacheConfig;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "/etc/pagecache/config.toml";
const DEFAULT_CACHE_PATH: &str = "/var/cache/pagecache";

#[derive(Clone, Debug, serde::Deserialize, PartialEq, Eq)]
pub struct PagecacheConfig {
    pub cache: CacheConfig,
}

impl PagecacheConfig {
    /// Loads the configuration from `config_file` (or the default location, if it exists) and
    /// `PAGECACHE_*` environment variables, which take precedence.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match config_file {
            Some(path) => File::from(path.to_path_buf()).required(true),
            None => File::from(PathBuf::from(DEFAULT_CONFIG_FILE)).required(false),
        };
        ConfigLoader::new()
            .add_file_source(file)
            .add_environment_source(None)
            .load()
    }
}

pub struct ConfigLoader(ConfigBuilder<DefaultState>);

impl ConfigLoader {
    pub fn new() -> Self {
        ConfigLoader(Config::builder())
    }

    pub fn add_file_source<T, F>(mut self, file: File<T, F>) -> Self
    where
        File<T, F>: Source + Send + Sync + 'static,
    {
        self.0 = self.0.add_source(file);
        self
    }

    pub fn add_environment_source(mut self, source: Option<Map<String, String>>) -> Self {
        self.0 = self.0.add_source(
            Environment::with_prefix("PAGECACHE")
                .separator("__")
                .prefix_separator("_")
                .source(source),
        );
        self
    }

    pub fn load(self) -> Result<PagecacheConfig, ConfigError> {
        self.0
            .set_default("cache.type", "Filesystem")?
            .set_default("cache.path", DEFAULT_CACHE_PATH)?
            .build()?
            .try_deserialize()
    }
}
