//! Contains the system configuration.
//!
//! The configuration is loaded from **config/settings.yml**. The file is observed and reloaded
//! once a change is detected, so that a node can e.g. join a new set of peers or move to another
//! port without being restarted. Each user of the config should therefore attach itself to the
//! [Config::notifier](Config::notifier) and re-process the config once a change message is
//! received.
//!
//! A handle obtained via **Config::current()** shouldn't be kept around, as it won't reflect any
//! later change.
//!
//! # Examples
//!
//! Obtaining and reading the config:
//! ```
//! # use fcache::builder::Builder;
//! # use fcache::config::Config;
//! # #[tokio::main]
//! # async fn main() {
//! # let platform = Builder::new().enable_config().build().await;
//! let config = platform.require::<Config>();
//! let port = config.current().query("server.port").as_i64().unwrap_or(9999);
//! # }
//! ```
//!
//! Attaching a change listener:
//! ```no_run
//! # use fcache::builder::Builder;
//! # use fcache::config::Config;
//! # #[tokio::main]
//! # async fn main() {
//! # let platform = Builder::new().enable_config().build().await;
//! let config = platform.require::<Config>();
//! let mut notifier = config.notifier();
//! tokio::spawn(async move {
//!     while notifier.recv().await.is_ok() {
//!         log::info!("Config update received...");
//!     }
//! });
//! # }
//! ```
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::platform::Platform;

/// Provides access to the system configuration.
///
/// Most probably a config instance is installed by the [Builder](crate::builder::Builder) and
/// can be obtained via `platform.require::<Config>()`.
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Yaml, Option<SystemTime>)>,
}

/// Represents the change listener.
///
/// The message itself carries no information. Once it is received, the config has changed and
/// needs to be re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded configuration.
pub struct Handle {
    config: Arc<(Yaml, Option<SystemTime>)>,
}

impl Config {
    /// Creates a new config reading the given file.
    ///
    /// Note that this will not install a change listener. This is only done by the
    /// [install](install) function.
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Yaml::Hash(Default::default()), None))),
            tx,
        }
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded configuration.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Determines the last modified date of the config file on disk.
    ///
    /// Within docker, an unmounted volume shows up as directory, therefore we only accept files.
    #[cfg(not(test))]
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Reads the underlying file.
    ///
    /// Note that this is normally called by the framework and should not be invoked manually.
    pub async fn load(&self) -> anyhow::Result<()> {
        log::info!("Loading config file {}...", &self.filename);

        match tokio::fs::metadata(&self.filename).await {
            Ok(metadata) if metadata.is_file() => (),
            _ => {
                log::info!("Config file doesn't exist or is an unmounted docker volume - skipping config load.");
                return Ok(());
            }
        }

        let config_data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        let last_modified = tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .and_then(|metadata| metadata.modified().ok());

        self.load_from_string(config_data.as_str(), last_modified)
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// This is intended to be used in test environments where we cannot / do not want to load
    /// a config file from disk. A malformed document is rejected and the previous config
    /// remains active.
    ///
    /// # Example
    ///
    /// ```
    /// # use fcache::config::Config;
    /// let config = Config::new("somefile.yml");
    /// config.load_from_string("
    /// server:
    ///     port: 12345
    /// ", None).unwrap();
    ///
    /// assert_eq!(config.current().query("server.port").as_i64().unwrap(), 12345);
    /// ```
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let mut docs = YamlLoader::load_from_str(data)
            .with_context(|| format!("Cannot parse config file {}", &self.filename))?;

        let doc = match docs.drain(..).next() {
            Some(doc @ Yaml::Hash(_)) => doc,
            Some(Yaml::Null) | None => Yaml::Hash(Default::default()),
            Some(_) => {
                return Err(anyhow::anyhow!(
                    "Cannot parse config file {}: Expected a map as root element.",
                    &self.filename
                ))
            }
        };

        self.config.store(Arc::new((doc, last_modified)));

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.send(());

        Ok(())
    }
}

impl Handle {
    /// Provides access to the root of the currently loaded configuration.
    pub fn config(&self) -> &Yaml {
        &self.config.0
    }

    /// Resolves a dotted path like **peers.base_path** within the configuration.
    ///
    /// If any segment is missing, **Yaml::BadValue** is returned so that all accessors like
    /// **as_str()** simply yield **None**.
    pub fn query(&self, query: impl AsRef<str>) -> &Yaml {
        query
            .as_ref()
            .split('.')
            .fold(&self.config.0, |node, segment| &node[segment])
    }

    /// Resolves a dotted path to a scalar rendered as string.
    ///
    /// Settings like **peers.timeout** or a capacity are parsed from strings, but YAML reads a
    /// bare value like `500` as integer. Strings, integers and reals are therefore all accepted
    /// here. Any other kind of value yields **None**.
    pub fn query_scalar(&self, query: impl AsRef<str>) -> Option<String> {
        match self.query(query) {
            Yaml::String(value) => Some(value.clone()),
            Yaml::Integer(value) => Some(value.to_string()),
            Yaml::Real(value) => Some(value.clone()),
            _ => None,
        }
    }
}

/// Creates an installs a **Config** for the given platform.
///
/// This reads **config/settings.yml** and installs a change monitor for this file. Note that the
/// monitor only watches the "last modified" date of the file. Therefore each config user has to
/// gracefully handle partial config changes.
///
/// Note that this method is also called by the [Builder](crate::builder::Builder) unless the
/// **Config** part is disabled.
pub async fn install(platform: Arc<Platform>) {
    let path = Path::new("config").to_path_buf();
    if let Err(error) = tokio::fs::create_dir_all(path.clone()).await {
        log::warn!(
            "Failed to create config base directory {}: {}",
            path.to_string_lossy(),
            error
        )
    }

    let config = Arc::new(Config::new("config/settings.yml"));
    platform.register::<Config>(config.clone());

    if let Err(error) = config.load().await {
        log::error!("{:#}", error);
    }

    run_config_change_monitor(platform, config);
}

#[cfg(test)]
fn run_config_change_monitor(_platform: Arc<Platform>, _config: Arc<Config>) {
    // No automatic updates during testing...
}

#[cfg(not(test))]
fn run_config_change_monitor(platform: Arc<Platform>, config: Arc<Config>) {
    crate::spawn!(async move {
        while platform.is_running() {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;

            let last_modified = config.last_modified().await;
            let last_loaded = config.config.load().1;

            if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded) {
                match config.load().await {
                    Ok(_) => log::info!("System configuration was re-loaded."),
                    Err(error) => log::error!("Failed to re-load system config: {:#}", error),
                }
            }
        }
    });
}
