//! Runtime configuration.
//!
//! Settings come from hard-coded defaults, optionally overridden by a TOML
//! file and then by the command line. Only the last step lives in the
//! binary; this module provides the first two.
//!
//! A configuration file may set any subset of these keys:
//!
//! ```toml
//! cache_dir = "/var/cache/tuneloop"
//! preferred_codec = "opus"
//! frame_buffer = 50
//! prefetch = true
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{
    error::{Error, Result},
    track::Codec,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,

    pub user_agent: String,

    /// Directory holding the cache entries.
    pub cache_dir: PathBuf,

    /// Codec the sink accepts. Encodings in other codecs are never chosen.
    pub preferred_codec: Codec,

    /// Number of demuxed frames buffered ahead of the sink.
    pub frame_buffer: usize,

    /// Whether to cache the next track while the current one plays.
    pub prefetch: bool,
}

/// Contents of a configuration file. Absent keys keep their current value.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct File {
    pub cache_dir: Option<PathBuf>,
    pub preferred_codec: Option<Codec>,
    pub frame_buffer: Option<usize>,
    pub prefetch: Option<bool>,
}

impl Config {
    /// Default frame buffer depth: one second of 20 ms frames.
    pub const DEFAULT_FRAME_BUFFER: usize = 50;

    /// Largest accepted frame buffer depth.
    pub const MAX_FRAME_BUFFER: usize = 10_000;

    /// Applies the keys that are set in `file`.
    pub fn merge(&mut self, file: File) {
        if let Some(cache_dir) = file.cache_dir {
            self.cache_dir = cache_dir;
        }
        if let Some(codec) = file.preferred_codec {
            self.preferred_codec = codec;
        }
        if let Some(frame_buffer) = file.frame_buffer {
            self.frame_buffer = frame_buffer;
        }
        if let Some(prefetch) = file.prefetch {
            self.prefetch = prefetch;
        }
    }

    /// Reads the configuration file at `path` and applies it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the file does not exist and
    /// `InvalidArgument` when it cannot be parsed.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let contents = std::fs::read_to_string(path)?;
        let file: File = toml::from_str(&contents)?;
        debug!("loaded configuration from {}", path.display());
        self.merge(file);
        Ok(())
    }

    /// Checks that all values are usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` describing the first offending value.
    pub fn validate(&self) -> Result<()> {
        if self.frame_buffer == 0 || self.frame_buffer > Self::MAX_FRAME_BUFFER {
            return Err(Error::invalid_argument(format!(
                "frame buffer must be between 1 and {} frames",
                Self::MAX_FRAME_BUFFER
            )));
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::invalid_argument("cache directory cannot be empty"));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        // Characters that would break the product tokens of `User-Agent`.
        let illegal_chars = |chr: char| chr == '/' || chr == ';' || chr.is_control();

        let os_name = std::env::consts::OS;
        let os_version = sysinfo::System::os_version()
            .map(|version| version.replace(illegal_chars, "_"))
            .filter(|version| !version.is_empty())
            .unwrap_or_else(|| String::from("0"));

        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
        trace!("user agent: {user_agent}");

        Self {
            app_name: app_name.clone(),
            app_version,

            user_agent,

            cache_dir: std::env::temp_dir().join(app_name),
            preferred_codec: Codec::default(),
            frame_buffer: Self::DEFAULT_FRAME_BUFFER,
            prefetch: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert!(config.user_agent.starts_with("tuneloop/"));
        assert_eq!(config.preferred_codec, Codec::Opus);
    }

    #[test]
    fn file_overrides_only_what_it_sets() {
        let mut config = Config::default();
        let file: File = toml::from_str("preferred_codec = \"aac\"\nprefetch = false").unwrap();
        config.merge(file);

        assert_eq!(config.preferred_codec, Codec::Aac);
        assert!(!config.prefetch);
        assert_eq!(config.frame_buffer, Config::DEFAULT_FRAME_BUFFER);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<File>("volume = 11").is_err());
    }

    #[test]
    fn load_reads_toml_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tuneloop.toml");
        std::fs::write(&path, "frame_buffer = 0").unwrap();

        let mut config = Config::default();
        config.load(&path).unwrap();
        assert_eq!(config.frame_buffer, 0);
        assert_eq!(
            config.validate().unwrap_err().kind,
            crate::error::ErrorKind::InvalidArgument
        );

        let missing = config.load(&dir.path().join("missing.toml")).unwrap_err();
        assert_eq!(missing.kind, crate::error::ErrorKind::NotFound);
    }
}
