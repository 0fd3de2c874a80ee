//! INI-style configuration with `[Params]`, `[Header]` and `[Options]`
//! sections.
//!
//! Each section is backed by a string-keyed [`OrderedMap`], so keys round-trip
//! through save/load in write order. `[Params]` holds scalar client settings
//! (`client_id`, `token_url`, `cache_size`, ...), `[Header]` holds pairs
//! merged into every outgoing request, and `[Options]` holds the boolean
//! flags `request_cache` / `request_async` / `request_auth` that form the
//! default per-request option mask.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::ds::OrderedMap;
use crate::error::ConfigError;

const SECTION_PARAMS: &str = "Params";
const SECTION_HEADER: &str = "Header";
const SECTION_OPTIONS: &str = "Options";

const OPTION_CACHE: &str = "request_cache";
const OPTION_ASYNC: &str = "request_async";
const OPTION_AUTH: &str = "request_auth";

/// Per-request option mask, defaulted from the `[Options]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Options {
    /// Consult the response cache and store successful responses.
    pub cache: bool,
    /// On a cache hit, queue a background refresh of the entry.
    pub async_refresh: bool,
    /// Attach the `Authorization` header when a token is held.
    pub auth: bool,
}

impl Options {
    /// All flags clear.
    pub const NONE: Options = Options {
        cache: false,
        async_refresh: false,
        auth: false,
    };
}

/// Returns `true` for the truthy spellings accepted in config values.
pub(crate) fn flag(value: &str) -> bool {
    matches!(value.chars().next(), Some('t') | Some('T') | Some('1'))
}

/// Three-section configuration store.
#[derive(Debug)]
pub struct Config {
    params: OrderedMap<String, String>,
    headers: OrderedMap<String, String>,
    options: OrderedMap<String, String>,
}

impl Config {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self {
            params: OrderedMap::new(32),
            headers: OrderedMap::new(8),
            options: OrderedMap::new(8),
        }
    }

    /// Sets a `[Params]` value, returning the previous one.
    pub fn set_param(&mut self, key: &str, value: &str) -> Option<String> {
        self.params.put(key.to_string(), value.to_string())
    }

    /// Returns a `[Params]` value.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.peek(&key.to_string()).map(String::as_str)
    }

    /// Returns a `[Params]` value parsed as an integer.
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.param(key).and_then(|v| v.parse().ok())
    }

    /// Removes a `[Params]` value.
    pub fn remove_param(&mut self, key: &str) -> Option<String> {
        self.params.remove(&key.to_string())
    }

    /// Sets a `[Header]` pair, returning the previous value for the key.
    pub fn set_header(&mut self, key: &str, value: &str) -> Option<String> {
        self.headers.put(key.to_string(), value.to_string())
    }

    /// Iterates `[Header]` pairs in write order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Sets an `[Options]` flag.
    pub fn set_option(&mut self, key: &str, enabled: bool) {
        self.options
            .put(key.to_string(), if enabled { "true" } else { "false" }.to_string());
    }

    /// Returns the default option mask from the `[Options]` section.
    pub fn default_options(&self) -> Options {
        let lookup = |key: &str| {
            self.options
                .peek(&key.to_string())
                .map(|v| flag(v))
                .unwrap_or(false)
        };
        Options {
            cache: lookup(OPTION_CACHE),
            async_refresh: lookup(OPTION_ASYNC),
            auth: lookup(OPTION_AUTH),
        }
    }

    /// Loads configuration from an INI file, merging into this store.
    ///
    /// Lines are `key = value` under a `[Section]` heading; blank lines and
    /// `;`/`#` comments are skipped. Entries in unknown sections are ignored.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ConfigError::new(format!("cannot read config file {}: {e}", path.display()))
        })?;
        self.parse(&text);
        Ok(())
    }

    /// Merges `key = value` lines from an INI-formatted string.
    pub fn parse(&mut self, text: &str) {
        let mut section = SECTION_PARAMS;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = match name.trim() {
                    SECTION_PARAMS => SECTION_PARAMS,
                    SECTION_HEADER => SECTION_HEADER,
                    SECTION_OPTIONS => SECTION_OPTIONS,
                    _ => "",
                };
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() {
                continue;
            }
            match section {
                SECTION_PARAMS => {
                    self.set_param(key, value);
                }
                SECTION_HEADER => {
                    self.set_header(key, value);
                }
                SECTION_OPTIONS => {
                    self.options.put(key.to_string(), value.to_string());
                }
                _ => {}
            }
        }
    }

    /// Saves the configuration, truncating any existing file first.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let mut file = fs::File::create(path).map_err(|e| {
            ConfigError::new(format!("cannot write config file {}: {e}", path.display()))
        })?;
        let io_err =
            |e: std::io::Error| ConfigError::new(format!("write to {} failed: {e}", path.display()));
        let mut write_section =
            |file: &mut fs::File, name: &str, map: &OrderedMap<String, String>| {
                if map.is_empty() {
                    return Ok(());
                }
                writeln!(file, "[{name}]").map_err(io_err)?;
                for (key, value) in map.iter() {
                    writeln!(file, "{key} = {value}").map_err(io_err)?;
                }
                writeln!(file).map_err(io_err)
            };
        write_section(&mut file, SECTION_PARAMS, &self.params)?;
        write_section(&mut file, SECTION_HEADER, &self.headers)?;
        write_section(&mut file, SECTION_OPTIONS, &self.options)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("authcache-config-{}-{name}.ini", std::process::id()));
        path
    }

    #[test]
    fn params_roundtrip_in_memory() {
        let mut config = Config::new();
        assert_eq!(config.set_param("client_id", "abc"), None);
        assert_eq!(
            config.set_param("client_id", "def"),
            Some("abc".to_string())
        );
        assert_eq!(config.param("client_id"), Some("def"));
        assert_eq!(config.param("missing"), None);
        assert_eq!(config.remove_param("client_id"), Some("def".to_string()));
        assert_eq!(config.param("client_id"), None);
    }

    #[test]
    fn numeric_params_parse() {
        let mut config = Config::new();
        config.set_param("cache_size", "200");
        config.set_param("request_timeout", "junk");
        assert_eq!(config.param_u64("cache_size"), Some(200));
        assert_eq!(config.param_u64("request_timeout"), None);
        assert_eq!(config.param_u64("absent"), None);
    }

    #[test]
    fn option_mask_reads_truthy_spellings() {
        let mut config = Config::new();
        config.parse("[Options]\nrequest_cache = true\nrequest_async = 1\nrequest_auth = f\n");
        let options = config.default_options();
        assert!(options.cache);
        assert!(options.async_refresh);
        assert!(!options.auth);
    }

    #[test]
    fn parse_handles_sections_comments_and_noise() {
        let mut config = Config::new();
        config.parse(
            "; leading comment\n\
             token_url = https://id.example/token\n\
             [Header]\n\
             Accept = application/json\n\
             # another comment\n\
             \n\
             [Unknown]\n\
             ignored = yes\n\
             [Params]\n\
             client_id = abc\n\
             = empty key dropped\n",
        );
        assert_eq!(config.param("token_url"), Some("https://id.example/token"));
        assert_eq!(config.param("client_id"), Some("abc"));
        assert_eq!(config.param("ignored"), None);
        let headers: Vec<_> = config.headers().collect();
        assert_eq!(headers, vec![("Accept", "application/json")]);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let path = temp_path("roundtrip");
        let mut config = Config::new();
        config.set_param("client_id", "abc");
        config.set_param("token_url", "https://id.example/token");
        config.set_header("Accept", "application/json");
        config.set_option("request_cache", true);
        config.save(&path).unwrap();

        let mut reloaded = Config::new();
        reloaded.load(&path).unwrap();
        assert_eq!(reloaded.param("client_id"), Some("abc"));
        assert_eq!(
            reloaded.param("token_url"),
            Some("https://id.example/token")
        );
        assert_eq!(
            reloaded.headers().collect::<Vec<_>>(),
            vec![("Accept", "application/json")]
        );
        assert!(reloaded.default_options().cache);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn save_truncates_previous_contents() {
        let path = temp_path("truncate");
        std::fs::write(&path, "stale contents that must disappear").unwrap();
        let mut config = Config::new();
        config.set_param("client_id", "abc");
        config.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("stale"));
        assert!(text.contains("client_id = abc"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let mut config = Config::new();
        let err = config.load("/nonexistent/authcache.ini").unwrap_err();
        assert!(err.to_string().contains("authcache.ini"));
    }
}
