use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One word pair for a spy round: everyone else's card shows `real`, the
/// spy's card shows `decoy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordPair {
    pub real: String,
    pub decoy: String,
}

/// How long each timed spy phase runs.
#[derive(Debug, Clone, Copy)]
pub struct SpyTimings {
    pub assigning: Duration,
    pub discussion: Duration,
    pub voting: Duration,
}

impl Default for SpyTimings {
    fn default() -> Self {
        Self {
            assigning: Duration::from_secs(5),
            discussion: Duration::from_secs(120),
            voting: Duration::from_secs(30),
        }
    }
}

impl SpyTimings {
    /// Read per-phase overrides from `SPY_*_SECS` env vars.
    pub fn from_env() -> Self {
        let mut timings = Self::default();
        if let Some(secs) = env_secs("SPY_ASSIGNING_SECS") {
            timings.assigning = secs;
        }
        if let Some(secs) = env_secs("SPY_DISCUSSION_SECS") {
            timings.discussion = secs;
        }
        if let Some(secs) = env_secs("SPY_VOTING_SECS") {
            timings.voting = secs;
        }
        timings
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()?
        .parse()
        .ok()
        .map(Duration::from_secs)
}

/// Server-wide settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: String,
    pub spy: SpyTimings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            static_dir: "static".to_string(),
            spy: SpyTimings::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        if let Ok(dir) = std::env::var("STATIC_DIR") {
            config.static_dir = dir;
        }
        config.spy = SpyTimings::from_env();
        config
    }
}

/// Resolves a path relative to the config directory.
fn config_path(sub: &str) -> PathBuf {
    let base = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
    Path::new(&base).join(sub)
}

/// Initialize the config directory with a default word list if missing.
pub fn init() {
    let base = config_path("");
    if !base.exists() {
        fs::create_dir_all(&base).expect("Failed to create config directory");
    }

    let words_path = config_path("words.json");
    if !words_path.exists() {
        fs::write(
            &words_path,
            serde_json::to_string_pretty(&default_word_pairs()).unwrap(),
        )
        .expect("Failed to write default words.json");
    }
}

/// Load the word-pair pool. Falls back to the built-in list when the file is
/// missing or unreadable so the spy mode stays playable.
pub fn load_word_pairs() -> Vec<WordPair> {
    let path = config_path("words.json");
    let data = match fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}, using built-in words", path.display(), e);
            return default_word_pairs();
        }
    };
    match serde_json::from_str::<Vec<WordPair>>(&data) {
        Ok(pairs) if !pairs.is_empty() => pairs,
        Ok(_) => {
            tracing::warn!("{} is empty, using built-in words", path.display());
            default_word_pairs()
        }
        Err(e) => {
            tracing::error!("Failed to parse {}: {}, using built-in words", path.display(), e);
            default_word_pairs()
        }
    }
}

fn default_word_pairs() -> Vec<WordPair> {
    [
        ("cat", "tiger"),
        ("coffee", "tea"),
        ("beach", "desert"),
        ("piano", "guitar"),
        ("pizza", "burger"),
        ("winter", "autumn"),
        ("ship", "submarine"),
        ("doctor", "nurse"),
        ("moon", "sun"),
        ("river", "lake"),
        ("apple", "pear"),
        ("train", "tram"),
    ]
    .into_iter()
    .map(|(real, decoy)| WordPair {
        real: real.to_string(),
        decoy: decoy.to_string(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings_are_sane() {
        let timings = SpyTimings::default();
        assert!(timings.assigning < timings.discussion);
        assert!(timings.voting < timings.discussion);
    }

    #[test]
    fn default_config_serves_port_3000() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.static_dir, "static");
    }

    #[test]
    fn builtin_word_pool_is_nonempty_and_distinct() {
        let pairs = default_word_pairs();
        assert!(!pairs.is_empty());
        for pair in &pairs {
            assert_ne!(pair.real, pair.decoy);
        }
    }

    #[test]
    fn word_pair_round_trips_through_json() {
        let pair = WordPair {
            real: "cat".into(),
            decoy: "tiger".into(),
        };
        let json = serde_json::to_string(&pair).unwrap();
        let back: WordPair = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pair);
    }
}
