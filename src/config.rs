//! Application-level configuration loading: game rules, collaborators and credentials.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::{
    admin::ReclaimPolicy,
    game::{Round, TargetImage},
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PROMPT_PARTY_CONFIG_PATH";
/// Environment variable that overrides the shared admin credential.
const ADMIN_CODE_ENV: &str = "ADMIN_CODE";
/// Credential used when neither the file nor the environment provides one.
const DEFAULT_ADMIN_CODE: &str = "gamemaster";

/// Game rules and timings.
#[derive(Debug, Clone)]
pub struct GameSettings {
    /// Shared credential; joining with it as a name makes the session a gamemaster.
    pub admin_code: String,
    /// Participant capacity of the lobby.
    pub max_players: usize,
    /// Rounds per game.
    pub total_rounds: Round,
    /// Prompting time per round.
    pub round_duration: Duration,
    /// Time to confirm an image before auto-selection.
    pub selection_duration: Duration,
    /// Countdown shown to voters. Voting itself only closes on completion or admin action.
    pub voting_duration: Duration,
    /// What happens when the original admin returns.
    pub admin_reclaim: ReclaimPolicy,
    /// Target image per round, index 0 is round 1.
    pub targets: Vec<TargetImage>,
}

impl GameSettings {
    /// Target image of a round, falling back to the bundled asset naming.
    pub fn target_for(&self, round: Round) -> TargetImage {
        self.targets
            .get(usize::from(round).saturating_sub(1))
            .cloned()
            .unwrap_or_else(|| TargetImage {
                id: u32::from(round),
                url: format!("/static/targets/round{round}.png"),
            })
    }
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            admin_code: DEFAULT_ADMIN_CODE.to_string(),
            max_players: 40,
            total_rounds: 3,
            round_duration: Duration::from_secs(300),
            selection_duration: Duration::from_secs(30),
            voting_duration: Duration::from_secs(60),
            admin_reclaim: ReclaimPolicy::KeepBackup,
            targets: Vec::new(),
        }
    }
}

/// Which image generator to run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageBackendConfig {
    /// Offline generator producing deterministic placeholder references.
    Placeholder {
        /// Prompts containing this word fail with a policy violation.
        #[serde(default)]
        fail_keyword: Option<String>,
    },
    /// Remote generation API.
    Http {
        /// Endpoint receiving `{prompt, context}` JSON requests.
        endpoint: String,
        /// Bearer token, read from `IMAGE_API_KEY` when absent.
        #[serde(default)]
        api_key: Option<String>,
        /// Request timeout in seconds.
        #[serde(default = "default_image_timeout_secs")]
        timeout_secs: u64,
    },
}

impl Default for ImageBackendConfig {
    fn default() -> Self {
        Self::Placeholder { fail_keyword: None }
    }
}

fn default_image_timeout_secs() -> u64 {
    60
}

/// Where game records are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Keep records in process memory.
    #[default]
    Memory,
    /// PostgREST-style HTTP store; missing values are read from the environment.
    Rest {
        /// Store root, `STORE_BASE_URL` when absent.
        #[serde(default)]
        base_url: Option<String>,
        /// Key sent with every request, `STORE_API_KEY` when absent.
        #[serde(default)]
        api_key: Option<String>,
    },
}

#[derive(Debug, Clone, Default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Game rules.
    pub game: GameSettings,
    /// Image generation collaborator.
    pub image_backend: ImageBackendConfig,
    /// Persistence collaborator.
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        rounds = app_config.game.total_rounds,
                        targets = app_config.game.targets.len(),
                        "loaded game configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(code) = env::var(ADMIN_CODE_ENV)
            && !code.trim().is_empty()
        {
            self.game.admin_code = code.trim().to_string();
        }
        if self.game.admin_code == DEFAULT_ADMIN_CODE {
            warn!("using the default admin code; set {ADMIN_CODE_ENV} before hosting a real game");
        }
        self
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    admin_code: Option<String>,
    max_players: Option<usize>,
    total_rounds: Option<Round>,
    round_duration_secs: Option<u64>,
    selection_duration_secs: Option<u64>,
    voting_duration_secs: Option<u64>,
    admin_reclaim: Option<ReclaimPolicy>,
    targets: Vec<RawTarget>,
    image_backend: Option<ImageBackendConfig>,
    storage: Option<StorageConfig>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = GameSettings::default();
        let secs = |raw: Option<u64>, fallback: Duration| {
            raw.filter(|s| *s > 0).map(Duration::from_secs).unwrap_or(fallback)
        };
        let game = GameSettings {
            admin_code: value.admin_code.unwrap_or(defaults.admin_code),
            max_players: value.max_players.unwrap_or(defaults.max_players).max(1),
            total_rounds: value.total_rounds.unwrap_or(defaults.total_rounds).max(1),
            round_duration: secs(value.round_duration_secs, defaults.round_duration),
            selection_duration: secs(value.selection_duration_secs, defaults.selection_duration),
            voting_duration: secs(value.voting_duration_secs, defaults.voting_duration),
            admin_reclaim: value.admin_reclaim.unwrap_or_default(),
            targets: value.targets.into_iter().map(Into::into).collect(),
        };
        Self {
            game,
            image_backend: value.image_backend.unwrap_or_default(),
            storage: value.storage.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of a single target image inside the configuration file.
struct RawTarget {
    id: u32,
    url: String,
}

impl From<RawTarget> for TargetImage {
    fn from(value: RawTarget) -> Self {
        Self {
            id: value.id,
            url: value.url,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
