use crate::error::{GreenlightError, Result};
use crate::paths;
use crate::types::ItemKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    /// Single operator: the one user every queue action belongs to.
    #[serde(default = "default_operator")]
    pub operator: String,
}

fn default_operator() -> String {
    "operator".to_string()
}

// ---------------------------------------------------------------------------
// ScoringConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Compression exponent; must exceed 1, typically 1.2-1.5.
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    /// Weight vector per item kind, keyed by `ItemKind::as_str()`.
    #[serde(default = "default_weights")]
    pub weights: HashMap<String, BTreeMap<String, f64>>,
    #[serde(default = "default_batch_cap")]
    pub batch_cap: f64,
    #[serde(default = "default_batch_floor")]
    pub batch_floor: f64,
}

fn default_gamma() -> f64 {
    1.35
}

fn default_batch_cap() -> f64 {
    0.92
}

fn default_batch_floor() -> f64 {
    0.55
}

fn default_weights() -> HashMap<String, BTreeMap<String, f64>> {
    let mut weights = HashMap::new();
    weights.insert(
        ItemKind::Problem.as_str().to_string(),
        weight_vec(&[
            ("severity", 0.30),
            ("frequency", 0.25),
            ("reachability", 0.20),
            ("urgency", 0.15),
            ("monetizable_pain", 0.10),
        ]),
    );
    weights.insert(
        ItemKind::Solution.as_str().to_string(),
        weight_vec(&[
            ("feasibility", 0.30),
            ("differentiation", 0.25),
            ("time_to_market", 0.20),
            ("scalability", 0.15),
            ("founder_fit", 0.10),
        ]),
    );
    weights.insert(
        ItemKind::FinalGate.as_str().to_string(),
        weight_vec(&[
            ("demand", 0.30),
            ("economics", 0.25),
            ("moat", 0.20),
            ("distribution", 0.15),
            ("timing", 0.10),
        ]),
    );
    weights
}

fn weight_vec(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn empty_weights() -> &'static BTreeMap<String, f64> {
    static EMPTY: OnceLock<BTreeMap<String, f64>> = OnceLock::new();
    EMPTY.get_or_init(BTreeMap::new)
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            gamma: default_gamma(),
            weights: default_weights(),
            batch_cap: default_batch_cap(),
            batch_floor: default_batch_floor(),
        }
    }
}

impl ScoringConfig {
    pub fn weights_for(&self, kind: ItemKind) -> &BTreeMap<String, f64> {
        self.weights
            .get(kind.as_str())
            .unwrap_or_else(|| empty_weights())
    }
}

// ---------------------------------------------------------------------------
// ThresholdsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(default = "default_initial_problem")]
    pub initial_problem: f64,
    #[serde(default = "default_initial_solution")]
    pub initial_solution: f64,
    #[serde(default = "default_initial_feasibility")]
    pub initial_feasibility: f64,
    #[serde(default = "default_initial_gate")]
    pub initial_gate: f64,
    /// Approval rate the controller steers toward.
    #[serde(default = "default_target_approval_rate")]
    pub target_approval_rate: f64,
    #[serde(default = "default_threshold_floor")]
    pub floor: f64,
    #[serde(default = "default_threshold_ceil")]
    pub ceil: f64,
    #[serde(default = "default_retune_period_days")]
    pub retune_period_days: u32,
}

fn default_initial_problem() -> f64 {
    0.55
}

fn default_initial_solution() -> f64 {
    0.60
}

fn default_initial_feasibility() -> f64 {
    0.50
}

fn default_initial_gate() -> f64 {
    0.70
}

fn default_target_approval_rate() -> f64 {
    0.15
}

fn default_threshold_floor() -> f64 {
    0.30
}

fn default_threshold_ceil() -> f64 {
    0.95
}

fn default_retune_period_days() -> u32 {
    7
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            initial_problem: default_initial_problem(),
            initial_solution: default_initial_solution(),
            initial_feasibility: default_initial_feasibility(),
            initial_gate: default_initial_gate(),
            target_approval_rate: default_target_approval_rate(),
            floor: default_threshold_floor(),
            ceil: default_threshold_ceil(),
            retune_period_days: default_retune_period_days(),
        }
    }
}

// ---------------------------------------------------------------------------
// QueueConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Pending actions older than this become Expired.
    #[serde(default = "default_action_expiry_days")]
    pub action_expiry_days: u32,
    /// Terminal actions older than this are deleted.
    #[serde(default = "default_purge_after_days")]
    pub purge_after_days: u32,
    /// Deliberate pause before the next action is offered after a completion.
    #[serde(default = "default_prompt_gap_secs")]
    pub prompt_gap_secs: u32,
}

fn default_action_expiry_days() -> u32 {
    7
}

fn default_purge_after_days() -> u32 {
    30
}

fn default_prompt_gap_secs() -> u32 {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            action_expiry_days: default_action_expiry_days(),
            purge_after_days: default_purge_after_days(),
            prompt_gap_secs: default_prompt_gap_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// ResilienceConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Consecutive failures before a caller's circuit opens.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u32,
    /// Identical payloads to one channel are suppressed within this window.
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u32,
    /// Operator silence required before buffered notifications flush.
    #[serde(default = "default_batch_silence_secs")]
    pub batch_silence_secs: u32,
    /// Operator activity within this window means "actively working".
    #[serde(default = "default_active_window_secs")]
    pub active_window_secs: u32,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_cooldown_secs() -> u32 {
    300
}

fn default_dedup_ttl_secs() -> u32 {
    60
}

fn default_batch_silence_secs() -> u32 {
    120
}

fn default_active_window_secs() -> u32 {
    120
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
            batch_silence_secs: default_batch_silence_secs(),
            active_window_secs: default_active_window_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig / SessionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Locked ventures idle past this are force-unlocked by the janitor.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u32,
}

fn default_lock_timeout_secs() -> u32 {
    900
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle sessions older than this are evicted.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u32,
}

fn default_session_ttl_secs() -> u32 {
    86_400
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: ProjectConfig {
                name: project_name.into(),
                operator: default_operator(),
            },
            scoring: ScoringConfig::default(),
            thresholds: ThresholdsConfig::default(),
            queue: QueueConfig::default(),
            resilience: ResilienceConfig::default(),
            pipeline: PipelineConfig::default(),
            session: SessionConfig::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(GreenlightError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        // 1. Gamma must compress: > 1 is required, 1.2-1.5 is the typical band
        if self.scoring.gamma <= 1.0 || !self.scoring.gamma.is_finite() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "scoring.gamma={} must be > 1 for compression",
                    self.scoring.gamma
                ),
            });
        } else if !(1.2..=1.5).contains(&self.scoring.gamma) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "scoring.gamma={} is outside the typical 1.2-1.5 band",
                    self.scoring.gamma
                ),
            });
        }

        // 2. Weight map keys must be known item kinds
        for key in self.scoring.weights.keys() {
            if key.parse::<ItemKind>().is_err() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("unknown item kind '{key}' in scoring.weights"),
                });
            }
        }

        // 3. Weight sums: not required to equal 1, but worth telling the
        //    operator since raw scores scale with the sum
        for kind in ItemKind::all() {
            let vec = self.scoring.weights_for(*kind);
            if vec.is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("no weights configured for kind '{kind}'"),
                });
                continue;
            }
            let sum: f64 = vec.values().sum();
            if (sum - 1.0).abs() > 1e-3 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "weights for '{kind}' sum to {sum:.3}; raw scores scale with the sum"
                    ),
                });
            }
            for (name, w) in vec {
                if *w < 0.0 || !w.is_finite() {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Error,
                        message: format!("weight '{kind}.{name}'={w} must be a finite value >= 0"),
                    });
                }
            }
        }

        // 4. Batch band must be ordered
        if self.scoring.batch_floor > self.scoring.batch_cap {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "scoring.batch_floor={} exceeds batch_cap={}",
                    self.scoring.batch_floor, self.scoring.batch_cap
                ),
            });
        }

        // 5. Threshold clamp band must be ordered
        if self.thresholds.floor >= self.thresholds.ceil {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "thresholds.floor={} must be below ceil={}",
                    self.thresholds.floor, self.thresholds.ceil
                ),
            });
        }

        // 6. Target approval rate is a proportion
        if !(self.thresholds.target_approval_rate > 0.0
            && self.thresholds.target_approval_rate < 1.0)
        {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "thresholds.target_approval_rate={} must be in (0, 1)",
                    self.thresholds.target_approval_rate
                ),
            });
        }

        // 7. Initial thresholds should sit inside the clamp band
        for (name, value) in [
            ("initial_problem", self.thresholds.initial_problem),
            ("initial_solution", self.thresholds.initial_solution),
            ("initial_feasibility", self.thresholds.initial_feasibility),
            ("initial_gate", self.thresholds.initial_gate),
        ] {
            if value < self.thresholds.floor || value > self.thresholds.ceil {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "thresholds.{name}={value} is outside [{}, {}]",
                        self.thresholds.floor, self.thresholds.ceil
                    ),
                });
            }
        }

        // 8. Zero periods disable whole subsystems
        if self.thresholds.retune_period_days == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "thresholds.retune_period_days must be >= 1".to_string(),
            });
        }
        if self.resilience.breaker_threshold == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "resilience.breaker_threshold must be >= 1".to_string(),
            });
        }
        if self.resilience.retry_max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "resilience.retry_max_attempts=0 disables retries".to_string(),
            });
        }
        if self.queue.purge_after_days < self.queue.action_expiry_days {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "queue.purge_after_days={} is below action_expiry_days={}",
                    self.queue.purge_after_days, self.queue.action_expiry_days
                ),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
