use crate::error::{MaintenanceError, MaintenanceResult};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub schedule: ScheduleConfig,
    pub collections: CollectionsConfig,
    pub difficulty: DifficultyConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service_name: String,
    pub store_backend: StoreBackend,
    pub json_logs: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local store, useful for dry runs only
    Memory,
}

impl FromStr for StoreBackend {
    type Err = MaintenanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(MaintenanceError::Config(format!(
                "unknown STORE_BACKEND '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Interval between two runs of the same job
    pub interval_secs: u64,
    /// Maximum operations per write group
    pub batch_limit: usize,
    pub max_concurrent_jobs: usize,
    pub aggregation_enabled: bool,
    pub reference_cleanup_enabled: bool,
    pub activity_pruning_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct CollectionsConfig {
    pub questions: String,
    pub answer_logs: String,
    pub users: String,
    /// Actor field mapping question key to answer data
    pub answered_questions_field: String,
    /// Actor field holding `category -> date -> value`
    pub daily_activity_field: String,
}

#[derive(Debug, Clone)]
pub struct DifficultyConfig {
    /// Difficulty is recomputed only when `timesAnswered` is strictly above this
    pub threshold: u64,
    /// Value assumed when a question has no stored difficulty
    pub default_difficulty: i64,
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub retention_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                service_name: "maintenance-service".to_string(),
                store_backend: StoreBackend::Postgres,
                json_logs: false,
            },
            schedule: ScheduleConfig {
                interval_secs: 24 * 60 * 60,
                batch_limit: 500,
                max_concurrent_jobs: 3,
                aggregation_enabled: true,
                reference_cleanup_enabled: true,
                activity_pruning_enabled: true,
            },
            collections: CollectionsConfig {
                questions: "Questions".to_string(),
                answer_logs: "AnswerLogs".to_string(),
                users: "Users".to_string(),
                answered_questions_field: "answeredQuestions".to_string(),
                daily_activity_field: "dailyActivityByTheme".to_string(),
            },
            difficulty: DifficultyConfig {
                threshold: 100,
                default_difficulty: 5,
            },
            retention: RetentionConfig { retention_days: 10 },
        }
    }
}

impl Config {
    pub fn from_env() -> MaintenanceResult<Self> {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        let store_backend = match env::var("STORE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.service.store_backend,
        };

        let config = Config {
            service: ServiceConfig {
                service_name: env::var("SERVICE_NAME")
                    .unwrap_or(defaults.service.service_name),
                store_backend,
                json_logs: env::var("LOG_FORMAT")
                    .map(|v| v.eq_ignore_ascii_case("json"))
                    .unwrap_or(false),
            },
            schedule: ScheduleConfig {
                interval_secs: parse_env_with_default(
                    "MAINTENANCE_INTERVAL_SECS",
                    defaults.schedule.interval_secs,
                ),
                batch_limit: parse_env_with_default(
                    "MAINTENANCE_BATCH_LIMIT",
                    defaults.schedule.batch_limit,
                ),
                max_concurrent_jobs: parse_env_with_default(
                    "MAINTENANCE_MAX_CONCURRENT_JOBS",
                    defaults.schedule.max_concurrent_jobs,
                ),
                aggregation_enabled: parse_env_with_default("AGGREGATION_ENABLED", true),
                reference_cleanup_enabled: parse_env_with_default(
                    "REFERENCE_CLEANUP_ENABLED",
                    true,
                ),
                activity_pruning_enabled: parse_env_with_default("ACTIVITY_PRUNING_ENABLED", true),
            },
            collections: CollectionsConfig {
                questions: env::var("QUESTIONS_COLLECTION")
                    .unwrap_or(defaults.collections.questions),
                answer_logs: env::var("ANSWER_LOGS_COLLECTION")
                    .unwrap_or(defaults.collections.answer_logs),
                users: env::var("USERS_COLLECTION").unwrap_or(defaults.collections.users),
                answered_questions_field: defaults.collections.answered_questions_field,
                daily_activity_field: defaults.collections.daily_activity_field,
            },
            difficulty: DifficultyConfig {
                threshold: parse_env_with_default(
                    "DIFFICULTY_THRESHOLD",
                    defaults.difficulty.threshold,
                ),
                default_difficulty: parse_env_with_default(
                    "DEFAULT_DIFFICULTY",
                    defaults.difficulty.default_difficulty,
                ),
            },
            retention: RetentionConfig {
                retention_days: parse_env_with_default(
                    "ACTIVITY_RETENTION_DAYS",
                    defaults.retention.retention_days,
                ),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MaintenanceResult<()> {
        if self.schedule.batch_limit == 0 {
            return Err(MaintenanceError::Config(
                "MAINTENANCE_BATCH_LIMIT must be at least 1".to_string(),
            ));
        }
        if self.schedule.interval_secs == 0 {
            return Err(MaintenanceError::Config(
                "MAINTENANCE_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }
        if self.schedule.max_concurrent_jobs == 0 {
            return Err(MaintenanceError::Config(
                "MAINTENANCE_MAX_CONCURRENT_JOBS must be at least 1".to_string(),
            ));
        }
        if self.retention.retention_days < 0 {
            return Err(MaintenanceError::Config(
                "ACTIVITY_RETENTION_DAYS must not be negative".to_string(),
            ));
        }
        if !(1..=10).contains(&self.difficulty.default_difficulty) {
            return Err(MaintenanceError::Config(
                "DEFAULT_DIFFICULTY must be between 1 and 10".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse an environment variable with a default fallback
fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
