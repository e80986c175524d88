use serde::Deserialize;

/// The full configuration surface from the spec's "External Interfaces"
/// section, loaded via the `config` crate the same way the teacher's
/// `AgentConfig` layers a base file with environment overrides
/// (`build_config` in `main.rs`).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,

    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,

    #[serde(default = "ServerConfig::default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "ServerConfig::default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    #[serde(default = "ServerConfig::default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    #[serde(default = "ServerConfig::default_heartbeat_interval_s")]
    pub heartbeat_interval_s: u64,

    #[serde(default = "ServerConfig::default_connection_timeout_s")]
    pub connection_timeout_s: u64,

    #[serde(default = "ServerConfig::default_session_queue_capacity")]
    pub session_queue_capacity: usize,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub auth: AuthSection,

    #[serde(default = "ServerConfig::default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "SchedulerSection::default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    #[serde(default = "SchedulerSection::default_max_queue_size")]
    pub max_queue_size: usize,

    #[serde(default = "SchedulerSection::default_task_timeout_minutes")]
    pub task_timeout_minutes: u64,

    #[serde(default = "SchedulerSection::default_retry_times")]
    pub retry_times: u32,

    #[serde(default = "SchedulerSection::default_delete_after_transcription")]
    pub delete_after_transcription: bool,

    #[serde(default = "SchedulerSection::default_concurrency_mode")]
    pub concurrency_mode: String,

    #[serde(default = "SchedulerSection::default_merge_gap_s")]
    pub merge_gap_s: f64,

    /// The external engine executable invoked per §4.5/§9: given the audio
    /// path, it must print one JSON `RawResult` on stdout. Not part of the
    /// distilled spec's recognized config keys (the engine itself is out of
    /// scope), but something has to name the collaborator at the process
    /// boundary — see DESIGN.md.
    #[serde(default = "SchedulerSection::default_engine_command")]
    pub engine_command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "CacheSection::default_cache_enabled")]
    pub cache_enabled: bool,

    #[serde(default = "CacheSection::default_cache_ttl_hours")]
    pub cache_ttl_hours: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub valid_tokens: Vec<String>,
}

impl ServerConfig {
    pub fn default_host() -> String {
        "0.0.0.0".to_owned()
    }

    pub fn default_port() -> u16 {
        8080
    }

    pub fn default_max_connections() -> usize {
        256
    }

    pub fn default_max_file_size_mb() -> u64 {
        512
    }

    pub fn default_allowed_extensions() -> Vec<String> {
        ["wav", "mp3", "m4a", "flac", "mp4", "mkv"].into_iter().map(String::from).collect()
    }

    pub fn default_heartbeat_interval_s() -> u64 {
        30
    }

    pub fn default_connection_timeout_s() -> u64 {
        90
    }

    pub fn default_session_queue_capacity() -> usize {
        32
    }

    pub fn default_data_dir() -> String {
        "./data".to_owned()
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: Self::default_max_concurrent_tasks(),
            max_queue_size: Self::default_max_queue_size(),
            task_timeout_minutes: Self::default_task_timeout_minutes(),
            retry_times: Self::default_retry_times(),
            delete_after_transcription: Self::default_delete_after_transcription(),
            concurrency_mode: Self::default_concurrency_mode(),
            merge_gap_s: Self::default_merge_gap_s(),
            engine_command: Self::default_engine_command(),
        }
    }
}

impl SchedulerSection {
    pub fn default_max_concurrent_tasks() -> usize {
        4
    }

    pub fn default_max_queue_size() -> usize {
        64
    }

    pub fn default_task_timeout_minutes() -> u64 {
        30
    }

    pub fn default_retry_times() -> u32 {
        2
    }

    pub fn default_delete_after_transcription() -> bool {
        true
    }

    pub fn default_concurrency_mode() -> String {
        "lock".to_owned()
    }

    pub fn default_merge_gap_s() -> f64 {
        3.0
    }

    pub fn default_engine_command() -> String {
        "transcribe-engine".to_owned()
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            cache_enabled: Self::default_cache_enabled(),
            cache_ttl_hours: Self::default_cache_ttl_hours(),
        }
    }
}

impl CacheSection {
    pub fn default_cache_enabled() -> bool {
        true
    }

    pub fn default_cache_ttl_hours() -> u64 {
        24 * 7
    }
}

impl Default for AuthSection {
    fn default() -> Self {
        Self { enabled: false, valid_tokens: Vec::new() }
    }
}
