/// SSE framing
pub const SSE_DATA_PREFIX: &str = "data:";
pub const SSE_DONE_SENTINEL: &str = "[DONE]";

/// Cap on one undelimited frame block before the stream is treated as broken
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Backend endpoints
pub const STREAM_ANALYZE_PATH: &str = "/api/stream-analyze";
pub const TEST_CONNECTION_PATH: &str = "/api/test-connection";
pub const GET_MESSAGES_PATH: &str = "/api/get-messages";
pub const CLEAR_MESSAGES_PATH: &str = "/api/clear-messages";
pub const BLENDER_DATA_PATH: &str = "/api/blender-data";
pub const BLENDER_REFRESH_PATH: &str = "/api/trigger-blender-refresh";

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000";

/// Provider defaults
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const OPENAI_MODELS_PATH: &str = "/v1/models";
pub const OLLAMA_TAGS_PATH: &str = "/api/tags";

/// Model-name markers for capability heuristics (matched case-insensitively;
/// `r1` only on word boundaries so e.g. "r10" does not count)
pub const THINKING_MARKER_PATTERN: &str = r"(?i)reason|think|\br1\b";
pub const WEB_MARKER_PATTERN: &str = r"(?i)web|browse|internet|search|online|sonar|perplexity";

/// Marker appended to a reply cut off by the user
pub const STOP_MARKER: &str = "*(stopped by user)*";

/// Rows above the bottom within which the transcript view snaps back to
/// following new content
pub const SCROLL_RESUME_THRESHOLD: u16 = 3;

/// TUI plumbing
pub const TUI_CHANNEL_CAPACITY: usize = 256;
pub const LOG_RING_CAPACITY: usize = 1000;
pub const INPUT_MAX_CHARS: usize = 4000;
