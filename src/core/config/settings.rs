use std::env;
use std::time::Duration;

/// Runtime settings resolved from environment variables.
///
/// Both binaries read the same set so that the proxy and the tool server
/// agree on chunk parameters and the embedder identity (the cache manifest
/// is validated against these at load time).
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bearer token for the completion endpoint.
    pub model_api_key: String,
    /// Completion endpoint URL.
    pub model_api_url: String,
    /// Model identifier sent with every completion call.
    pub model_id: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Characters per chunk.
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks.
    pub chunk_overlap: usize,
    /// Default number of chunks retrieved per question.
    pub top_k: usize,
    /// Embedding model identifier (`hash` selects the offline provider).
    pub embedding_model_id: String,
    /// Server name reported in logs and the tools/list handshake.
    pub mcp_server_name: String,
    /// Single-pass `answer_question` refuses documents above this size.
    pub full_doc_ceiling: usize,
    /// Per-tool-call deadline on the proxy side.
    pub tool_call_timeout: Duration,
    /// Wall-clock bound for one completion endpoint call.
    pub model_timeout: Duration,
    /// Retry attempts for transient completion failures.
    pub model_max_retries: u32,
    /// Upper bound on concurrent proxy-to-child tool calls.
    pub max_inflight_calls: usize,
    /// Upper bound on concurrent index builds (embedding is the bottleneck).
    pub max_concurrent_builds: usize,
    /// Multipart upload cap in bytes.
    pub max_upload_bytes: usize,
    /// Whether the formatting second pass runs after each answer.
    pub format_answers: bool,
    /// Extra HTTP origins allowed by CORS.
    pub allowed_origins: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            model_api_key: env::var("MODEL_API_KEY").unwrap_or_default(),
            model_api_url: env_or(
                "MODEL_API_URL",
                "https://api.perplexity.ai/chat/completions",
            ),
            model_id: env_or("PDFQA_MODEL_ID", "sonar"),
            temperature: parse_env("PDFQA_TEMPERATURE", 0.2),
            max_tokens: parse_env("PDFQA_MAX_TOKENS", 4000),
            chunk_size: parse_env("CHUNK_SIZE", 1000),
            chunk_overlap: parse_env("CHUNK_OVERLAP", 200),
            top_k: parse_env("TOP_K", 3),
            embedding_model_id: env_or("EMBEDDING_MODEL_ID", "all-minilm-l6-v2"),
            mcp_server_name: env_or("MCP_SERVER_NAME", "pdfqa-toolserver"),
            full_doc_ceiling: parse_env("PDFQA_FULL_DOC_CEILING", 60_000),
            tool_call_timeout: Duration::from_secs(parse_env("PDFQA_TOOL_TIMEOUT_SECS", 120)),
            model_timeout: Duration::from_secs(parse_env("PDFQA_MODEL_TIMEOUT_SECS", 60)),
            model_max_retries: parse_env("PDFQA_MODEL_MAX_RETRIES", 3),
            max_inflight_calls: parse_env("PDFQA_MAX_INFLIGHT_CALLS", 32),
            max_concurrent_builds: parse_env("PDFQA_MAX_CONCURRENT_BUILDS", 2),
            max_upload_bytes: parse_env("PDFQA_MAX_UPLOAD_BYTES", 50 * 1024 * 1024),
            format_answers: env::var("PDFQA_FORMAT_ANSWERS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            allowed_origins: env::var("PDFQA_ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Parameters recorded in (and validated against) the index manifest.
    pub fn chunk_params(&self) -> crate::rag::chunker::ChunkParams {
        crate::rag::chunker::ChunkParams {
            chunk_size: self.chunk_size,
            overlap: self.chunk_overlap,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
