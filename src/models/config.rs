use std::env;

/// Which colorization backend to load at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Learned U-Net, 128×128 input, PNG output. File-based model.
    Unet,
    /// Classical colorization network, 224×224 input, JPEG output.
    /// Artifacts are downloaded on startup with mirror fallback.
    Zhang,
}

impl BackendKind {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unet" => Some(BackendKind::Unet),
            "zhang" => Some(BackendKind::Zhang),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: String,
    pub backend: BackendKind,
    pub models_dir: String,
    pub unet_model_path: String,
    pub max_upload_bytes: u64,
    pub max_parallel_colorize: usize,
    pub download_timeout_secs: u64,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            backend: env::var("COLORIZE_BACKEND")
                .ok()
                .and_then(|v| BackendKind::parse(&v))
                .unwrap_or(BackendKind::Unet),
            models_dir: env::var("MODELS_DIR").unwrap_or_else(|_| "./models".to_string()),
            unet_model_path: env::var("UNET_MODEL_PATH")
                .unwrap_or_else(|_| "./models/colorization_unet.onnx".to_string()),
            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(26_214_400),
            max_parallel_colorize: env::var("MAX_PARALLEL_COLORIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            download_timeout_secs: env::var("DOWNLOAD_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(120),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}
