// Configuration constants for the server

use std::time::Duration;

use genai_core::GenAiConfig;

/// Default persona for the text-generation provider.
const DEFAULT_SYSTEM_INSTRUCTION: &str = "Tu es un assistant juridique spécialisé en droit administratif français. \
     Réponds de façon claire et structurée, en t'appuyant sur les notions et la jurisprudence classiques.";

#[derive(Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    /// Provider credential. `None` is a recognized configuration-error state,
    /// surfaced conversationally instead of crashing.
    pub api_key: Option<String>,
    pub text_model: String,
    pub speech_model: String,
    pub speech_voice: String,
    pub speech_sample_rate: u32,
    pub system_instruction: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            request_timeout_secs: 60,
            cors_allowed_origins: None,
            api_key: None,
            text_model: "gemini-2.5-flash".to_string(),
            speech_model: "gemini-2.5-flash-preview-tts".to_string(),
            speech_voice: "Kore".to_string(),
            speech_sample_rate: 24_000,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        let request_timeout_secs = std::env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.request_timeout_secs);

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| origins.split(',').map(|s| s.trim().to_string()).collect());

        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        let text_model = std::env::var("TEXT_MODEL").unwrap_or(defaults.text_model);
        let speech_model = std::env::var("SPEECH_MODEL").unwrap_or(defaults.speech_model);
        let speech_voice = std::env::var("SPEECH_VOICE").unwrap_or(defaults.speech_voice);
        let speech_sample_rate = std::env::var("SPEECH_SAMPLE_RATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.speech_sample_rate);
        let system_instruction =
            std::env::var("SYSTEM_INSTRUCTION").unwrap_or(defaults.system_instruction);

        Self {
            port,
            request_timeout_secs,
            cors_allowed_origins,
            api_key,
            text_model,
            speech_model,
            speech_voice,
            speech_sample_rate,
            system_instruction,
        }
    }

    /// Provider settings, or `None` while the credential is missing.
    pub fn genai_config(&self) -> Option<GenAiConfig> {
        let api_key = self.api_key.as_ref()?;
        let mut config = GenAiConfig::new(api_key);
        config.text_model = self.text_model.clone();
        config.speech_model = self.speech_model.clone();
        config.voice = self.speech_voice.clone();
        config.system_instruction = self.system_instruction.clone();
        Some(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
