use std::pin::Pin;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

/// Incremental stream of reply text fragments, in arrival order.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Text-generation collaborator: submit a prompt, receive a fragment stream.
#[async_trait]
pub trait ChatStream: Send + Sync {
    async fn stream_reply(&self, prompt: &str) -> Result<ReplyStream>;
}

/// Connection settings for the generative AI provider.
#[derive(Debug, Clone)]
pub struct GenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub text_model: String,
    pub speech_model: String,
    pub voice: String,
    pub system_instruction: String,
}

impl GenAiConfig {
    /// Settings with the provider's default models and voice.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            speech_model: "gemini-2.5-flash-preview-tts".to_string(),
            voice: "Kore".to_string(),
            system_instruction: String::new(),
        }
    }
}

/// Structure for a generateContent request
#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

impl<'a> Content<'a> {
    fn text(text: &'a str) -> Self {
        Self {
            parts: vec![Part { text }],
        }
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig<'a> {
    #[serde(rename = "responseModalities")]
    response_modalities: Vec<&'a str>,
    #[serde(rename = "speechConfig")]
    speech_config: SpeechConfig<'a>,
}

#[derive(Serialize)]
struct SpeechConfig<'a> {
    #[serde(rename = "voiceConfig")]
    voice_config: VoiceConfig<'a>,
}

#[derive(Serialize)]
struct VoiceConfig<'a> {
    #[serde(rename = "prebuiltVoiceConfig")]
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Serialize)]
struct PrebuiltVoiceConfig<'a> {
    #[serde(rename = "voiceName")]
    voice_name: &'a str,
}

/// Structure for a generateContent response
#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(rename = "inlineData")]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    data: String,
}

impl GenerateResponse {
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .find_map(|p| p.text)
    }

    fn first_inline_data(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .find_map(|p| p.inline_data.map(|d| d.data))
    }
}

/// Client for the generative AI provider's text and speech endpoints.
///
/// Holds no session state; constructed per conversation with explicit
/// configuration.
pub struct GenAiClient {
    config: GenAiConfig,
    client: reqwest::Client,
}

impl GenAiClient {
    pub fn new(config: GenAiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Open an SSE stream of reply fragments for a prompt.
    ///
    /// The request itself (and any HTTP-level failure) happens here; errors
    /// while the body is draining surface as `Err` items on the stream.
    pub async fn stream_reply(&self, prompt: &str) -> Result<ReplyStream> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.config.base_url, self.config.text_model
        );
        let system = self.config.system_instruction.as_str();
        let body = GenerateRequest {
            contents: vec![Content::text(prompt)],
            system_instruction: (!system.is_empty()).then(|| Content::text(system)),
            generation_config: None,
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("text generation request failed")?
            .error_for_status()
            .context("text generation request rejected")?;

        let mut bytes = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut line_buf: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.context("reading reply stream")?;
                line_buf.extend_from_slice(&chunk);

                // Process every complete line; the partial tail stays
                // buffered as raw bytes, since a network chunk may end in
                // the middle of a multibyte character.
                for line in drain_complete_lines(&mut line_buf) {
                    if let Some(text) = parse_sse_line(line.trim_end()) {
                        yield text;
                    }
                }
            }
            if let Some(text) = parse_sse_line(String::from_utf8_lossy(&line_buf).trim_end()) {
                yield text;
            }
        };
        Ok(Box::pin(stream))
    }

    /// Synthesize a text fragment into base64-encoded raw PCM samples.
    ///
    /// Returns `Ok(None)` when the provider yields no audio data; callers
    /// treat that as a no-op rather than an error.
    pub async fn synthesize_speech(&self, text: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url, self.config.speech_model
        );
        let body = GenerateRequest {
            contents: vec![Content::text(text)],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: &self.config.voice,
                        },
                    },
                },
            }),
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("speech synthesis request failed")?
            .error_for_status()
            .context("speech synthesis request rejected")?
            .json::<GenerateResponse>()
            .await
            .context("decoding speech synthesis response")?;

        Ok(response.first_inline_data())
    }
}

#[async_trait]
impl ChatStream for GenAiClient {
    async fn stream_reply(&self, prompt: &str) -> Result<ReplyStream> {
        GenAiClient::stream_reply(self, prompt).await
    }
}

/// Pull every newline-terminated line out of the byte buffer, leaving the
/// partial tail (possibly ending mid-character) for the next chunk.
fn drain_complete_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        lines.push(String::from_utf8_lossy(&line).into_owned());
    }
    lines
}

/// Extract the reply text carried by one SSE line, if any.
fn parse_sse_line(line: &str) -> Option<String> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let response: GenerateResponse = match serde_json::from_str(data) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("skipping malformed stream event: {e}");
            return None;
        }
    };
    response.first_text().filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sse_line_extracts_fragment_text() {
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":"Bonjour"}]}}]}"#;
        assert_eq!(parse_sse_line(line), Some("Bonjour".to_string()));
    }

    #[test]
    fn parse_sse_line_ignores_non_data_lines() {
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line(": keepalive"), None);
        assert_eq!(parse_sse_line("data: [DONE]"), None);
    }

    #[test]
    fn parse_sse_line_skips_events_without_text() {
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":""}]}}]}"#;
        assert_eq!(parse_sse_line(line), None);
        let line = r#"data: {"candidates":[]}"#;
        assert_eq!(parse_sse_line(line), None);
    }

    #[test]
    fn multibyte_characters_split_across_chunks_stay_intact() {
        let payload =
            r#"data: {"candidates":[{"content":{"parts":[{"text":"Café"}]}}]}"#.as_bytes();
        // Split between the two bytes of the 'é'.
        let split = payload.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut buf = Vec::new();
        buf.extend_from_slice(&payload[..split]);
        assert!(drain_complete_lines(&mut buf).is_empty());

        buf.extend_from_slice(&payload[split..]);
        buf.push(b'\n');
        let lines = drain_complete_lines(&mut buf);
        assert_eq!(lines.len(), 1);
        assert_eq!(parse_sse_line(lines[0].trim_end()), Some("Café".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn speech_request_carries_audio_modality_and_voice() {
        let body = GenerateRequest {
            contents: vec![Content::text("Bonjour.")],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: "Kore" },
                    },
                },
            }),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            value["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert_eq!(value["contents"][0]["parts"][0]["text"], "Bonjour.");
    }

    #[test]
    fn response_inline_data_is_surfaced() {
        let json = r#"{"candidates":[{"content":{"parts":[{"inlineData":{"data":"UFNN"}}]}}]}"#;
        let response: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.first_inline_data(), Some("UFNN".to_string()));
    }
}
