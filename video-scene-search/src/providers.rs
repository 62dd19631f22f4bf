use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::caption_index::Captioner;
use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::transcript::{JobState, TranscriptJob, Transcriber};

/// 发给视觉模型的描述指令
pub const CAPTION_PROMPT: &str = "Describe this image in one short sentence.";

/// Ollama 默认视觉模型
pub const OLLAMA_DEFAULT_MODEL: &str = "moondream";

/// 图片描述模型提供方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionProvider {
    /// 本地 Ollama 服务
    Ollama,
    /// Google Gemini
    Gemini,
}

impl FromStr for CaptionProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "gemini" => Ok(Self::Gemini),
            other => Err(format!("未知的描述模型提供方: {}", other)),
        }
    }
}

impl fmt::Display for CaptionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SearchError::CollaboratorInit(format!("创建 HTTP 客户端失败: {}", e)))
}

/// 从 `candidates[0].content.parts[*].text` 取出文本
fn extract_candidate_text(raw: &Value) -> Option<String> {
    let parts = raw
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    (!text.is_empty()).then_some(text)
}

/// 按扩展名推断视频 MIME 类型
fn video_mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        _ => "video/mp4",
    }
}

/// 本地 Ollama 视觉模型
pub struct OllamaCaptioner {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaCaptioner {
    pub fn new(endpoint: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout_secs)?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Captioner for OllamaCaptioner {
    async fn caption(&self, image_path: &Path) -> Result<String> {
        let failed = |reason: String| SearchError::CaptionGeneration {
            path: image_path.to_path_buf(),
            reason,
        };

        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| failed(format!("读取图片失败: {}", e)))?;
        let body = json!({
            "model": self.model,
            "prompt": CAPTION_PROMPT,
            "images": [base64::engine::general_purpose::STANDARD.encode(bytes)],
            "stream": false,
        });

        let url = format!("{}/api/generate", self.endpoint);
        debug!("🌐 [Ollama] POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| failed(format!("请求 Ollama 失败: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(failed(format!("Ollama API error {}: {}", status, text)));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| failed(format!("解析 Ollama 响应失败: {}", e)))?;
        raw.get("response")
            .and_then(|r| r.as_str())
            .map(|r| r.trim().to_string())
            .ok_or_else(|| failed("Ollama 响应缺少 response 字段".to_string()))
    }
}

/// Gemini REST 客户端，同时提供图片描述与视频转写
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    caption_model: String,
    transcript_model: String,
}

impl GeminiClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        caption_model: &str,
        transcript_model: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(SearchError::CollaboratorInit("Gemini API Key 为空".to_string()));
        }
        Ok(Self {
            client: build_http_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            caption_model: caption_model.to_string(),
            transcript_model: transcript_model.to_string(),
        })
    }

    /// 调用 generateContent，返回拼接后的候选文本
    async fn generate_content(&self, model: &str, parts: Value) -> std::result::Result<String, String> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        let body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "temperature": 0.0 },
        });

        debug!("🌐 [Gemini] POST {}", url);
        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Gemini generateContent request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("Gemini API error {}: {}", status, text));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| format!("解析 Gemini 响应失败: {}", e))?;
        extract_candidate_text(&raw)
            .ok_or_else(|| "Gemini 响应缺少 candidates[0].content.parts[].text".to_string())
    }
}

#[async_trait]
impl Captioner for GeminiClient {
    async fn caption(&self, image_path: &Path) -> Result<String> {
        let failed = |reason: String| SearchError::CaptionGeneration {
            path: image_path.to_path_buf(),
            reason,
        };

        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| failed(format!("读取图片失败: {}", e)))?;
        let parts = json!([
            {
                "inline_data": {
                    "mime_type": "image/jpeg",
                    "data": base64::engine::general_purpose::STANDARD.encode(bytes),
                }
            },
            { "text": CAPTION_PROMPT },
        ]);

        self.generate_content(&self.caption_model, parts)
            .await
            .map(|text| text.trim().to_string())
            .map_err(failed)
    }
}

#[async_trait]
impl Transcriber for GeminiClient {
    async fn submit(&self, video: &Path) -> Result<TranscriptJob> {
        let bytes = tokio::fs::read(video).await.map_err(|e| {
            SearchError::TranscriptionFailed(format!("读取视频失败: {}: {}", video.display(), e))
        })?;
        let mime_type = video_mime_type(video);

        let url = format!("{}/upload/v1beta/files", self.base_url);
        debug!("🌐 [Gemini] 上传 {} 字节 ({})", bytes.len(), mime_type);
        let response = self
            .client
            .post(&url)
            .query(&[("uploadType", "media"), ("key", self.api_key.as_str())])
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| SearchError::TranscriptionFailed(format!("上传视频失败: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SearchError::TranscriptionFailed(format!(
                "Gemini upload error {}: {}",
                status, text
            )));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| SearchError::TranscriptionFailed(format!("解析上传响应失败: {}", e)))?;
        let file = raw.get("file").unwrap_or(&raw);
        let field = |key: &str| file.get(key).and_then(|v| v.as_str()).map(str::to_string);

        let name = field("name").ok_or_else(|| {
            SearchError::TranscriptionFailed("上传响应缺少 file.name".to_string())
        })?;
        Ok(TranscriptJob {
            uri: field("uri").unwrap_or_default(),
            mime_type: field("mimeType").unwrap_or_else(|| mime_type.to_string()),
            name,
        })
    }

    async fn poll(&self, job: &TranscriptJob) -> Result<JobState> {
        let url = format!("{}/v1beta/{}", self.base_url, job.name);
        let response = self
            .client
            .get(&url)
            .query(&[("key", &self.api_key)])
            .send()
            .await
            .map_err(|e| SearchError::TranscriptionFailed(format!("查询任务状态失败: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SearchError::TranscriptionFailed(format!(
                "Gemini files error {}: {}",
                status, text
            )));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| SearchError::TranscriptionFailed(format!("解析任务状态失败: {}", e)))?;
        let state = raw.get("state").and_then(|s| s.as_str()).unwrap_or("");
        debug!("📡 [Gemini] {} 状态: {}", job.name, state);

        Ok(match state {
            "ACTIVE" => JobState::Ready,
            "FAILED" => JobState::Failed,
            _ => JobState::Processing,
        })
    }

    async fn result(&self, job: &TranscriptJob, prompt: &str) -> Result<String> {
        let parts = json!([
            { "file_data": { "mime_type": job.mime_type, "file_uri": job.uri } },
            { "text": prompt },
        ]);

        self.generate_content(&self.transcript_model, parts)
            .await
            .map_err(SearchError::TranscriptionFailed)
    }
}

/// 读取 API Key 并创建 Gemini 客户端
fn create_gemini(config: &SearchConfig, caption_model: &str) -> Result<GeminiClient> {
    let api_key = std::env::var(&config.gemini_api_key_env).map_err(|_| {
        SearchError::CollaboratorInit(format!(
            "环境变量 {} 未设置，无法使用 Gemini",
            config.gemini_api_key_env
        ))
    })?;
    GeminiClient::new(
        &config.gemini_base_url,
        &api_key,
        caption_model,
        &config.transcript_model,
        config.request_timeout_secs,
    )
}

/// 根据配置创建图片描述能力
pub fn create_captioner(config: &SearchConfig) -> Result<Box<dyn Captioner>> {
    match config.caption_provider {
        CaptionProvider::Ollama => Ok(Box::new(OllamaCaptioner::new(
            &config.caption_endpoint,
            &config.caption_model,
            config.request_timeout_secs,
        )?)),
        CaptionProvider::Gemini => {
            // 描述模型仍是本地默认值时沿用转写模型
            let model = if config.caption_model == OLLAMA_DEFAULT_MODEL {
                &config.transcript_model
            } else {
                &config.caption_model
            };
            Ok(Box::new(create_gemini(config, model)?))
        }
    }
}

/// 根据配置创建视频转写能力
pub fn create_transcriber(config: &SearchConfig) -> Result<Box<dyn Transcriber>> {
    Ok(Box::new(create_gemini(config, &config.transcript_model)?))
}
