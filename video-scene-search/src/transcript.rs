use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Result, SearchError};
use crate::frame_extractor::FrameSource;

/// 发给转写模型的固定指令
pub const TRANSCRIPT_PROMPT: &str = "Transcribe everything that is said in this video. \
Put each utterance on its own line and start every line with the timestamp at which it \
begins, formatted as HH:MM:SS. After the transcript, list notable on-screen text, objects \
and events, one per line, each also starting with its HH:MM:SS timestamp. \
Output plain text only.";

/// 远程转写任务句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptJob {
    /// 服务端资源名（如 `files/abc123`）
    pub name: String,
    pub uri: String,
    pub mime_type: String,
}

/// 转写任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Processing,
    Ready,
    Failed,
}

/// 视频转写能力
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// 上传视频，返回任务句柄
    async fn submit(&self, video: &Path) -> Result<TranscriptJob>;
    /// 查询任务状态
    async fn poll(&self, job: &TranscriptJob) -> Result<JobState>;
    /// 按指令获取带时间戳的文本
    async fn result(&self, job: &TranscriptJob, prompt: &str) -> Result<String>;
}

/// 转写文本中的一次命中
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptHit {
    /// `HH:MM:SS`
    pub timestamp: String,
    pub seconds: u64,
    pub frame_index: u64,
}

impl TranscriptHit {
    /// 命中帧的文件名：`frame_HH-MM-SS.jpg`
    pub fn file_name(&self) -> String {
        format!("frame_{}.jpg", self.timestamp.replace(':', "-"))
    }
}

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d{2}):(\d{2}):(\d{2})").expect("静态正则表达式"))
}

/// `HH:MM:SS` 转秒数
pub fn timestamp_to_seconds(timestamp: &str) -> Option<u64> {
    let caps = timestamp_pattern().captures(timestamp)?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
    Some(field(1)? * 3600 + field(2)? * 60 + field(3)?)
}

/// 秒数按帧率换算为帧号（四舍五入）
pub fn seconds_to_frame(seconds: u64, fps: f64) -> u64 {
    (seconds as f64 * fps).round() as u64
}

/// 逐行查找包含查询词（不区分大小写）的行，取该行第一个 `HH:MM:SS`
///
/// 包含查询词但没有时间戳的行被丢弃。
pub fn find_hits(text: &str, query: &str, fps: f64) -> Vec<TranscriptHit> {
    let query = query.to_lowercase();
    text.lines()
        .filter(|line| line.to_lowercase().contains(&query))
        .filter_map(|line| {
            let timestamp = timestamp_pattern().find(line)?.as_str().to_string();
            let seconds = timestamp_to_seconds(&timestamp)?;
            Some(TranscriptHit {
                frame_index: seconds_to_frame(seconds, fps),
                seconds,
                timestamp,
            })
        })
        .collect()
}

/// 把视频交给转写服务，等待完成后查找命中
///
/// 只提交一次；状态为处理中时每隔 `poll_interval` 重新查询，任务失败立即返回错误。
pub async fn search_transcript(
    transcriber: &dyn Transcriber,
    video: &Path,
    query: &str,
    fps: f64,
    poll_interval: Duration,
) -> Result<Vec<TranscriptHit>> {
    let start = Instant::now();
    info!("⏳ [视频转写] 正在上传视频: {}", video.display());
    let job = transcriber.submit(video).await?;
    info!("✅ [视频转写] 上传完成: {}", job.name);

    loop {
        match transcriber.poll(&job).await? {
            JobState::Ready => break,
            JobState::Failed => {
                return Err(SearchError::TranscriptionFailed(format!(
                    "任务 {} 处理失败",
                    job.name
                )))
            }
            JobState::Processing => {
                debug!("⏳ [视频转写] 任务 {} 处理中...", job.name);
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    let text = transcriber.result(&job, TRANSCRIPT_PROMPT).await?;
    let hits = find_hits(&text, query, fps);
    info!(
        "✅ [视频转写] 转写完成，命中 {} 处，耗时: {:.2}秒",
        hits.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(hits)
}

/// 提取并保存每个命中的帧，取不到的帧跳过；返回已写入的文件（按命中顺序）
pub fn extract_hit_frames(
    source: &dyn FrameSource,
    hits: &[TranscriptHit],
    output_dir: impl AsRef<Path>,
) -> Result<Vec<PathBuf>> {
    let output_dir = output_dir.as_ref();
    std::fs::create_dir_all(output_dir)?;

    let mut written = Vec::new();
    for hit in hits {
        let frame = match source.frame_at(hit.frame_index) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!(
                    "⚠️  [视频转写] 时间点 {} (帧 {}) 没有可用帧，已跳过",
                    hit.timestamp, hit.frame_index
                );
                continue;
            }
            Err(e) => {
                warn!("⚠️  [视频转写] 提取时间点 {} 失败: {}", hit.timestamp, e);
                continue;
            }
        };

        let path = output_dir.join(hit.file_name());
        match frame.to_rgb8().save(&path) {
            Ok(()) => {
                info!("💾 [视频转写] 已保存帧: {}", path.display());
                written.push(path);
            }
            Err(e) => warn!("⚠️  [视频转写] 保存帧失败: {} - {}", path.display(), e),
        }
    }
    Ok(written)
}
