use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::info;

use crate::caption_index::{self, CaptionIndex, Captioner};
use crate::collage;
use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::frame_extractor::{FfmpegOpener, FrameSourceOpener};
use crate::matcher;
use crate::prompt::LinePrompt;
use crate::scene_segmenter::{self, scene_image_name, FrameRole};
use crate::transcript::{self, Transcriber};

/// 检索方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// 1：按场景描述检索
    Caption,
    /// 2：按视频转写检索
    Transcript,
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(Self::Caption),
            "2" => Ok(Self::Transcript),
            other => Err(format!("无效的检索方式: {}（请输入 1 或 2）", other)),
        }
    }
}

/// 一次交互式检索会话
pub struct Session {
    config: SearchConfig,
    captioner: Option<Box<dyn Captioner>>,
    transcriber: Option<Box<dyn Transcriber>>,
    prompt: Box<dyn LinePrompt>,
    opener: Box<dyn FrameSourceOpener>,
}

impl Session {
    pub fn new(
        config: SearchConfig,
        captioner: Option<Box<dyn Captioner>>,
        transcriber: Option<Box<dyn Transcriber>>,
        prompt: Box<dyn LinePrompt>,
    ) -> Self {
        Self {
            config,
            captioner,
            transcriber,
            prompt,
            opener: Box::new(FfmpegOpener),
        }
    }

    /// 替换打开视频的方式（默认使用 FFmpeg）
    pub fn with_opener(mut self, opener: Box<dyn FrameSourceOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// 执行一次检索，返回生成的拼图路径；没有结果或用户取消时返回 `None`
    pub async fn run(&mut self, video: &Path, mode: Option<SearchMode>) -> Result<Option<PathBuf>> {
        let outcome = match mode {
            Some(mode) => self.run_mode(video, mode).await,
            None => self.choose_and_run(video).await,
        };

        match outcome {
            Err(e) if is_user_abort(&e) => {
                println!("\n已取消本次检索");
                Ok(None)
            }
            other => other,
        }
    }

    async fn choose_and_run(&mut self, video: &Path) -> Result<Option<PathBuf>> {
        let answer = self
            .prompt
            .read_line("请选择检索方式（1 = 场景描述，2 = 视频转写）: ", &[])?;
        match answer.parse::<SearchMode>() {
            Ok(mode) => self.run_mode(video, mode).await,
            Err(message) => {
                println!("{}", message);
                Ok(None)
            }
        }
    }

    async fn run_mode(&mut self, video: &Path, mode: SearchMode) -> Result<Option<PathBuf>> {
        match mode {
            SearchMode::Caption => self.run_caption_search(video).await,
            SearchMode::Transcript => self.run_transcript_search(video).await,
        }
    }

    /// 场景分段 → 场景描述 → 匹配 → 拼图
    async fn run_caption_search(&mut self, video: &Path) -> Result<Option<PathBuf>> {
        let total_start = Instant::now();
        let captioner = self
            .captioner
            .as_deref()
            .ok_or_else(|| SearchError::CollaboratorInit("未配置可用的图片描述模型".to_string()))?;

        let source = self.opener.open(video).context("打开视频失败")?;
        let segments = scene_segmenter::segment(
            source.as_ref(),
            &self.config.scenes_dir,
            self.config.scene_threshold,
            self.config.min_scene_len,
        )
        .context("场景分段失败")?;
        drop(source);

        let index = caption_index::build_or_load(&segments.images, &self.config.captions_file, captioner)
            .await
            .context("生成场景描述失败")?;

        let result = self.search_captions(&index)?;
        info!(
            "🎉 [检索] 场景描述检索完成，总耗时: {:.2}秒",
            total_start.elapsed().as_secs_f64()
        );
        Ok(result)
    }

    /// 读取查询词，在描述索引中匹配，把命中场景的首帧拼成拼图
    pub fn search_captions(&mut self, index: &CaptionIndex) -> Result<Option<PathBuf>> {
        let vocabulary = index.vocabulary();
        let query = self
            .prompt
            .read_line("🔍 输入要检索的单词（Tab 补全）: ", &vocabulary)?;

        let hits = matcher::search(index, &query, self.config.fuzzy_threshold);
        if hits.is_empty() {
            println!("未找到与 \"{}\" 匹配的场景", query);
            return Ok(None);
        }
        println!("找到 {} 个匹配场景: {}", hits.len(), hits.join(", "));

        let images: Vec<PathBuf> = hits
            .iter()
            .map(|scene| self.config.scenes_dir.join(scene_image_name(scene, FrameRole::Start)))
            .collect();
        self.finish_collage(&images)
    }

    /// 上传转写 → 查找命中 → 提取命中帧 → 拼图
    async fn run_transcript_search(&mut self, video: &Path) -> Result<Option<PathBuf>> {
        let total_start = Instant::now();
        let transcriber = self
            .transcriber
            .as_deref()
            .ok_or_else(|| SearchError::CollaboratorInit("未配置可用的转写服务".to_string()))?;

        let source = self.opener.open(video).context("打开视频失败")?;
        let fps = source.info().fps;

        let query = self.prompt.read_line("🔍 输入要在转写中检索的内容: ", &[])?;
        let hits = transcript::search_transcript(
            transcriber,
            video,
            &query,
            fps,
            Duration::from_secs(self.config.poll_interval_secs),
        )
        .await
        .context("视频转写失败")?;

        if hits.is_empty() {
            println!("转写中未找到 \"{}\"", query);
            return Ok(None);
        }
        for hit in &hits {
            println!("  • {} (帧 {})", hit.timestamp, hit.frame_index);
        }

        let frames = transcript::extract_hit_frames(source.as_ref(), &hits, &self.config.frames_dir)
            .context("提取命中帧失败")?;
        let collage = self.finish_collage(&frames)?;
        info!(
            "🎉 [检索] 转写检索完成，总耗时: {:.2}秒",
            total_start.elapsed().as_secs_f64()
        );
        Ok(collage)
    }

    /// 拼图并按配置打开；没有任何可用画面时提示并返回 `None`
    fn finish_collage(&self, images: &[PathBuf]) -> Result<Option<PathBuf>> {
        let output = match collage::compose(
            images,
            self.config.max_per_row,
            &self.config.collage_output,
            self.config.collage_layout,
        ) {
            Ok(output) => output,
            Err(SearchError::EmptyCollage) => {
                println!("命中的画面均不可用，未生成拼图");
                return Ok(None);
            }
            Err(e) => return Err(e).context("生成拼图失败"),
        };
        println!("拼图已保存: {}", output.display());

        if self.config.open_viewer {
            collage::open_in_viewer(&output);
        }
        Ok(Some(output))
    }
}

fn is_user_abort(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<SearchError>(),
            Some(SearchError::UserAbort)
        )
    })
}
