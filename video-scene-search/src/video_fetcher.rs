use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;
use tracing::info;

/// 默认搜索关键词
pub const DEFAULT_QUERY: &str = "Super Mario movie trailer";

/// 视频下载器，调用 yt-dlp 按关键词下载第一个搜索结果
pub struct VideoFetcher {
    program: String,
}

impl Default for VideoFetcher {
    fn default() -> Self {
        Self::with_program("yt-dlp")
    }
}

impl VideoFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用指定的可执行文件
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// 下载参数：`-f best -o <output> ytsearch:<query>`
    fn build_args(query: &str, output: &Path) -> Vec<String> {
        vec![
            "-f".to_string(),
            "best".to_string(),
            "-o".to_string(),
            output.to_string_lossy().to_string(),
            format!("ytsearch:{}", query),
        ]
    }

    /// 下载视频到 `output`，返回输出路径
    pub fn fetch(&self, query: &str, output: impl AsRef<Path>) -> Result<PathBuf> {
        let output = output.as_ref();
        let start = Instant::now();
        info!("⏳ [视频下载] 正在搜索并下载: {}", query);

        let status = Command::new(&self.program)
            .args(Self::build_args(query, output))
            .status()
            .with_context(|| format!("执行 {} 命令失败", self.program))?;

        if !status.success() {
            anyhow::bail!("视频下载失败: {} 退出状态 {}", self.program, status);
        }

        info!(
            "✅ [视频下载] 已保存到 {}，耗时: {:.2}秒",
            output.display(),
            start.elapsed().as_secs_f64()
        );
        Ok(output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args() {
        let args = VideoFetcher::build_args("cat video", Path::new("video.mp4"));
        assert_eq!(args, vec!["-f", "best", "-o", "video.mp4", "ytsearch:cat video"]);
    }

    #[test]
    fn test_missing_program_is_error() {
        let fetcher = VideoFetcher::with_program("yt-dlp-does-not-exist-7c1d");
        assert!(fetcher.fetch(DEFAULT_QUERY, "video.mp4").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_is_error() {
        let fetcher = VideoFetcher::with_program("false");
        let err = fetcher.fetch(DEFAULT_QUERY, "video.mp4").unwrap_err();
        assert!(err.to_string().contains("视频下载失败"));
    }
}
