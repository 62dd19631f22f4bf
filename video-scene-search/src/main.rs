use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use video_scene_search::video_fetcher::DEFAULT_QUERY;
use video_scene_search::{
    create_captioner, create_transcriber, CliOverrides, ConfigLoader, RustylinePrompt, SearchMode,
    Session, VideoFetcher,
};

/// 视频内容检索工具 - 按场景描述或视频转写查找画面
#[derive(Parser, Debug)]
#[command(name = "video-scene-search")]
#[command(about = "视频内容检索工具：场景分段、图片描述、转写检索并生成拼图", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 交互式检索本地视频
    Search {
        /// 输入视频文件路径
        #[arg(short, long, default_value = "video.mp4")]
        input: PathBuf,

        /// 检索方式：1 = 场景描述，2 = 视频转写；不指定时交互选择
        #[arg(long, value_parser = parse_mode)]
        mode: Option<SearchMode>,

        /// 配置文件路径（可选，支持 .ini 格式）
        /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
        #[arg(long)]
        config: Option<PathBuf>,

        /// 场景切换阈值（HSV 平均差），值越小越敏感
        /// 可通过环境变量 VIDEO_SEARCH_THRESHOLD 或配置文件设置
        #[arg(long)]
        threshold: Option<f64>,

        /// 最小场景长度（帧）
        /// 可通过环境变量 VIDEO_SEARCH_MIN_SCENE_LEN 或配置文件设置
        #[arg(long)]
        min_scene_len: Option<u64>,

        /// 场景描述缓存文件，删除后会重新生成
        #[arg(long)]
        captions: Option<PathBuf>,

        /// 不自动打开拼图
        #[arg(long)]
        no_viewer: bool,
    },
    /// 用 yt-dlp 按关键词下载视频
    Fetch {
        /// 搜索关键词
        #[arg(short, long, default_value = DEFAULT_QUERY)]
        query: String,

        /// 输出文件路径
        #[arg(short, long, default_value = "video.mp4")]
        output: PathBuf,
    },
    /// 生成默认配置文件
    InitConfig {
        /// 配置文件路径
        #[arg(default_value = "video-search.ini")]
        path: PathBuf,
    },
}

fn parse_mode(s: &str) -> std::result::Result<SearchMode, String> {
    s.parse()
}

/// 初始化日志：优先使用 RUST_LOG，否则使用配置的级别
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Search {
            input,
            mode,
            config,
            threshold,
            min_scene_len,
            captions,
            no_viewer,
        } => {
            let overrides = CliOverrides {
                scene_threshold: threshold,
                min_scene_len,
                captions_file: captions,
                open_viewer: no_viewer.then_some(false),
            };
            let config = ConfigLoader::load_config(config.as_deref(), &overrides)
                .context("加载配置失败")?;
            init_logging(&config.log_level);

            println!(
                "使用配置: threshold={:.1}, min_scene_len={} 帧, provider={}, fuzzy_threshold={:.0}",
                config.scene_threshold,
                config.min_scene_len,
                config.caption_provider,
                config.fuzzy_threshold
            );

            // 外部服务按需使用，初始化失败只在选中对应检索方式时报错
            let captioner = create_captioner(&config)
                .map_err(|e| tracing::warn!("⚠️  [初始化] 图片描述模型不可用: {}", e))
                .ok();
            let transcriber = create_transcriber(&config)
                .map_err(|e| tracing::warn!("⚠️  [初始化] 转写服务不可用: {}", e))
                .ok();
            let prompt = RustylinePrompt::new().context("初始化终端输入失败")?;

            let mut session = Session::new(config, captioner, transcriber, Box::new(prompt));
            if let Some(collage) = session
                .run(&input, mode)
                .await
                .context("检索失败")?
            {
                println!("\n🎉 检索完成！拼图: {}", collage.display());
            }
        }
        Commands::Fetch { query, output } => {
            init_logging("info");
            let path = VideoFetcher::new()
                .fetch(&query, &output)
                .context("下载视频失败")?;
            println!("视频已下载到: {}", path.display());
        }
        Commands::InitConfig { path } => {
            init_logging("info");
            ConfigLoader::create_default_config(&path)
                .with_context(|| format!("创建配置文件失败: {}", path.display()))?;
            println!("已生成默认配置文件: {}", path.display());
        }
    }

    Ok(())
}
