use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::collage::{CollageLayout, DEFAULT_MAX_PER_ROW};
use crate::matcher::DEFAULT_FUZZY_THRESHOLD;
use crate::providers::{CaptionProvider, OLLAMA_DEFAULT_MODEL};
use crate::scene_segmenter::{DEFAULT_MIN_SCENE_LEN, DEFAULT_THRESHOLD};

/// 配置文件默认文件名
const CONFIG_FILE_NAME: &str = "video-search.ini";

/// 检索工具配置
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// 场景切换阈值（HSV 平均差，0-255）
    pub scene_threshold: f64,
    /// 最小场景长度（帧）
    pub min_scene_len: u64,
    /// 场景边界帧输出目录
    pub scenes_dir: PathBuf,
    /// 图片描述模型提供方
    pub caption_provider: CaptionProvider,
    pub caption_model: String,
    /// 本地 Ollama 服务地址
    pub caption_endpoint: String,
    /// 场景描述缓存文件
    pub captions_file: PathBuf,
    /// 模糊匹配阈值（严格大于）
    pub fuzzy_threshold: f64,
    pub collage_output: PathBuf,
    pub max_per_row: usize,
    pub collage_layout: CollageLayout,
    /// 生成拼图后是否调用系统查看器
    pub open_viewer: bool,
    pub transcript_model: String,
    /// 转写命中帧输出目录
    pub frames_dir: PathBuf,
    /// 转写任务状态轮询间隔（秒）
    pub poll_interval_secs: u64,
    pub gemini_base_url: String,
    /// 保存 Gemini API Key 的环境变量名
    pub gemini_api_key_env: String,
    /// HTTP 请求超时（秒）
    pub request_timeout_secs: u64,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            scene_threshold: DEFAULT_THRESHOLD,
            min_scene_len: DEFAULT_MIN_SCENE_LEN,
            scenes_dir: PathBuf::from("scenes"),
            caption_provider: CaptionProvider::Ollama,
            caption_model: OLLAMA_DEFAULT_MODEL.to_string(),
            caption_endpoint: "http://localhost:11434".to_string(),
            captions_file: PathBuf::from("scene_captions.json"),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            collage_output: PathBuf::from("collage.png"),
            max_per_row: DEFAULT_MAX_PER_ROW,
            collage_layout: CollageLayout::Uniform,
            open_viewer: true,
            transcript_model: "gemini-1.5-flash".to_string(),
            frames_dir: PathBuf::from("gemini_frames"),
            poll_interval_secs: 10,
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            gemini_api_key_env: "GEMINI_API_KEY".to_string(),
            request_timeout_secs: 300,
            log_level: "info".to_string(),
        }
    }
}

/// 命令行覆盖项
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub scene_threshold: Option<f64>,
    pub min_scene_len: Option<u64>,
    pub captions_file: Option<PathBuf>,
    pub open_viewer: Option<bool>,
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load_config(config_file: Option<&Path>, cli: &CliOverrides) -> Result<SearchConfig> {
        let file = match config_file {
            Some(path) => Some(Self::load_ini(path)?),
            None => Self::find_default_file()
                .map(|path| Self::load_ini(&path))
                .transpose()?,
        };
        Ok(Self::resolve(file.as_ref(), cli, |key| env::var(key).ok()))
    }

    /// 合并各层配置
    pub fn resolve<E>(file: Option<&configparser::ini::Ini>, cli: &CliOverrides, env_lookup: E) -> SearchConfig
    where
        E: Fn(&str) -> Option<String>,
    {
        let layers = Layers { file, env_lookup };
        let defaults = SearchConfig::default();

        SearchConfig {
            scene_threshold: cli
                .scene_threshold
                .or_else(|| layers.get("VIDEO_SEARCH_THRESHOLD", "scene", "threshold"))
                .unwrap_or(defaults.scene_threshold),
            min_scene_len: cli
                .min_scene_len
                .or_else(|| layers.get("VIDEO_SEARCH_MIN_SCENE_LEN", "scene", "min_scene_len"))
                .unwrap_or(defaults.min_scene_len),
            scenes_dir: layers
                .get("VIDEO_SEARCH_SCENES_DIR", "scene", "scenes_dir")
                .unwrap_or(defaults.scenes_dir),
            caption_provider: layers
                .get("VIDEO_SEARCH_CAPTION_PROVIDER", "caption", "provider")
                .unwrap_or(defaults.caption_provider),
            caption_model: layers
                .get("VIDEO_SEARCH_CAPTION_MODEL", "caption", "model")
                .unwrap_or(defaults.caption_model),
            caption_endpoint: layers
                .get("VIDEO_SEARCH_CAPTION_ENDPOINT", "caption", "endpoint")
                .unwrap_or(defaults.caption_endpoint),
            captions_file: cli
                .captions_file
                .clone()
                .or_else(|| layers.get("VIDEO_SEARCH_CAPTIONS_FILE", "caption", "captions_file"))
                .unwrap_or(defaults.captions_file),
            fuzzy_threshold: layers
                .get("VIDEO_SEARCH_FUZZY_THRESHOLD", "search", "fuzzy_threshold")
                .unwrap_or(defaults.fuzzy_threshold),
            collage_output: layers
                .get("VIDEO_SEARCH_COLLAGE_OUTPUT", "collage", "output")
                .unwrap_or(defaults.collage_output),
            max_per_row: layers
                .get("VIDEO_SEARCH_MAX_PER_ROW", "collage", "max_per_row")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_per_row),
            collage_layout: layers
                .get("VIDEO_SEARCH_COLLAGE_LAYOUT", "collage", "layout")
                .unwrap_or(defaults.collage_layout),
            open_viewer: cli
                .open_viewer
                .or_else(|| layers.get("VIDEO_SEARCH_OPEN_VIEWER", "collage", "open_viewer"))
                .unwrap_or(defaults.open_viewer),
            transcript_model: layers
                .get("VIDEO_SEARCH_TRANSCRIPT_MODEL", "transcript", "model")
                .unwrap_or(defaults.transcript_model),
            frames_dir: layers
                .get("VIDEO_SEARCH_FRAMES_DIR", "transcript", "frames_dir")
                .unwrap_or(defaults.frames_dir),
            poll_interval_secs: layers
                .get("VIDEO_SEARCH_POLL_INTERVAL", "transcript", "poll_interval_secs")
                .unwrap_or(defaults.poll_interval_secs),
            gemini_base_url: layers
                .get("VIDEO_SEARCH_GEMINI_BASE_URL", "gemini", "base_url")
                .unwrap_or(defaults.gemini_base_url),
            gemini_api_key_env: layers
                .get("VIDEO_SEARCH_GEMINI_API_KEY_ENV", "gemini", "api_key_env")
                .unwrap_or(defaults.gemini_api_key_env),
            request_timeout_secs: layers
                .get("VIDEO_SEARCH_REQUEST_TIMEOUT", "gemini", "request_timeout_secs")
                .unwrap_or(defaults.request_timeout_secs),
            log_level: layers
                .get("VIDEO_SEARCH_LOG_LEVEL", "logging", "level")
                .unwrap_or(defaults.log_level),
        }
    }

    /// 读取 INI 配置文件
    fn load_ini(config_path: &Path) -> Result<configparser::ini::Ini> {
        if !config_path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", config_path.display()));
        }

        let mut config_parser = configparser::ini::Ini::new();
        config_parser
            .load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;
        Ok(config_parser)
    }

    /// 按顺序查找默认位置的配置文件
    fn find_default_file() -> Option<PathBuf> {
        let mut candidates = vec![
            PathBuf::from(CONFIG_FILE_NAME),
            PathBuf::from(format!(".{}", CONFIG_FILE_NAME)),
        ];
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(format!(".{}", CONFIG_FILE_NAME)));
        }
        candidates.push(PathBuf::from("/etc").join(CONFIG_FILE_NAME));

        candidates.into_iter().find(|path| path.exists())
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let defaults = SearchConfig::default();
        let mut config_parser = configparser::ini::Ini::new();
        let mut set = |section: &str, key: &str, value: String| {
            config_parser.set(section, key, Some(value));
        };

        set("scene", "threshold", defaults.scene_threshold.to_string());
        set("scene", "min_scene_len", defaults.min_scene_len.to_string());
        set("scene", "scenes_dir", defaults.scenes_dir.display().to_string());
        set("caption", "provider", defaults.caption_provider.to_string());
        set("caption", "model", defaults.caption_model);
        set("caption", "endpoint", defaults.caption_endpoint);
        set("caption", "captions_file", defaults.captions_file.display().to_string());
        set("search", "fuzzy_threshold", defaults.fuzzy_threshold.to_string());
        set("collage", "output", defaults.collage_output.display().to_string());
        set("collage", "max_per_row", defaults.max_per_row.to_string());
        set("collage", "layout", "uniform".to_string());
        set("collage", "open_viewer", defaults.open_viewer.to_string());
        set("transcript", "model", defaults.transcript_model);
        set("transcript", "frames_dir", defaults.frames_dir.display().to_string());
        set("transcript", "poll_interval_secs", defaults.poll_interval_secs.to_string());
        set("gemini", "base_url", defaults.gemini_base_url);
        set("gemini", "api_key_env", defaults.gemini_api_key_env);
        set("gemini", "request_timeout_secs", defaults.request_timeout_secs.to_string());
        set("logging", "level", defaults.log_level);

        config_parser
            .write(config_path)
            .map_err(|e| anyhow::anyhow!("写入配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(())
    }
}

/// 环境变量与配置文件两层查找
struct Layers<'a, E> {
    file: Option<&'a configparser::ini::Ini>,
    env_lookup: E,
}

impl<E> Layers<'_, E>
where
    E: Fn(&str) -> Option<String>,
{
    /// 先查环境变量，再查配置文件的 `[section]`，最后查 `[DEFAULT]`；无法解析的值忽略
    fn get<T: FromStr>(&self, env_key: &str, section: &str, key: &str) -> Option<T> {
        (self.env_lookup)(env_key)
            .and_then(|v| parse_value(&v))
            .or_else(|| {
                let file = self.file?;
                file.get(section, key)
                    .or_else(|| file.get("DEFAULT", key))
                    .filter(|v| !v.is_empty())
                    .and_then(|v| parse_value(&v))
            })
    }
}

fn parse_value<T: FromStr>(raw: &str) -> Option<T> {
    let raw = raw.trim();
    raw.parse()
        .ok()
        .or_else(|| raw.to_lowercase().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ini(content: &str) -> configparser::ini::Ini {
        let mut parser = configparser::ini::Ini::new();
        parser.read(content.to_string()).unwrap();
        parser
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = ConfigLoader::resolve(None, &CliOverrides::default(), |_| None);
        assert_eq!(config, SearchConfig::default());
        assert_eq!(config.scene_threshold, 27.0);
        assert_eq!(config.max_per_row, 4);
        assert_eq!(config.captions_file, PathBuf::from("scene_captions.json"));
    }

    #[test]
    fn test_precedence_cli_env_file() {
        let file = ini(
            "[scene]\nthreshold = 30\nmin_scene_len = 20\n\
             [collage]\nlayout = Adaptive\nmax_per_row = 3\nopen_viewer = False\n\
             [caption]\nprovider = gemini\n",
        );
        let env: HashMap<&str, &str> = [("VIDEO_SEARCH_MIN_SCENE_LEN", "25")].into();
        let cli = CliOverrides {
            scene_threshold: Some(12.5),
            ..Default::default()
        };

        let config = ConfigLoader::resolve(Some(&file), &cli, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.scene_threshold, 12.5);
        assert_eq!(config.min_scene_len, 25);
        assert_eq!(config.collage_layout, CollageLayout::Adaptive);
        assert_eq!(config.max_per_row, 3);
        assert!(!config.open_viewer);
        assert_eq!(config.caption_provider, CaptionProvider::Gemini);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let file = ini("[collage]\nmax_per_row = 0\n[search]\nfuzzy_threshold = lots\n");
        let config = ConfigLoader::resolve(Some(&file), &CliOverrides::default(), |_| None);

        assert_eq!(config.max_per_row, DEFAULT_MAX_PER_ROW);
        assert_eq!(config.fuzzy_threshold, DEFAULT_FUZZY_THRESHOLD);
    }

    #[test]
    fn test_default_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        ConfigLoader::create_default_config(&path).unwrap();

        let config = ConfigLoader::load_config(Some(&path), &CliOverrides::default()).unwrap();
        assert_eq!(config.caption_model, "moondream");
        assert_eq!(config.frames_dir, PathBuf::from("gemini_frames"));
        assert_eq!(config.collage_layout, CollageLayout::Uniform);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = ConfigLoader::load_config(
            Some(Path::new("/no/such/video-search.ini")),
            &CliOverrides::default(),
        );
        assert!(result.is_err());
    }
}
