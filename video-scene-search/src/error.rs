use std::path::PathBuf;
use thiserror::Error;

/// 检索流程中的错误分类
#[derive(Debug, Error)]
pub enum SearchError {
    /// 视频无法打开或解码（致命）
    #[error("无法读取视频文件 {path}: {reason}")]
    UnreadableMedia { path: PathBuf, reason: String },

    /// 字幕生成服务返回失败（致命）
    #[error("生成图片描述失败 {path}: {reason}")]
    CaptionGeneration { path: PathBuf, reason: String },

    /// 远程转写任务失败（仅模式 2）
    #[error("视频转写失败: {0}")]
    TranscriptionFailed(String),

    /// 用户在输入时中断（Ctrl-C / Ctrl-D）
    #[error("用户中断输入")]
    UserAbort,

    /// 无法调用系统图片查看器（非致命）
    #[error("无法打开拼图: {0}")]
    ViewerLaunch(#[source] std::io::Error),

    /// 场景图片文件名中没有场景编号
    #[error("场景图片文件名无法解析场景编号: {0}")]
    MalformedSceneFile(PathBuf),

    /// 缓存文件不是扁平的字符串键值对象
    #[error("字幕缓存格式错误 {path}: {reason}")]
    CacheFormat { path: PathBuf, reason: String },

    /// 没有可用于拼图的图片
    #[error("没有可用于拼图的图片")]
    EmptyCollage,

    /// 外部模型客户端初始化失败
    #[error("初始化外部服务失败: {0}")]
    CollaboratorInit(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("图片处理错误: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SearchError>;
