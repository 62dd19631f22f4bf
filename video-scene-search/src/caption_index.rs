use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{Result, SearchError};
use crate::matcher::normalize_word;

/// 图片描述能力（本地或远程视觉模型）
#[async_trait]
pub trait Captioner: Send + Sync {
    /// 为一张图片生成一句描述，失败时返回 `CaptionGeneration`
    async fn caption(&self, image_path: &Path) -> Result<String>;
}

/// 场景编号 → 描述 的映射，保持插入顺序
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptionIndex {
    entries: Vec<(String, String)>,
}

impl CaptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut index = Self::new();
        for (scene, caption) in entries {
            index.insert(scene, caption);
        }
        index
    }

    /// 写入描述；同一场景重复写入时后写覆盖，位置保持第一次插入的位置
    pub fn insert(&mut self, scene: impl Into<String>, caption: impl Into<String>) {
        let scene = scene.into();
        let caption = caption.into();
        match self.entries.iter_mut().find(|(key, _)| *key == scene) {
            Some(entry) => entry.1 = caption,
            None => self.entries.push((scene, caption)),
        }
    }

    pub fn get(&self, scene: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == scene)
            .map(|(_, caption)| caption.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 所有描述中出现过的规范化单词（去重、排序），用于输入补全
    pub fn vocabulary(&self) -> Vec<String> {
        self.entries
            .iter()
            .flat_map(|(_, caption)| caption.split_whitespace().map(normalize_word))
            .filter(|word| !word.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// 读取缓存文件：必须是扁平的 字符串 → 字符串 对象
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let format_error = |reason: String| SearchError::CacheFormat {
            path: path.to_path_buf(),
            reason,
        };

        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| format_error(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| format_error("顶层不是 JSON 对象".to_string()))?;

        let mut index = Self::new();
        for (scene, caption) in object {
            let caption = caption
                .as_str()
                .ok_or_else(|| format_error(format!("场景 {} 的描述不是字符串", scene)))?;
            index.insert(scene.clone(), caption);
        }
        Ok(index)
    }

    /// 以 4 空格缩进写出整个映射
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let map: serde_json::Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        map.serialize(&mut serializer)?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, buf)?;
        Ok(())
    }
}

/// 从 `scene_<n>_<role>.jpg` 中解析场景编号
pub fn parse_scene_index(image_path: &Path) -> Result<u32> {
    image_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.split('_').nth(1))
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| SearchError::MalformedSceneFile(image_path.to_path_buf()))
}

/// 建立或加载场景描述索引
///
/// 缓存文件存在时直接返回其内容，不调用描述模型，也不与当前场景图片核对。
/// 否则逐张生成描述，全部完成后一次性写入缓存；中途失败不会留下缓存。
pub async fn build_or_load(
    scene_images: &[PathBuf],
    cache_path: impl AsRef<Path>,
    captioner: &dyn Captioner,
) -> Result<CaptionIndex> {
    let cache_path = cache_path.as_ref();

    if cache_path.exists() {
        info!("📂 [场景描述] 从缓存加载: {}", cache_path.display());
        let index = CaptionIndex::load(cache_path)?;
        info!("✅ [场景描述] 已加载 {} 条描述", index.len());
        return Ok(index);
    }

    let start = Instant::now();
    info!(
        "⏳ [场景描述] 正在为 {} 张场景图片生成描述...",
        scene_images.len()
    );

    let mut index = CaptionIndex::new();
    for image_path in scene_images {
        let scene = parse_scene_index(image_path)?;
        info!("🖼️  [场景描述] 正在生成描述: {}", image_path.display());
        let caption = captioner.caption(image_path).await?;
        debug!("📝 [场景描述] 场景 {}: {}", scene, caption);
        index.insert(scene.to_string(), caption);
    }

    index.save(cache_path)?;
    info!(
        "✅ [场景描述] 生成 {} 条描述并写入 {}，耗时: {:.2}秒",
        index.len(),
        cache_path.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 按文件名返回固定描述的假模型
    struct ScriptedCaptioner {
        calls: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    impl ScriptedCaptioner {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0), fail_on: None }
        }
    }

    #[async_trait]
    impl Captioner for ScriptedCaptioner {
        async fn caption(&self, image_path: &Path) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = image_path.file_stem().unwrap().to_string_lossy().to_string();
            if self.fail_on == Some(name.as_str()) {
                return Err(SearchError::CaptionGeneration {
                    path: image_path.to_path_buf(),
                    reason: "model offline".to_string(),
                });
            }
            Ok(format!("caption of {}", name))
        }
    }

    fn scene_paths(dir: &Path, scenes: u32) -> Vec<PathBuf> {
        (1..=scenes)
            .flat_map(|n| {
                [
                    dir.join(format!("scene_{}_start.jpg", n)),
                    dir.join(format!("scene_{}_end.jpg", n)),
                ]
            })
            .collect()
    }

    #[tokio::test]
    async fn test_cache_short_circuit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("scene_captions.json");
        std::fs::write(
            &cache,
            r#"{"1": "a red car driving", "2": "a blue house", "3": "a red car parked"}"#,
        )
        .unwrap();

        let captioner = ScriptedCaptioner::new();
        let index = build_or_load(&scene_paths(dir.path(), 5), &cache, &captioner)
            .await
            .unwrap();

        assert_eq!(captioner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            index,
            CaptionIndex::from_entries([
                ("1", "a red car driving"),
                ("2", "a blue house"),
                ("3", "a red car parked"),
            ])
        );
    }

    #[tokio::test]
    async fn test_build_captions_every_image_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("scene_captions.json");
        let captioner = ScriptedCaptioner::new();

        let index = build_or_load(&scene_paths(dir.path(), 2), &cache, &captioner)
            .await
            .unwrap();

        assert_eq!(captioner.calls.load(Ordering::SeqCst), 4);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("1"), Some("caption of scene_1_end"));
        assert_eq!(index.get("2"), Some("caption of scene_2_end"));

        let written = std::fs::read_to_string(&cache).unwrap();
        assert!(written.contains("\n    \"1\": \"caption of scene_1_end\""));
        assert_eq!(CaptionIndex::load(&cache).unwrap(), index);
    }

    #[tokio::test]
    async fn test_captioner_failure_aborts_without_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("scene_captions.json");
        let captioner = ScriptedCaptioner {
            calls: AtomicUsize::new(0),
            fail_on: Some("scene_2_start"),
        };

        let result = build_or_load(&scene_paths(dir.path(), 3), &cache, &captioner).await;

        assert!(matches!(result, Err(SearchError::CaptionGeneration { .. })));
        assert_eq!(captioner.calls.load(Ordering::SeqCst), 3);
        assert!(!cache.exists());
    }

    #[tokio::test]
    async fn test_malformed_scene_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let images = vec![dir.path().join("keyframe.jpg")];

        let result =
            build_or_load(&images, dir.path().join("c.json"), &ScriptedCaptioner::new()).await;
        assert!(matches!(result, Err(SearchError::MalformedSceneFile(_))));
    }

    #[test]
    fn test_parse_scene_index() {
        assert_eq!(parse_scene_index(Path::new("scenes/scene_12_start.jpg")).unwrap(), 12);
        assert_eq!(parse_scene_index(Path::new("scene_3_end.jpg")).unwrap(), 3);
        assert!(parse_scene_index(Path::new("scene_x_end.jpg")).is_err());
    }

    #[test]
    fn test_load_rejects_non_string_values() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("bad.json");

        std::fs::write(&cache, r#"{"1": 42}"#).unwrap();
        assert!(matches!(CaptionIndex::load(&cache), Err(SearchError::CacheFormat { .. })));

        std::fs::write(&cache, r#"["a", "b"]"#).unwrap();
        assert!(matches!(CaptionIndex::load(&cache), Err(SearchError::CacheFormat { .. })));
    }

    #[test]
    fn test_load_preserves_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("c.json");
        std::fs::write(&cache, r#"{"10": "x", "2": "y", "1": "z"}"#).unwrap();

        let index = CaptionIndex::load(&cache).unwrap();
        let keys: Vec<&str> = index.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["10", "2", "1"]);
    }

    #[test]
    fn test_vocabulary() {
        let index = CaptionIndex::from_entries([
            ("1", "A red car, driving!"),
            ("2", "a Blue house --"),
        ]);
        assert_eq!(
            index.vocabulary(),
            vec!["a", "blue", "car", "driving", "house", "red"]
        );
    }
}
