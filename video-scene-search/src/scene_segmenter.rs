use image::imageops::FilterType;
use image::DynamicImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::frame_extractor::FrameSource;

/// 默认内容变化阈值（HSV 三通道平均差，0-255）
pub const DEFAULT_THRESHOLD: f64 = 27.0;
/// 默认最小场景长度（帧）
pub const DEFAULT_MIN_SCENE_LEN: u64 = 15;

/// 计算内容差异前把帧缩小到的最长边
const ANALYSIS_MAX_SIDE: u32 = 256;

/// 检测到的场景，帧号闭区间 `[start_frame, end_frame]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Scene {
    /// 场景编号（从 1 开始，连续）
    pub index: u32,
    pub start_frame: u64,
    pub end_frame: u64,
}

/// 场景边界帧的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRole {
    Start,
    End,
}

impl FrameRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameRole::Start => "start",
            FrameRole::End => "end",
        }
    }
}

/// 场景边界图片文件名：`scene_<key>_<role>.jpg`，`key` 为场景编号或描述索引中的场景键
pub fn scene_image_name(scene: impl std::fmt::Display, role: FrameRole) -> String {
    format!("scene_{}_{}.jpg", scene, role.as_str())
}

/// 分段结果
#[derive(Debug, Clone, Default)]
pub struct SegmentOutput {
    pub scenes: Vec<Scene>,
    /// 成功写入的边界图片，顺序为 1_start, 1_end, 2_start, ...
    pub images: Vec<PathBuf>,
}

/// 缩小后的 HSV 平面（OpenCV 取值范围：H 0-179，S/V 0-255）
#[derive(Debug, Clone)]
pub struct HsvFrame {
    width: u32,
    height: u32,
    hue: Vec<u8>,
    saturation: Vec<u8>,
    value: Vec<u8>,
}

impl HsvFrame {
    pub fn from_image(frame: &DynamicImage) -> Self {
        let (w, h) = (frame.width().max(1), frame.height().max(1));
        let scale = (ANALYSIS_MAX_SIDE as f64 / w.max(h) as f64).min(1.0);
        let rgb = if scale < 1.0 {
            let tw = ((w as f64 * scale).round() as u32).max(1);
            let th = ((h as f64 * scale).round() as u32).max(1);
            frame.resize_exact(tw, th, FilterType::Triangle).to_rgb8()
        } else {
            frame.to_rgb8()
        };

        let pixels = (rgb.width() * rgb.height()) as usize;
        let mut hue = Vec::with_capacity(pixels);
        let mut saturation = Vec::with_capacity(pixels);
        let mut value = Vec::with_capacity(pixels);
        for p in rgb.pixels() {
            let (hh, ss, vv) = rgb_to_hsv(p[0], p[1], p[2]);
            hue.push((hh / 2.0).round().min(179.0) as u8);
            saturation.push((ss * 255.0).round() as u8);
            value.push((vv * 255.0).round() as u8);
        }

        Self {
            width: rgb.width(),
            height: rgb.height(),
            hue,
            saturation,
            value,
        }
    }
}

/// 内容变化检测器
///
/// 帧得分为与上一帧的 H、S、V 三通道平均绝对差的均值。
/// 得分不低于阈值且距上一个切点至少 `min_scene_len` 帧时判定为场景切换。
pub struct ContentDetector {
    threshold: f64,
    min_scene_len: u64,
    last_hsv: Option<HsvFrame>,
    last_cut: Option<u64>,
}

impl ContentDetector {
    pub fn new(threshold: f64, min_scene_len: u64) -> Self {
        Self {
            threshold,
            min_scene_len,
            last_hsv: None,
            last_cut: None,
        }
    }

    /// 两帧之间的内容差异得分，尺寸不同时视为完全不同
    pub fn content_score(prev: &HsvFrame, curr: &HsvFrame) -> f64 {
        if prev.width != curr.width || prev.height != curr.height || prev.hue.is_empty() {
            return 255.0;
        }

        let mean_abs_diff = |a: &[u8], b: &[u8]| -> f64 {
            let sum: u64 = a
                .iter()
                .zip(b)
                .map(|(x, y)| (*x as i32 - *y as i32).unsigned_abs() as u64)
                .sum();
            sum as f64 / a.len() as f64
        };

        let delta_h = mean_abs_diff(&prev.hue, &curr.hue);
        let delta_s = mean_abs_diff(&prev.saturation, &curr.saturation);
        let delta_v = mean_abs_diff(&prev.value, &curr.value);
        (delta_h + delta_s + delta_v) / 3.0
    }

    /// 处理一帧，返回该帧是否为新场景的第一帧
    pub fn process_frame(&mut self, frame_index: u64, frame: &DynamicImage) -> bool {
        let hsv = HsvFrame::from_image(frame);
        let last_cut = *self.last_cut.get_or_insert(frame_index);

        let is_cut = match &self.last_hsv {
            Some(prev) => {
                let score = Self::content_score(prev, &hsv);
                score >= self.threshold
                    && frame_index.saturating_sub(last_cut) >= self.min_scene_len
            }
            None => false,
        };

        if is_cut {
            self.last_cut = Some(frame_index);
        }
        self.last_hsv = Some(hsv);
        is_cut
    }
}

/// 场景分段器：接收顺序帧流，输出场景并保存首尾帧
pub struct SceneSegmenter {
    detector: ContentDetector,
    output_dir: PathBuf,
    scenes: Vec<Scene>,
    images: Vec<PathBuf>,
    current_start: Option<u64>,
    prev_frame: Option<(u64, DynamicImage)>,
}

impl SceneSegmenter {
    /// 创建分段器，输出目录不存在时自动创建
    pub fn new(output_dir: impl AsRef<Path>, threshold: f64, min_scene_len: u64) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self {
            detector: ContentDetector::new(threshold, min_scene_len),
            output_dir,
            scenes: Vec::new(),
            images: Vec::new(),
            current_start: None,
            prev_frame: None,
        })
    }

    /// 接收下一帧；只保留最近一帧作为可能的场景尾帧
    pub fn push_frame(&mut self, frame_index: u64, frame: DynamicImage) {
        let is_cut = self.detector.process_frame(frame_index, &frame);

        match self.current_start {
            None => self.open_scene(frame_index, &frame),
            Some(_) if is_cut => {
                self.close_scene();
                self.open_scene(frame_index, &frame);
            }
            Some(_) => {}
        }

        self.prev_frame = Some((frame_index, frame));
    }

    pub fn finish(mut self) -> SegmentOutput {
        self.close_scene();
        SegmentOutput {
            scenes: self.scenes,
            images: self.images,
        }
    }

    fn open_scene(&mut self, frame_index: u64, frame: &DynamicImage) {
        self.current_start = Some(frame_index);
        let index = self.scenes.len() as u32 + 1;
        self.save_boundary(index, FrameRole::Start, frame);
    }

    fn close_scene(&mut self) {
        let (Some(start_frame), Some((end_frame, end_image))) =
            (self.current_start.take(), self.prev_frame.take())
        else {
            return;
        };

        let index = self.scenes.len() as u32 + 1;
        self.save_boundary(index, FrameRole::End, &end_image);
        debug!(
            "🎬 [场景分段] 场景 {}: 帧 {} - {}",
            index, start_frame, end_frame
        );
        self.scenes.push(Scene {
            index,
            start_frame,
            end_frame,
        });
    }

    /// 保存边界帧，写入失败只记录日志
    fn save_boundary(&mut self, index: u32, role: FrameRole, frame: &DynamicImage) {
        let path = self.output_dir.join(scene_image_name(index, role));
        match frame.to_rgb8().save(&path) {
            Ok(()) => self.images.push(path),
            Err(e) => warn!(
                "⚠️  [场景分段] 保存边界帧失败: {} - {}",
                path.display(),
                e
            ),
        }
    }
}

/// 对整段视频做场景分段，并把每个场景的首尾帧写入 `output_dir`
pub fn segment(
    source: &dyn FrameSource,
    output_dir: impl AsRef<Path>,
    threshold: f64,
    min_scene_len: u64,
) -> Result<SegmentOutput> {
    let start = Instant::now();
    info!(
        "⏳ [场景分段] 正在检测场景（阈值: {:.1}, 最小场景长度: {} 帧）...",
        threshold, min_scene_len
    );

    let mut segmenter = SceneSegmenter::new(output_dir, threshold, min_scene_len)?;
    source.for_each_frame(&mut |index, frame| {
        segmenter.push_frame(index, frame);
        Ok(())
    })?;
    let output = segmenter.finish();

    info!(
        "✅ [场景分段] 检测到 {} 个场景，保存 {} 张边界帧，耗时: {:.2}秒",
        output.scenes.len(),
        output.images.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(output)
}

/// RGB 转 HSV，返回 (色调 0-360, 饱和度 0-1, 亮度 0-1)
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let r = r as f64 / 255.0;
    let g = g as f64 / 255.0;
    let b = b as f64 / 255.0;

    let max = r.max(g.max(b));
    let min = r.min(g.min(b));
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta) % 6.0)
    } else if max == g {
        60.0 * (((b - r) / delta) + 2.0)
    } else {
        60.0 * (((r - g) / delta) + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}
