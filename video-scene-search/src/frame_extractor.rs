use ffmpeg_next as ffmpeg;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, SearchError};

/// 视频基础信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    /// 帧率
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// 视频时长（秒）
    pub duration_secs: f64,
    /// 总帧数（容器未记录时按 时长 × 帧率 估算）
    pub frame_count: u64,
}

/// 按帧号提供解码后图像的视频源
pub trait FrameSource {
    fn info(&self) -> VideoInfo;

    /// 按解码顺序逐帧回调（帧号从 0 开始），返回成功回调的帧数
    fn for_each_frame(&self, on_frame: &mut dyn FnMut(u64, DynamicImage) -> Result<()>) -> Result<u64>;

    /// 取指定帧号的图像，越界时返回 `Ok(None)`
    fn frame_at(&self, frame_index: u64) -> Result<Option<DynamicImage>>;
}

/// 按路径打开视频源
pub trait FrameSourceOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>>;
}

/// 用 FFmpeg 打开本地视频文件
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegOpener;

impl FrameSourceOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(FrameExtractor::open(path)?))
    }
}

/// 帧提取器，负责解码视频并按帧号输出图像
///
/// 每次操作都会重新打开输入文件，操作结束时 FFmpeg 上下文随作用域释放。
pub struct FrameExtractor {
    input_path: PathBuf,
    info: VideoInfo,
}

impl FrameExtractor {
    /// 打开视频并读取基础信息，视频不可读时返回 `UnreadableMedia`
    pub fn open(input_path: impl AsRef<Path>) -> Result<Self> {
        let input_path = input_path.as_ref().to_path_buf();
        ffmpeg::init().map_err(|e| SearchError::UnreadableMedia {
            path: input_path.clone(),
            reason: format!("初始化 FFmpeg 失败: {}", e),
        })?;

        // 只输出 FFmpeg 的错误日志
        unsafe {
            ffmpeg::sys::av_log_set_level(ffmpeg::sys::AV_LOG_ERROR as i32);
        }

        let info = read_info(&input_path)?;
        debug!(
            "🎞️  [帧提取] {}: {}x{}, {:.2} fps, {} 帧",
            input_path.display(),
            info.width,
            info.height,
            info.fps,
            info.frame_count
        );

        Ok(Self { input_path, info })
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    fn open_input(&self) -> Result<ffmpeg::format::context::Input> {
        ffmpeg::format::input(&self.input_path).map_err(|e| self.unreadable(e))
    }

    fn open_decoder(
        &self,
        ictx: &ffmpeg::format::context::Input,
    ) -> Result<(usize, ffmpeg::decoder::Video)> {
        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| self.unreadable("未找到视频流"))?;
        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| self.unreadable(format!("无法创建视频解码器: {}", e)))?;
        Ok((stream.index(), decoder))
    }

    fn create_scaler(
        &self,
        decoder: &ffmpeg::decoder::Video,
    ) -> Result<ffmpeg::software::scaling::Context> {
        ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| self.unreadable(format!("无法创建缩放器: {}", e)))
    }

    fn unreadable(&self, reason: impl std::fmt::Display) -> SearchError {
        SearchError::UnreadableMedia {
            path: self.input_path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl FrameSource for FrameExtractor {
    fn info(&self) -> VideoInfo {
        self.info
    }

    /// 解码器拒收的数据包、转换失败的帧会被跳过
    fn for_each_frame(&self, on_frame: &mut dyn FnMut(u64, DynamicImage) -> Result<()>) -> Result<u64> {
        let mut ictx = self.open_input()?;
        let (stream_index, mut decoder) = self.open_decoder(&ictx)?;
        let mut scaler = self.create_scaler(&decoder)?;

        let start = Instant::now();
        let mut counter = FrameCounter::default();

        for (stream, packet) in ictx.packets() {
            if stream.index() != stream_index {
                continue;
            }
            if let Err(e) = decoder.send_packet(&packet) {
                debug!("⚠️  [帧提取] 跳过无法解码的数据包: {}", e);
                continue;
            }
            drain_decoder(&mut decoder, &mut scaler, &mut counter, on_frame)?;
        }

        if let Err(e) = decoder.send_eof() {
            debug!("⚠️  [帧提取] 发送 EOF 失败: {}", e);
        }
        drain_decoder(&mut decoder, &mut scaler, &mut counter, on_frame)?;

        let elapsed = start.elapsed().as_secs_f64();
        info!(
            "✅ [帧提取] 顺序解码完成: {} 帧，耗时 {:.2}秒 ({:.1} 帧/s)",
            counter.delivered,
            elapsed,
            counter.delivered as f64 / elapsed.max(0.001)
        );

        Ok(counter.delivered)
    }

    /// 先向后 seek 到最近的关键帧，再向前解码直到到达目标帧。
    /// seek 失败时同样返回 `Ok(None)`。
    fn frame_at(&self, frame_index: u64) -> Result<Option<DynamicImage>> {
        if self.info.frame_count > 0 && frame_index >= self.info.frame_count {
            debug!(
                "⚠️  [帧提取] 帧号 {} 超出范围（共 {} 帧）",
                frame_index, self.info.frame_count
            );
            return Ok(None);
        }

        let mut ictx = self.open_input()?;
        let (stream_index, mut decoder) = self.open_decoder(&ictx)?;
        let mut scaler = self.create_scaler(&decoder)?;
        let time_base = ictx
            .stream(stream_index)
            .map(|s| s.time_base())
            .ok_or_else(|| self.unreadable("视频流消失"))?;

        let target_secs = frame_index as f64 / self.info.fps;
        // seek 以 AV_TIME_BASE 为单位，向后查找最近的 keyframe
        let timestamp = (target_secs * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;
        if let Err(e) = ictx.seek(timestamp, ..timestamp) {
            warn!("⚠️  [帧提取] seek 到帧 {} 失败: {}", frame_index, e);
            return Ok(None);
        }
        decoder.flush();

        let fps = self.info.fps;
        let reached = |decoded: &ffmpeg::frame::Video| -> bool {
            match decoded.timestamp() {
                Some(ts) => {
                    let secs = ts as f64 * time_base.numerator() as f64
                        / time_base.denominator() as f64;
                    (secs * fps).round() as u64 >= frame_index
                }
                None => true,
            }
        };

        let mut decoded = ffmpeg::frame::Video::empty();
        for (stream, packet) in ictx.packets() {
            if stream.index() != stream_index {
                continue;
            }
            if decoder.send_packet(&packet).is_err() {
                continue;
            }
            while decoder.receive_frame(&mut decoded).is_ok() {
                if reached(&decoded) {
                    return Ok(convert_frame(&mut scaler, &decoded));
                }
            }
        }

        if decoder.send_eof().is_ok() {
            while decoder.receive_frame(&mut decoded).is_ok() {
                if reached(&decoded) {
                    return Ok(convert_frame(&mut scaler, &decoded));
                }
            }
        }

        Ok(None)
    }
}

/// 读取帧率、分辨率、时长、帧数
fn read_info(input_path: &Path) -> Result<VideoInfo> {
    let unreadable = |reason: String| SearchError::UnreadableMedia {
        path: input_path.to_path_buf(),
        reason,
    };

    let ictx = ffmpeg::format::input(&input_path)
        .map_err(|e| unreadable(format!("无法打开视频文件: {}", e)))?;
    let stream = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| unreadable("未找到视频流".to_string()))?;
    let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .and_then(|ctx| ctx.decoder().video())
        .map_err(|e| unreadable(format!("无法创建视频解码器: {}", e)))?;

    let rate = stream.avg_frame_rate();
    let fps = if rate.denominator() > 0 && rate.numerator() > 0 {
        rate.numerator() as f64 / rate.denominator() as f64
    } else {
        30.0 // 默认值
    };

    let duration_secs = if ictx.duration() > 0 {
        ictx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64
    } else {
        0.0
    };
    let frame_count = if stream.frames() > 0 {
        stream.frames() as u64
    } else {
        (duration_secs * fps).round() as u64
    };

    Ok(VideoInfo {
        fps,
        width: decoder.width(),
        height: decoder.height(),
        duration_secs,
        frame_count,
    })
}

/// 顺序解码的帧号与成功回调计数
#[derive(Default)]
struct FrameCounter {
    next_index: u64,
    delivered: u64,
}

/// 取出解码器中所有可用帧并回调
fn drain_decoder(
    decoder: &mut ffmpeg::decoder::Video,
    scaler: &mut ffmpeg::software::scaling::Context,
    counter: &mut FrameCounter,
    on_frame: &mut dyn FnMut(u64, DynamicImage) -> Result<()>,
) -> Result<()> {
    let mut decoded = ffmpeg::frame::Video::empty();
    while decoder.receive_frame(&mut decoded).is_ok() {
        if let Some(img) = convert_frame(scaler, &decoded) {
            on_frame(counter.next_index, img)?;
            counter.delivered += 1;
        } else {
            warn!("⚠️  [帧提取] 帧 {} 转换失败，已跳过", counter.next_index);
        }
        counter.next_index += 1;
    }
    Ok(())
}

fn convert_frame(
    scaler: &mut ffmpeg::software::scaling::Context,
    decoded: &ffmpeg::frame::Video,
) -> Option<DynamicImage> {
    let mut rgb_frame = ffmpeg::frame::Video::empty();
    scaler.run(decoded, &mut rgb_frame).ok()?;
    Some(frame_to_image(&rgb_frame))
}

/// 将 RGB24 的 FFmpeg 帧转换为 DynamicImage（按行拷贝，去掉 stride 填充）
fn frame_to_image(frame: &ffmpeg::frame::Video) -> DynamicImage {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let row_bytes = width * 3;
    let mut buf = Vec::with_capacity(row_bytes * height);
    for y in 0..height {
        let start = y * stride;
        match data.get(start..start + row_bytes) {
            Some(row) => buf.extend_from_slice(row),
            None => buf.resize(buf.len() + row_bytes, 0),
        }
    }

    let img = image::RgbImage::from_raw(width as u32, height as u32, buf)
        .unwrap_or_else(|| image::RgbImage::new(width as u32, height as u32));
    DynamicImage::ImageRgb8(img)
}
