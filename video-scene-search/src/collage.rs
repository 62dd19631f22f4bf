use image::{DynamicImage, RgbImage};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::{Result, SearchError};

/// 默认每行图片数
pub const DEFAULT_MAX_PER_ROW: usize = 4;

/// 拼图布局方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollageLayout {
    /// 假定同一行图片尺寸一致：画布宽取第一行宽度之和，
    /// 行高取每行第一张图片的高度
    #[default]
    Uniform,
    /// 按行累计：画布宽取最宽的一行，行高取该行最高的图片
    Adaptive,
}

impl FromStr for CollageLayout {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "uniform" => Ok(Self::Uniform),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(format!("未知的拼图布局: {}", other)),
        }
    }
}

/// 布局计算结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub width: u32,
    pub height: u32,
    /// 每张图片左上角坐标，与输入顺序一致
    pub positions: Vec<(u32, u32)>,
}

/// 计算网格布局，`dims` 为各图片的 (宽, 高)
pub fn layout(dims: &[(u32, u32)], max_per_row: usize, mode: CollageLayout) -> Placement {
    let max_per_row = max_per_row.max(1);
    let rows: Vec<&[(u32, u32)]> = dims.chunks(max_per_row).collect();

    let row_height = |row: &[(u32, u32)]| -> u32 {
        match mode {
            CollageLayout::Uniform => row.first().map(|d| d.1).unwrap_or(0),
            CollageLayout::Adaptive => row.iter().map(|d| d.1).max().unwrap_or(0),
        }
    };

    let width = match mode {
        CollageLayout::Uniform => rows
            .first()
            .map(|row| row.iter().map(|d| d.0).sum())
            .unwrap_or(0),
        CollageLayout::Adaptive => rows
            .iter()
            .map(|row| row.iter().map(|d| d.0).sum::<u32>())
            .max()
            .unwrap_or(0),
    };
    let height = rows.iter().map(|row| row_height(row)).sum();

    let mut positions = Vec::with_capacity(dims.len());
    let mut y = 0u32;
    for row in &rows {
        let mut x = 0u32;
        for &(w, _) in row.iter() {
            positions.push((x, y));
            x += w;
        }
        y += row_height(row);
    }

    Placement {
        width,
        height,
        positions,
    }
}

/// 把图片拼成网格并写入 `output`
///
/// 无法读取的源图片会被跳过；没有任何可用图片时返回 `EmptyCollage`。
pub fn compose(
    image_paths: &[PathBuf],
    max_per_row: usize,
    output: impl AsRef<Path>,
    mode: CollageLayout,
) -> Result<PathBuf> {
    let output = output.as_ref();

    let images: Vec<DynamicImage> = image_paths
        .iter()
        .filter_map(|path| match image::open(path) {
            Ok(img) => Some(img),
            Err(e) => {
                warn!("⚠️  [拼图] 跳过无法读取的图片: {} - {}", path.display(), e);
                None
            }
        })
        .collect();

    if images.is_empty() {
        return Err(SearchError::EmptyCollage);
    }

    let dims: Vec<(u32, u32)> = images.iter().map(|img| (img.width(), img.height())).collect();
    let placement = layout(&dims, max_per_row, mode);
    if placement.width == 0 || placement.height == 0 {
        return Err(SearchError::EmptyCollage);
    }

    let mut canvas = RgbImage::new(placement.width, placement.height);
    for (img, &(x, y)) in images.iter().zip(&placement.positions) {
        // 超出画布的部分会被裁掉
        image::imageops::overlay(&mut canvas, &img.to_rgb8(), x as i64, y as i64);
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    canvas.save(output)?;
    info!(
        "🧩 [拼图] 已保存拼图: {} ({}x{}, {} 张)",
        output.display(),
        placement.width,
        placement.height,
        images.len()
    );

    Ok(output.to_path_buf())
}

/// 尝试用系统图片查看器打开，失败只记录警告
pub fn open_in_viewer(path: &Path) {
    if let Err(e) = open::that(path) {
        let err = SearchError::ViewerLaunch(e);
        warn!("⚠️  [拼图] {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn write_solid(dir: &Path, name: &str, w: u32, h: u32, color: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        let img: RgbImage = ImageBuffer::from_fn(w, h, |_, _| Rgb(color));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_uniform_row_wrap() {
        let dims = vec![(100, 50); 6];
        let placement = layout(&dims, 4, CollageLayout::Uniform);

        assert_eq!((placement.width, placement.height), (400, 100));
        assert_eq!(
            placement.positions,
            vec![(0, 0), (100, 0), (200, 0), (300, 0), (0, 50), (100, 50)]
        );
    }

    #[test]
    fn test_uniform_uses_first_row_and_stride_heights() {
        let dims = vec![(10, 5), (20, 7), (30, 9), (40, 40)];
        let placement = layout(&dims, 2, CollageLayout::Uniform);

        // 宽度只取第一行，高度取第 0、2 张
        assert_eq!((placement.width, placement.height), (30, 14));
        assert_eq!(placement.positions, vec![(0, 0), (10, 0), (0, 5), (30, 5)]);
    }

    #[test]
    fn test_adaptive_layout() {
        let dims = vec![(10, 5), (20, 7), (30, 9), (40, 40)];
        let placement = layout(&dims, 2, CollageLayout::Adaptive);

        assert_eq!((placement.width, placement.height), (70, 47));
        assert_eq!(placement.positions, vec![(0, 0), (10, 0), (0, 7), (30, 7)]);
    }

    #[test]
    fn test_empty_layout() {
        let placement = layout(&[], 4, CollageLayout::Uniform);
        assert_eq!((placement.width, placement.height), (0, 0));
        assert!(placement.positions.is_empty());
    }

    #[test]
    fn test_compose_writes_grid() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..6)
            .map(|i| write_solid(dir.path(), &format!("f{}.png", i), 100, 50, [i as u8 * 40, 0, 0]))
            .collect();
        let output = dir.path().join("out/collage.png");

        let written = compose(&paths, 4, &output, CollageLayout::Uniform).unwrap();

        let collage = image::open(&written).unwrap().to_rgb8();
        assert_eq!(collage.dimensions(), (400, 100));
        assert_eq!(collage.get_pixel(150, 25), &Rgb([40, 0, 0]));
        assert_eq!(collage.get_pixel(150, 75), &Rgb([200, 0, 0]));
        // 第二行右侧空白
        assert_eq!(collage.get_pixel(350, 75), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_compose_skips_missing_images() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_solid(dir.path(), "a.png", 20, 10, [255, 255, 255]),
            dir.path().join("missing.png"),
            write_solid(dir.path(), "b.png", 20, 10, [255, 255, 255]),
        ];

        let written = compose(&paths, 4, dir.path().join("c.png"), CollageLayout::Uniform).unwrap();
        assert_eq!(image::open(written).unwrap().width(), 40);
    }

    #[test]
    fn test_compose_nothing_usable() {
        let dir = tempfile::tempdir().unwrap();
        let result = compose(
            &[dir.path().join("missing.png")],
            4,
            dir.path().join("c.png"),
            CollageLayout::Uniform,
        );
        assert!(matches!(result, Err(SearchError::EmptyCollage)));
    }

    #[test]
    fn test_layout_from_str() {
        assert_eq!("Adaptive".parse::<CollageLayout>(), Ok(CollageLayout::Adaptive));
        assert_eq!("uniform".parse::<CollageLayout>(), Ok(CollageLayout::Uniform));
        assert!("spiral".parse::<CollageLayout>().is_err());
    }
}
