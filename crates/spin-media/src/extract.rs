//! Still frame extraction through FFmpeg.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};

/// Output file name pattern; numbering starts at 1.
pub const FRAME_PATTERN: &str = "frame_%05d.jpg";

/// How frames are sampled from the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExtractionMode {
    /// `n` frames evenly spaced by frame index
    FixedCount(usize),
    /// Frames at a fixed rate in frames per second
    FixedRate(f64),
    /// Every decoded frame
    All,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionRequest {
    pub mode: ExtractionMode,
    /// Output width; height follows the aspect ratio rounded up to even
    pub width: Option<u32>,
    /// FFmpeg `-q:v` JPEG scale
    pub qscale: u8,
}

impl Default for ExtractionRequest {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::FixedCount(36),
            width: Some(800),
            qscale: 2,
        }
    }
}

/// Frame files written by an extraction, in temporal order.
#[derive(Debug, Clone)]
pub struct ExtractedFrames {
    pub paths: Vec<PathBuf>,
    pub width: u32,
    pub height: u32,
}

/// Source frame indices for a fixed-count extraction.
///
/// Frame `k` comes from index `floor(k * total / n)`. Indices repeat when
/// the video is shorter than `n` frames; callers see fewer output files.
pub fn fixed_count_indices(total_frames: u64, count: usize) -> Vec<u64> {
    if count == 0 || total_frames == 0 {
        return Vec::new();
    }
    let interval = total_frames as f64 / count as f64;
    let mut indices: Vec<u64> = (0..count).map(|k| (k as f64 * interval) as u64).collect();
    indices.dedup();
    indices
}

/// Output size for a requested width, keeping aspect ratio with an even height.
pub fn scaled_size(info: &VideoInfo, width: Option<u32>) -> (u32, u32) {
    match width {
        Some(w) if info.width > 0 && info.height > 0 => {
            let h = (w as f64 * info.height as f64 / info.width as f64) as u32;
            (w, h + h % 2)
        }
        _ => (info.width, info.height),
    }
}

fn build_filter(mode: ExtractionMode, info: &VideoInfo, size: (u32, u32), scale: bool) -> Option<String> {
    let mut filters = Vec::new();
    match mode {
        ExtractionMode::FixedCount(n) => {
            let terms: Vec<String> = fixed_count_indices(info.frame_count(), n)
                .into_iter()
                .map(|i| format!("eq(n\\,{i})"))
                .collect();
            if !terms.is_empty() {
                filters.push(format!("select={}", terms.join("+")));
            }
        }
        ExtractionMode::FixedRate(fps) => filters.push(format!("fps={fps}")),
        ExtractionMode::All => {}
    }
    if scale {
        filters.push(format!("scale={}:{}", size.0, size.1));
    }
    (!filters.is_empty()).then(|| filters.join(","))
}

/// Extract frames from `video` into `output_dir`.
///
/// Returns [`MediaError::NoFrames`] when nothing was written.
pub async fn extract_frames(
    runner: &FfmpegRunner,
    video: &Path,
    output_dir: &Path,
    request: &ExtractionRequest,
) -> MediaResult<ExtractedFrames> {
    let info = probe_video(video).await?;
    if info.width == 0 || info.height == 0 {
        return Err(MediaError::InvalidVideo(format!(
            "{} has no usable video dimensions",
            video.display()
        )));
    }
    tokio::fs::create_dir_all(output_dir).await?;

    let (width, height) = scaled_size(&info, request.width);
    let scale = (width, height) != (info.width, info.height);

    let mut cmd = FfmpegCommand::new(video, output_dir.join(FRAME_PATTERN));
    if let Some(filter) = build_filter(request.mode, &info, (width, height), scale) {
        cmd = cmd.video_filter(filter);
    }
    if matches!(request.mode, ExtractionMode::FixedCount(_)) {
        cmd = cmd.output_args(["-fps_mode", "vfr"]);
    }
    let cmd = cmd.jpeg_quality(request.qscale);

    debug!(video = %video.display(), mode = ?request.mode, "Extracting frames");
    runner.run(&cmd).await?;

    let paths = list_frame_files(output_dir).await?;
    if paths.is_empty() {
        return Err(MediaError::NoFrames(video.to_path_buf()));
    }

    info!(
        frames = paths.len(),
        width,
        height,
        "Extracted frames from {}",
        video.display()
    );

    Ok(ExtractedFrames {
        paths,
        width,
        height,
    })
}

/// Sorted `.jpg` files in a directory.
pub async fn list_frame_files(dir: &Path) -> MediaResult<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "jpg") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(nb_frames: u64) -> VideoInfo {
        VideoInfo {
            duration: 10.0,
            width: 1920,
            height: 1080,
            fps: 30.0,
            nb_frames: Some(nb_frames),
        }
    }

    #[test]
    fn test_fixed_count_indices() {
        assert_eq!(fixed_count_indices(100, 4), vec![0, 25, 50, 75]);
        assert_eq!(fixed_count_indices(10, 3), vec![0, 3, 6]);
        assert_eq!(fixed_count_indices(2, 4), vec![0, 1]);
        assert!(fixed_count_indices(0, 4).is_empty());
    }

    #[test]
    fn test_scaled_size_even_height() {
        let mut probe = info(300);
        assert_eq!(scaled_size(&probe, Some(800)), (800, 450));
        probe.width = 1000;
        probe.height = 749;
        // 800 * 749 / 1000 = 599.2 -> 599 -> 600
        assert_eq!(scaled_size(&probe, Some(800)), (800, 600));
        assert_eq!(scaled_size(&probe, None), (1000, 749));
    }

    #[test]
    fn test_fixed_count_filter() {
        let filter = build_filter(ExtractionMode::FixedCount(3), &info(300), (800, 450), true).unwrap();
        assert_eq!(
            filter,
            "select=eq(n\\,0)+eq(n\\,100)+eq(n\\,200),scale=800:450"
        );
    }

    #[test]
    fn test_rate_and_all_filters() {
        let probe = info(300);
        assert_eq!(
            build_filter(ExtractionMode::FixedRate(10.0), &probe, (800, 450), false).as_deref(),
            Some("fps=10")
        );
        assert_eq!(build_filter(ExtractionMode::All, &probe, (1920, 1080), false), None);
    }

    #[tokio::test]
    async fn test_list_frame_files_sorted() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["frame_00002.jpg", "frame_00001.jpg", "notes.txt"] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }
        let files = list_frame_files(dir.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["frame_00001.jpg", "frame_00002.jpg"]);
    }
}
