//! Standalone HTML viewer for a sprite sheet.
//!
//! The page rebuilds the grid from the frame count alone, so it only needs
//! `sprite.{ext}` next to it.

use spin_models::{OutputFormat, SpriteLayout};
use std::path::Path;

use crate::error::MediaResult;

const TEMPLATE: &str = include_str!("../templates/viewer.html");

/// File name the viewer is published under.
pub const VIEWER_FILE_NAME: &str = "viewer.html";

#[derive(Debug, Clone, Copy)]
pub struct ViewerOptions {
    pub layout: SpriteLayout,
    pub format: OutputFormat,
    pub transparent: bool,
}

pub fn render_viewer(options: &ViewerOptions) -> String {
    let layout = &options.layout;
    let (background, stage_class, selector) = if options.transparent {
        ("transparent", " checker", "flex")
    } else {
        ("#f5f5f5", "", "none")
    };

    [
        ("__FRAME_COUNT__", layout.frame_count.to_string()),
        ("__COLUMNS__", layout.columns.to_string()),
        ("__FRAME_WIDTH__", layout.frame_width.to_string()),
        ("__FRAME_HEIGHT__", layout.frame_height.to_string()),
        ("__SPRITE_WIDTH__", layout.sprite_width.to_string()),
        ("__SPRITE_HEIGHT__", layout.sprite_height.to_string()),
        ("__SPRITE_EXT__", options.format.extension().to_string()),
        ("__VIEWER_BACKGROUND__", background.to_string()),
        ("__STAGE_CLASS__", stage_class.to_string()),
        ("__BG_SELECTOR_DISPLAY__", selector.to_string()),
    ]
    .iter()
    .fold(TEMPLATE.to_string(), |html, (token, value)| html.replace(token, value))
}

pub fn write_viewer(path: &Path, options: &ViewerOptions) -> MediaResult<()> {
    std::fs::write(path, render_viewer(options))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(transparent: bool) -> ViewerOptions {
        ViewerOptions {
            layout: SpriteLayout::for_frame_count(36, 800, 600),
            format: if transparent { OutputFormat::Png } else { OutputFormat::Jpeg },
            transparent,
        }
    }

    #[test]
    fn test_all_tokens_replaced() {
        let html = render_viewer(&options(false));
        assert!(!html.contains("__"));
        assert!(html.contains("const frames = 36;"));
        assert!(html.contains("const columns = 6;"));
        assert!(html.contains("sprite.jpg"));
        assert!(html.contains("background-size: 4800px 3600px"));
    }

    #[test]
    fn test_transparent_variant() {
        let html = render_viewer(&options(true));
        assert!(html.contains("sprite.png"));
        assert!(html.contains("class=\"stage checker\""));
        assert!(html.contains(".backgrounds { display: flex;"));
    }

    #[test]
    fn test_write_viewer() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(VIEWER_FILE_NAME);
        write_viewer(&path, &options(false)).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().starts_with("<!DOCTYPE html>"));
    }
}
