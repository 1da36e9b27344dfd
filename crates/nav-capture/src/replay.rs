use anyhow::{bail, Context, Result};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

/// Replays a directory of saved PNG frames in file-name order, standing in for
/// a live window capture when analysing recorded sessions.
pub struct ReplaySource {
    frames: Vec<PathBuf>,
    cursor: Mutex<usize>,
    looping: bool,
}

impl ReplaySource {
    pub fn open(dir: &Path, looping: bool) -> Result<Self> {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("png"))
                    .unwrap_or(false)
            })
            .collect();
        frames.sort();

        if frames.is_empty() {
            bail!("No PNG frames in {}", dir.display());
        }
        info!("Replay source: {} frames from {}", frames.len(), dir.display());

        Ok(Self {
            frames,
            cursor: Mutex::new(0),
            looping,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Load the next frame. Past the end it wraps when looping, errors otherwise.
    pub fn next_frame(&self) -> Result<RgbaImage> {
        let path = {
            let mut cursor = self
                .cursor
                .lock()
                .map_err(|_| anyhow::anyhow!("Replay cursor poisoned"))?;
            if *cursor >= self.frames.len() {
                if !self.looping {
                    bail!("Replay exhausted after {} frames", self.frames.len());
                }
                *cursor = 0;
            }
            let path = self.frames[*cursor].clone();
            *cursor += 1;
            path
        };

        let img = image::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(img.to_rgba8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("nav_capture_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_replay_order_and_exhaustion() {
        let dir = temp_dir("order");
        for (i, shade) in [10u8, 20, 30].iter().enumerate() {
            let img = RgbaImage::from_pixel(4, 4, image::Rgba([*shade, 0, 0, 255]));
            img.save(dir.join(format!("frame_{i:03}.png"))).unwrap();
        }
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let replay = ReplaySource::open(&dir, false).unwrap();
        assert_eq!(replay.len(), 3);
        let shades: Vec<u8> = (0..3).map(|_| replay.next_frame().unwrap().get_pixel(0, 0)[0]).collect();
        assert_eq!(shades, vec![10, 20, 30]);
        assert!(replay.next_frame().is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_empty_dir_rejected() {
        let dir = temp_dir("empty");
        assert!(ReplaySource::open(&dir, true).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
