use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::TitleSettings;
use crate::constants::{GENERIC_TITLE, TRUNCATION_MARKER};

const ILLEGAL: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone)]
pub struct Namer {
    max_len: usize,
    placeholder: String,
}

impl Default for Namer {
    fn default() -> Self {
        Self::from_settings(&TitleSettings::default())
    }
}

impl Namer {
    pub fn from_settings(settings: &TitleSettings) -> Self {
        Self {
            max_len: settings.max_len.max(TRUNCATION_MARKER.len() + 1),
            placeholder: settings.placeholder.clone(),
        }
    }

    /// Filesystem-safe, bounded title. Falls back to `"{placeholder} {index}"`
    /// when `title` is absent or sanitizes to nothing.
    pub fn name(&self, title: Option<&str>, fallback_index: usize) -> String {
        let cleaned = title.map(sanitize).filter(|t| !t.is_empty());
        let chosen = cleaned.unwrap_or_else(|| {
            sanitize(&format!("{} {}", self.placeholder, fallback_index))
        });
        let bounded = bound_title(&chosen, self.max_len);
        if bounded.is_empty() {
            GENERIC_TITLE.to_string()
        } else {
            bounded
        }
    }

    /// Renames `temp` to `{index:03}_{name}.mp4` next to it. On failure the
    /// temporary path is kept.
    pub fn finalize(&self, temp: &Path, index: usize, name: &str) -> PathBuf {
        let dir = temp.parent().unwrap_or_else(|| Path::new("."));
        let target = free_path(dir, &format!("{index:03}_{name}"), "mp4");
        match fs::rename(temp, &target) {
            Ok(()) => target,
            Err(err) => {
                warn!(from = %temp.display(), to = %target.display(), error = %err, "rename failed");
                temp.to_path_buf()
            }
        }
    }
}

pub fn sanitize(title: &str) -> String {
    title
        .chars()
        .filter(|c| !ILLEGAL.contains(c))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cuts `title` to at most `max_len` characters, ending with the truncation
/// marker when anything was removed.
pub fn bound_title(title: &str, max_len: usize) -> String {
    let trimmed = title.trim();
    if trimmed.chars().count() <= max_len {
        return trimmed.to_string();
    }
    let keep = max_len.saturating_sub(TRUNCATION_MARKER.chars().count());
    let mut cut: String = trimmed.chars().take(keep).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}

fn free_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let first = dir.join(format!("{stem}.{extension}"));
    if !first.exists() {
        return first;
    }
    (2..)
        .map(|n| dir.join(format!("{stem} ({n}).{extension}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_title_uses_indexed_placeholder() {
        let name = Namer::default().name(None, 7);
        assert!(!name.is_empty());
        assert!(name.contains('7'));
        assert_eq!(name, "Product 7");
    }

    #[test]
    fn blank_or_illegal_only_title_falls_back() {
        let namer = Namer::default();
        assert_eq!(namer.name(Some("  "), 2), "Product 2");
        assert_eq!(namer.name(Some("<>?*"), 3), "Product 3");
    }

    #[test]
    fn empty_placeholder_still_names_something() {
        let namer = Namer::from_settings(&TitleSettings {
            placeholder: "???".into(),
            ..TitleSettings::default()
        });
        assert_eq!(namer.name(None, 9), "9");
        let namer = Namer {
            max_len: 10,
            placeholder: String::new(),
        };
        assert!(!namer.name(Some("|"), 0).is_empty());
    }

    #[test]
    fn strips_illegal_characters() {
        let name = Namer::default().name(Some("Fan: \"USB\" / Mini\t*Portable*?"), 1);
        assert_eq!(name, "Fan USB Mini Portable");
    }

    #[test]
    fn long_titles_are_cut_to_max_with_marker() {
        let long = "word ".repeat(60);
        let name = Namer::default().name(Some(&long), 1);
        assert_eq!(name.chars().count(), 100);
        assert!(name.ends_with("..."));

        let accented = "é".repeat(150);
        let name = bound_title(&accented, 100);
        assert_eq!(name.chars().count(), 100);
        assert!(name.ends_with("..."));
    }

    #[test]
    fn finalize_renames_and_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let namer = Namer::default();

        let first = dir.path().join("temp_video_1.mp4");
        fs::write(&first, b"a").unwrap();
        let renamed = namer.finalize(&first, 1, "Desk Lamp");
        assert_eq!(renamed, dir.path().join("001_Desk Lamp.mp4"));
        assert!(!first.exists());

        let second = dir.path().join("temp_video_2.mp4");
        fs::write(&second, b"b").unwrap();
        fs::write(dir.path().join("002_Desk Lamp.mp4"), b"old").unwrap();
        let renamed = namer.finalize(&second, 2, "Desk Lamp");
        assert_eq!(renamed, dir.path().join("002_Desk Lamp (2).mp4"));
    }

    #[test]
    fn finalize_keeps_temp_path_when_rename_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("temp_video_5.mp4");
        assert_eq!(Namer::default().finalize(&missing, 5, "x"), missing);
    }
}
