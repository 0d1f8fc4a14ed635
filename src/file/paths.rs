// SeriesRelay - catalog mirroring and scheduled republishing
// Copyright (C) 2025 SeriesRelay contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Local media layout
//!
//! Downloaded assets live at `{video_dir}/{collection id}_{collection title}/episode_{index}.mp4`.
//! The title is sanitized into a single path component behind the collection
//! id, so two collections sharing a title never share a folder. The position
//! inside the collection keeps files of one collection apart.
//! In-flight transfers write to a sibling `.part` file that is renamed once
//! the stream has been fully written.

use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Extension of downloaded media
pub const MEDIA_EXTENSION: &str = "mp4";

/// Extension appended to in-flight transfers
pub const PARTIAL_EXTENSION: &str = "part";

const MAX_COMPONENT_LENGTH: usize = 255;

lazy_static! {
    static ref RESERVED_CHARS: Regex = Regex::new(r#"[<>:"/\\|?*]"#).unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Make a string safe to use as a single path component
///
/// Reserved characters and runs of whitespace become `_`. Leading and
/// trailing dots are dropped so the result can never be `.` or `..`.
pub fn sanitize_filename(name: &str) -> String {
    let replaced = RESERVED_CHARS.replace_all(name.trim(), "_");
    let replaced = WHITESPACE.replace_all(&replaced, "_");
    let trimmed = replaced.trim_matches('.');

    let result = truncate_component(trimmed, MAX_COMPONENT_LENGTH);
    if result.is_empty() {
        "untitled".to_string()
    } else {
        result
    }
}

/// Truncate to at most `max_bytes`, on a char boundary
pub fn truncate_component(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut index = max_bytes;
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    text[..index].to_string()
}

/// Directory holding every asset of a collection
pub fn collection_dir(video_dir: &Path, collection_id: i64, collection_title: &str) -> PathBuf {
    let component = format!("{}_{}", collection_id, sanitize_filename(collection_title));
    video_dir.join(truncate_component(&component, MAX_COMPONENT_LENGTH))
}

/// Final location of a downloaded asset
pub fn asset_file_path(
    video_dir: &Path,
    collection_id: i64,
    collection_title: &str,
    index_sequence: i64,
) -> PathBuf {
    collection_dir(video_dir, collection_id, collection_title)
        .join(format!("episode_{}.{}", index_sequence, MEDIA_EXTENSION))
}

/// Location of the in-flight transfer for `final_path`
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_EXTENSION);
    final_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("My Series: Part 1"), "My_Series__Part_1");
        assert_eq!(sanitize_filename("a/b\\c|d?e*f"), "a_b_c_d_e_f");
        assert_eq!(sanitize_filename("  spaced   out  "), "spaced_out");
        assert_eq!(sanitize_filename(".."), "untitled");
        assert_eq!(sanitize_filename(""), "untitled");
    }

    #[test]
    fn test_truncate_component_respects_char_boundary() {
        let text = "é".repeat(200);
        let truncated = truncate_component(&text, 255);
        assert!(truncated.len() <= 255);
        assert_eq!(truncated.len() % 2, 0);
    }

    #[test]
    fn test_asset_file_path_layout() {
        let path = asset_file_path(Path::new("/srv/video"), 4, "Love & War?", 12);
        assert_eq!(path, PathBuf::from("/srv/video/4_Love_&_War_/episode_12.mp4"));
    }

    #[test]
    fn test_same_title_collections_get_separate_dirs() {
        let first = asset_file_path(Path::new("/v"), 1, "Night Shift", 1);
        let second = asset_file_path(Path::new("/v"), 2, "Night Shift", 1);
        assert_ne!(first, second);
        assert_ne!(first.parent(), second.parent());
    }

    #[test]
    fn test_collection_dir_stays_one_component() {
        let dir = collection_dir(Path::new("/v"), 123456, &"x".repeat(300));
        let name = dir.file_name().unwrap().to_str().unwrap();
        assert!(name.len() <= MAX_COMPONENT_LENGTH);
        assert!(name.starts_with("123456_"));
    }

    #[test]
    fn test_partial_path_is_sibling() {
        let path = asset_file_path(Path::new("/v"), 9, "S", 1);
        assert_eq!(partial_path(&path), PathBuf::from("/v/9_S/episode_1.mp4.part"));
    }
}
