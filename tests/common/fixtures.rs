//! Novel directory fixtures and configuration helpers

use condense_dispatch::{Config, CredentialConfig, DispatchConfig};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Table of contents saved unchanged by the listing heuristic
pub const TABLE_OF_CONTENTS: &str = "目录\n第一章 山门\n第二章 试炼\n第三章 下山\n第四章 重逢\n";

/// Text short enough to be saved unchanged
pub const SHORT_NOTE: &str = "作者的话：感谢阅读。";

/// Chapter body of roughly 1200 characters that starts with its own title
pub fn chapter_text(number: usize) -> String {
    let body = "少年背着行囊走下山道，回头望了一眼云雾中的山门，心中五味杂陈。".repeat(40);
    format!("第{number}章 {body}")
}

/// A temporary novel directory
pub struct NovelDir {
    /// Keeps the directory alive
    pub temp: TempDir,
    /// Input directory holding the chapters
    pub input: PathBuf,
    /// Output directory
    pub output: PathBuf,
}

impl NovelDir {
    /// Create `chapters` chapter files plus a table of contents, a short note and an empty file
    pub fn create(chapters: usize) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let input = temp.path().join("novel");
        std::fs::create_dir_all(&input).unwrap();

        for n in 1..=chapters {
            write(&input.join(format!("chapter_{n:03}.txt")), &chapter_text(n));
        }
        write(&input.join("000_toc.txt"), TABLE_OF_CONTENTS);
        write(&input.join("999_note.txt"), SHORT_NOTE);
        write(&input.join("998_blank.txt"), "");

        let output = input.join("novel_脱水");
        Self {
            temp,
            input,
            output,
        }
    }

    /// Path of the output written for `file_name`
    pub fn output_of(&self, file_name: &str) -> PathBuf {
        self.output.join(file_name)
    }

    /// Read the output written for `file_name`
    pub fn read_output(&self, file_name: &str) -> Option<String> {
        std::fs::read_to_string(self.output_of(file_name)).ok()
    }
}

fn write(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

/// Configuration with the given keys, pacing disabled
pub fn config_with_keys(keys: &[&str], error_threshold: u32) -> Config {
    Config {
        credentials: keys
            .iter()
            .map(|k| CredentialConfig::new(*k).with_rpm(10))
            .collect(),
        dispatch: DispatchConfig {
            error_threshold,
            pace_requests: false,
            ..DispatchConfig::default()
        },
        ..Config::default()
    }
}
