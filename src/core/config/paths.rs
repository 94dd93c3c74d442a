use std::env;
use std::fs;
use std::path::PathBuf;

/// Working-directory layout shared by the proxy and the tool server.
///
/// Everything lives under one data directory:
/// `uploads/` for persisted PDFs, `cache/` for per-document indices,
/// `logs/` for rolling log files.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let data_dir = discover_data_dir();
        Self::with_data_dir(data_dir)
    }

    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        let uploads_dir = data_dir.join("uploads");
        let cache_dir = data_dir.join("cache");
        let log_dir = data_dir.join("logs");

        for dir in [&data_dir, &uploads_dir, &cache_dir, &log_dir] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            data_dir,
            uploads_dir,
            cache_dir,
            log_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn discover_data_dir() -> PathBuf {
    if let Ok(dir) = env::var("PDFQA_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("output")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_layout_under_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::with_data_dir(tmp.path().join("work"));
        assert!(paths.uploads_dir.is_dir());
        assert!(paths.cache_dir.is_dir());
        assert!(paths.log_dir.is_dir());
    }
}
