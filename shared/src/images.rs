//! Debug export of received image frames
//!
//! The file index lives in the exporter, so independent clients in one
//! process never share a counter.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const FILE_STEM: &str = "testImg";

pub struct DebugImageExporter {
    directory: PathBuf,
    extension: String,
    file_index: u64,
}

impl DebugImageExporter {
    pub fn new(directory: impl Into<PathBuf>, extension: &str) -> io::Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            extension: extension.trim_start_matches('.').to_string(),
            file_index: 0,
        })
    }

    /// Writes one file per image, then advances the index once.
    pub fn save(&mut self, images: &[Vec<u8>]) -> io::Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(images.len());
        for (variant_index, data) in images.iter().enumerate() {
            let path = self.path_for(variant_index);
            fs::write(&path, data)?;
            written.push(path);
        }
        self.file_index += 1;
        Ok(written)
    }

    pub fn file_index(&self) -> u64 {
        self.file_index
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, variant_index: usize) -> PathBuf {
        self.directory.join(format!(
            "{}{}_shader{}.{}",
            FILE_STEM, self.file_index, variant_index, self.extension
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_writes_one_file_per_variant() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = DebugImageExporter::new(dir.path(), "bmp").unwrap();

        let paths = exporter.save(&[vec![1, 2], vec![3]]).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("testImg0_shader0.bmp"));
        assert!(paths[1].ends_with("testImg0_shader1.bmp"));
        assert_eq!(fs::read(&paths[1]).unwrap(), vec![3]);
        assert_eq!(exporter.file_index(), 1);
    }

    #[test]
    fn test_exporters_keep_separate_counters() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = DebugImageExporter::new(dir.path().join("a"), ".bmp").unwrap();
        let mut b = DebugImageExporter::new(dir.path().join("b"), "bmp").unwrap();

        a.save(&[vec![0]]).unwrap();
        a.save(&[vec![0]]).unwrap();
        let paths = b.save(&[vec![0]]).unwrap();

        assert_eq!(a.file_index(), 2);
        assert_eq!(b.file_index(), 1);
        assert!(paths[0].ends_with("testImg0_shader0.bmp"));
    }
}
