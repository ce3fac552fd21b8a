//! `LocalFilePreparer`: a `FilePreparer` backed by the local
//! filesystem and `file://` URLs (§1's scoping: only a
//! local-filesystem-backed implementation of the remote verbs is
//! required to pass; S3/SSH are stubbed).

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StageError;
use crate::staging::{parse_ref, StagingVerb};
use crate::{FilePreparer, FixResult};

pub struct LocalFilePreparer {
    datadir: PathBuf,
}

impl LocalFilePreparer {
    pub fn new(datadir: impl Into<PathBuf>) -> Self {
        Self {
            datadir: datadir.into(),
        }
    }

    fn source_path(uri: &str) -> Result<PathBuf, StageError> {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        Ok(PathBuf::from(path))
    }

    fn dest_path(&self, source: &Path) -> Result<PathBuf, StageError> {
        let filename = source.file_name().ok_or_else(|| StageError::FilePrepareFailed {
            reference: source.display().to_string(),
            reason: "source path has no filename component".to_string(),
        })?;
        Ok(self.datadir.join(filename))
    }

    fn do_copy(&self, uri: &str) -> Result<PathBuf, StageError> {
        let source = Self::source_path(uri)?;
        fs::create_dir_all(&self.datadir).map_err(|e| StageError::Io {
            reference: uri.to_string(),
            source: e,
        })?;
        let dest = self.dest_path(&source)?;
        fs::copy(&source, &dest).map_err(|e| StageError::Io {
            reference: uri.to_string(),
            source: e,
        })?;
        Ok(dest)
    }

    fn do_unzip(&self, uri: &str) -> Result<Vec<PathBuf>, StageError> {
        let archive_path = self.do_copy(uri)?;
        let extract_dir = archive_path.with_extension("");
        fs::create_dir_all(&extract_dir).map_err(|e| StageError::Io {
            reference: uri.to_string(),
            source: e,
        })?;

        let file = fs::File::open(&archive_path).map_err(|e| StageError::Io {
            reference: uri.to_string(),
            source: e,
        })?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| StageError::FilePrepareFailed {
            reference: uri.to_string(),
            reason: format!("not a valid zip archive: {e}"),
        })?;

        let mut extracted = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(|e| StageError::FilePrepareFailed {
                reference: uri.to_string(),
                reason: format!("zip entry read failed: {e}"),
            })?;
            let Some(entry_name) = entry.enclosed_name() else {
                continue;
            };
            let out_path = extract_dir.join(entry_name);
            if entry.is_dir() {
                fs::create_dir_all(&out_path).map_err(|e| StageError::Io {
                    reference: uri.to_string(),
                    source: e,
                })?;
                continue;
            }
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent).map_err(|e| StageError::Io {
                    reference: uri.to_string(),
                    source: e,
                })?;
            }
            let mut out_file = fs::File::create(&out_path).map_err(|e| StageError::Io {
                reference: uri.to_string(),
                source: e,
            })?;
            std::io::copy(&mut entry, &mut out_file).map_err(|e| StageError::Io {
                reference: uri.to_string(),
                source: e,
            })?;
            extracted.push(out_path);
        }

        Ok(extracted)
    }

    fn do_mkdir(&self, uri: &str) -> Result<PathBuf, StageError> {
        let path = Self::source_path(uri)?;
        fs::create_dir_all(&path).map_err(|e| StageError::Io {
            reference: uri.to_string(),
            source: e,
        })?;
        Ok(path)
    }
}

impl FilePreparer for LocalFilePreparer {
    fn fix(&self, reference: &str) -> Result<FixResult, StageError> {
        let parsed = parse_ref(reference).ok_or_else(|| StageError::FilePrepareFailed {
            reference: reference.to_string(),
            reason: "not a recognized staging ref".to_string(),
        })?;

        let file_list = match parsed.verb {
            StagingVerb::Copy => vec![self.do_copy(&parsed.uri)?.display().to_string()],
            StagingVerb::Unzip => self
                .do_unzip(&parsed.uri)?
                .into_iter()
                .map(|p| p.display().to_string())
                .collect(),
            StagingVerb::Mkdir => vec![self.do_mkdir(&parsed.uri)?.display().to_string()],
        };

        Ok(FixResult { file_list })
    }

    fn write_s3(
        &self,
        _endpoint: &str,
        _bucket: &str,
        _local: &str,
        _remote: &str,
    ) -> Result<String, StageError> {
        Err(StageError::FilePrepareFailed {
            reference: "s3".to_string(),
            reason: "s3 transport not configured".to_string(),
        })
    }

    fn write_scp(&self, _local: &str, _host: &str, _path: &str) -> Result<String, StageError> {
        Err(StageError::FilePrepareFailed {
            reference: "scp".to_string(),
            reason: "ssh transport not configured".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn copy_fetches_file_to_datadir() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src_file = src_dir.path().join("foo.bin");
        fs::write(&src_file, b"hello").unwrap();

        let preparer = LocalFilePreparer::new(dst_dir.path());
        let result = preparer
            .fix(&format!("copy file://{}", src_file.display()))
            .unwrap();

        assert_eq!(result.file_list.len(), 1);
        let copied = PathBuf::from(&result.file_list[0]);
        assert_eq!(fs::read(&copied).unwrap(), b"hello");
    }

    #[test]
    fn mkdir_creates_directory() {
        let dst_dir = tempfile::tempdir().unwrap();
        let target = dst_dir.path().join("nested/dir");
        let preparer = LocalFilePreparer::new(dst_dir.path());

        let result = preparer
            .fix(&format!("mkdir file://{}", target.display()))
            .unwrap();

        assert_eq!(result.file_list, vec![target.display().to_string()]);
        assert!(target.is_dir());
    }

    #[test]
    fn unzip_expands_archive_entries() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let zip_path = src_dir.path().join("bundle.zip");

        {
            let file = fs::File::create(&zip_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("a.txt", options).unwrap();
            writer.write_all(b"first").unwrap();
            writer.start_file("b.txt", options).unwrap();
            writer.write_all(b"second").unwrap();
            writer.finish().unwrap();
        }

        let preparer = LocalFilePreparer::new(dst_dir.path());
        let result = preparer
            .fix(&format!("unzip file://{}", zip_path.display()))
            .unwrap();

        assert_eq!(result.file_list.len(), 2);
    }

    #[test]
    fn write_s3_is_a_stub() {
        let dst_dir = tempfile::tempdir().unwrap();
        let preparer = LocalFilePreparer::new(dst_dir.path());
        assert!(preparer.write_s3("", "bkt", "/tmp/x", "y").is_err());
    }
}
