use anyhow::{Context, Result};
use object_store::{ObjectStore, aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory};
use std::sync::Arc;
use url::Url;

use crate::config::StorageConfig;

/// Create the object store holding the tree from storage configuration
pub fn create_object_store(storage_config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    create_object_store_from_dsn(&storage_config.dsn)
}

/// Create an object store from a DSN string
///
/// Supported schemes: `file:///path` (a leading `/.` is treated as relative
/// to the working directory), `memory://` and `s3://[key:secret@]host[:port]/bucket`.
pub fn create_object_store_from_dsn(dsn: &str) -> Result<Arc<dyn ObjectStore>> {
    let url = Url::parse(dsn).with_context(|| format!("Invalid storage DSN '{dsn}'"))?;

    match url.scheme() {
        "file" => {
            let root = local_root(&url)?;
            std::fs::create_dir_all(root)
                .with_context(|| format!("Failed to create storage directory {root}"))?;
            Ok(Arc::new(LocalFileSystem::new_with_prefix(root)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        "s3" => Ok(Arc::new(s3_builder(&url)?.build()?)),
        scheme => anyhow::bail!("Unsupported storage scheme: {scheme}. Supported: file, memory, s3"),
    }
}

fn local_root(url: &Url) -> Result<&str> {
    let path = url.path();
    if path.is_empty() || path == "/" {
        anyhow::bail!("File DSN must specify a path: file:///path/to/tree");
    }
    // file:///.data/tree is relative, file:///tmp/tree is absolute
    Ok(path.strip_prefix('/').filter(|p| p.starts_with('.')).unwrap_or(path))
}

fn s3_builder(url: &Url) -> Result<AmazonS3Builder> {
    let host = url.host_str().context("Missing S3 host in DSN")?;
    let bucket = url.path().trim_start_matches('/');
    if bucket.is_empty() {
        anyhow::bail!("S3 DSN must specify a bucket: s3://host/bucket");
    }

    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

    if !url.username().is_empty() {
        builder = builder
            .with_access_key_id(url.username())
            .with_secret_access_key(url.password().unwrap_or(""));
    }

    // Anything that is not AWS itself is an S3-compatible endpoint such as MinIO
    if !host.ends_with("amazonaws.com") {
        let endpoint = match url.port() {
            Some(443) => format!("https://{host}"),
            Some(port) => format!("http://{host}:{port}"),
            None => format!("http://{host}"),
        };
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false);
    }

    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_memory_object_store() {
        let object_store = create_object_store_from_dsn("memory://").unwrap();
        assert!(Arc::strong_count(&object_store) == 1);
    }

    #[test]
    fn test_create_filesystem_object_store() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dsn = format!("file://{}", temp_dir.path().display());

        let object_store = create_object_store_from_dsn(&dsn).unwrap();
        assert!(Arc::strong_count(&object_store) == 1);
    }

    #[test]
    fn test_create_object_store_from_config() {
        let storage_config = StorageConfig {
            dsn: "memory://".to_string(),
        };

        assert!(create_object_store(&storage_config).is_ok());
    }

    #[test]
    fn test_invalid_dsn() {
        let err = create_object_store_from_dsn("not-a-url").unwrap_err();
        assert!(err.to_string().contains("Invalid storage DSN"));
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = create_object_store_from_dsn("gcs://bucket/prefix").unwrap_err();
        assert!(err.to_string().contains("Unsupported storage scheme"));
    }

    #[test]
    fn test_file_dsn_without_path() {
        let err = create_object_store_from_dsn("file://").unwrap_err();
        assert!(err.to_string().contains("File DSN must specify a path"));
    }

    #[test]
    fn test_local_root_relative_and_absolute() {
        let relative = Url::parse("file:///.data/tree").unwrap();
        assert_eq!(local_root(&relative).unwrap(), ".data/tree");

        let absolute = Url::parse("file:///tmp/tree").unwrap();
        assert_eq!(local_root(&absolute).unwrap(), "/tmp/tree");
    }

    #[test]
    fn test_s3_dsn_parsing() {
        let aws = Url::parse("s3://mybucket.s3.amazonaws.com/prefix").unwrap();
        assert!(s3_builder(&aws).is_ok());

        let minio = Url::parse("s3://access:secret@localhost:9000/bucket").unwrap();
        assert!(s3_builder(&minio).is_ok());

        let no_bucket = Url::parse("s3://localhost:9000/").unwrap();
        let err = s3_builder(&no_bucket).unwrap_err();
        assert!(err.to_string().contains("must specify a bucket"));
    }
}
