use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use petradb::{BufferPoolConfig, BufferPoolManager};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let config = BufferPoolConfig {
        pool_size,
        ..BufferPoolConfig::default()
    };
    create_test_buffer_pool_with_config(config)
}

// Create a buffer pool manager with full control over the configuration
#[allow(dead_code)]
pub fn create_test_buffer_pool_with_config(
    config: BufferPoolConfig,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(config, path)?);
    Ok((buffer_pool, file))
}

// Route library logging into test output; safe to call repeatedly
#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
