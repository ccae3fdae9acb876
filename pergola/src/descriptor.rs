//! Interface that callers needing dynamic service reflection resolve services through.
//! The transport itself never consumes it.

use crate::DescriptorError;
use prost_reflect::{DescriptorPool, ServiceDescriptor};
use std::{
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

/// A source of protobuf service descriptors.
pub trait DescriptorProvider: Send + Sync {
    /// Find a service by its fully-qualified name, e.g. `pkg.Echo`.
    fn find_service(&self, fully_qualified_name: &str)
        -> Result<ServiceDescriptor, DescriptorError>;

    /// Release the resources held by the provider.
    fn close(&self);
}

/// Serves descriptors from a serialized `FileDescriptorSet`, as produced by
/// `protoc --descriptor_set_out --include_imports`.
#[derive(Debug)]
pub struct FileDescriptorSetProvider {
    pool: DescriptorPool,
    closed: AtomicBool,
}

impl FileDescriptorSetProvider {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let pool = DescriptorPool::decode(bytes)?;
        tracing::debug!(services = pool.services().count(), "loaded descriptor set");

        Ok(Self {
            pool,
            closed: AtomicBool::new(false),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DescriptorError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| DescriptorError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }
}

impl DescriptorProvider for FileDescriptorSetProvider {
    fn find_service(
        &self,
        fully_qualified_name: &str,
    ) -> Result<ServiceDescriptor, DescriptorError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DescriptorError::Closed);
        }
        self.pool
            .get_service_by_name(fully_qualified_name)
            .ok_or_else(|| DescriptorError::ServiceNotFound(fully_qualified_name.to_string()))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
