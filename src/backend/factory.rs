use std::sync::Arc;

use tracing::{error, info};

use super::error::BackendResult;
use super::{
    CacheBackend, DistributedMemoryBackend, FileBackend, ProcessLocalBackend, ProfileSink,
    Profiled, TagEmulation,
};
use crate::cache::error::{CacheError, CacheResult};
use crate::config::{BackendKind, Config};

/// Builds the backend chain selected by `config` and checks that it is reachable.
///
/// The file engine stores tags itself; the other two get [`TagEmulation`] on
/// top of the profiler so index reads and writes are counted as well.
/// An unreachable store is fatal here, unlike every later call.
pub async fn build_backend(
    config: &Config,
    sink: Arc<dyn ProfileSink>,
) -> CacheResult<Arc<dyn CacheBackend>> {
    config.validate()?;

    let backend = match open(config, sink).await {
        Ok(backend) => backend,
        Err(source) => {
            error!(backend = %config.backend, error = %source, "Cache backend unavailable");
            return Err(CacheError::BackendUnreachable {
                backend: config.backend,
                source,
            });
        }
    };

    if let Err(source) = backend.ping().await {
        error!(backend = %config.backend, error = %source, "Cache backend unreachable");
        return Err(CacheError::BackendUnreachable {
            backend: config.backend,
            source,
        });
    }

    info!(
        backend = backend.name(),
        capabilities = ?backend.capabilities(),
        "Cache backend ready"
    );
    Ok(backend)
}

async fn open(config: &Config, sink: Arc<dyn ProfileSink>) -> BackendResult<Arc<dyn CacheBackend>> {
    let backend: Arc<dyn CacheBackend> = match config.backend {
        BackendKind::File => Arc::new(Profiled::new(
            FileBackend::new(&config.cache_dir, config.directory_level),
            sink,
        )),
        BackendKind::DistributedMemory => {
            let engine = DistributedMemoryBackend::connect(
                &config.nodes,
                config.namespace.clone(),
                config.backend_timeout,
            )
            .await?;
            Arc::new(TagEmulation::new(Profiled::new(engine, sink)))
        }
        BackendKind::ProcessLocal => Arc::new(TagEmulation::new(Profiled::new(
            ProcessLocalBackend::new(config.local_capacity),
            sink,
        ))),
    };
    Ok(backend)
}
