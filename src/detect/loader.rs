use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::config::ModelSettings;

use super::backend::DetectorBackend;
use super::backends::StubBackend;

/// A loaded detector shared between successive sessions.
///
/// Wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
/// Only the active session's worker locks it.
pub type SharedDetector = Arc<Mutex<Box<dyn DetectorBackend>>>;

type Factory = Box<dyn Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync>;

/// Lazy, memoized detector loader.
///
/// Model loading is the most expensive step in the pipeline, so the factory
/// runs at most once successfully per process; every later session reuses the
/// same instance. A failed load is not cached and is retried on the next call.
pub struct ModelLoader {
    factory: Factory,
    loaded: Mutex<Option<SharedDetector>>,
}

impl ModelLoader {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            loaded: Mutex::new(None),
        }
    }

    /// Loader that hands out an already-constructed backend on first use.
    pub fn from_backend<B: DetectorBackend + 'static>(backend: B) -> Self {
        let slot = Mutex::new(Some(backend));
        Self::new(move || {
            let backend = slot
                .lock()
                .map_err(|_| anyhow!("backend slot lock poisoned"))?
                .take()
                .ok_or_else(|| anyhow!("backend already handed out"))?;
            Ok(Box::new(backend) as Box<dyn DetectorBackend>)
        })
    }

    /// Build the loader described by the model settings.
    ///
    /// Without a model path the stub backend is used and frames pass through
    /// unannotated.
    pub fn from_settings(settings: &ModelSettings) -> Result<Self> {
        let Some(path) = settings.path.clone() else {
            log::warn!("no model configured; detections disabled (stub backend)");
            return Ok(Self::from_backend(StubBackend::new()));
        };
        #[cfg(feature = "backend-tract")]
        {
            let input_size = settings.input_size;
            let class_names = settings.class_names.clone();
            Ok(Self::new(move || {
                log::info!("loading detection model from {}", path.display());
                let backend =
                    super::backends::TractBackend::new(&path, input_size, class_names.clone())?;
                Ok(Box::new(backend) as Box<dyn DetectorBackend>)
            }))
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            Err(anyhow!(
                "model {} requires the backend-tract feature",
                path.display()
            ))
        }
    }

    /// Return the loaded detector, loading it first if needed.
    pub fn get_or_load(&self) -> Result<SharedDetector> {
        let mut loaded = self
            .loaded
            .lock()
            .map_err(|_| anyhow!("model loader lock poisoned"))?;
        if let Some(detector) = loaded.as_ref() {
            return Ok(detector.clone());
        }
        let mut backend = (self.factory)()?;
        backend.warm_up()?;
        log::info!("detector backend '{}' loaded", backend.name());
        let detector: SharedDetector = Arc::new(Mutex::new(backend));
        *loaded = Some(detector.clone());
        Ok(detector)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
            .lock()
            .map(|loaded| loaded.is_some())
            .unwrap_or(false)
    }
}
