use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::{FaceDetector, ObjectDetector};
#[cfg(feature = "backend-tract")]
use super::backends::TractBackend;
use super::backends::{MotionBackend, StubBackend, StubFaceBackend};
use crate::config::OnnxModelConfig;

/// Builds a fresh object detector inside the worker that will own it.
pub type ObjectFactory = Arc<dyn Fn() -> Result<Box<dyn ObjectDetector>> + Send + Sync>;

/// Builds a fresh face detector inside the worker that will own it.
pub type FaceFactory = Arc<dyn Fn() -> Result<Box<dyn FaceDetector>> + Send + Sync>;

/// Model name to detector factory mapping.
///
/// Workers never share detector instances; each one calls the factory during its
/// own start-up.
#[derive(Clone)]
pub struct DetectorRegistry {
    models: HashMap<String, ObjectFactory>,
    faces: HashMap<String, FaceFactory>,
    default_face: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
            faces: HashMap::new(),
            default_face: None,
        }
    }

    /// Registry with the built-in `stub` and `motion` models and the `stub-face`
    /// face detector.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_model("stub", || Ok(Box::new(StubBackend::new())));
        registry.register_model("motion", || Ok(Box::new(MotionBackend::new())));
        registry.register_face("stub-face", || Ok(Box::new(StubFaceBackend::new())));
        registry
    }

    /// Built-ins plus the configured ONNX models. A configured name shadows a
    /// built-in of the same name.
    pub fn with_models(models: &BTreeMap<String, OnnxModelConfig>) -> Self {
        let mut registry = Self::with_builtins();
        for (name, model) in models {
            registry.register_onnx(name, model.clone());
        }
        registry
    }

    /// Register an ONNX model. The model file is loaded by each worker that
    /// uses it, so a bad path surfaces as that worker's start-up failure.
    #[cfg(feature = "backend-tract")]
    pub fn register_onnx(&mut self, name: &str, model: OnnxModelConfig) {
        log::info!("model {}: ONNX {}", name, model.path.display());
        self.register_model(name, move || {
            let backend = TractBackend::new(
                &model.path,
                &model.labels,
                model.input_width,
                model.input_height,
            )?
            .with_threshold(model.confidence);
            Ok(Box::new(backend))
        });
    }

    #[cfg(not(feature = "backend-tract"))]
    pub fn register_onnx(&mut self, name: &str, model: OnnxModelConfig) {
        log::warn!(
            "model {} ({}) needs the backend-tract feature; not registered",
            name,
            model.path.display()
        );
    }

    /// Register an object model. Re-registering a name replaces it.
    pub fn register_model<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn ObjectDetector>> + Send + Sync + 'static,
    {
        self.models.insert(name.to_string(), Arc::new(factory));
    }

    /// Register a face detector. The first registered one becomes the default.
    pub fn register_face<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn FaceDetector>> + Send + Sync + 'static,
    {
        if self.default_face.is_none() {
            self.default_face = Some(name.to_string());
        }
        self.faces.insert(name.to_string(), Arc::new(factory));
    }

    pub fn set_default_face(&mut self, name: &str) -> Result<()> {
        if !self.faces.contains_key(name) {
            return Err(anyhow!("face detector '{}' not registered", name));
        }
        self.default_face = Some(name.to_string());
        Ok(())
    }

    pub fn model_factory(&self, name: &str) -> Option<ObjectFactory> {
        self.models.get(name).cloned()
    }

    pub fn face_factory(&self) -> Option<FaceFactory> {
        self.default_face
            .as_ref()
            .and_then(|name| self.faces.get(name))
            .cloned()
    }

    /// Registered model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = DetectorRegistry::with_builtins();
        assert_eq!(registry.models(), vec!["motion", "stub"]);
        assert!(registry.model_factory("stub").is_some());
        assert!(registry.model_factory("yolov8n.pt").is_none());
        let face = registry.face_factory().expect("default face detector");
        assert_eq!(face().unwrap().name(), "stub-face");
    }

    #[test]
    fn factories_build_independent_instances() {
        let registry = DetectorRegistry::with_builtins();
        let factory = registry.model_factory("motion").unwrap();
        let a = factory().unwrap();
        let b = factory().unwrap();
        assert_eq!(a.name(), b.name());
    }

    fn yolo_config() -> BTreeMap<String, OnnxModelConfig> {
        let mut models = BTreeMap::new();
        models.insert(
            "yolov8n.pt".to_string(),
            OnnxModelConfig {
                path: "/nonexistent/yolov8n.onnx".into(),
                labels: "/nonexistent/coco.names".into(),
                input_width: 640,
                input_height: 640,
                confidence: 0.3,
            },
        );
        models
    }

    #[cfg(feature = "backend-tract")]
    #[test]
    fn configured_onnx_models_are_registered() {
        let registry = DetectorRegistry::with_models(&yolo_config());
        assert_eq!(registry.models(), vec!["motion", "stub", "yolov8n.pt"]);
        let factory = registry.model_factory("yolov8n.pt").expect("registered");
        // loading happens in the factory, so a missing file fails there
        assert!(factory().is_err());
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn onnx_models_need_tract_support() {
        let registry = DetectorRegistry::with_models(&yolo_config());
        assert_eq!(registry.models(), vec!["motion", "stub"]);
        assert!(registry.model_factory("yolov8n.pt").is_none());
    }

    #[test]
    fn default_face_must_exist() {
        let mut registry = DetectorRegistry::new();
        assert!(registry.face_factory().is_none());
        assert!(registry.set_default_face("missing").is_err());
    }
}
