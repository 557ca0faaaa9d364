//! Buffer ownership and the load → invoke → report pipeline.
//!
//! A [`Harness`] allocates every buffer once from a validated configuration
//! and keeps them for its lifetime. Each stage borrows what it needs:
//! [`Harness::load`] fills the store, images and references;
//! [`Harness::run`] lends them to the engine; [`Harness::report`] compares.

use tracing::{info, warn};

use crate::config::{ConformanceConfig, is_usable, validate_config};
use crate::engine::{DebugTap, InferRequest, InferenceEngine, ScratchBuffers, invoke};
use crate::error::{HarnessError, Result, Severity, Violation};
use crate::fixed::{Activation, Pixel};
use crate::loader::{LoadSummary, LoadTargets, load_tables};
use crate::report::{ConformanceReport, aggregate_error, sample_trace};
use crate::store::WeightStore;
use crate::tables::TableSet;
use crate::tensor::{BlockedTensor, DenseTensor};

#[derive(Debug)]
pub struct Harness {
    config: ConformanceConfig,
    warnings: Vec<Violation>,
    store: WeightStore,
    images: DenseTensor<Pixel>,
    outputs: Vec<BlockedTensor<Activation>>,
    references: Vec<BlockedTensor<Activation>>,
    scratch: ScratchBuffers,
    loaded: Option<LoadSummary>,
    engine: Option<String>,
}

impl Harness {
    /// Validate `config` and allocate every buffer.
    ///
    /// # Errors
    ///
    /// [`HarnessError::InvalidConfig`] if any violation is an error; warnings
    /// are logged and kept.
    pub fn new(config: ConformanceConfig) -> Result<Self> {
        let violations = validate_config(&config);
        if !is_usable(&violations) {
            return Err(HarnessError::InvalidConfig(violations));
        }
        for v in &violations {
            warn!(rule = %v.rule, "{}", v.message);
        }

        let m = &config.model;
        let n = config.harness.num_images;
        let [c, h, w] = m.image_shape();
        let layout = m.activation_layout();
        info!(
            feature_dim = m.feature_dim,
            block_size = m.feature_block_size,
            patches = m.num_patches,
            layers = m.num_layers,
            images = n,
            "allocating harness buffers"
        );
        Ok(Self {
            store: WeightStore::zeroed(m),
            images: DenseTensor::zeros(&[n, c, h, w]),
            outputs: vec![BlockedTensor::zeros(layout); n],
            references: vec![BlockedTensor::zeros(layout); n],
            scratch: ScratchBuffers::new(m),
            warnings: violations
                .into_iter()
                .filter(|v| v.severity != Severity::Error)
                .collect(),
            loaded: None,
            engine: None,
            config,
        })
    }

    pub fn config(&self) -> &ConformanceConfig {
        &self.config
    }

    pub fn warnings(&self) -> &[Violation] {
        &self.warnings
    }

    pub fn store(&self) -> &WeightStore {
        &self.store
    }

    pub fn images(&self) -> &DenseTensor<Pixel> {
        &self.images
    }

    pub fn outputs(&self) -> &[BlockedTensor<Activation>] {
        &self.outputs
    }

    pub fn references(&self) -> &[BlockedTensor<Activation>] {
        &self.references
    }

    /// Populate the store, images and references from `tables`.
    ///
    /// # Errors
    ///
    /// Any loader error; on error no buffer has been written.
    pub fn load(&mut self, tables: &TableSet) -> Result<&LoadSummary> {
        let h = &self.config.harness;
        let summary = load_tables(
            tables,
            &self.config.model,
            h.num_images,
            h.gate_task,
            LoadTargets {
                store: &mut self.store,
                images: &mut self.images,
                references: &mut self.references,
            },
        )?;
        self.engine = None;
        Ok(self.loaded.insert(summary))
    }

    /// One engine call over every image.
    ///
    /// # Errors
    ///
    /// [`HarnessError::NotLoaded`] before [`Harness::load`], otherwise any
    /// precondition or engine failure from [`invoke`].
    pub fn run(&mut self, engine: &mut dyn InferenceEngine) -> Result<()> {
        if self.loaded.is_none() {
            return Err(HarnessError::NotLoaded);
        }
        let h = &self.config.harness;
        invoke(
            engine,
            &self.config.model,
            InferRequest {
                num_images: h.num_images,
                reload_weights: h.reload_weights,
                images: &self.images,
                outputs: &mut self.outputs,
                scratch: &mut self.scratch,
                weights: &self.store,
                debug_tap: DebugTap(h.debug_tap),
            },
        )?;
        self.engine = Some(engine.name().to_string());
        Ok(())
    }

    /// Compare every output against its reference.
    ///
    /// # Errors
    ///
    /// [`HarnessError::NotLoaded`] before a load, [`HarnessError::Precondition`]
    /// before a run.
    pub fn report(&self) -> Result<ConformanceReport> {
        let Some(load) = &self.loaded else {
            return Err(HarnessError::NotLoaded);
        };
        let Some(engine) = &self.engine else {
            return Err(HarnessError::Precondition(
                "engine has not run since the last load".to_string(),
            ));
        };
        let h = &self.config.harness;
        let metrics = self
            .outputs
            .iter()
            .zip(&self.references)
            .map(|(out, reference)| aggregate_error(out, reference))
            .collect::<Result<Vec<_>>>()?;
        let trace = sample_trace(
            &self.outputs[0],
            &self.references[0],
            h.display_patch_limit,
            h.display_dim_limit,
        )?;
        let report = ConformanceReport::new(
            engine.clone(),
            h.mse_threshold,
            &metrics,
            load.clone(),
            trace,
        );
        for img in &report.images {
            info!(
                image = img.image,
                mse = img.metrics.mse,
                mae = img.metrics.mae,
                verdict = %img.verdict,
                "conformance"
            );
        }
        Ok(report)
    }

    /// `load`, `run` and `report` in one call.
    pub fn evaluate(
        &mut self,
        tables: &TableSet,
        engine: &mut dyn InferenceEngine,
    ) -> Result<ConformanceReport> {
        self.load(tables)?;
        self.run(engine)?;
        self.report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;

    struct Silent;

    impl InferenceEngine for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        fn infer(&mut self, _request: InferRequest<'_>) -> std::result::Result<(), EngineError> {
            Ok(())
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = ConformanceConfig::default();
        config.model.num_patches = 7;
        let err = Harness::new(config).unwrap_err();
        match err {
            HarnessError::InvalidConfig(v) => {
                assert!(v.iter().any(|x| x.rule == "CFG-003" && x.severity == Severity::Error));
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn run_before_load_is_not_loaded() {
        let mut h = Harness::new(ConformanceConfig::default()).unwrap();
        assert!(matches!(h.run(&mut Silent), Err(HarnessError::NotLoaded)));
        assert!(matches!(h.report(), Err(HarnessError::NotLoaded)));
    }

    #[test]
    fn buffers_follow_config() {
        let mut config = ConformanceConfig::default();
        config.harness.num_images = 2;
        config.harness.display_dim_limit = 500;
        let h = Harness::new(config).unwrap();
        assert_eq!(h.outputs().len(), 2);
        assert_eq!(h.references().len(), 2);
        assert_eq!(h.images().shape(), &[2, 3, 128, 256]);
        assert_eq!(h.warnings().len(), 1);
    }
}
