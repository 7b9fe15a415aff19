//! Fixpoint driver over every sub-plan of a plan.

use flowplan_core::config::OptimizerConfig;
use flowplan_core::plan::Plan;

use crate::attribute::{AttributeClassifier, KindClassifier};
use crate::editor::SubPlanEditor;
use crate::estimate::{SizeEstimator, UnknownSize};

/// What an [`PlanOptimizer::optimize`] run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptimizeReport {
    /// Passes run, including the final pass that changed nothing.
    pub passes: usize,
    /// Whether any pass changed the plan.
    pub changed: bool,
}

pub struct PlanOptimizer {
    config: OptimizerConfig,
    estimator: Box<dyn SizeEstimator>,
    classifier: Box<dyn AttributeClassifier>,
}

impl PlanOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            estimator: Box::new(UnknownSize),
            classifier: Box::new(KindClassifier),
        }
    }

    pub fn with_estimator(mut self, estimator: impl SizeEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    pub fn with_classifier(mut self, classifier: impl AttributeClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Rewrite `plan` in place until no enabled rule changes it.
    ///
    /// Each pass rebuilds one editor per sub-plan, runs every enabled rule in
    /// rule order over every editor, then revalidates every editor.
    ///
    /// # Panics
    /// If the fixpoint is not reached within `max_passes`, or if `verify` is
    /// set and the result violates a plan invariant.
    pub fn optimize(&self, plan: &mut Plan) -> OptimizeReport {
        let mut report = OptimizeReport::default();
        if self.config.rules.is_empty() {
            return report;
        }

        loop {
            assert!(
                report.passes < self.config.max_passes,
                "plan did not reach a fixpoint within {} passes",
                self.config.max_passes
            );
            report.passes += 1;

            let mut editors = Vec::new();
            for id in plan.sub_plan_ids() {
                editors.push(SubPlanEditor::new(plan, id, self.classifier.as_ref()));
            }

            let mut changed = false;
            for rule in &self.config.rules {
                for editor in &editors {
                    changed |= editor.apply(plan, *rule, self.estimator.as_ref());
                }
            }
            for editor in &mut editors {
                changed |= editor.revalidate(plan);
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(pass = report.passes, changed, "optimizer pass");

            if !changed {
                break;
            }
            report.changed = true;
        }

        if self.config.verify {
            if let Err(e) = plan.validate() {
                panic!("optimized plan is inconsistent: {e}");
            }
        }
        report
    }
}

impl Default for PlanOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}
