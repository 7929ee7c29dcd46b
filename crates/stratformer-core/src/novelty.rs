//! Trailing-average detector for opponents no known hypothesis explains.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const SAMPLE_TOLERANCE: f64 = 1e-9;

/// Flags novelty once the mean of the last `window_size` maximum-posterior
/// samples drops strictly below `threshold`.
///
/// A single high sample dilutes the mean but does not clear the window, so
/// the flag can flip back and forth as the window slides.
#[derive(Debug, Clone)]
pub struct NoveltyDetector {
    window_size: usize,
    threshold: f64,
    window: VecDeque<f64>,
}

impl NoveltyDetector {
    pub fn new(window_size: usize, threshold: f64) -> Result<Self> {
        if window_size == 0 {
            return Err(Error::parameter("window_size", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::parameter(
                "threshold",
                format!("must lie in [0, 1], got {threshold}"),
            ));
        }
        Ok(Self {
            window_size,
            threshold,
            window: VecDeque::with_capacity(window_size),
        })
    }

    /// Ingests one maximum-posterior sample and reports whether novelty is
    /// currently signalled. Always `false` until the window has filled.
    pub fn update(&mut self, max_posterior: f64) -> Result<bool> {
        let sample = validate_sample(max_posterior)?;
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(sample);

        if !self.is_full() {
            return Ok(false);
        }
        Ok(self.window_mean() < self.threshold)
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_full(&self) -> bool {
        self.window.len() == self.window_size
    }

    /// Samples currently held, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.window.iter().copied()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.window.is_empty() {
            None
        } else {
            Some(self.window_mean())
        }
    }

    pub fn checkpoint(&self) -> NoveltyCheckpoint {
        NoveltyCheckpoint {
            window_size: self.window_size,
            threshold: self.threshold,
            samples: self.window.iter().copied().collect(),
        }
    }

    pub fn restore(checkpoint: &NoveltyCheckpoint) -> Result<Self> {
        let mut detector = Self::new(checkpoint.window_size, checkpoint.threshold)?;
        if checkpoint.samples.len() > checkpoint.window_size {
            return Err(Error::parameter(
                "checkpoint",
                "more samples than the window holds",
            ));
        }
        for sample in &checkpoint.samples {
            detector.window.push_back(validate_sample(*sample)?);
        }
        Ok(detector)
    }

    fn window_mean(&self) -> f64 {
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }
}

fn validate_sample(value: f64) -> Result<f64> {
    if !value.is_finite() || value < -SAMPLE_TOLERANCE || value > 1.0 + SAMPLE_TOLERANCE {
        return Err(Error::parameter(
            "max_posterior",
            format!("sample {value} is outside [0, 1]"),
        ));
    }
    Ok(value.clamp(0.0, 1.0))
}

/// Window contents in arrival order, plus the detector parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoveltyCheckpoint {
    pub window_size: usize,
    pub threshold: f64,
    pub samples: Vec<f64>,
}
