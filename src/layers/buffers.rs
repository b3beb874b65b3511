//! Step-major transient buffers.
//!
//! Every layer that owns activations holds one [`LayerBuffers`]: `output` and
//! `delta` of `steps * step_len` values each. Feed-forward layers use a single
//! step; recurrent composites address one time step at a time.

use std::ops::Range;

/// Borrowed view used by recurrent backward passes.
pub struct StepDeltas<'a> {
    /// Every step of the output.
    pub output: &'a [f32],
    pub previous: Option<&'a mut [f32]>,
    pub current: &'a mut [f32],
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerBuffers {
    pub output: Vec<f32>,
    pub delta: Vec<f32>,
    steps: usize,
    step_len: usize,
}

impl LayerBuffers {
    pub fn new(steps: usize, step_len: usize) -> Self {
        Self {
            output: vec![0.0; steps * step_len],
            delta: vec![0.0; steps * step_len],
            steps,
            step_len,
        }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn step_len(&self) -> usize {
        self.step_len
    }

    pub fn len(&self) -> usize {
        self.output.len()
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }

    /// Index range of step `t`.
    ///
    /// # Panics
    ///
    /// Panics when `t` is not a valid step.
    pub fn step_range(&self, t: usize) -> Range<usize> {
        assert!(
            t < self.steps,
            "step {t} out of range for {} steps",
            self.steps
        );
        t * self.step_len..(t + 1) * self.step_len
    }

    pub fn output_step(&self, t: usize) -> &[f32] {
        let range = self.step_range(t);
        &self.output[range]
    }

    pub fn output_step_mut(&mut self, t: usize) -> &mut [f32] {
        let range = self.step_range(t);
        &mut self.output[range]
    }

    pub fn delta_step(&self, t: usize) -> &[f32] {
        let range = self.step_range(t);
        &self.delta[range]
    }

    pub fn delta_step_mut(&mut self, t: usize) -> &mut [f32] {
        let range = self.step_range(t);
        &mut self.delta[range]
    }

    /// Whole output (read) and delta (write) at once.
    pub fn split(&mut self) -> (&[f32], &mut [f32]) {
        (&self.output, &mut self.delta)
    }

    /// Delta of step `t - 1` (when `t > 0`) and of step `t`, borrowed together
    /// with the whole output buffer.
    pub fn step_deltas_mut(&mut self, t: usize) -> StepDeltas<'_> {
        let range = self.step_range(t);
        let (head, tail) = self.delta.split_at_mut(range.start);
        let current = &mut tail[..self.step_len];
        let previous = if t > 0 {
            Some(&mut head[range.start - self.step_len..])
        } else {
            None
        };
        StepDeltas {
            output: &self.output,
            previous,
            current,
        }
    }

    pub fn clear_delta(&mut self) {
        self.delta.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_slices() {
        let mut buffers = LayerBuffers::new(3, 2);
        buffers.output_step_mut(1).copy_from_slice(&[1.0, 2.0]);
        assert_eq!(buffers.output, vec![0.0, 0.0, 1.0, 2.0, 0.0, 0.0]);
        assert_eq!(buffers.output_step(1), &[1.0, 2.0]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_step_out_of_range() {
        let buffers = LayerBuffers::new(2, 4);
        buffers.output_step(2);
    }

    #[test]
    fn test_step_deltas() {
        let mut buffers = LayerBuffers::new(3, 2);
        {
            let view = buffers.step_deltas_mut(0);
            assert!(view.previous.is_none());
            view.current.fill(1.0);
        }
        let view = buffers.step_deltas_mut(2);
        assert_eq!(view.output.len(), 6);
        let previous = view.previous.unwrap();
        assert_eq!(previous.len(), 2);
        previous.fill(2.0);
        view.current.fill(3.0);
        assert_eq!(buffers.delta, vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
    }
}
