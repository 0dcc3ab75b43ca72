//! Capture frame slicing and sample-rate conversion.
//!
//! Microphones rarely run natively at the protocol rate, so capture data is
//! pushed through a `FrameSlicer`: an optional FFT resampler (engaged only
//! when the device rate differs from 24 kHz) followed by accumulation into
//! fixed-size frames. Frames come out in the exact order the samples went
//! in.

use rubato::{FftFixedIn, Resampler};

use crate::error::{ClientError, Result};

/// Input chunk size fed to the resampler.
const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// Slices an incoming mono sample stream into fixed-size frames at the
/// target rate.
pub struct FrameSlicer {
    resampler: Option<FftFixedIn<f32>>,
    chunk_in: usize,
    in_buf: Vec<f32>,
    frame_samples: usize,
    pending: Vec<f32>,
}

impl FrameSlicer {
    /// Create a slicer converting from `in_hz` to `out_hz`, emitting frames
    /// of `frame_samples` samples.
    pub fn new(in_hz: u32, out_hz: u32, frame_samples: usize) -> Result<Self> {
        if frame_samples == 0 {
            return Err(ClientError::Internal("frame size must be non-zero".to_string()));
        }

        let resampler = if in_hz != out_hz {
            Some(
                FftFixedIn::<f32>::new(in_hz as usize, out_hz as usize, RESAMPLER_CHUNK_SIZE, 1, 1)
                    .map_err(|e| ClientError::Internal(format!("resampler init failed: {e}")))?,
            )
        } else {
            None
        };

        Ok(Self {
            resampler,
            chunk_in: RESAMPLER_CHUNK_SIZE,
            in_buf: Vec::with_capacity(RESAMPLER_CHUNK_SIZE),
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        })
    }

    /// Push mono samples, emitting any completed frames.
    pub fn push(&mut self, mut src: &[f32], mut emit: impl FnMut(&[f32])) {
        if self.resampler.is_none() {
            self.emit_frames(src, &mut emit);
            return;
        }

        while !src.is_empty() {
            let space = self.chunk_in - self.in_buf.len();
            let take = space.min(src.len());
            self.in_buf.extend_from_slice(&src[..take]);
            src = &src[take..];

            if self.in_buf.len() == self.chunk_in {
                if let Some(out) = self.resample_in_buf() {
                    self.emit_frames(&out, &mut emit);
                }
                self.in_buf.clear();
            }
        }
    }

    /// Flush remaining samples, zero-padding the final frame.
    pub fn finish(&mut self, mut emit: impl FnMut(&[f32])) {
        if self.resampler.is_some() && !self.in_buf.is_empty() {
            self.in_buf.resize(self.chunk_in, 0.0);
            if let Some(out) = self.resample_in_buf() {
                self.emit_frames(&out, &mut emit);
            }
            self.in_buf.clear();
        }

        if !self.pending.is_empty() {
            self.pending.resize(self.frame_samples, 0.0);
            emit(&self.pending);
            self.pending.clear();
        }
    }

    /// Run the resampler over the filled input buffer.
    fn resample_in_buf(&mut self) -> Option<Vec<f32>> {
        let resampler = self.resampler.as_mut()?;
        match resampler.process(&[&self.in_buf[..]], None) {
            Ok(mut out) => Some(std::mem::take(&mut out[0])),
            Err(e) => {
                tracing::warn!("resampler error, dropping chunk: {e}");
                None
            }
        }
    }

    fn emit_frames(&mut self, mut data: &[f32], emit: &mut impl FnMut(&[f32])) {
        while !data.is_empty() {
            let space = self.frame_samples - self.pending.len();
            let take = space.min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() == self.frame_samples {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_frames(slicer: &mut FrameSlicer, input: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        slicer.push(input, |f| frames.push(f.to_vec()));
        frames
    }

    #[test]
    fn test_passthrough_slicing_preserves_order() {
        let mut slicer = FrameSlicer::new(24_000, 24_000, 4).unwrap();
        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let frames = collect_frames(&mut slicer, &input);

        assert_eq!(frames, vec![vec![0.0, 1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0, 7.0]]);
    }

    #[test]
    fn test_frames_span_multiple_pushes() {
        let mut slicer = FrameSlicer::new(24_000, 24_000, 4).unwrap();
        let mut frames = Vec::new();
        slicer.push(&[1.0, 2.0], |f| frames.push(f.to_vec()));
        assert!(frames.is_empty());
        slicer.push(&[3.0, 4.0, 5.0], |f| frames.push(f.to_vec()));
        assert_eq!(frames, vec![vec![1.0, 2.0, 3.0, 4.0]]);
    }

    #[test]
    fn test_finish_pads_final_frame() {
        let mut slicer = FrameSlicer::new(24_000, 24_000, 4).unwrap();
        let mut frames = Vec::new();
        slicer.push(&[1.0, 2.0, 3.0, 4.0, 5.0], |f| frames.push(f.to_vec()));
        slicer.finish(|f| frames.push(f.to_vec()));

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], vec![5.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_finish_on_empty_slicer_emits_nothing() {
        let mut slicer = FrameSlicer::new(24_000, 24_000, 4).unwrap();
        let mut count = 0;
        slicer.finish(|_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_downsampling_emits_frames() {
        // 48 kHz -> 24 kHz halves the sample count.
        let mut slicer = FrameSlicer::new(48_000, 24_000, 256).unwrap();
        let input: Vec<f32> = (0..8192).map(|i| ((i as f32) * 0.01).sin()).collect();
        let frames = collect_frames(&mut slicer, &input);

        assert!(!frames.is_empty());
        for frame in &frames {
            assert_eq!(frame.len(), 256);
            for s in frame {
                assert!(s.abs() <= 1.1, "resampled sample out of range: {s}");
            }
        }
    }

    #[test]
    fn test_rejects_zero_frame_size() {
        assert!(FrameSlicer::new(24_000, 24_000, 0).is_err());
    }
}
