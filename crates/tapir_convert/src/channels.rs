//! Channel Folding
//!
//! Collapses any 1..=8 channel interleaved stream to stereo.
//!
//! For more than two channels the fold is an equal-gain split by channel
//! parity: even-position channels (FL, C, SL, ...) average into the left
//! output, odd-position channels (FR, LFE, SR, ...) into the right. No
//! layout-specific weighting; the goal is never losing a channel, not a
//! reference downmix.

/// Fold interleaved samples from `channels` to stereo.
///
/// Input length must be a whole number of frames (validated upstream).
pub fn fold_to_stereo(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels as usize;
    match channels {
        1 => {
            let mut out = Vec::with_capacity(samples.len() * 2);
            for &s in samples {
                out.push(s);
                out.push(s);
            }
            out
        }
        2 => samples.to_vec(),
        _ => {
            let frames = samples.len() / channels;
            let left_count = channels.div_ceil(2) as f32;
            let right_count = (channels / 2) as f32;

            let mut out = Vec::with_capacity(frames * 2);
            for frame in samples.chunks_exact(channels) {
                let mut left = 0.0f32;
                let mut right = 0.0f32;
                for (ch, &s) in frame.iter().enumerate() {
                    if ch % 2 == 0 {
                        left += s;
                    } else {
                        right += s;
                    }
                }
                out.push((left / left_count).clamp(-1.0, 1.0));
                out.push((right / right_count).clamp(-1.0, 1.0));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_duplicates() {
        let out = fold_to_stereo(&[0.1, -0.2, 0.3], 1);
        assert_eq!(out, vec![0.1, 0.1, -0.2, -0.2, 0.3, 0.3]);
    }

    #[test]
    fn test_stereo_identity() {
        let input = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(fold_to_stereo(&input, 2), input);
    }

    #[test]
    fn test_five_one_fold() {
        // 5.1 frame: FL FR C LFE SL SR
        let frame = [0.6, 0.3, 0.3, 0.3, 0.6, 0.3];
        let out = fold_to_stereo(&frame, 6);
        assert_eq!(out.len(), 2);
        // L = (FL + C + SL) / 3, R = (FR + LFE + SR) / 3
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[1] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_fold_clips_to_unit_range() {
        // Three loud left-side channels summing past 1.0 after averaging
        let frame = [1.0, -1.0, 1.0, -1.0, 1.5, -1.5];
        let out = fold_to_stereo(&frame, 6);
        assert!(out[0] <= 1.0);
        assert!(out[1] >= -1.0);
    }

    #[test]
    fn test_odd_channel_count() {
        // 3 channels: L gets ch0 + ch2 over 2, R gets ch1 over 1
        let frame = [0.4, 0.7, 0.8];
        let out = fold_to_stereo(&frame, 3);
        assert!((out[0] - 0.6).abs() < 1e-6);
        assert!((out[1] - 0.7).abs() < 1e-6);
    }
}
