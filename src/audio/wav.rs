//! WAV decoding, concatenation and encoding for episode audio.

use crate::error::{FeedcastError, Result};
use std::io::Cursor;

/// Mono 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl PcmAudio {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Encode as a 16-bit mono WAV file.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
        for &sample in &self.samples {
            writer.write_sample(sample).map_err(wav_error)?;
        }
        writer.finalize().map_err(wav_error)?;
        Ok(cursor.into_inner())
    }
}

fn wav_error(e: hound::Error) -> FeedcastError {
    FeedcastError::AudioFormat {
        message: e.to_string(),
    }
}

/// Decode WAV bytes to mono 16-bit PCM at the file's own rate.
///
/// Streaming encoders leave the RIFF and data sizes unset; those are
/// patched from the actual byte count before parsing.
pub fn decode(bytes: &[u8]) -> Result<PcmAudio> {
    let bytes = repair_header(bytes);
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| {
        FeedcastError::AudioFormat {
            message: format!("Failed to parse WAV data: {e}"),
        }
    })?;

    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(FeedcastError::AudioFormat {
            message: "WAV data declares zero channels".to_string(),
        });
    }

    let interleaved: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int if spec.bits_per_sample <= 16 => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v << (16 - spec.bits_per_sample)))
            .collect::<std::result::Result<_, _>>(),
        hound::SampleFormat::Int => {
            let shift = spec.bits_per_sample - 16;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<std::result::Result<_, _>>()
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<std::result::Result<_, _>>(),
    }
    .map_err(|e| FeedcastError::AudioFormat {
        message: format!("Failed to read WAV samples: {e}"),
    })?;

    Ok(PcmAudio {
        samples: downmix(&interleaved, spec.channels),
        sample_rate: spec.sample_rate,
    })
}

/// Average interleaved channels into one.
fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Fix RIFF and data chunk sizes that point past the end of the buffer.
fn repair_header(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    if out.len() < 12 || &out[0..4] != b"RIFF" || &out[8..12] != b"WAVE" {
        return out;
    }

    let riff_size = (out.len() - 8) as u32;
    let declared = u32::from_le_bytes([out[4], out[5], out[6], out[7]]);
    if declared as usize + 8 > out.len() {
        out[4..8].copy_from_slice(&riff_size.to_le_bytes());
    }

    let mut pos = 12;
    while pos + 8 <= out.len() {
        let id = [out[pos], out[pos + 1], out[pos + 2], out[pos + 3]];
        let size = u32::from_le_bytes([out[pos + 4], out[pos + 5], out[pos + 6], out[pos + 7]]) as usize;
        let body = pos + 8;
        if &id == b"data" {
            if body + size > out.len() {
                let actual = (out.len() - body) & !1;
                out[pos + 4..pos + 8].copy_from_slice(&(actual as u32).to_le_bytes());
                out.truncate(body + actual);
            }
            break;
        }
        pos = body + size + (size & 1);
    }
    out
}

/// Linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[samples.len() - 1]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

/// Join chunks in order with `gap_ms` of silence between them.
///
/// The output takes the first chunk's sample rate; later chunks are
/// resampled to match.
pub fn concat(chunks: &[PcmAudio], gap_ms: u32) -> Result<PcmAudio> {
    let Some(first) = chunks.first() else {
        return Err(FeedcastError::AudioFormat {
            message: "no audio chunks to concatenate".to_string(),
        });
    };
    let sample_rate = first.sample_rate;
    let gap = (sample_rate as u64 * gap_ms as u64 / 1000) as usize;

    let total: usize = chunks.iter().map(|c| c.samples.len()).sum::<usize>()
        + gap * chunks.len().saturating_sub(1);
    let mut samples = Vec::with_capacity(total);
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            samples.resize(samples.len() + gap, 0);
        }
        if chunk.sample_rate == sample_rate {
            samples.extend_from_slice(&chunk.samples);
        } else {
            samples.extend(resample(&chunk.samples, chunk.sample_rate, sample_rate));
        }
    }

    Ok(PcmAudio {
        samples,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn pcm(rate: u32, samples: Vec<i16>) -> PcmAudio {
        PcmAudio {
            samples,
            sample_rate: rate,
        }
    }

    #[test]
    fn decode_mono_matches_exactly() {
        let input = vec![100i16, 200, 300, 400, 500];
        let audio = decode(&make_wav_data(24000, 1, &input)).unwrap();
        assert_eq!(audio.samples, input);
        assert_eq!(audio.sample_rate, 24000);
    }

    #[test]
    fn decode_stereo_downmixes_to_mono() {
        let stereo = vec![100i16, 200, 300, 400, -500, 500];
        let audio = decode(&make_wav_data(16000, 2, &stereo)).unwrap();
        assert_eq!(audio.samples, vec![150i16, 350, 0]);
    }

    #[test]
    fn decode_streaming_header_with_unset_sizes() {
        let mut data = make_wav_data(24000, 1, &[1i16, 2, 3, 4]);
        data[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        let data_pos = data.windows(4).position(|w| w == b"data").unwrap();
        data[data_pos + 4..data_pos + 8].copy_from_slice(&u32::MAX.to_le_bytes());

        let audio = decode(&data).unwrap();
        assert_eq!(audio.samples, vec![1i16, 2, 3, 4]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(&[0u8; 100]).is_err());
        assert!(decode(b"RIFF\x00\x00").is_err());
        assert!(decode(&[]).is_err());
        match decode(b"XXXX\x00\x00\x00\x00WAVEfmt ") {
            Err(FeedcastError::AudioFormat { message }) => {
                assert!(message.contains("Failed to parse WAV"), "got: {message}");
            }
            other => panic!("Expected AudioFormat error, got {other:?}"),
        }
    }

    #[test]
    fn encode_then_decode_preserves_samples() {
        let audio = pcm(22050, vec![0, 1000, -1000, i16::MAX, i16::MIN]);
        let decoded = decode(&audio.to_wav_bytes().unwrap()).unwrap();
        assert_eq!(decoded, audio);
    }

    #[test]
    fn duration_from_rate() {
        assert_eq!(pcm(1000, vec![0; 1500]).duration_secs(), 1.5);
        assert_eq!(pcm(0, vec![0; 10]).duration_secs(), 0.0);
    }

    #[test]
    fn concat_inserts_silence_gap() {
        let joined = concat(&[pcm(1000, vec![1, 1]), pcm(1000, vec![2, 2])], 3).unwrap();
        assert_eq!(joined.samples, vec![1, 1, 0, 0, 0, 2, 2]);
        assert_eq!(joined.sample_rate, 1000);
    }

    #[test]
    fn concat_resamples_to_first_rate() {
        let joined = concat(&[pcm(8000, vec![5; 8]), pcm(16000, vec![7; 16])], 0).unwrap();
        assert_eq!(joined.sample_rate, 8000);
        assert_eq!(joined.samples.len(), 16);
        assert!(joined.samples[8..].iter().all(|&s| s == 7));
    }

    #[test]
    fn concat_of_nothing_is_an_error() {
        assert!(concat(&[], 500).is_err());
    }

    #[test]
    fn resample_upsample_interpolates() {
        let resampled = resample(&[0i16, 1000, 2000], 8000, 16000);
        assert_eq!(resampled.len(), 6);
        assert_eq!(resampled[0], 0);
        assert!(resampled[1] > 0 && resampled[1] < 1000);
        assert_eq!(resampled[2], 1000);
    }

    #[test]
    fn resample_handles_edge_cases() {
        assert!(resample(&[], 16000, 8000).is_empty());
        assert_eq!(resample(&[100i16], 16000, 8000), vec![100]);
        assert_eq!(resample(&[1i16, 2], 16000, 16000), vec![1, 2]);
    }
}
