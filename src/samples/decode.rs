// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{fs::File, io, path::Path};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::debug;

use super::SampleError;

/// A fully decoded, interleaved audio file at its native sample rate.
pub(super) struct DecodedAudio {
    pub samples: Vec<f32>,
    pub channel_count: u16,
    pub sample_rate: u32,
}

/// Reads the next packet. `Ok(None)` marks the end of the stream.
fn read_next_packet(format_reader: &mut dyn FormatReader) -> Result<Option<Packet>, SymphoniaError> {
    match format_reader.next_packet() {
        Ok(packet) => Ok(Some(packet)),
        Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Decodes the first audio track of the given file into interleaved f32 samples.
pub(super) fn decode_file(path: &Path) -> Result<DecodedAudio, SampleError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| SampleError::Unsupported(format!("no audio track in {}", path.display())))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channel_count = track
        .codec_params
        .channels
        .map(|channels| channels.count() as u16);
    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();
    loop {
        let packet = match read_next_packet(format_reader.as_mut()) {
            Ok(Some(packet)) => packet,
            Ok(None) => break,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(path = ?path, err = e, "Skipping undecodable packet.");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        if sample_rate.is_none() {
            sample_rate = Some(spec.rate);
        }
        if channel_count.is_none() {
            channel_count = Some(spec.channels.count() as u16);
        }

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    match (sample_rate, channel_count) {
        (Some(sample_rate), Some(channel_count)) if channel_count > 0 => Ok(DecodedAudio {
            samples,
            channel_count,
            sample_rate,
        }),
        _ => Err(SampleError::Unsupported(format!(
            "unknown stream parameters in {}",
            path.display()
        ))),
    }
}
