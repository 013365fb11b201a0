use anyhow::{anyhow, bail, Result};

/// Joins synthesized chunks into one file of the given format.
pub fn merge_audio(format: &str, chunks: &[Vec<u8>]) -> Result<Vec<u8>> {
    match format {
        "wav" => merge_wav(chunks),
        _ => Ok(merge_binary(chunks)),
    }
}

/// Plain concatenation, fine for frame-based streams such as MP3.
pub fn merge_binary(chunks: &[Vec<u8>]) -> Vec<u8> {
    chunks.concat()
}

struct WavParts<'a> {
    fmt: &'a [u8],
    data: &'a [u8],
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32> {
    let raw = bytes
        .get(at..at + 4)
        .ok_or_else(|| anyhow!("Unexpected end of WAV data at byte {}", at))?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn wav_parts(bytes: &[u8]) -> Result<WavParts<'_>> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        bail!("Not a RIFF/WAVE file");
    }

    let mut fmt = None;
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = read_u32(bytes, pos + 4)? as usize;
        let body_start = pos + 8;
        // Streamed WAVs may report a data size past the end of the buffer.
        let body_end = (body_start + size).min(bytes.len());
        let body = &bytes[body_start..body_end];

        match id {
            b"fmt " => fmt = Some(body),
            b"data" => {
                let fmt = fmt.ok_or_else(|| anyhow!("data chunk before fmt chunk"))?;
                return Ok(WavParts { fmt, data: body });
            }
            _ => {}
        }
        // Chunks are word aligned
        pos = body_start + size + (size & 1);
    }
    Err(anyhow!("Missing data chunk"))
}

/// Rebuilds a single WAV from chunks that share the same `fmt` block.
pub fn merge_wav(chunks: &[Vec<u8>]) -> Result<Vec<u8>> {
    let Some(first) = chunks.first() else {
        return Ok(Vec::new());
    };
    let base = wav_parts(first)?;

    let mut data = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let parts = wav_parts(chunk).map_err(|e| anyhow!("WAV chunk {}: {}", i, e))?;
        if parts.fmt != base.fmt {
            bail!("WAV chunk {} uses a different sample format", i);
        }
        data.extend_from_slice(parts.data);
    }

    let riff_size = 4 + (8 + base.fmt.len()) + (8 + data.len());
    let mut out = Vec::with_capacity(8 + riff_size);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(riff_size as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&(base.fmt.len() as u32).to_le_bytes());
    out.extend_from_slice(base.fmt);
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&data);
    Ok(out)
}
