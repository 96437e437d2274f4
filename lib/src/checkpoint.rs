//! Binary weights files for the encoder and decoder. A small versioned
//! format: a magic header, a layer count, then per layer its shape
//! followed by little-endian `f32` weights and biases.

use crate::{layers::Conv2d, Error};
use ndarray::{Array1, Array4};
use std::io::{Read, Write};

const WEIGHTS_MAGIC: u32 = 0x5f57_0001;

// Far above anything a real encoder/decoder checkpoint holds, but low
// enough that a corrupt header can't request an absurd allocation
const MAX_LAYERS: usize = 64;
const MAX_LAYER_ELEMS: usize = 1 << 24;

fn write_u32<W: Write>(w: &mut W, value: u32) -> std::io::Result<usize> {
    w.write_all(&value.to_le_bytes())?;
    Ok(4)
}

fn write_f32s<W: Write>(w: &mut W, values: impl Iterator<Item = f32>) -> std::io::Result<usize> {
    let mut written = 0;
    for v in values {
        w.write_all(&v.to_le_bytes())?;
        written += 4;
    }
    Ok(written)
}

fn read_u32<R: Read>(r: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f32s<R: Read>(r: &mut R, count: usize) -> std::io::Result<Vec<f32>> {
    let mut out = Vec::with_capacity(count);
    let mut buf = [0u8; 4];
    for _ in 0..count {
        r.read_exact(&mut buf)?;
        out.push(f32::from_le_bytes(buf));
    }
    Ok(out)
}

pub(crate) fn write_convs<W: Write>(w: &mut W, convs: &[Conv2d]) -> std::io::Result<usize> {
    let mut written = 0;
    written += write_u32(w, WEIGHTS_MAGIC)?;
    written += write_u32(w, convs.len() as u32)?;

    for conv in convs {
        let (cout, cin, kh, kw) = conv.weights.dim();
        for dim in [cout, cin, kh, kw] {
            written += write_u32(w, dim as u32)?;
        }
        written += write_f32s(w, conv.weights.iter().copied())?;
        written += write_f32s(w, conv.bias.iter().copied())?;
    }

    Ok(written)
}

pub(crate) fn read_convs<R: Read>(r: &mut R) -> Result<Vec<Conv2d>, Error> {
    let magic = read_u32(r)?;
    if magic >> 16 != WEIGHTS_MAGIC >> 16 {
        return Err(Error::Checkpoint("bad magic number".to_owned()));
    }
    let version = magic & 0x0000_ffff;
    if version != WEIGHTS_MAGIC & 0x0000_ffff {
        return Err(Error::Checkpoint(format!("unknown version {}", version)));
    }

    let count = read_u32(r)? as usize;
    if count > MAX_LAYERS {
        return Err(Error::Checkpoint(format!(
            "unreasonable layer count {}",
            count
        )));
    }

    let mut convs = Vec::with_capacity(count);
    for _ in 0..count {
        let cout = read_u32(r)? as usize;
        let cin = read_u32(r)? as usize;
        let kh = read_u32(r)? as usize;
        let kw = read_u32(r)? as usize;

        // the dimensions come from the file, so the element count must
        // be bounds checked before anything is allocated
        let elems = cout
            .checked_mul(cin)
            .and_then(|n| n.checked_mul(kh))
            .and_then(|n| n.checked_mul(kw))
            .filter(|&n| n <= MAX_LAYER_ELEMS)
            .ok_or_else(|| {
                Error::Checkpoint(format!(
                    "unreasonable layer shape {}x{}x{}x{}",
                    cout, cin, kh, kw
                ))
            })?;

        let weights = read_f32s(r, elems)?;
        let weights = Array4::from_shape_vec((cout, cin, kh, kw), weights)
            .map_err(|e| Error::Checkpoint(e.to_string()))?;
        let bias = Array1::from_vec(read_f32s(r, cout)?);

        convs.push(Conv2d::from_parts(weights, bias));
    }

    Ok(convs)
}

/// Rejects weights that don't match the network they are loaded into.
pub(crate) fn check_shapes(
    which: &str,
    convs: &[Conv2d],
    expected: &[(usize, usize)],
) -> Result<(), Error> {
    if convs.len() != expected.len() {
        return Err(Error::Checkpoint(format!(
            "{} expects {} layers, file has {}",
            which,
            expected.len(),
            convs.len()
        )));
    }

    for (i, (conv, &(cin, cout))) in convs.iter().zip(expected.iter()).enumerate() {
        if conv.in_channels() != cin || conv.out_channels() != cout {
            return Err(Error::Checkpoint(format!(
                "{} layer {} expects {}x{} channels, file has {}x{}",
                which,
                i,
                cin,
                cout,
                conv.in_channels(),
                conv.out_channels()
            )));
        }
    }

    Ok(())
}
