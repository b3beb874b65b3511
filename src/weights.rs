//! Binary weight codec.
//!
//! A weight file is a little-endian stream: three `i32` version fields
//! (`major`, `minor`, `revision`), the `seen` counter as `i32`, then the
//! trainable tensors of every layer in construction order. Each layer writes its
//! own block through [`Layer::write_weights`](crate::layers::Layer::write_weights);
//! layers without parameters write nothing.
//!
//! Files whose `major` or `minor` exceeds 1000 come from the legacy writer that
//! stored dense weights transposed; they are transposed back while loading.

use crate::error::{NetError, Result};
use crate::layers::Layer;
use crate::network::Network;
use log::info;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

const MAJOR: i32 = 0;
const MINOR: i32 = 1;
const REVISION: i32 = 0;

/// How a layer should treat the block it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadFlags {
    /// Dense weights were stored `[inputs, outputs]` and must be transposed.
    pub transpose: bool,
    /// Apply normalization scales and rolling statistics.
    pub load_scales: bool,
}

impl Default for LoadFlags {
    fn default() -> Self {
        Self {
            transpose: false,
            load_scales: true,
        }
    }
}

pub(crate) fn write_floats(out: &mut dyn Write, values: &[f32]) -> io::Result<()> {
    for v in values {
        out.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

pub(crate) fn read_floats(input: &mut dyn Read, values: &mut [f32]) -> io::Result<()> {
    let mut bytes = [0u8; 4];
    for v in values.iter_mut() {
        input.read_exact(&mut bytes)?;
        *v = f32::from_le_bytes(bytes);
    }
    Ok(())
}

/// Read `values.len()` floats, storing them only when `apply` is set.
pub(crate) fn read_or_skip(input: &mut dyn Read, values: &mut [f32], apply: bool) -> io::Result<()> {
    if apply {
        read_floats(input, values)
    } else {
        let mut discarded = vec![0.0; values.len()];
        read_floats(input, &mut discarded)
    }
}

/// In-place transpose of a row-major `rows × cols` matrix.
pub(crate) fn transpose_matrix(values: &mut [f32], rows: usize, cols: usize) {
    let mut transposed = vec![0.0; rows * cols];
    for x in 0..rows {
        for y in 0..cols {
            transposed[y * rows + x] = values[x * cols + y];
        }
    }
    values.copy_from_slice(&transposed);
}

fn write_i32(out: &mut dyn Write, value: i32) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

fn read_i32(input: &mut dyn Read) -> io::Result<i32> {
    let mut bytes = [0u8; 4];
    input.read_exact(&mut bytes)?;
    Ok(i32::from_le_bytes(bytes))
}

/// Save every layer's tensors.
pub fn save(net: &Network, path: impl AsRef<Path>) -> Result<()> {
    save_upto(net, path, net.layer_count())
}

/// Save the tensors of layers `0..cutoff`.
///
/// # Example
///
/// ```ignore
/// use rust_neural_engine::weights;
///
/// weights::save_upto(&net, "backbone.weights", 4)?;
/// ```
pub fn save_upto(net: &Network, path: impl AsRef<Path>, cutoff: usize) -> Result<()> {
    let path = path.as_ref();
    info!("saving weights to {}", path.display());
    let file = File::create(path).map_err(|e| NetError::file(path, e))?;
    let mut out = BufWriter::new(file);
    write_snapshot(net, &mut out, cutoff).map_err(|e| NetError::file(path, e))
}

fn write_snapshot(net: &Network, out: &mut BufWriter<File>, cutoff: usize) -> io::Result<()> {
    let seen = i32::try_from(net.seen()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("seen counter {} does not fit the weight file header", net.seen()),
        )
    })?;
    write_i32(out, MAJOR)?;
    write_i32(out, MINOR)?;
    write_i32(out, REVISION)?;
    write_i32(out, seen)?;
    for layer in net.layers().iter().take(cutoff) {
        layer.write_weights(out)?;
    }
    out.flush()
}

/// Restore every layer's tensors.
pub fn load(net: &mut Network, path: impl AsRef<Path>) -> Result<()> {
    let count = net.layer_count();
    load_upto(net, path, 0, count)
}

/// Restore the tensors of layers `start..cutoff`.
///
/// The first block after the header goes to layer `start`, so a file saved
/// from a smaller network can seed the later layers of a larger one. Layers
/// flagged `dontload` take no block at all.
///
/// The network is left untouched unless the whole load succeeds.
///
/// # Errors
///
/// `File` when the file cannot be opened or ends before all requested blocks
/// were read.
pub fn load_upto(net: &mut Network, path: impl AsRef<Path>, start: usize, cutoff: usize) -> Result<()> {
    let path = path.as_ref();
    info!("loading weights from {}", path.display());
    let bytes = fs::read(path).map_err(|e| NetError::file(path, e))?;
    read_snapshot(net, &bytes, start, cutoff).map_err(|e| NetError::file(path, e))
}

fn read_snapshot(net: &mut Network, bytes: &[u8], start: usize, cutoff: usize) -> io::Result<()> {
    let mut input = bytes;
    let major = read_i32(&mut input)?;
    let minor = read_i32(&mut input)?;
    let _revision = read_i32(&mut input)?;
    let seen = read_i32(&mut input)?;
    let transpose = major > 1000 || minor > 1000;

    let end = cutoff.min(net.layer_count());
    let wanted = start.min(end)..end;
    let needed = block_bytes(&net.layers()[wanted.clone()])?;
    if input.len() < needed {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{} bytes of layer data, {needed} needed", input.len()),
        ));
    }

    for layer in net.layers_mut()[wanted].iter_mut() {
        let options = layer.options();
        if options.dontload {
            continue;
        }
        let flags = LoadFlags {
            transpose,
            load_scales: !options.dontloadscales,
        };
        layer.read_weights(&mut input, &flags)?;
    }
    net.set_seen(seen.max(0) as usize);
    info!("loaded weights, seen = {seen}");
    Ok(())
}

/// Bytes the given layers read from a weight file.
fn block_bytes(layers: &[Box<dyn Layer>]) -> io::Result<usize> {
    let mut counter = ByteCounter(0);
    for layer in layers.iter().filter(|l| !l.options().dontload) {
        layer.write_weights(&mut counter)?;
    }
    Ok(counter.0)
}

struct ByteCounter(usize);

impl Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_roundtrip_is_little_endian() {
        let mut bytes = Vec::new();
        write_floats(&mut bytes, &[1.0, -2.5]).unwrap();
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        let mut values = [0.0; 2];
        read_floats(&mut bytes.as_slice(), &mut values).unwrap();
        assert_eq!(values, [1.0, -2.5]);
    }

    #[test]
    fn test_skip_consumes_without_storing() {
        let mut bytes = Vec::new();
        write_floats(&mut bytes, &[1.0, 2.0, 3.0]).unwrap();
        let mut reader = bytes.as_slice();
        let mut values = [9.0; 2];
        read_or_skip(&mut reader, &mut values, false).unwrap();
        assert_eq!(values, [9.0, 9.0]);
        assert_eq!(reader.len(), 4);
    }

    #[test]
    fn test_byte_counter_matches_written_floats() {
        let mut counter = ByteCounter(0);
        write_floats(&mut counter, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(counter.0, 12);
    }

    #[test]
    fn test_truncated_read_fails() {
        let bytes = [0u8; 6];
        let mut values = [0.0; 2];
        let err = read_floats(&mut bytes.as_slice(), &mut values).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_transpose_matrix() {
        // 2 × 3 -> 3 × 2
        let mut values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        transpose_matrix(&mut values, 2, 3);
        assert_eq!(values, [1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }
}
