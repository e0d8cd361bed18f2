//! Conversions between flat-batch `[batch * beam, ...]` and batch x beam
//! `[batch, beam, ...]` layouts.
//!
//! Row `i` of a flat layout is beam `i % beam` of batch element
//! `i / beam`. Every operation works on f32, f16 and u32 tensors alike.
//! Rank-0 tensors carry no batch dimension and pass through the
//! batch-structured transforms unchanged.

use sd_tensor::{Shape, Tensor};

use crate::error::{DecodeError, Result};

/// Inserts a beam axis after the batch axis and replicates every batch
/// element into it: `[batch, ...]` becomes `[batch, beam_size, ...]`.
pub fn add_beam_dim(x: &Tensor, beam_size: usize) -> Result<Tensor> {
    if x.shape().ndim() == 0 {
        return Ok(x.clone());
    }
    let batch = x.shape().dim(0);
    let repeated = x.repeat_rows(beam_size)?;
    let mut dims = Vec::with_capacity(x.shape().ndim() + 1);
    dims.push(batch);
    dims.push(beam_size);
    dims.extend_from_slice(&x.shape().dims()[1..]);
    Ok(repeated.reshape(Shape::new(dims))?)
}

/// Merges the batch and beam axes: `[batch, beam, ...]` becomes
/// `[batch * beam, ...]`.
pub fn flatten_beam_dim(x: &Tensor) -> Result<Tensor> {
    let merged = x.shape().merge_leading()?;
    Ok(x.reshape(merged)?)
}

/// Splits the leading axis: `[batch * beam, ...]` becomes
/// `[batch, beam, ...]`.
pub fn unflatten_beam_dim(x: &Tensor, batch_size: usize, beam_size: usize) -> Result<Tensor> {
    let rows = x.rows().unwrap_or(0);
    if rows != batch_size * beam_size {
        return Err(DecodeError::shape(
            "unflatten_beam_dim",
            &[batch_size * beam_size],
            &[rows],
        ));
    }
    let split = x.shape().split_leading(batch_size)?;
    Ok(x.reshape(split)?)
}

/// Repeats every batch row `beam_size` times contiguously:
/// `[batch, ...]` becomes `[batch * beam_size, ...]` with the copies of
/// each row adjacent.
pub fn flat_batch_beam_expand(x: &Tensor, beam_size: usize) -> Result<Tensor> {
    if x.shape().ndim() == 0 {
        return Ok(x.clone());
    }
    Ok(x.repeat_rows(beam_size)?)
}

/// Reorders beams within each batch element.
///
/// `x` is in flat layout with `old_beam_size` beams per batch element.
/// `beam_indices` holds `batch_size * new_beam_size` entries: entry
/// `b * new_beam_size + j` names the old beam copied into new beam `j` of
/// batch element `b`. The result has `batch_size * new_beam_size` rows.
pub fn gather_beams(
    x: &Tensor,
    beam_indices: &[usize],
    batch_size: usize,
    old_beam_size: usize,
    new_beam_size: usize,
) -> Result<Tensor> {
    if x.shape().ndim() == 0 {
        return Ok(x.clone());
    }
    let rows = x.shape().dim(0);
    if rows != batch_size * old_beam_size {
        return Err(DecodeError::shape(
            "gather_beams",
            &[batch_size * old_beam_size],
            &[rows],
        ));
    }
    if beam_indices.len() != batch_size * new_beam_size {
        return Err(DecodeError::shape(
            "gather_beams indices",
            &[batch_size * new_beam_size],
            &[beam_indices.len()],
        ));
    }
    let mut src = Vec::with_capacity(beam_indices.len());
    for (i, &beam) in beam_indices.iter().enumerate() {
        if beam >= old_beam_size {
            return Err(DecodeError::InvalidConfig(format!(
                "beam index {} out of range for {} beams",
                beam, old_beam_size
            )));
        }
        src.push((i / new_beam_size) * old_beam_size + beam);
    }
    Ok(x.gather_rows(&src)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Tensor {
        Tensor::from_u32(vec![0, 5, 1, 0, 0, 8, 6, 9], Shape::new(vec![2, 4]))
    }

    #[test]
    fn test_add_beam_dim() {
        let y = add_beam_dim(&rows(), 3).unwrap();
        assert_eq!(y.shape().dims(), &[2, 3, 4]);
        assert_eq!(
            y.data_u32().unwrap(),
            &[0, 5, 1, 0, 0, 5, 1, 0, 0, 5, 1, 0, 0, 8, 6, 9, 0, 8, 6, 9, 0, 8, 6, 9]
        );
    }

    #[test]
    fn test_flat_batch_beam_expand() {
        let y = flat_batch_beam_expand(&rows(), 2).unwrap();
        assert_eq!(y.shape().dims(), &[4, 4]);
        assert_eq!(
            y.data_u32().unwrap(),
            &[0, 5, 1, 0, 0, 5, 1, 0, 0, 8, 6, 9, 0, 8, 6, 9]
        );
    }

    #[test]
    fn test_flatten_and_unflatten() {
        let y = add_beam_dim(&rows(), 2).unwrap();
        let flat = flatten_beam_dim(&y).unwrap();
        assert_eq!(flat, flat_batch_beam_expand(&rows(), 2).unwrap());
        assert_eq!(unflatten_beam_dim(&flat, 2, 2).unwrap(), y);
        assert!(unflatten_beam_dim(&flat, 3, 2).is_err());
    }

    #[test]
    fn test_scalars_pass_through() {
        let s = Tensor::scalar(3.0);
        assert_eq!(add_beam_dim(&s, 4).unwrap(), s);
        assert_eq!(flat_batch_beam_expand(&s, 4).unwrap(), s);
        assert_eq!(gather_beams(&s, &[0], 1, 1, 1).unwrap(), s);
    }

    #[test]
    fn test_gather_beams() {
        // Two batch elements with three beams each; values identify rows.
        let x = Tensor::new(vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0], Shape::new(vec![6, 1]));
        let y = gather_beams(&x, &[2, 2, 0, 1], 2, 3, 2).unwrap();
        assert_eq!(y.data_f32().unwrap(), &[2.0, 2.0, 10.0, 11.0]);
    }

    #[test]
    fn test_gather_beams_rejects_bad_index() {
        let x = Tensor::new(vec![0.0, 1.0], Shape::new(vec![2]));
        assert!(gather_beams(&x, &[2, 0], 1, 2, 2).is_err());
        assert!(gather_beams(&x, &[0], 1, 2, 2).is_err());
    }
}
