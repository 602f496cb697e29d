//! Broadcast legality for elementwise operators with an explicit `axis`.
//!
//! Unlike plain NumPy broadcasting (trailing alignment), the shorter shape is
//! placed into the longer one starting at `axis`. A negative axis counts from
//! the end of the longer shape.

/// Returns true when `shape_x` and `shape_y` may be combined elementwise
/// with the given `axis`. Never panics; every illegal input yields `false`.
#[must_use]
pub fn is_broadcastable(shape_x: &[i64], shape_y: &[i64], axis: i64) -> bool {
    aligned_dims(shape_x, shape_y, axis).is_some_and(|(x_dims, y_dims)| {
        x_dims
            .iter()
            .zip(&y_dims)
            .all(|(&x, &y)| x == y || x <= 1 || y <= 1)
    })
}

/// Maps a negative axis onto the position where the shorter shape starts.
/// Non-negative axes are returned unchanged.
#[must_use]
pub fn normalize_axis(rank_x: usize, rank_y: usize, axis: i64) -> i64 {
    if axis >= 0 {
        return axis;
    }
    let rank_gap = rank_x.abs_diff(rank_y);
    i64::try_from(rank_gap).map_or(axis, |gap| gap + axis + 1)
}

/// Output shape of the elementwise op, or `None` when the combination is
/// not broadcastable.
#[must_use]
pub fn broadcast_output_shape(shape_x: &[i64], shape_y: &[i64], axis: i64) -> Option<Vec<i64>> {
    if shape_x == shape_y {
        return Some(shape_x.to_vec());
    }
    let (x_dims, y_dims) = aligned_dims(shape_x, shape_y, axis)?;
    x_dims
        .iter()
        .zip(&y_dims)
        .map(|(&x, &y)| {
            if x == y || y == 1 {
                Some(x)
            } else if x == 1 {
                Some(y)
            } else if x <= 0 || y <= 0 {
                Some(x.min(y))
            } else {
                None
            }
        })
        .collect()
}

/// Both shapes expanded to the larger rank, or `None` when the axis rules
/// already reject the pair.
fn aligned_dims(shape_x: &[i64], shape_y: &[i64], axis: i64) -> Option<(Vec<i64>, Vec<i64>)> {
    if shape_x == shape_y {
        return Some((shape_x.to_vec(), shape_y.to_vec()));
    }

    let rank_x = shape_x.len();
    let rank_y = shape_y.len();
    let max_rank = rank_x.max(rank_y);
    let min_rank = rank_x.min(rank_y);
    let max_rank_i = i64::try_from(max_rank).ok()?;

    // Equal ranks only allow the default axis.
    if rank_x == rank_y && axis != -1 && axis != 0 {
        return None;
    }
    if axis < -max_rank_i || axis >= max_rank_i {
        return None;
    }

    let axis = normalize_axis(rank_x, rank_y, axis);
    if axis < 0 || axis >= max_rank_i {
        return None;
    }
    let start = usize::try_from(axis).ok()?;
    if start + min_rank > max_rank {
        return None;
    }

    let mut x_dims = vec![1_i64; max_rank];
    let mut y_dims = vec![1_i64; max_rank];
    if rank_x > rank_y {
        x_dims.copy_from_slice(shape_x);
        y_dims[start..start + rank_y].copy_from_slice(shape_y);
    } else {
        y_dims.copy_from_slice(shape_y);
        x_dims[start..start + rank_x].copy_from_slice(shape_x);
    }
    Some((x_dims, y_dims))
}

#[cfg(test)]
mod tests {
    use super::{broadcast_output_shape, is_broadcastable, normalize_axis};

    #[test]
    fn identical_shapes_ignore_axis() {
        assert!(is_broadcastable(&[2, 3], &[2, 3], 0));
        assert!(is_broadcastable(&[2, 3], &[2, 3], 17));
        assert!(is_broadcastable(&[], &[], -9));
    }

    #[test]
    fn shorter_shape_placed_at_axis() {
        assert!(is_broadcastable(&[2, 3, 4], &[3, 4], 1));
        assert!(is_broadcastable(&[2, 3, 4], &[2, 3], 0));
        assert!(is_broadcastable(&[3, 4], &[2, 3, 4], 1));
    }

    #[test]
    fn misaligned_axis_is_rejected() {
        assert!(!is_broadcastable(&[2, 3, 4], &[3, 4], 0));
        assert!(!is_broadcastable(&[2, 3, 4], &[3, 4], 2));
    }

    #[test]
    fn axis_outside_rank_is_rejected() {
        assert!(!is_broadcastable(&[5], &[5, 5], 5));
        assert!(!is_broadcastable(&[5], &[5, 5], -3));
    }

    #[test]
    fn equal_rank_requires_default_axis() {
        assert!(is_broadcastable(&[1, 3], &[4, 3], -1));
        assert!(is_broadcastable(&[1, 3], &[4, 3], 0));
        assert!(!is_broadcastable(&[1, 3], &[4, 3], 1));
        assert!(!is_broadcastable(&[2, 3], &[4, 3], 0));
    }

    #[test]
    fn negative_axis_counts_from_the_end() {
        assert_eq!(normalize_axis(3, 2, -1), 1);
        assert_eq!(normalize_axis(4, 1, -1), 3);
        assert_eq!(normalize_axis(2, 2, -1), 0);
        assert_eq!(normalize_axis(3, 1, 2), 2);
        assert!(is_broadcastable(&[2, 3, 4], &[3, 4], -1));
        assert!(is_broadcastable(&[2, 3, 4], &[4], -1));
        assert!(!is_broadcastable(&[2, 3, 4], &[3], -1));
    }

    #[test]
    fn ones_and_non_positive_dims_broadcast() {
        assert!(is_broadcastable(&[2, 1, 4], &[5, 1], 1));
        assert!(is_broadcastable(&[2, 0], &[2, 7], 0));
    }

    #[test]
    fn output_shape_takes_larger_partner() {
        assert_eq!(
            broadcast_output_shape(&[2, 3, 4], &[3, 4], 1),
            Some(vec![2, 3, 4])
        );
        assert_eq!(broadcast_output_shape(&[1, 3], &[4, 3], -1), Some(vec![4, 3]));
        assert_eq!(
            broadcast_output_shape(&[2, 1, 4], &[5], 1),
            Some(vec![2, 5, 4])
        );
        assert_eq!(broadcast_output_shape(&[2, 3, 4], &[3, 4], 0), None);
    }

    #[test]
    fn unit_dim_yields_to_empty_partner() {
        assert_eq!(broadcast_output_shape(&[2, 1], &[2, 0], 0), Some(vec![2, 0]));
        assert_eq!(broadcast_output_shape(&[2, 0], &[2, 1], 0), Some(vec![2, 0]));
        assert_eq!(broadcast_output_shape(&[3, 1], &[1, 1], 0), Some(vec![3, 1]));
    }
}
