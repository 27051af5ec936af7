use crate::error::{Error, Result};
use std::fmt;

/// Upper bound on the number of resource dimensions one planner tracks.
pub const MAX_RESOURCE_DIM: usize = 5;

/// A fixed-width vector of resource quantities, one slot per dimension.
///
/// Unused dimensions stay zero, which keeps [`veccmp`] well defined when
/// vectors of different logical lengths meet: the zero slots only lower the
/// accumulated slack and never flip the sign of the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceVector {
    dims: [i64; MAX_RESOURCE_DIM],
    len: usize,
}

impl ResourceVector {
    pub fn zero(len: usize) -> ResourceVector {
        ResourceVector { dims: [0; MAX_RESOURCE_DIM], len }
    }

    /// Builds a vector from unsigned quantities.
    ///
    /// Fails with `InvalidArgument` when more than [`MAX_RESOURCE_DIM`]
    /// dimensions are given and with `OutOfRange` when a quantity does not
    /// fit the signed accounting range.
    pub fn from_amounts(amounts: &[u64]) -> Result<ResourceVector> {
        if amounts.len() > MAX_RESOURCE_DIM {
            return Err(Error::invalid(format!("resource vector with {} dimensions exceeds the maximum of {}", amounts.len(), MAX_RESOURCE_DIM)));
        }
        let mut v = ResourceVector::zero(amounts.len());
        for (d, &amount) in amounts.iter().enumerate() {
            if amount > i64::MAX as u64 {
                return Err(Error::out_of_range(format!("resource quantity {} in dimension {} is not representable", amount, d)));
            }
            v.dims[d] = amount as i64;
        }
        Ok(v)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, d: usize) -> i64 {
        self.dims[d]
    }

    pub fn set(&mut self, d: usize, value: i64) {
        self.dims[d] = value;
    }

    /// Sum over all dimensions; used for the "zero total size" rejection.
    pub fn total(&self) -> i64 {
        self.dims.iter().sum()
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.dims[..self.len]
    }

    /// Adds `other` into this vector, dimension-wise.
    pub fn add(&mut self, other: &ResourceVector) {
        for d in 0..MAX_RESOURCE_DIM {
            self.dims[d] += other.dims[d];
        }
    }

    /// Subtracts `other` from this vector, dimension-wise.
    pub fn sub(&mut self, other: &ResourceVector) {
        for d in 0..MAX_RESOURCE_DIM {
            self.dims[d] -= other.dims[d];
        }
    }

    /// True when every dimension sits within `[0, bound[d]]`.
    pub fn within(&self, bound: &ResourceVector) -> bool {
        (0..MAX_RESOURCE_DIM).all(|d| self.dims[d] >= 0 && self.dims[d] <= bound.dims[d])
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (d, v) in self.as_slice().iter().enumerate() {
            if d > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "]")
    }
}

/// The planner's vector comparison rule.
///
/// Scans dimensions in order; the first dimension where `a` exceeds `b`
/// decides with a strictly positive result. Otherwise the accumulated slack
/// `sum(a[d] - b[d])` (non-positive) is returned. The induced total order
/// places dominated vectors below dominating ones and breaks ties by total
/// slack; the min-time index relies on exactly this rule.
pub fn veccmp(a: &ResourceVector, b: &ResourceVector) -> i64 {
    let mut less: i64 = 0;
    for d in 0..MAX_RESOURCE_DIM {
        let r = a.dims[d] - b.dims[d];
        if r > 0 {
            return r;
        }
        less += r;
    }
    less
}

/// [`veccmp`] mapped onto `Ordering` for tree descent. Ties are `Equal`;
/// callers insert equal keys to the right.
pub fn veccmp_order(a: &ResourceVector, b: &ResourceVector) -> std::cmp::Ordering {
    veccmp(a, b).cmp(&0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_first_exceeding_dimension() {
        let a = ResourceVector::from_amounts(&[4, 0]).unwrap();
        let b = ResourceVector::from_amounts(&[2, 9]).unwrap();
        assert_eq!(veccmp(&a, &b), 2);
    }

    #[test]
    fn accumulates_slack_when_dominated() {
        let a = ResourceVector::from_amounts(&[1, 2]).unwrap();
        let b = ResourceVector::from_amounts(&[3, 5]).unwrap();
        assert_eq!(veccmp(&a, &b), -5);
        assert_eq!(veccmp(&a, &a), 0);
    }

    #[test]
    fn rejects_oversized_vectors() {
        assert!(ResourceVector::from_amounts(&[1, 1, 1, 1, 1, 1]).is_err());
    }
}
