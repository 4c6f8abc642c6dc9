//! Connected-component labeling of binary masks

use std::collections::VecDeque;

use crate::error::{invalid, Result};
use crate::volume::idx3d;

/// Voxel neighbourhood used to connect suprathreshold voxels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Connectivity {
    /// Shared faces
    #[default]
    Faces,
    /// Shared faces or edges
    Edges,
    /// Shared faces, edges or corners
    Corners,
}

impl Connectivity {
    pub fn from_neighbours(n: usize) -> Result<Self> {
        match n {
            6 => Ok(Connectivity::Faces),
            18 => Ok(Connectivity::Edges),
            26 => Ok(Connectivity::Corners),
            _ => Err(invalid(format!("connectivity must be 6, 18 or 26, got {}", n))),
        }
    }

    pub fn neighbours(self) -> usize {
        match self {
            Connectivity::Faces => 6,
            Connectivity::Edges => 18,
            Connectivity::Corners => 26,
        }
    }

    fn offsets(self) -> Vec<(isize, isize, isize)> {
        let mut out = Vec::with_capacity(self.neighbours());
        for dz in -1..=1isize {
            for dy in -1..=1isize {
                for dx in -1..=1isize {
                    let d = dx.abs() + dy.abs() + dz.abs();
                    let keep = match self {
                        Connectivity::Faces => d == 1,
                        Connectivity::Edges => d == 1 || d == 2,
                        Connectivity::Corners => d > 0,
                    };
                    if keep {
                        out.push((dx, dy, dz));
                    }
                }
            }
        }
        out
    }
}

/// Label the connected components of `mask`
///
/// Labels start at 1 and follow the scan order of each component's first
/// voxel; background is 0. Returns the label map and the voxel count of each
/// component (index `label - 1`).
pub fn label_components(
    mask: &[u8],
    nx: usize, ny: usize, nz: usize,
    connectivity: Connectivity,
) -> (Vec<u32>, Vec<usize>) {
    let mut labels = vec![0u32; mask.len()];
    let mut sizes = Vec::new();
    let offsets = connectivity.offsets();
    let mut queue: VecDeque<(usize, usize, usize)> = VecDeque::new();

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let seed = idx3d(i, j, k, nx, ny);
                if mask[seed] == 0 || labels[seed] != 0 {
                    continue;
                }
                let label = sizes.len() as u32 + 1;
                labels[seed] = label;
                queue.push_back((i, j, k));
                let mut size = 0usize;

                while let Some((x, y, z)) = queue.pop_front() {
                    size += 1;
                    for &(dx, dy, dz) in &offsets {
                        let nx_ = x as isize + dx;
                        let ny_ = y as isize + dy;
                        let nz_ = z as isize + dz;
                        if nx_ < 0 || ny_ < 0 || nz_ < 0 || nx_ >= nx as isize || ny_ >= ny as isize || nz_ >= nz as isize {
                            continue;
                        }
                        let ni = idx3d(nx_ as usize, ny_ as usize, nz_ as usize, nx, ny);
                        if mask[ni] != 0 && labels[ni] == 0 {
                            labels[ni] = label;
                            queue.push_back((nx_ as usize, ny_ as usize, nz_ as usize));
                        }
                    }
                }
                sizes.push(size);
            }
        }
    }
    (labels, sizes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_counts() {
        for n in [6, 18, 26] {
            let c = Connectivity::from_neighbours(n).unwrap();
            assert_eq!(c.offsets().len(), n);
        }
        assert!(Connectivity::from_neighbours(8).is_err());
    }

    #[test]
    fn test_diagonal_voxels_depend_on_connectivity() {
        let (nx, ny, nz) = (3, 3, 3);
        let mut mask = vec![0u8; 27];
        mask[idx3d(0, 0, 0, nx, ny)] = 1;
        mask[idx3d(1, 1, 0, nx, ny)] = 1;
        mask[idx3d(2, 2, 1, nx, ny)] = 1;

        let (_, sizes) = label_components(&mask, nx, ny, nz, Connectivity::Faces);
        assert_eq!(sizes, vec![1, 1, 1]);
        let (_, sizes) = label_components(&mask, nx, ny, nz, Connectivity::Edges);
        assert_eq!(sizes, vec![2, 1]);
        let (labels, sizes) = label_components(&mask, nx, ny, nz, Connectivity::Corners);
        assert_eq!(sizes, vec![3]);
        assert_eq!(labels[idx3d(2, 2, 1, nx, ny)], 1);
    }
}
