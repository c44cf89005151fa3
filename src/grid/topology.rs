// Base-grid topologies. Everything the grid graph and the router need to
// know about the tiling is behind this capability set, so the octilinear
// plane and the orthoradial disc share all algorithms.

use super::Penalties;

/// Port directions, clockwise from north: N, NE, E, SE, S, SW, W, NW.
pub const PORT_COUNT: usize = 8;

pub trait GridTopology: Send + Sync {
    fn width(&self) -> usize;
    fn height(&self) -> usize;

    /// Neighbouring cell in port direction `dir`, if inside the grid.
    fn neighbor(&self, x: usize, y: usize, dir: usize) -> Option<(usize, usize)>;

    /// Map-space position of a cell centre.
    fn position(&self, x: usize, y: usize) -> [f64; 2];

    /// Cell whose centre is nearest to a map-space position, if any is
    /// within `max_dist`.
    fn locate(&self, pos: [f64; 2], max_dist: f64) -> Option<(usize, usize)>;

    /// Whether a map-space position may be placed on this grid at all.
    fn admissible(&self, _pos: [f64; 2]) -> bool {
        true
    }

    /// Admissible lower bound on the routing cost between two cells.
    fn heuristic(&self, a: (usize, usize), b: (usize, usize), pens: &Penalties) -> f64;
}

/// The eight neighbour offsets, indexed like ports.
fn offset(dir: usize) -> (i64, i64) {
    // x: 0 for N/S, +1 for NE..SE, -1 for SW..NW
    let dx = match dir {
        0 | 4 => 0,
        1..=3 => 1,
        _ => -1,
    };
    let dy = match dir {
        2 | 6 => 0,
        3 | 4 | 5 => -1,
        _ => 1,
    };
    (dx, dy)
}

/// Bounded plane of square cells; edges run along the eight directions.
pub struct Octilinear {
    pub origin: [f64; 2],
    pub cell_size: f64,
    pub width: usize,
    pub height: usize,
}

impl Octilinear {
    pub fn covering(min: [f64; 2], max: [f64; 2], cell_size: f64) -> Octilinear {
        // One spare ring of cells around the bounding box.
        let origin = [min[0] - cell_size, min[1] - cell_size];
        let width = (((max[0] - min[0]) / cell_size).ceil() as usize) + 3;
        let height = (((max[1] - min[1]) / cell_size).ceil() as usize) + 3;
        Octilinear {
            origin,
            cell_size,
            width,
            height,
        }
    }
}

impl GridTopology for Octilinear {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn neighbor(&self, x: usize, y: usize, dir: usize) -> Option<(usize, usize)> {
        let (dx, dy) = offset(dir);
        let nx = x as i64 + dx;
        let ny = y as i64 + dy;
        if nx < 0 || ny < 0 || nx >= self.width as i64 || ny >= self.height as i64 {
            return None;
        }
        Some((nx as usize, ny as usize))
    }

    fn position(&self, x: usize, y: usize) -> [f64; 2] {
        [
            self.origin[0] + x as f64 * self.cell_size,
            self.origin[1] + y as f64 * self.cell_size,
        ]
    }

    fn locate(&self, pos: [f64; 2], max_dist: f64) -> Option<(usize, usize)> {
        let fx = (pos[0] - self.origin[0]) / self.cell_size;
        let fy = (pos[1] - self.origin[1]) / self.cell_size;
        let x = fx.round().max(0.0) as usize;
        let y = fy.round().max(0.0) as usize;
        if x >= self.width || y >= self.height {
            return None;
        }
        let c = self.position(x, y);
        let d = ((c[0] - pos[0]).powi(2) + (c[1] - pos[1]).powi(2)).sqrt();
        (d <= max_dist).then_some((x, y))
    }

    fn heuristic(&self, a: (usize, usize), b: (usize, usize), pens: &Penalties) -> f64 {
        if a == b {
            return 0.0;
        }
        let hops = (a.0.abs_diff(b.0)).max(a.1.abs_diff(b.1)) as f64;
        let edge_cost = hops
            * pens
                .vertical
                .min(pens.horizontal)
                .min(pens.diagonal);
        let hop_cost = (hops - 1.0) * (pens.p_45 - pens.p_135);
        edge_cost + hop_cost
    }
}

/// Disc of cells periodic in the angular coordinate and radial in the
/// other. Ring 0 sits one cell from the origin; the pole itself carries
/// no vertices.
pub struct Orthoradial {
    pub origin: [f64; 2],
    pub cell_size: f64,
    /// Angular cells per ring (the periodic coordinate).
    pub sectors: usize,
    /// Number of rings.
    pub rings: usize,
}

impl Orthoradial {
    pub fn covering(center: [f64; 2], max_radius: f64, cell_size: f64) -> Orthoradial {
        let rings = ((max_radius / cell_size).ceil() as usize).max(2) + 1;
        // Sector count chosen so mid-radius arc steps are about one cell.
        let mid_radius = cell_size * (rings as f64 / 2.0);
        let sectors = (((2.0 * std::f64::consts::PI * mid_radius) / cell_size).round() as usize)
            .max(8);
        Orthoradial {
            origin: center,
            cell_size,
            sectors,
            rings,
        }
    }

    fn radius(&self, y: usize) -> f64 {
        self.cell_size * (y as f64 + 1.0)
    }
}

impl GridTopology for Orthoradial {
    fn width(&self) -> usize {
        self.sectors
    }

    fn height(&self) -> usize {
        self.rings
    }

    fn neighbor(&self, x: usize, y: usize, dir: usize) -> Option<(usize, usize)> {
        let (dx, dy) = offset(dir);
        let ny = y as i64 + dy;
        if ny < 0 || ny >= self.rings as i64 {
            return None;
        }
        let nx = (x as i64 + dx).rem_euclid(self.sectors as i64);
        Some((nx as usize, ny as usize))
    }

    fn position(&self, x: usize, y: usize) -> [f64; 2] {
        let angle = 2.0 * std::f64::consts::PI * x as f64 / self.sectors as f64;
        let r = self.radius(y);
        [
            self.origin[0] + r * angle.cos(),
            self.origin[1] + r * angle.sin(),
        ]
    }

    fn locate(&self, pos: [f64; 2], max_dist: f64) -> Option<(usize, usize)> {
        let dx = pos[0] - self.origin[0];
        let dy = pos[1] - self.origin[1];
        let r = (dx * dx + dy * dy).sqrt();
        // Undefined near the pole: nothing within one cell of the origin.
        if r < self.cell_size / 2.0 {
            return None;
        }
        let y = ((r / self.cell_size) - 1.0).round().max(0.0) as usize;
        if y >= self.rings {
            return None;
        }
        let angle = dy.atan2(dx).rem_euclid(2.0 * std::f64::consts::PI);
        let x = ((angle / (2.0 * std::f64::consts::PI)) * self.sectors as f64).round() as usize
            % self.sectors;
        let c = self.position(x, y);
        let d = ((c[0] - pos[0]).powi(2) + (c[1] - pos[1]).powi(2)).sqrt();
        (d <= max_dist).then_some((x, y))
    }

    /// The pole is undefined territory: nothing may sit within one cell
    /// of the origin.
    fn admissible(&self, pos: [f64; 2]) -> bool {
        let dx = pos[0] - self.origin[0];
        let dy = pos[1] - self.origin[1];
        (dx * dx + dy * dy).sqrt() >= self.cell_size
    }

    fn heuristic(&self, a: (usize, usize), b: (usize, usize), pens: &Penalties) -> f64 {
        if a == b {
            return 0.0;
        }
        let raw = a.0.abs_diff(b.0);
        let angular = raw.min(self.sectors - raw);
        let hops = angular.max(a.1.abs_diff(b.1)) as f64;
        let edge_cost = hops
            * pens
                .vertical
                .min(pens.horizontal)
                .min(pens.diagonal);
        let hop_cost = (hops - 1.0) * (pens.p_45 - pens.p_135);
        edge_cost + hop_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pens() -> Penalties {
        Penalties::default()
    }

    #[test]
    fn octilinear_neighbors_are_bounded() {
        let topo = Octilinear {
            origin: [0.0, 0.0],
            cell_size: 10.0,
            width: 3,
            height: 3,
        };
        assert_eq!(topo.neighbor(1, 1, 0), Some((1, 2))); // N
        assert_eq!(topo.neighbor(1, 1, 2), Some((2, 1))); // E
        assert_eq!(topo.neighbor(1, 1, 4), Some((1, 0))); // S
        assert_eq!(topo.neighbor(1, 1, 6), Some((0, 1))); // W
        assert_eq!(topo.neighbor(0, 0, 5), None); // SW off-grid
        assert_eq!(topo.neighbor(2, 2, 1), None); // NE off-grid
    }

    #[test]
    fn octilinear_heuristic_is_admissible_for_straight_runs() {
        let topo = Octilinear {
            origin: [0.0, 0.0],
            cell_size: 10.0,
            width: 10,
            height: 10,
        };
        let p = pens();
        // Straight horizontal run of n hops costs n * horizontal +
        // (n-1) * c_0 through-node cost; the heuristic must not exceed it.
        let actual = 4.0 * p.horizontal + 3.0 * (p.p_45 - p.p_135);
        assert!(topo.heuristic((0, 0), (4, 0), &p) <= actual + 1e-9);
    }

    #[test]
    fn orthoradial_wraps_angularly() {
        let topo = Orthoradial {
            origin: [0.0, 0.0],
            cell_size: 10.0,
            sectors: 12,
            rings: 3,
        };
        assert_eq!(topo.neighbor(11, 1, 2), Some((0, 1)));
        assert_eq!(topo.neighbor(0, 1, 6), Some((11, 1)));
        assert_eq!(topo.neighbor(0, 0, 4), None); // inward from ring 0
    }

    #[test]
    fn orthoradial_rejects_the_pole() {
        let topo = Orthoradial {
            origin: [0.0, 0.0],
            cell_size: 10.0,
            sectors: 12,
            rings: 3,
        };
        assert!(topo.locate([1.0, 1.0], 100.0).is_none());
        assert!(topo.locate([10.0, 0.0], 10.0).is_some());
    }
}
