//! Fixed-size feature vectors built from raw arena state.
//!
//! Positions are in arena units; an entity is `(x, y, value)`.

/// Written into squares of an egocentric grid that fall outside the arena.
pub const OUT_OF_BOUNDS: f32 = -1.0;

/// Padding used when fewer entities exist than feature slots.
pub const FILLER_VALUE: f32 = -1000.0;

/// Egocentric occupancy grid centred on the observing agent.
///
/// The grid covers `view_size` arena units per side at a resolution of
/// `grid_size` squares, stacked in `depth` channels laid out as
/// `[channel][x][y]`.
#[derive(Debug, Clone)]
pub struct GridFeatureExtractor {
    grid_size: usize,
    arena_size: f32,
    box_size: f32,
    depth: usize,
}

impl GridFeatureExtractor {
    pub fn new(view_size: usize, grid_size: usize, arena_size: usize, depth: usize) -> Self {
        let grid_size = grid_size.max(1);
        Self {
            grid_size,
            arena_size: arena_size as f32,
            box_size: view_size.max(1) as f32 / grid_size as f32,
            depth: depth.max(1),
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.depth, self.grid_size, self.grid_size]
    }

    pub fn size(&self) -> usize {
        self.depth * self.grid_size * self.grid_size
    }

    pub fn empty(&self) -> Vec<f32> {
        vec![0.0; self.size()]
    }

    fn index(&self, channel: usize, i: usize, j: usize) -> usize {
        (channel * self.grid_size + i) * self.grid_size + j
    }

    /// Accumulate entity values into the squares they fall in.
    pub fn add_entities<I>(&self, features: &mut [f32], channel: usize, loc: (f32, f32), entities: I)
    where
        I: IntoIterator<Item = (f32, f32, f32)>,
    {
        let half = (self.grid_size / 2) as i64;
        let n = self.grid_size as i64;
        for (x, y, value) in entities {
            let gx = ((x - loc.0) / self.box_size).trunc() as i64 + half;
            let gy = ((y - loc.1) / self.box_size).trunc() as i64 + half;
            if (0..n).contains(&gx) && (0..n).contains(&gy) {
                features[self.index(channel, gx as usize, gy as usize)] += value;
            }
        }
    }

    /// Overwrite squares that lie outside the arena with [`OUT_OF_BOUNDS`].
    pub fn add_out_of_bounds(&self, features: &mut [f32], channel: usize, loc: (f32, f32)) {
        let half = (self.grid_size / 2) as f32;
        for i in 0..self.grid_size {
            for j in 0..self.grid_size {
                let x = (i as f32 - half) * self.box_size + loc.0;
                let y = (j as f32 - half) * self.box_size + loc.1;
                let inside = (0.0..self.arena_size).contains(&x) && (0.0..self.arena_size).contains(&y);
                if !inside {
                    features[self.index(channel, i, j)] = OUT_OF_BOUNDS;
                }
            }
        }
    }
}

/// Nearest-entity feature vector.
///
/// Layout: the agent's own `(x, y, mass)`, then `num_pellet` pellet offsets
/// `(dx, dy)` ordered by distance (zero padded), then `num_other` other cells
/// `(dx, dy, mass)` ordered by distance (padded with [`FILLER_VALUE`]).
/// Positions and offsets are divided by the arena size.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    num_pellet: usize,
    num_other: usize,
    arena_size: f32,
}

impl FeatureExtractor {
    pub fn new(num_pellet: usize, num_other: usize, arena_size: usize) -> Self {
        Self {
            num_pellet,
            num_other,
            arena_size: (arena_size as f32).max(1.0),
        }
    }

    pub fn size(&self) -> usize {
        3 + 2 * self.num_pellet + 3 * self.num_other
    }

    pub fn extract(
        &self,
        agent: (f32, f32, f32),
        pellets: &[(f32, f32)],
        others: &[(f32, f32, f32)],
    ) -> Vec<f32> {
        let (x, y, mass) = agent;
        let scale = self.arena_size;
        let mut features = Vec::with_capacity(self.size());
        features.extend([x / scale, y / scale, mass]);

        let pellets = closest(pellets, (x, y), self.num_pellet, |p| (p.0, p.1));
        for slot in 0..self.num_pellet {
            match pellets.get(slot) {
                Some(p) => features.extend([(p.0 - x) / scale, (p.1 - y) / scale]),
                None => features.extend([0.0, 0.0]),
            }
        }

        let others = closest(others, (x, y), self.num_other, |o| (o.0, o.1));
        for slot in 0..self.num_other {
            match others.get(slot) {
                Some(o) => features.extend([(o.0 - x) / scale, (o.1 - y) / scale, o.2]),
                None => features.extend([FILLER_VALUE; 3]),
            }
        }
        features
    }
}

fn closest<T: Copy>(items: &[T], loc: (f32, f32), n: usize, pos: impl Fn(&T) -> (f32, f32)) -> Vec<T> {
    let distance = |item: &T| {
        let (x, y) = pos(item);
        (x - loc.0).powi(2) + (y - loc.1).powi(2)
    };
    let mut sorted = items.to_vec();
    sorted.sort_by(|a, b| distance(a).total_cmp(&distance(b)));
    sorted.truncate(n);
    sorted
}
