use crate::util::splitmix64;

pub const DEFAULT_K: usize = 128;
pub const DEFAULT_SHRINK: f64 = 2.0 / 3.0;

#[derive(Debug, Clone)]
pub struct QuantileSketch<T> {
    compactors: Vec<Vec<T>>,
    k: usize,
    c: f64,
    size: usize,
    max_size: usize,
    count: u64,
    rng_state: u64,
}

impl<T: Ord + Copy> Default for QuantileSketch<T> {
    fn default() -> Self {
        Self::new(DEFAULT_K, DEFAULT_SHRINK)
    }
}

impl<T: Ord + Copy> QuantileSketch<T> {
    pub fn new(k: usize, c: f64) -> Self {
        Self::with_seed(k, c, 0x5851_F42D_4C95_7F2D)
    }

    pub fn with_seed(k: usize, c: f64, seed: u64) -> Self {
        let mut sketch = Self {
            compactors: Vec::new(),
            k: k.max(2),
            c: c.clamp(0.5, 1.0),
            size: 0,
            max_size: 0,
            count: 0,
            rng_state: seed,
        };
        sketch.grow();
        sketch
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn retained(&self) -> usize {
        self.size
    }

    pub fn height(&self) -> usize {
        self.compactors.len()
    }

    fn capacity(&self, h: usize) -> usize {
        let depth = self.compactors.len() - h - 1;
        (self.k as f64 * self.c.powi(depth as i32)).ceil() as usize + 1
    }

    fn grow(&mut self) {
        self.compactors.push(Vec::new());
        self.max_size = (0..self.compactors.len()).map(|h| self.capacity(h)).sum();
    }

    pub fn update(&mut self, value: T) {
        self.compactors[0].push(value);
        self.size += 1;
        self.count += 1;
        while self.size >= self.max_size {
            self.compact();
        }
    }

    fn coin(&mut self) -> bool {
        self.rng_state = self.rng_state.wrapping_add(1);
        splitmix64(self.rng_state) & 1 == 1
    }

    fn compact(&mut self) {
        let Some(h) = (0..self.compactors.len()).find(|&h| self.compactors[h].len() >= self.capacity(h))
        else {
            return;
        };
        if h + 1 >= self.compactors.len() {
            self.grow();
        }

        let odd = self.coin() as usize;
        let mut level = std::mem::take(&mut self.compactors[h]);
        level.sort_unstable();
        // An odd element out stays behind at its own level.
        let keep = level.len() % 2;
        let promoted = level[keep..]
            .chunks_exact(2)
            .map(|pair| pair[odd])
            .collect::<Vec<_>>();
        level.truncate(keep);

        self.compactors[h] = level;
        self.compactors[h + 1].extend(promoted);
        self.size = self.compactors.iter().map(Vec::len).sum();
    }

    pub fn merge(&mut self, other: &QuantileSketch<T>) {
        while self.compactors.len() < other.compactors.len() {
            self.grow();
        }
        for (h, level) in other.compactors.iter().enumerate() {
            self.compactors[h].extend_from_slice(level);
        }
        self.count += other.count;
        self.size = self.compactors.iter().map(Vec::len).sum();
        while self.size >= self.max_size {
            self.compact();
        }
    }

    pub fn cdf(&self) -> Vec<(T, f64)> {
        let mut weighted = self
            .compactors
            .iter()
            .enumerate()
            .flat_map(|(h, level)| level.iter().map(move |&v| (v, (1u64 << h) as f64)))
            .collect::<Vec<_>>();
        weighted.sort_by(|a, b| a.0.cmp(&b.0));

        let total: f64 = weighted.iter().map(|(_, w)| w).sum();
        let mut cumulative = 0.0;
        weighted
            .into_iter()
            .map(|(value, weight)| {
                cumulative += weight;
                (value, cumulative / total)
            })
            .collect()
    }

    pub fn quantile(&self, q: f64) -> Option<T> {
        let cdf = self.cdf();
        cdf.iter()
            .find(|(_, p)| *p >= q)
            .or(cdf.last())
            .map(|(value, _)| *value)
    }

    pub fn rank(&self, value: T) -> f64 {
        self.cdf()
            .iter()
            .take_while(|(v, _)| *v <= value)
            .last()
            .map_or(0.0, |(_, p)| *p)
    }
}
