use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityScales {
    pub min_zoom: u8,
    pub levels: u32,
    pub gamma: f64,
    pub scales: Vec<f64>,
}

impl DensityScales {
    pub fn fit(min_zoom: u8, maxima: &[Option<f64>], levels: u32, gamma: f64) -> Self {
        let points = maxima
            .iter()
            .enumerate()
            .filter_map(|(i, max)| max.filter(|m| *m > 0.0).map(|m| (i as f64, m)))
            .collect::<Vec<_>>();

        let scales = match points.as_slice() {
            [] => vec![1.0; maxima.len()],
            [(_, max)] => vec![max.max(1.0); maxima.len()],
            _ => {
                let points = points
                    .iter()
                    .map(|&(z, max)| (z, max.ln()))
                    .collect::<Vec<_>>();
                let n = points.len() as f64;
                let mean_z = points.iter().map(|(z, _)| z).sum::<f64>() / n;
                let mean_l = points.iter().map(|(_, l)| l).sum::<f64>() / n;
                let sxy: f64 = points.iter().map(|(z, l)| (z - mean_z) * (l - mean_l)).sum();
                let sxx: f64 = points.iter().map(|(z, _)| (z - mean_z).powi(2)).sum();
                let slope = sxy / sxx;
                let intercept = mean_l - slope * mean_z;
                (0..maxima.len())
                    .map(|i| (intercept + slope * i as f64).exp().max(1.0))
                    .collect()
            }
        };

        Self {
            min_zoom,
            levels,
            gamma,
            scales,
        }
    }

    pub fn scale(&self, zoom: u8) -> f64 {
        let index = zoom.saturating_sub(self.min_zoom) as usize;
        self.scales
            .get(index)
            .or(self.scales.last())
            .copied()
            .unwrap_or(1.0)
    }

    pub fn level(&self, count: i64, zoom: u8) -> u32 {
        if count <= 0 || self.levels == 0 {
            return 0;
        }
        let fraction = ((1.0 + count as f64).ln() / (1.0 + self.scale(zoom)).ln()).clamp(0.0, 1.0);
        let level = (self.levels as f64 * fraction.powf(1.0 / self.gamma)).floor() as u32;
        level.min(self.levels - 1)
    }

    pub fn representative_count(&self, level: u32, zoom: u8) -> i64 {
        let levels = self.levels.max(1) as f64;
        let fraction = ((level.min(self.levels.saturating_sub(1)) as f64 + 0.5) / levels).powf(self.gamma);
        let count = (fraction * (1.0 + self.scale(zoom)).ln()).exp() - 1.0;
        (count.round() as i64).max(1)
    }
}
