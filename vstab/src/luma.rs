//! # Grayscale planes used for tracking

/// Single-channel floating point image.
#[derive(Clone, Debug, PartialEq)]
pub struct Luma {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Luma {
    /// Wrap row-major samples.
    ///
    /// # Panics
    ///
    /// If `data` does not hold exactly `width * height` samples.
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), width * height);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Get sample at integer coordinates, clamped to the image edge.
    pub fn get(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.data[y * self.width + x]
    }

    /// Bilinearly sample the image at sub-pixel coordinates.
    ///
    /// Samples at integer coordinates return the stored value exactly.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let (fx, fy) = (x - x0, y - y0);
        let (x0, y0) = (x0 as isize, y0 as isize);

        let a = self.get(x0, y0);
        let b = self.get(x0 + 1, y0);
        let c = self.get(x0, y0 + 1);
        let d = self.get(x0 + 1, y0 + 1);

        let top = a + (b - a) * fx;
        let bottom = c + (d - c) * fx;
        top + (bottom - top) * fy
    }

    /// Central difference gradient at sub-pixel coordinates.
    pub fn gradient(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (self.sample(x + 1.0, y) - self.sample(x - 1.0, y)) * 0.5,
            (self.sample(x, y + 1.0) - self.sample(x, y - 1.0)) * 0.5,
        )
    }

    /// Halve the resolution with a 2x2 box filter.
    pub fn downsample(&self) -> Self {
        let width = std::cmp::max(self.width / 2, 1);
        let height = std::cmp::max(self.height / 2, 1);

        let mut data = Vec::with_capacity(width * height);

        for y in 0..height {
            for x in 0..width {
                let (sx, sy) = (2 * x as isize, 2 * y as isize);
                let sum = self.get(sx, sy)
                    + self.get(sx + 1, sy)
                    + self.get(sx, sy + 1)
                    + self.get(sx + 1, sy + 1);
                data.push(sum * 0.25);
            }
        }

        Self::from_vec(width, height, data)
    }

    /// Build an image pyramid, finest level first.
    ///
    /// Levels stop being added once either dimension would drop below `min_dim`.
    pub fn pyramid(self, levels: usize, min_dim: usize) -> Vec<Self> {
        let mut pyramid = vec![self];

        while pyramid.len() < levels {
            let last = &pyramid[pyramid.len() - 1];
            if last.width / 2 < min_dim || last.height / 2 < min_dim {
                break;
            }
            let next = last.downsample();
            pyramid.push(next);
        }

        pyramid
    }

    /// Spread the intensity histogram over the full `[0; 1]` range.
    pub fn equalize(&mut self) {
        const BINS: usize = 256;

        let bin = |v: f32| ((v.clamp(0.0, 1.0) * (BINS - 1) as f32).round() as usize);

        let mut histogram = [0usize; BINS];
        for &v in &self.data {
            histogram[bin(v)] += 1;
        }

        let mut cdf = [0usize; BINS];
        let mut acc = 0;
        for (c, h) in cdf.iter_mut().zip(histogram) {
            acc += h;
            *c = acc;
        }

        let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
        let total = self.data.len();

        // Flat image, nothing to spread.
        if total == cdf_min {
            return;
        }

        let scale = 1.0 / (total - cdf_min) as f32;

        for v in &mut self.data {
            *v = cdf[bin(*v)].saturating_sub(cdf_min) as f32 * scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize) -> Luma {
        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x + y * width) as f32))
            .collect();
        Luma::from_vec(width, height, data)
    }

    #[test]
    fn bilinear_sampling() {
        let img = ramp(4, 4);

        assert_eq!(img.sample(1.0, 2.0), 9.0);
        assert!((img.sample(1.5, 2.0) - 9.5).abs() < 1e-6);
        assert!((img.sample(1.0, 2.5) - 11.0).abs() < 1e-6);
        // Clamped outside the image
        assert_eq!(img.sample(-3.0, 0.0), 0.0);
        assert_eq!(img.sample(10.0, 3.0), 15.0);
    }

    #[test]
    fn gradient_of_ramp() {
        let img = ramp(8, 8);
        let (gx, gy) = img.gradient(3.0, 3.0);
        assert!((gx - 1.0).abs() < 1e-6);
        assert!((gy - 8.0).abs() < 1e-6);
    }

    #[test]
    fn pyramid_levels() {
        let img = ramp(64, 48);
        let pyramid = img.pyramid(5, 8);
        let dims = pyramid
            .iter()
            .map(|l| (l.width(), l.height()))
            .collect::<Vec<_>>();
        assert_eq!(dims, vec![(64, 48), (32, 24), (16, 12)]);
    }

    #[test]
    fn equalize_spreads_range() {
        let mut img = Luma::from_vec(4, 1, vec![0.4, 0.4, 0.5, 0.6]);
        img.equalize();
        let s = img.as_slice();
        assert_eq!(s[0], 0.0);
        assert_eq!(s[3], 1.0);
        assert!(s[2] > s[0] && s[2] < s[3]);
    }

    #[test]
    fn equalize_flat_is_noop() {
        let mut img = Luma::from_vec(3, 1, vec![0.3; 3]);
        img.equalize();
        assert_eq!(img.as_slice(), &[0.3; 3]);
    }
}
