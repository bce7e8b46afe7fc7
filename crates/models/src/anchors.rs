//! Anchor templates tiled over the P3..P7 feature levels.
//!
//! Anchor order is the contract shared by the heads, the target builder and the
//! detection filter: level, then row, then column, then template (ratio-major,
//! scale-minor).

/// Anchor geometry settings shared by every level.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorsConfig {
    /// Base anchor side per level, in input pixels.
    pub sizes: Vec<f32>,
    /// Feature stride per level.
    pub strides: Vec<usize>,
    /// Height / width ratios.
    pub ratios: Vec<f32>,
    /// Multipliers applied to the base size.
    pub scales: Vec<f32>,
}

impl Default for AnchorsConfig {
    fn default() -> Self {
        Self {
            sizes: vec![32.0, 64.0, 128.0, 256.0, 512.0],
            strides: vec![8, 16, 32, 64, 128],
            ratios: vec![0.5, 1.0, 2.0],
            scales: vec![1.0, 2f32.powf(1.0 / 3.0), 2f32.powf(2.0 / 3.0)],
        }
    }
}

impl AnchorsConfig {
    pub fn num_levels(&self) -> usize {
        self.strides.len()
    }

    /// Templates per spatial location.
    pub fn anchors_per_location(&self) -> usize {
        self.ratios.len() * self.scales.len()
    }

    /// Grid side of every level for a square input.
    pub fn grid_sizes(&self, input_size: usize) -> Vec<usize> {
        self.strides
            .iter()
            .map(|s| input_size.div_ceil(*s))
            .collect()
    }

    /// `(width, height)` of each template at `level`.
    fn templates(&self, level: usize) -> Vec<(f32, f32)> {
        let size = self.sizes[level];
        let mut out = Vec::with_capacity(self.anchors_per_location());
        for ratio in &self.ratios {
            let r = ratio.sqrt();
            for scale in &self.scales {
                out.push((size * scale / r, size * scale * r));
            }
        }
        out
    }
}

/// A fixed reference box in center form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub level: usize,
}

impl Anchor {
    pub fn to_xyxy(&self) -> [f32; 4] {
        [
            self.cx - 0.5 * self.w,
            self.cy - 0.5 * self.h,
            self.cx + 0.5 * self.w,
            self.cy + 0.5 * self.h,
        ]
    }
}

/// Immutable, ordered anchor set for one input resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Anchors {
    anchors: Vec<Anchor>,
    input_size: usize,
}

impl Anchors {
    pub fn generate(cfg: &AnchorsConfig, input_size: usize) -> Self {
        let mut anchors = Vec::new();
        for (level, grid) in cfg.grid_sizes(input_size).into_iter().enumerate() {
            let stride = cfg.strides[level] as f32;
            let templates = cfg.templates(level);
            for y in 0..grid {
                let cy = (y as f32 + 0.5) * stride;
                for x in 0..grid {
                    let cx = (x as f32 + 0.5) * stride;
                    for (w, h) in &templates {
                        anchors.push(Anchor {
                            cx,
                            cy,
                            w: *w,
                            h: *h,
                            level,
                        });
                    }
                }
            }
        }
        Self {
            anchors,
            input_size,
        }
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn as_slice(&self) -> &[Anchor] {
        &self.anchors
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Anchor> {
        self.anchors.iter()
    }
}
