//! Encode/decode between anchor-relative offsets and absolute boxes.

use crate::anchors::Anchor;

/// Maximum log-scale delta before `exp`, avoids overflow on untrained outputs.
pub const MAX_LOG_DELTA: f32 = 4.135_166_6; // ln(1000 / 16)

/// Center/size delta codec: `[dx, dy, dw, dh]` relative to an anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxCodec {
    /// Per-coordinate divisors applied on encode and multipliers on decode.
    pub weights: [f32; 4],
}

impl Default for BoxCodec {
    fn default() -> Self {
        Self {
            weights: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

impl BoxCodec {
    pub fn encode(&self, anchor: &Anchor, gt: [f32; 4]) -> [f32; 4] {
        let gw = (gt[2] - gt[0]).max(1e-3);
        let gh = (gt[3] - gt[1]).max(1e-3);
        let gcx = gt[0] + 0.5 * gw;
        let gcy = gt[1] + 0.5 * gh;
        [
            (gcx - anchor.cx) / anchor.w * self.weights[0],
            (gcy - anchor.cy) / anchor.h * self.weights[1],
            (gw / anchor.w).ln() * self.weights[2],
            (gh / anchor.h).ln() * self.weights[3],
        ]
    }

    pub fn decode(&self, anchor: &Anchor, deltas: [f32; 4]) -> [f32; 4] {
        let dx = deltas[0] / self.weights[0];
        let dy = deltas[1] / self.weights[1];
        let dw = (deltas[2] / self.weights[2]).min(MAX_LOG_DELTA);
        let dh = (deltas[3] / self.weights[3]).min(MAX_LOG_DELTA);

        let cx = dx * anchor.w + anchor.cx;
        let cy = dy * anchor.h + anchor.cy;
        let w = dw.exp() * anchor.w;
        let h = dh.exp() * anchor.h;
        [cx - 0.5 * w, cy - 0.5 * h, cx + 0.5 * w, cy + 0.5 * h]
    }
}
