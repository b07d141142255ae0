//! Face alignment via 4-DOF similarity transform.
//!
//! Warps detected faces to the canonical 112×112 crop using the five
//! InsightFace reference landmarks and least-squares estimation, so the
//! descriptor model always sees faces in the same pose.

use image::RgbImage;

/// InsightFace reference landmarks for a 112×112 aligned crop.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// A 4-DOF similarity transform (uniform scale, rotation, translation):
///
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    const IDENTITY: Similarity = Similarity { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    /// Least-squares estimate of the transform taking `src` points onto `dst`.
    ///
    /// Each point pair contributes two rows to an overdetermined system in
    /// [a, b, tx, ty]; the normal equations are solved directly.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Similarity {
        let mut ata = [0.0f32; 16]; // 4x4 row-major
        let mut atb = [0.0f32; 4];

        for i in 0..5 {
            let (sx, sy) = src[i];
            let (dx, dy) = dst[i];

            // sx*a - sy*b + tx = dx
            let r1 = [sx, -sy, 1.0, 0.0];
            // sy*a + sx*b + ty = dy
            let r2 = [sy, sx, 0.0, 1.0];

            for j in 0..4 {
                for k in 0..4 {
                    ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
                }
                atb[j] += r1[j] * dx + r2[j] * dy;
            }
        }

        match solve_4x4(&ata, &atb) {
            Some([a, b, tx, ty]) => Similarity { a, b, tx, ty },
            None => Similarity::IDENTITY, // degenerate landmarks
        }
    }

    /// Map an output-space point back to source-space by inverting the
    /// transform. The 2×2 part has determinant a² + b².
    fn apply_inverse(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return None;
        }
        let dx = x - self.tx;
        let dy = y - self.ty;
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
/// Returns `None` when the system is singular.
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> Option<[f32; 4]> {
    // Augmented matrix [A | b] as 4x5
    let mut m = [[0.0f32; 5]; 4];
    for (i, row) in m.iter_mut().enumerate() {
        row[..4].copy_from_slice(&ata[i * 4..i * 4 + 4]);
        row[4] = atb[i];
    }

    for col in 0..4 {
        let mut pivot_row = col;
        for row in (col + 1)..4 {
            if m[row][col].abs() > m[pivot_row][col].abs() {
                pivot_row = row;
            }
        }
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }
    Some(x)
}

/// Warp an RGB photo through the inverse transform into a square output.
///
/// Bilinear interpolation per channel; out-of-bounds samples are black.
fn warp_rgb(image: &RgbImage, transform: &Similarity, out_size: u32) -> RgbImage {
    let (src_w, src_h) = image.dimensions();
    let mut output = RgbImage::new(out_size, out_size);

    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < src_w as i64 && y >= 0 && y < src_h as i64 {
            image.get_pixel(x as u32, y as u32).0[c] as f32
        } else {
            0.0
        }
    };

    for oy in 0..out_size {
        for ox in 0..out_size {
            let Some((sx, sy)) = transform.apply_inverse(ox as f32, oy as f32) else {
                continue;
            };

            let x0 = sx.floor() as i64;
            let y0 = sy.floor() as i64;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let mut px = [0u8; 3];
            for (c, out) in px.iter_mut().enumerate() {
                let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1, c) * fx * fy;
                *out = val.round().clamp(0.0, 255.0) as u8;
            }
            output.put_pixel(ox, oy, image::Rgb(px));
        }
    }

    output
}

/// Align a detected face to the canonical 112×112 crop.
///
/// Estimates the similarity transform from the detected landmarks to the
/// reference positions and warps the photo accordingly.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112);
    warp_rgb(image, &transform, ALIGNED_SIZE)
}
