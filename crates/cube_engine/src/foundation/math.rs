//! Math utilities and types
//!
//! Provides the 4x4 matrix kit the cube's uniform block is built from. The
//! operations follow the OpenGL ES utility-library conventions: a matrix
//! `m[i][j]` is stored at float index `i * 4 + j`, which is exactly the
//! column-major memory layout of [`Mat4`], so `m[i][j]` is `mat[(j, i)]`.

pub use nalgebra::{Matrix4, Rotation3, Unit, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Mathematical constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = PI / 180.0;
}

/// Math utility functions
pub mod utils {
    use super::constants;

    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees * constants::DEG_TO_RAD
    }
}

/// Column-major 4x4 float matrix with esUtil-style in-place operations
///
/// Every transform post-multiplies the current matrix, so a chain of calls
/// `translate` then `rotate` applies the rotation to the object first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EsMatrix(Mat4);

impl Default for EsMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl EsMatrix {
    /// The identity matrix
    pub fn identity() -> Self {
        Self(Mat4::identity())
    }

    /// Wrap an existing nalgebra matrix
    pub fn from_mat4(mat: Mat4) -> Self {
        Self(mat)
    }

    /// Underlying nalgebra matrix
    pub fn as_mat4(&self) -> &Mat4 {
        &self.0
    }

    /// Element `m[i][j]` in esUtil indexing (row of storage `i`, float `j`)
    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.0[(j, i)]
    }

    /// The sixteen floats in memory order
    pub fn as_array(&self) -> [f32; 16] {
        let mut out = [0.0; 16];
        out.copy_from_slice(self.0.as_slice());
        out
    }

    /// Post-multiply by a translation
    pub fn translate(&mut self, tx: f32, ty: f32, tz: f32) -> &mut Self {
        self.0 *= Mat4::new_translation(&Vec3::new(tx, ty, tz));
        self
    }

    /// Post-multiply by a rotation of `angle` degrees about `(x, y, z)`
    ///
    /// A zero-length axis leaves the matrix untouched. The rotation matrix
    /// built here is the transpose of the usual right-handed one, as in
    /// esUtil, so positive angles turn clockwise about the axis.
    pub fn rotate(&mut self, angle: f32, x: f32, y: f32, z: f32) -> &mut Self {
        let axis = Vec3::new(x, y, z);
        if axis.norm() > 0.0 {
            let rotation = Rotation3::from_axis_angle(
                &Unit::new_normalize(axis),
                -utils::deg_to_rad(angle),
            );
            self.0 *= rotation.to_homogeneous();
        }
        self
    }

    /// Post-multiply by a perspective frustum
    ///
    /// Degenerate bounds (non-positive near/far or empty extents) leave the
    /// matrix untouched.
    pub fn frustum(
        &mut self,
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near_z: f32,
        far_z: f32,
    ) -> &mut Self {
        let delta_x = right - left;
        let delta_y = top - bottom;
        let delta_z = far_z - near_z;

        if near_z <= 0.0 || far_z <= 0.0 || delta_x <= 0.0 || delta_y <= 0.0 || delta_z <= 0.0 {
            return self;
        }

        let mut frust = Mat4::zeros();
        frust[(0, 0)] = 2.0 * near_z / delta_x;
        frust[(1, 1)] = 2.0 * near_z / delta_y;
        frust[(0, 2)] = (right + left) / delta_x;
        frust[(1, 2)] = (top + bottom) / delta_y;
        frust[(2, 2)] = -(near_z + far_z) / delta_z;
        frust[(3, 2)] = -1.0;
        frust[(2, 3)] = -2.0 * near_z * far_z / delta_z;

        self.0 *= frust;
        self
    }

    /// esUtil product: `result[i][j] = sum_k a[i][k] * b[k][j]`
    ///
    /// In conventional notation this is `b * a`, so `multiply(modelview,
    /// projection)` yields the projection applied after the modelview.
    pub fn multiply(a: &Self, b: &Self) -> Self {
        Self(b.0 * a.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const EPSILON: f32 = 1e-5;

    fn sample() -> EsMatrix {
        let mut m = EsMatrix::identity();
        m.translate(1.0, -2.0, 3.5)
            .rotate(33.0, 0.3, 1.0, -0.2)
            .rotate(-71.0, 1.0, 0.0, 0.0);
        m
    }

    fn assert_matrix_eq(a: &EsMatrix, b: &EsMatrix) {
        assert_relative_eq!(a.as_mat4(), b.as_mat4(), epsilon = EPSILON);
    }

    #[test]
    fn test_identity_diagonal() {
        let m = EsMatrix::identity();
        for i in 0..4 {
            for j in 0..4 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_eq!(m.get(i, j), expected);
            }
        }
    }

    #[test]
    fn test_multiply_by_identity() {
        let m = sample();
        let id = EsMatrix::identity();
        assert_matrix_eq(&EsMatrix::multiply(&id, &m), &m);
        assert_matrix_eq(&EsMatrix::multiply(&m, &id), &m);
    }

    #[test]
    fn test_multiply_index_convention() {
        let mut a = EsMatrix::identity();
        a.translate(0.0, 0.0, -8.0).rotate(20.0, 0.0, 1.0, 0.0);
        let b = sample();
        let product = EsMatrix::multiply(&a, &b);
        for i in 0..4 {
            for j in 0..4 {
                let expected: f32 = (0..4).map(|k| a.get(i, k) * b.get(k, j)).sum();
                assert_relative_eq!(product.get(i, j), expected, epsilon = EPSILON);
            }
        }
    }

    #[test]
    fn test_zero_translate_is_noop() {
        let mut m = sample();
        let before = m;
        m.translate(0.0, 0.0, 0.0);
        assert_matrix_eq(&m, &before);
    }

    #[test]
    fn test_translate_updates_last_storage_row() {
        let mut m = EsMatrix::identity();
        m.translate(0.0, 0.0, -8.0);
        let values = m.as_array();
        assert_eq!(&values[12..16], &[0.0, 0.0, -8.0, 1.0]);
    }

    #[test]
    fn test_full_turn_is_identity() {
        for axis in [(1.0, 0.0, 0.0), (0.0, 1.0, 0.0), (0.0, 0.0, 1.0), (1.0, 2.0, 3.0)] {
            let mut m = EsMatrix::identity();
            m.rotate(360.0, axis.0, axis.1, axis.2);
            assert_matrix_eq(&m, &EsMatrix::identity());
        }
    }

    #[test]
    fn test_zero_axis_rotation_is_noop() {
        let mut m = sample();
        let before = m;
        m.rotate(45.0, 0.0, 0.0, 0.0);
        assert_matrix_eq(&m, &before);
    }

    #[test]
    fn test_rotate_matches_es_layout() {
        // 90 degrees about Z: storage row 0 becomes (0, -1, 0, 0)
        let mut m = EsMatrix::identity();
        m.rotate(90.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(m.get(0, 0), 0.0, epsilon = EPSILON);
        assert_relative_eq!(m.get(0, 1), -1.0, epsilon = EPSILON);
        assert_relative_eq!(m.get(1, 0), 1.0, epsilon = EPSILON);
        assert_relative_eq!(m.get(1, 1), 0.0, epsilon = EPSILON);
        assert_relative_eq!(m.get(2, 2), 1.0, epsilon = EPSILON);
    }

    #[test]
    fn test_frustum_shape() {
        let (l, r, b, t, n, f) = (-2.8, 2.8, -2.1, 2.1, 6.0, 10.0);
        let mut m = EsMatrix::identity();
        m.frustum(l, r, b, t, n, f);

        assert_eq!(m.get(3, 3), 0.0);
        assert_eq!(m.get(2, 3), -1.0);
        assert_relative_eq!(m.get(0, 0), 2.0 * n / (r - l), epsilon = EPSILON);
        assert_relative_eq!(m.get(1, 1), 2.0 * n / (t - b), epsilon = EPSILON);
        assert_relative_eq!(m.get(2, 0), (r + l) / (r - l), epsilon = EPSILON);
        assert_relative_eq!(m.get(2, 1), (t + b) / (t - b), epsilon = EPSILON);
        assert_relative_eq!(m.get(2, 2), -(f + n) / (f - n), epsilon = EPSILON);
        assert_relative_eq!(m.get(3, 2), -2.0 * f * n / (f - n), epsilon = EPSILON);
    }

    #[test]
    fn test_asymmetric_frustum_offsets() {
        let mut m = EsMatrix::identity();
        m.frustum(-1.0, 3.0, -2.0, 4.0, 1.0, 5.0);
        assert_relative_eq!(m.get(2, 0), 0.5, epsilon = EPSILON);
        assert_relative_eq!(m.get(2, 1), 1.0 / 3.0, epsilon = EPSILON);
    }

    #[test]
    fn test_degenerate_frustum_is_noop() {
        let mut m = EsMatrix::identity();
        m.frustum(1.0, 1.0, -1.0, 1.0, 1.0, 10.0);
        m.frustum(-1.0, 1.0, -1.0, 1.0, 0.0, 10.0);
        m.frustum(-1.0, 1.0, -1.0, 1.0, 10.0, 1.0);
        assert_matrix_eq(&m, &EsMatrix::identity());
    }
}
