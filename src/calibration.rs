//! Camera model: intrinsic lens model with radial and tangential distortion
//! plus the extrinsic pose that maps the world (cm, z up) into the camera.

use crate::error::{Error, Result};
use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

/// Average head length in cm used to derive head sizes in pixels.
pub const HEAD_SIZE: f64 = 21.0;

/// Iteration cap of the inverse distortion solver.
pub const UNDISTORT_MAX_ITER: usize = 20;

/// Squared step size (normalized image units) at which the inverse
/// distortion solver is considered converged.
pub const UNDISTORT_EPS: f64 = 1e-20;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct IntrinsicParams {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub p1: f64,
    pub p2: f64,
}

impl Default for IntrinsicParams {
    fn default() -> Self {
        Self::pinhole(1000.0, 1000.0, 640.0, 360.0)
    }
}

impl IntrinsicParams {
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            k1: 0.0,
            k2: 0.0,
            k3: 0.0,
            p1: 0.0,
            p2: 0.0,
        }
    }

    #[inline]
    pub fn has_distortion(&self) -> bool {
        [self.k1, self.k2, self.k3, self.p1, self.p2]
            .iter()
            .any(|c| c.abs() > f64::EPSILON)
    }

    pub fn without_distortion(&self) -> Self {
        Self::pinhole(self.fx, self.fy, self.cx, self.cy)
    }

    #[inline]
    pub fn pixel_to_normalized(&self, p: &na::Point2<f64>) -> na::Point2<f64> {
        na::Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    #[inline]
    pub fn normalized_to_pixel(&self, p: &na::Point2<f64>) -> na::Point2<f64> {
        na::Point2::new(p.x * self.fx + self.cx, p.y * self.fy + self.cy)
    }

    #[inline]
    fn radial(&self, r2: f64) -> f64 {
        1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3))
    }

    #[inline]
    fn tangential(&self, x: f64, y: f64, r2: f64) -> (f64, f64) {
        (
            2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        )
    }

    pub fn distort_normalized(&self, p: &na::Point2<f64>) -> na::Point2<f64> {
        let r2 = p.x * p.x + p.y * p.y;
        let radial = self.radial(r2);
        let (dx, dy) = self.tangential(p.x, p.y, r2);

        na::Point2::new(p.x * radial + dx, p.y * radial + dy)
    }

    /// Inverse of [`distort_normalized`](Self::distort_normalized) by
    /// fixed-point iteration. When the iteration does not converge within
    /// [`UNDISTORT_MAX_ITER`] steps the iterate with the smallest residual
    /// is returned.
    pub fn undistort_normalized(&self, pd: &na::Point2<f64>) -> na::Point2<f64> {
        if !self.has_distortion() {
            return *pd;
        }

        let mut curr = *pd;
        let mut best = *pd;
        let mut best_err = f64::INFINITY;

        for _ in 0..UNDISTORT_MAX_ITER {
            let r2 = curr.x * curr.x + curr.y * curr.y;
            let radial = self.radial(r2);
            if radial.abs() < f64::EPSILON {
                break;
            }

            let (dx, dy) = self.tangential(curr.x, curr.y, r2);
            let next = na::Point2::new((pd.x - dx) / radial, (pd.y - dy) / radial);

            let err = na::distance_squared(&self.distort_normalized(&next), pd);
            if err < best_err {
                best_err = err;
                best = next;
            }

            let step = na::distance_squared(&next, &curr);
            curr = next;

            if step < UNDISTORT_EPS {
                break;
            }
        }

        best
    }

    #[inline]
    pub fn undistort_pixel(&self, p: &na::Point2<f64>) -> na::Point2<f64> {
        let n = self.undistort_normalized(&self.pixel_to_normalized(p));
        self.normalized_to_pixel(&n)
    }

    #[inline]
    pub fn distort_pixel(&self, p: &na::Point2<f64>) -> na::Point2<f64> {
        let n = self.distort_normalized(&self.pixel_to_normalized(p));
        self.normalized_to_pixel(&n)
    }
}

/// World to camera transform `Xc = R * Xw + t`, rotation as Rodrigues vector.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ExtrinsicParams {
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
}

impl ExtrinsicParams {
    pub fn from_rotation(rotation: &na::Rotation3<f64>, translation: &na::Vector3<f64>) -> Self {
        // via the quaternion, the matrix form loses the axis at half turns
        let axis = na::UnitQuaternion::from_rotation_matrix(rotation).scaled_axis();

        Self {
            rvec: [axis.x, axis.y, axis.z],
            tvec: [translation.x, translation.y, translation.z],
        }
    }

    /// Pose of a camera located at `center` (world cm) with the given rotation.
    pub fn from_center(rotation: &na::Rotation3<f64>, center: &na::Point3<f64>) -> Self {
        let t = -(rotation * center.coords);
        Self::from_rotation(rotation, &t)
    }

    #[inline]
    pub fn rotation(&self) -> na::Rotation3<f64> {
        na::Rotation3::from_scaled_axis(na::Vector3::from(self.rvec))
    }

    #[inline]
    pub fn translation(&self) -> na::Vector3<f64> {
        na::Vector3::from(self.tvec)
    }

    pub fn camera_center(&self) -> na::Point3<f64> {
        na::Point3::from(-(self.rotation().inverse() * self.translation()))
    }

    #[inline]
    pub fn to_camera(&self, p: &na::Point3<f64>) -> na::Point3<f64> {
        self.rotation() * p + self.translation()
    }

    /// Estimates the camera pose from world/image correspondences. Image
    /// points are raw (distorted) pixels. Coplanar world points (all with the
    /// same `z`) are solved via a plane homography and need at least 4 points,
    /// general configurations use a DLT and need at least 6.
    pub fn from_correspondences(
        world: &[na::Point3<f64>],
        image: &[na::Point2<f64>],
        intrinsic: &IntrinsicParams,
    ) -> Result<Self> {
        if world.len() != image.len() {
            return Err(Error::InvalidConfig(
                "world and image point lists differ in length".to_string(),
            ));
        }

        let normalized: Vec<_> = image
            .iter()
            .map(|p| intrinsic.undistort_normalized(&intrinsic.pixel_to_normalized(p)))
            .collect();

        let z0 = world.first().map(|p| p.z).unwrap_or(0.0);
        let planar = world.iter().all(|p| (p.z - z0).abs() < 1e-9);

        let (r, t) = if planar {
            pose_from_plane(world, &normalized, z0)?
        } else {
            pose_from_dlt(world, &normalized)?
        };

        let rotation = na::Rotation3::from_matrix_unchecked(r);
        let params = Self::from_rotation(&rotation, &t);
        debug!(
            "extrinsic calibration from {} points ({}): center {:?}",
            world.len(),
            if planar { "planar" } else { "dlt" },
            params.camera_center()
        );

        Ok(params)
    }
}

fn null_vector(a: na::DMatrix<f64>) -> Result<na::DVector<f64>> {
    let cols = a.ncols();
    let a = if a.nrows() < cols {
        a.resize_vertically(cols, 0.0)
    } else {
        a
    };

    let svd = a.svd(false, true);
    let vt = svd
        .v_t
        .ok_or_else(|| Error::Geometry("SVD failed while estimating the pose".to_string()))?;

    let (idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |acc, (i, &s)| if s < acc.1 { (i, s) } else { acc });

    Ok(vt.row(idx).transpose())
}

fn orthonormalize(m: &na::Matrix3<f64>) -> Result<(na::Matrix3<f64>, f64)> {
    let svd = m.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| Error::Geometry("SVD U missing".to_string()))?;
    let vt = svd
        .v_t
        .ok_or_else(|| Error::Geometry("SVD V^T missing".to_string()))?;
    let scale = svd.singular_values.sum() / 3.0;

    Ok((u * vt, scale))
}

fn pose_from_dlt(
    world: &[na::Point3<f64>],
    normalized: &[na::Point2<f64>],
) -> Result<(na::Matrix3<f64>, na::Vector3<f64>)> {
    if world.len() < 6 {
        return Err(Error::InvalidConfig(
            "extrinsic calibration needs at least 6 non-coplanar points".to_string(),
        ));
    }

    let mut a = na::DMatrix::<f64>::zeros(2 * world.len(), 12);
    for (i, (w, n)) in world.iter().zip(normalized).enumerate() {
        let (r0, r1) = (2 * i, 2 * i + 1);

        a[(r0, 0)] = w.x;
        a[(r0, 1)] = w.y;
        a[(r0, 2)] = w.z;
        a[(r0, 3)] = 1.0;
        a[(r0, 8)] = -n.x * w.x;
        a[(r0, 9)] = -n.x * w.y;
        a[(r0, 10)] = -n.x * w.z;
        a[(r0, 11)] = -n.x;

        a[(r1, 4)] = w.x;
        a[(r1, 5)] = w.y;
        a[(r1, 6)] = w.z;
        a[(r1, 7)] = 1.0;
        a[(r1, 8)] = -n.y * w.x;
        a[(r1, 9)] = -n.y * w.y;
        a[(r1, 10)] = -n.y * w.z;
        a[(r1, 11)] = -n.y;
    }

    let p = null_vector(a)?;
    let m = na::Matrix3::new(p[0], p[1], p[2], p[4], p[5], p[6], p[8], p[9], p[10]);
    let mut t = na::Vector3::new(p[3], p[7], p[11]);

    let (mut r, scale) = orthonormalize(&m)?;
    if scale.abs() < 1e-12 {
        return Err(Error::Geometry("degenerate DLT solution".to_string()));
    }
    t /= scale;

    if m.determinant() < 0.0 {
        r = -r;
        t = -t;
    }

    Ok((r, t))
}

fn pose_from_plane(
    world: &[na::Point3<f64>],
    normalized: &[na::Point2<f64>],
    z0: f64,
) -> Result<(na::Matrix3<f64>, na::Vector3<f64>)> {
    if world.len() < 4 {
        return Err(Error::InvalidConfig(
            "extrinsic calibration needs at least 4 coplanar points".to_string(),
        ));
    }

    let mut a = na::DMatrix::<f64>::zeros(2 * world.len(), 9);
    for (i, (w, n)) in world.iter().zip(normalized).enumerate() {
        let (r0, r1) = (2 * i, 2 * i + 1);

        a[(r0, 0)] = w.x;
        a[(r0, 1)] = w.y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -n.x * w.x;
        a[(r0, 7)] = -n.x * w.y;
        a[(r0, 8)] = -n.x;

        a[(r1, 3)] = w.x;
        a[(r1, 4)] = w.y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -n.y * w.x;
        a[(r1, 7)] = -n.y * w.y;
        a[(r1, 8)] = -n.y;
    }

    let h = null_vector(a)?;
    let h = na::Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let (h1, h2, h3) = (h.column(0).into_owned(), h.column(1).into_owned(), h.column(2).into_owned());
    let norm = 0.5 * (h1.norm() + h2.norm());
    if norm < 1e-12 {
        return Err(Error::Geometry("degenerate plane homography".to_string()));
    }

    // the plane must lie in front of the camera
    let sign = if h3.z < 0.0 { -1.0 } else { 1.0 };
    let (r1, r2) = (h1 * (sign / norm), h2 * (sign / norm));
    let r3 = r1.cross(&r2);
    let (r, _) = orthonormalize(&na::Matrix3::from_columns(&[r1, r2, r3]))?;
    let t_plane = h3 * (sign / norm);

    let t = t_plane - r.column(2) * z0;

    Ok((r, t))
}

/// Complete camera model; the extrinsic part is optional until computed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Calibration {
    pub intrinsic: IntrinsicParams,
    pub extrinsic: Option<ExtrinsicParams>,
}

impl Calibration {
    pub fn new(intrinsic: IntrinsicParams, extrinsic: Option<ExtrinsicParams>) -> Self {
        Self {
            intrinsic,
            extrinsic,
        }
    }

    #[inline]
    pub fn is_extrinsic_calibrated(&self) -> bool {
        self.extrinsic.is_some()
    }

    #[inline]
    fn extrinsic(&self) -> Result<&ExtrinsicParams> {
        self.extrinsic.as_ref().ok_or(Error::NotCalibrated)
    }

    /// Same camera for images that were already undistorted by the filter chain.
    pub fn for_undistorted_image(&self) -> Self {
        Self::new(self.intrinsic.without_distortion(), self.extrinsic)
    }

    pub fn camera_center(&self) -> Result<na::Point3<f64>> {
        Ok(self.extrinsic()?.camera_center())
    }

    /// Height of the camera above the `z = 0` plane in cm.
    pub fn camera_altitude(&self) -> Result<f64> {
        Ok(self.camera_center()?.z)
    }

    /// Projects a world point (cm) into raw image pixels.
    pub fn get_image_point(&self, p: &na::Point3<f64>) -> Result<na::Point2<f64>> {
        let pc = self.extrinsic()?.to_camera(p);
        if pc.z <= f64::EPSILON {
            return Err(Error::Geometry(format!("point {:?} is behind the camera", p)));
        }

        let n = na::Point2::new(pc.x / pc.z, pc.y / pc.z);
        let d = self.intrinsic.distort_normalized(&n);

        Ok(self.intrinsic.normalized_to_pixel(&d))
    }

    /// World point at `height` cm above the ground plane that projects onto
    /// the pixel `p`.
    pub fn get_3d_point(&self, p: &na::Point2<f64>, height: f64) -> Result<na::Point3<f64>> {
        let ext = self.extrinsic()?;
        let n = self
            .intrinsic
            .undistort_normalized(&self.intrinsic.pixel_to_normalized(p));

        let ray = ext.rotation().inverse() * na::Vector3::new(n.x, n.y, 1.0);
        let center = ext.camera_center();

        if ray.z.abs() < 1e-12 {
            return Err(Error::Geometry(format!(
                "viewing ray of pixel {:?} is parallel to the plane z = {}",
                p, height
            )));
        }

        let s = (height - center.z) / ray.z;
        if s <= 0.0 {
            return Err(Error::Geometry(format!(
                "plane z = {} lies behind the camera for pixel {:?}",
                height, p
            )));
        }

        Ok(center + ray * s)
    }

    /// Point at distance `dist` cm from the camera along the ray of pixel `p`.
    pub fn point_at_distance(&self, p: &na::Point2<f64>, dist: f64) -> Result<na::Point3<f64>> {
        let ext = self.extrinsic()?;
        let n = self
            .intrinsic
            .undistort_normalized(&self.intrinsic.pixel_to_normalized(p));
        let ray = (ext.rotation().inverse() * na::Vector3::new(n.x, n.y, 1.0)).normalize();

        Ok(ext.camera_center() + ray * dist)
    }

    /// Diameter in pixels of a head of [`HEAD_SIZE`] cm at pixel `p` for a
    /// person of `height` cm.
    pub fn head_size_px(&self, p: &na::Point2<f64>, height: f64) -> Result<f64> {
        let c = self.get_3d_point(p, height)?;
        let half = HEAD_SIZE * 0.5;

        let x1 = self.get_image_point(&na::Point3::new(c.x + half, c.y, c.z))?;
        let x2 = self.get_image_point(&na::Point3::new(c.x - half, c.y, c.z))?;
        let y1 = self.get_image_point(&na::Point3::new(c.x, c.y + half, c.z))?;
        let y2 = self.get_image_point(&na::Point3::new(c.x, c.y - half, c.z))?;

        Ok(na::distance(&x1, &x2).max(na::distance(&y1, &y2)))
    }

    /// Angle in degrees between the line of sight to `p` and the vertical.
    pub fn angle_of_view(&self, p: &na::Point3<f64>) -> Result<f64> {
        let sight = p - self.camera_center()?;
        let norm = sight.norm();
        if norm < f64::EPSILON {
            return Err(Error::Geometry("point coincides with the camera".to_string()));
        }

        Ok((-sight.z / norm).clamp(-1.0, 1.0).acos().to_degrees())
    }

    /// Mean pixel distance between `image` points and the projections of
    /// their `world` counterparts.
    pub fn reprojection_error(
        &self,
        world: &[na::Point3<f64>],
        image: &[na::Point2<f64>],
    ) -> Result<f64> {
        if world.is_empty() {
            return Ok(0.0);
        }

        let mut sum = 0.0;
        for (w, i) in world.iter().zip(image) {
            sum += na::distance(&self.get_image_point(w)?, i);
        }

        Ok(sum / world.len().min(image.len()) as f64)
    }
}
