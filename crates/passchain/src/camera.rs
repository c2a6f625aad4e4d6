use glam::{Mat4, Vec3};

/// Every matrix derived from a camera, as handed to camera-aware passes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub view_inverse: Mat4,
    pub projection_inverse: Mat4,
    pub view_projection_inverse: Mat4,
    pub eye: Vec3,
    pub center: Vec3,
}

/// Perspective look-at camera.
///
/// Every setter bumps [`Camera::timestamp`], a counter local to this camera;
/// the renderer compares it with the stamp it saw at the last drawn frame to
/// detect movement. Matrices are
/// computed from the current attributes on request.
#[derive(Clone, Debug)]
pub struct Camera {
    eye: Vec3,
    center: Vec3,
    up: Vec3,
    fov_y_degrees: f32,
    aspect: f32,
    near: f32,
    far: f32,
    timestamp: u64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 5.0),
            center: Vec3::ZERO,
            up: Vec3::Y,
            fov_y_degrees: 60.0,
            aspect: 1.0,
            near: 0.25,
            far: 16.0,
            timestamp: 0,
        }
    }
}

impl Camera {
    pub fn new(eye: Vec3, center: Vec3, up: Vec3) -> Self {
        Self {
            eye,
            center,
            up,
            ..Self::default()
        }
    }

    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn fov_y_degrees(&self) -> f32 {
        self.fov_y_degrees
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    /// Number of setter calls so far; strictly increasing across setters.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn touch(&mut self) {
        self.timestamp += 1;
    }

    pub fn set_eye(&mut self, eye: Vec3) {
        self.eye = eye;
        self.touch();
    }

    pub fn set_center(&mut self, center: Vec3) {
        self.center = center;
        self.touch();
    }

    pub fn set_up(&mut self, up: Vec3) {
        self.up = up;
        self.touch();
    }

    pub fn set_fov_y_degrees(&mut self, fov: f32) {
        self.fov_y_degrees = fov;
        self.touch();
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
        self.touch();
    }

    pub fn set_clip(&mut self, near: f32, far: f32) {
        self.near = near;
        self.far = far;
        self.touch();
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.center, self.up)
    }

    /// GL-convention projection (clip z in -1..1).
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh_gl(
            self.fov_y_degrees.to_radians(),
            self.aspect,
            self.near,
            self.far,
        )
    }

    pub fn matrices(&self) -> CameraMatrices {
        let view = self.view();
        let projection = self.projection();
        let view_projection = projection * view;
        CameraMatrices {
            view,
            projection,
            view_projection,
            view_inverse: view.inverse(),
            projection_inverse: projection.inverse(),
            view_projection_inverse: view_projection.inverse(),
            eye: self.eye,
            center: self.center,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_advance_the_timestamp() {
        let mut camera = Camera::default();
        let mut last = camera.timestamp();
        camera.set_eye(Vec3::new(1.0, 2.0, 3.0));
        assert!(camera.timestamp() > last);
        last = camera.timestamp();
        camera.set_aspect(2.0);
        assert!(camera.timestamp() > last);
        last = camera.timestamp();
        camera.set_clip(0.1, 100.0);
        assert!(camera.timestamp() > last);
    }

    #[test]
    fn cameras_count_their_own_changes() {
        let mut first = Camera::default();
        let second = Camera::default();
        first.set_eye(Vec3::ONE);
        first.set_fov_y_degrees(45.0);
        assert_eq!(first.timestamp(), 2);
        assert_eq!(second.timestamp(), 0);
        assert_eq!(Camera::new(Vec3::Z, Vec3::ZERO, Vec3::Y).timestamp(), 0);
    }

    #[test]
    fn matrices_are_consistent() {
        let mut camera = Camera::default();
        camera.set_aspect(4.0 / 3.0);
        let matrices = camera.matrices();

        assert!(matrices
            .view_projection
            .abs_diff_eq(matrices.projection * matrices.view, 1e-6));
        assert!((matrices.view * matrices.view_inverse).abs_diff_eq(Mat4::IDENTITY, 1e-5));
        assert!((matrices.view_projection * matrices.view_projection_inverse)
            .abs_diff_eq(Mat4::IDENTITY, 1e-4));
        assert_eq!(matrices.eye, Vec3::new(0.0, 0.0, 5.0));
    }

    #[test]
    fn view_moves_center_onto_negative_z() {
        let camera = Camera::default();
        let center = camera.view().transform_point3(Vec3::ZERO);
        assert!(center.abs_diff_eq(Vec3::new(0.0, 0.0, -5.0), 1e-6));
    }
}
