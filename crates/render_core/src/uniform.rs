//! Per-frame uniform data for the model shaders

use nalgebra::{Matrix4, Point3, Vector3};

/// Degrees per second the model spins about +Z
pub const SPIN_DEGREES_PER_SECOND: f32 = 90.0;

const EYE: [f32; 3] = [2.0, 2.0, 2.0];
const FOV_Y_DEGREES: f32 = 45.0;
const Z_NEAR: f32 = 0.1;
const Z_FAR: f32 = 10.0;

/// Matrices bound at descriptor binding 0, column-major like GLSL `mat4`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformBufferObject {
    /// Object to world
    pub model: [[f32; 4]; 4],
    /// World to camera
    pub view: [[f32; 4]; 4],
    /// Camera to clip
    pub proj: [[f32; 4]; 4],
}

unsafe impl bytemuck::Pod for UniformBufferObject {}
unsafe impl bytemuck::Zeroable for UniformBufferObject {}

impl Default for UniformBufferObject {
    fn default() -> Self {
        let identity: [[f32; 4]; 4] = Matrix4::<f32>::identity().into();
        Self {
            model: identity,
            view: identity,
            proj: identity,
        }
    }
}

impl UniformBufferObject {
    /// The viewer's camera setup with the model rotated for `elapsed_seconds`
    pub fn spinning(elapsed_seconds: f32, aspect_ratio: f32) -> Self {
        let angle = (elapsed_seconds * SPIN_DEGREES_PER_SECOND).to_radians();
        let model = Matrix4::from_axis_angle(&Vector3::z_axis(), angle);

        let view = Matrix4::look_at_rh(
            &Point3::from(EYE),
            &Point3::origin(),
            &Vector3::z(),
        );

        let proj = vulkan_perspective(FOV_Y_DEGREES.to_radians(), aspect_ratio, Z_NEAR, Z_FAR);

        Self {
            model: model.into(),
            view: view.into(),
            proj: proj.into(),
        }
    }

    /// Raw bytes for upload into the mapped uniform buffer
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Right-handed perspective with a [0, 1] depth range and Y pointing down in clip space
pub fn vulkan_perspective(fov_y: f32, aspect_ratio: f32, near: f32, far: f32) -> Matrix4<f32> {
    let focal = 1.0 / (fov_y / 2.0).tan();
    let mut proj = Matrix4::zeros();
    proj[(0, 0)] = focal / aspect_ratio;
    // Vulkan's clip space Y grows downward
    proj[(1, 1)] = -focal;
    proj[(2, 2)] = far / (near - far);
    proj[(2, 3)] = -(far * near) / (far - near);
    proj[(3, 2)] = -1.0;
    proj
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    fn project(proj: &Matrix4<f32>, z: f32) -> f32 {
        let clip = proj * Vector4::new(0.0, 0.0, z, 1.0);
        clip.z / clip.w
    }

    #[test]
    fn test_depth_range_is_zero_to_one() {
        let proj = vulkan_perspective(FOV_Y_DEGREES.to_radians(), 4.0 / 3.0, Z_NEAR, Z_FAR);
        assert_relative_eq!(project(&proj, -Z_NEAR), 0.0, epsilon = 1e-5);
        assert_relative_eq!(project(&proj, -Z_FAR), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_y_is_flipped() {
        let proj = vulkan_perspective(FOV_Y_DEGREES.to_radians(), 1.0, Z_NEAR, Z_FAR);
        let clip = proj * Vector4::new(0.0, 1.0, -1.0, 1.0);
        assert!(clip.y < 0.0);
    }

    #[test]
    fn test_quarter_turn_after_one_second() {
        let ubo = UniformBufferObject::spinning(1.0, 1.0);
        let model = Matrix4::from(ubo.model);
        let rotated = model * Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(rotated.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(rotated.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_eye_maps_to_view_origin() {
        let ubo = UniformBufferObject::spinning(0.0, 1.0);
        let view = Matrix4::from(ubo.view);
        let eye = view * Vector4::new(EYE[0], EYE[1], EYE[2], 1.0);
        assert_relative_eq!(eye.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(eye.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(eye.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_byte_size_matches_shader_block() {
        let ubo = UniformBufferObject::default();
        assert_eq!(ubo.as_bytes().len(), 3 * 64);
    }
}
