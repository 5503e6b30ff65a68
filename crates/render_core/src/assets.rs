//! Decoding of model and texture files into the plain arrays the core consumes

use crate::mesh::Vertex;
use std::io::BufRead;
use std::path::Path;
use thiserror::Error;

/// Asset loading errors
#[derive(Error, Debug)]
pub enum AssetError {
    /// The file could not be read or decoded
    #[error("Failed to load {path}: {reason}")]
    LoadFailed {
        /// File that failed
        path: String,
        /// Decoder message
        reason: String,
    },

    /// The file decoded but holds nothing usable
    #[error("Asset {0} is empty")]
    Empty(String),
}

/// Loaded image data ready for GPU upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    /// Tightly packed RGBA8 pixels, row-major
    pub data: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl ImageData {
    /// Load an image from a file path, converting to RGBA8
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AssetError> {
        let path_ref = path.as_ref();

        let img = image::open(path_ref).map_err(|e| AssetError::LoadFailed {
            path: path_ref.display().to_string(),
            reason: e.to_string(),
        })?;

        let rgba_img = img.to_rgba8();
        let (width, height) = rgba_img.dimensions();
        if width == 0 || height == 0 {
            return Err(AssetError::Empty(path_ref.display().to_string()));
        }

        log::info!("Loaded image {}x{} from {:?}", width, height, path_ref);

        Ok(Self {
            data: rgba_img.into_raw(),
            width,
            height,
        })
    }

    /// Create a solid color image
    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self {
            data: color.repeat(texel_count(width, height)),
            width,
            height,
        }
    }

    /// Size of the pixel data in bytes
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Texels in a `width` x `height` image, computed without u32 overflow
fn texel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    }
}

/// Load every mesh in a Wavefront OBJ file as one flat triangle list
///
/// Texture V is flipped to match Vulkan's top-left image origin and every
/// vertex is white.
pub fn load_obj_triangles<P: AsRef<Path>>(path: P) -> Result<Vec<Vertex>, AssetError> {
    let path_ref = path.as_ref();
    let name = path_ref.display().to_string();

    let (models, _materials) =
        tobj::load_obj(path_ref, &load_options()).map_err(|e| AssetError::LoadFailed {
            path: name.clone(),
            reason: e.to_string(),
        })?;

    let triangles = flatten_models(&models);
    if triangles.is_empty() {
        return Err(AssetError::Empty(name));
    }

    log::info!(
        "Loaded {} triangles from {} meshes in {:?}",
        triangles.len() / 3,
        models.len(),
        path_ref
    );
    Ok(triangles)
}

/// Same as [`load_obj_triangles`] for OBJ text held in memory; material
/// libraries are ignored
pub fn parse_obj_triangles(reader: &mut impl BufRead) -> Result<Vec<Vertex>, AssetError> {
    let (models, _materials) = tobj::load_obj_buf(reader, &load_options(), |_| {
        Err(tobj::LoadError::OpenFileFailed)
    })
    .map_err(|e| AssetError::LoadFailed {
        path: "<memory>".to_string(),
        reason: e.to_string(),
    })?;

    Ok(flatten_models(&models))
}

fn flatten_models(models: &[tobj::Model]) -> Vec<Vertex> {
    let mut triangles = Vec::new();

    for model in models {
        let mesh = &model.mesh;
        triangles.reserve(mesh.indices.len());

        for &index in &mesh.indices {
            let i = index as usize;
            let pos = [
                mesh.positions[3 * i],
                mesh.positions[3 * i + 1],
                mesh.positions[3 * i + 2],
            ];
            let tex_coord = if mesh.texcoords.len() >= 2 * i + 2 {
                [mesh.texcoords[2 * i], 1.0 - mesh.texcoords[2 * i + 1]]
            } else {
                [0.0, 0.0]
            };

            triangles.push(Vertex::new(pos, [1.0, 1.0, 1.0], tex_coord));
        }
    }

    triangles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshData;
    use std::io::Cursor;

    const QUAD_OBJ: &str = "\
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 1.0 1.0 0.0
v 0.0 1.0 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 1.0 1.0
vt 0.0 1.0
f 1/1 2/2 3/3 4/4
";

    #[test]
    fn test_solid_color_image() {
        let img = ImageData::solid_color(4, 4, [255, 0, 0, 255]);
        assert_eq!(img.size_bytes(), 4 * 4 * 4);
        assert_eq!(&img.data[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_texel_count_exceeds_u32() {
        // 65536 * 65536 wraps to 0 in u32
        assert_eq!(texel_count(65_536, 65_536), 4_294_967_296);
        assert_eq!(texel_count(u32::MAX, 2), 2 * u32::MAX as usize);
    }

    #[test]
    fn test_quad_is_triangulated() {
        let triangles = parse_obj_triangles(&mut Cursor::new(QUAD_OBJ)).unwrap();
        assert_eq!(triangles.len(), 6);

        let mesh = MeshData::from_triangles(&triangles);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
    }

    #[test]
    fn test_texture_v_is_flipped() {
        let triangles = parse_obj_triangles(&mut Cursor::new(QUAD_OBJ)).unwrap();
        let origin = triangles
            .iter()
            .find(|v| v.pos == [0.0, 0.0, 0.0])
            .unwrap();
        assert_eq!(origin.tex_coord, [0.0, 1.0]);
        assert_eq!(origin.color, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_obj_triangles("does/not/exist.obj").unwrap_err();
        assert!(err.to_string().contains("does/not/exist.obj"));
    }
}
