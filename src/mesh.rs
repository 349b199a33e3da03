//! Wavefront OBJ reading and writing for reconstructed scans.
//!
//! The scanning middleware writes vertices as `v x y z r g b` with colors in
//! `0.0..=1.0` and faces as `f a//n b//n c//n` with 1-based indices.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::{BridgeError, Result};

/// Triangle mesh with per-vertex colors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<[f32; 3]>,
    pub colors: Vec<[u8; 3]>,
    /// Zero-based vertex indices, three per triangle.
    pub triangles: Vec<u32>,
}

impl Mesh {
    pub fn triangle_count(&self) -> usize {
        self.triangles.len() / 3
    }

    pub fn centroid(&self) -> [f32; 3] {
        if self.vertices.is_empty() {
            return [0.0; 3];
        }
        let mut sum = [0.0f64; 3];
        for v in &self.vertices {
            for (s, c) in sum.iter_mut().zip(v) {
                *s += *c as f64;
            }
        }
        let n = self.vertices.len() as f64;
        [(sum[0] / n) as f32, (sum[1] / n) as f32, (sum[2] / n) as f32]
    }

    /// Translate all vertices so the centroid sits at the origin. Returns the
    /// centroid that was removed.
    pub fn recenter(&mut self) -> [f32; 3] {
        let center = self.centroid();
        for v in &mut self.vertices {
            v[0] -= center[0];
            v[1] -= center[1];
            v[2] -= center[2];
        }
        center
    }

    fn face_normal(&self, tri: &[u32]) -> [f32; 3] {
        let a = self.vertices[tri[0] as usize];
        let b = self.vertices[tri[1] as usize];
        let c = self.vertices[tri[2] as usize];
        let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
        let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
        let n = [
            u[1] * v[2] - u[2] * v[1],
            u[2] * v[0] - u[0] * v[2],
            u[0] * v[1] - u[1] * v[0],
        ];
        let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        if len > f32::EPSILON {
            [n[0] / len, n[1] / len, n[2] / len]
        } else {
            [0.0, 0.0, 1.0]
        }
    }
}

fn parse_float(token: Option<&str>, line: usize, what: &str) -> Result<f32> {
    token
        .ok_or_else(|| BridgeError::MeshParse {
            line,
            message: format!("missing {what}"),
        })?
        .parse::<f32>()
        .map_err(|e| BridgeError::MeshParse {
            line,
            message: format!("bad {what}: {e}"),
        })
}

fn color_channel(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Parse OBJ text. Vertices are returned as written; see [`load_obj`] for
/// the recentering loader. Polygons with more than three corners are split
/// into a triangle fan.
pub fn parse_obj(text: &str) -> Result<Mesh> {
    let mut mesh = Mesh::default();
    let mut faces: Vec<(usize, Vec<i64>)> = Vec::new();

    for (n, raw) in text.lines().enumerate() {
        let line = n + 1;
        let mut tokens = raw.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let x = parse_float(tokens.next(), line, "x")?;
                let y = parse_float(tokens.next(), line, "y")?;
                let z = parse_float(tokens.next(), line, "z")?;
                let color = match tokens.next() {
                    Some(r) => [
                        color_channel(parse_float(Some(r), line, "r")?),
                        color_channel(parse_float(tokens.next(), line, "g")?),
                        color_channel(parse_float(tokens.next(), line, "b")?),
                    ],
                    None => [255, 255, 255],
                };
                mesh.vertices.push([x, y, z]);
                mesh.colors.push(color);
            }
            Some("f") => {
                let mut corners = Vec::with_capacity(3);
                for token in tokens {
                    let index = token.split('/').next().unwrap_or("");
                    let index = index.parse::<i64>().map_err(|e| BridgeError::MeshParse {
                        line,
                        message: format!("bad face index {token:?}: {e}"),
                    })?;
                    corners.push(index);
                }
                if corners.len() < 3 {
                    return Err(BridgeError::MeshParse {
                        line,
                        message: format!("face has {} corners", corners.len()),
                    });
                }
                faces.push((line, corners));
            }
            _ => {}
        }
    }

    // Indices are resolved once every vertex is known.
    let count = mesh.vertices.len() as i64;
    for (line, corners) in faces {
        let mut resolved = Vec::with_capacity(corners.len());
        for index in corners {
            let zero_based = if index > 0 { index - 1 } else { count + index };
            if index == 0 || zero_based < 0 || zero_based >= count {
                return Err(BridgeError::MeshParse {
                    line,
                    message: format!("face index {index} out of range (1..={count})"),
                });
            }
            resolved.push(zero_based as u32);
        }
        for i in 1..resolved.len() - 1 {
            mesh.triangles
                .extend_from_slice(&[resolved[0], resolved[i], resolved[i + 1]]);
        }
    }

    Ok(mesh)
}

/// Load an OBJ file and recenter it about its vertex centroid.
pub fn load_obj(path: impl AsRef<Path>) -> Result<Mesh> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let mut mesh = parse_obj(&text)?;
    let center = mesh.recenter();
    log::debug!(
        "Loaded {}: {} vertices, {} triangles, centroid {:?}",
        path.display(),
        mesh.vertices.len(),
        mesh.triangle_count(),
        center
    );
    Ok(mesh)
}

/// Write a mesh as OBJ with one normal per face.
pub fn write_obj<W: Write>(mesh: &Mesh, mut out: W) -> Result<()> {
    writeln!(out, "# {} vertices, {} triangles", mesh.vertices.len(), mesh.triangle_count())?;
    for (i, v) in mesh.vertices.iter().enumerate() {
        let c = mesh.colors.get(i).copied().unwrap_or([255, 255, 255]);
        writeln!(
            out,
            "v {} {} {} {} {} {}",
            v[0],
            v[1],
            v[2],
            c[0] as f32 / 255.0,
            c[1] as f32 / 255.0,
            c[2] as f32 / 255.0
        )?;
    }
    for tri in mesh.triangles.chunks_exact(3) {
        let n = mesh.face_normal(tri);
        writeln!(out, "vn {} {} {}", n[0], n[1], n[2])?;
    }
    for (k, tri) in mesh.triangles.chunks_exact(3).enumerate() {
        let k = k + 1;
        writeln!(
            out,
            "f {}//{k} {}//{k} {}//{k}",
            tri[0] + 1,
            tri[1] + 1,
            tri[2] + 1
        )?;
    }
    out.flush()?;
    Ok(())
}

pub fn save_obj(mesh: &Mesh, path: impl AsRef<Path>) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_obj(mesh, BufWriter::new(file))
}

/// List the `.obj` files directly inside `dir`, sorted by name.
pub fn list_mesh_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_obj = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("obj"));
        if is_obj && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Unit tetrahedron with one primary color per corner.
pub fn tetrahedron() -> Mesh {
    Mesh {
        vertices: vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ],
        colors: vec![[255, 0, 0], [0, 255, 0], [0, 0, 255], [200, 100, 50]],
        triangles: vec![0, 2, 1, 0, 1, 3, 0, 3, 2, 1, 2, 3],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tetrahedron_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tetra.obj");
        let original = tetrahedron();
        save_obj(&original, &path).unwrap();

        let loaded = load_obj(&path).unwrap();
        assert_eq!(loaded.triangles, original.triangles);

        let center = original.centroid();
        assert_eq!(center, [0.25, 0.25, 0.25]);
        for (got, want) in loaded.vertices.iter().zip(&original.vertices) {
            for axis in 0..3 {
                assert!((got[axis] - (want[axis] - center[axis])).abs() < 1e-6);
            }
        }
        for (got, want) in loaded.colors.iter().zip(&original.colors) {
            for ch in 0..3 {
                assert!((got[ch] as i16 - want[ch] as i16).abs() <= 1);
            }
        }
    }

    #[test]
    fn faces_subtract_one() {
        let text = "v 0 0 0 1 0 0\nv 1 0 0 0 1 0\nv 0 1 0 0 0 1\nf 1//1 2//1 3//1\n";
        let mesh = parse_obj(text).unwrap();
        assert_eq!(mesh.triangles, vec![0, 1, 2]);
        assert_eq!(mesh.colors[1], [0, 255, 0]);
    }

    #[test]
    fn quads_become_fans() {
        let text = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        let mesh = parse_obj(text).unwrap();
        assert_eq!(mesh.triangles, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.colors[0], [255, 255, 255]);
    }

    #[test]
    fn out_of_range_face_is_an_error() {
        let err = parse_obj("v 0 0 0\nf 1 2 3\n").unwrap_err();
        assert!(matches!(err, BridgeError::MeshParse { line: 2, .. }));
    }

    #[test]
    fn bad_vertex_reports_line() {
        let err = parse_obj("# hi\nv 0 zero 0\n").unwrap_err();
        assert!(matches!(err, BridgeError::MeshParse { line: 2, .. }));
    }

    #[test]
    fn lists_only_obj_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.obj"), "").unwrap();
        std::fs::write(dir.path().join("a.OBJ"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        let files = list_mesh_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.OBJ", "b.obj"]);
    }
}
