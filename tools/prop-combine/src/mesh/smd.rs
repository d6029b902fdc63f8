//! Mesh-source text format
//!
//! Reads the `version` / `nodes` / `skeleton` / `triangles` sections of a
//! mesh source and writes single-bone static variants of it. Bone
//! assignments and weights are discarded: everything is treated as rigid
//! geometry. V is stored flipped, so reading and writing invert it once each.

use std::fmt::Write as _;
use std::path::Path;

use glam::{Vec2, Vec3};
use hashbrown::HashMap;

use super::{Face, MeshSource};
use crate::error::CombineError;

/// Bit pattern of one vertex, used for welding identical corners
type VertexKey = ([u32; 3], [u32; 3], [u32; 2]);

/// Load a mesh source from disk
pub fn load_smd(path: &Path) -> Result<MeshSource, CombineError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CombineError::geometry(path, format!("unreadable: {}", e)))?;
    parse_smd(&text, path)
}

/// Parse mesh-source text; `path` is only used in error messages
pub fn parse_smd(text: &str, path: &Path) -> Result<MeshSource, CombineError> {
    let mut mesh = MeshSource::new();
    let mut welded: HashMap<VertexKey, u32> = HashMap::new();
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l.trim()));

    while let Some((line_no, line)) = lines.next() {
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let keyword = line.split_whitespace().next().unwrap_or_default();
        match keyword {
            "version" => {}
            "triangles" => parse_triangles(&mut lines, &mut mesh, &mut welded, path)?,
            // nodes, skeleton, vertexanimation and anything unknown
            _ if line.split_whitespace().count() == 1 => skip_section(&mut lines),
            _ => {
                return Err(CombineError::geometry(
                    path,
                    format!("line {}: unexpected '{}'", line_no, line),
                ))
            }
        }
    }

    if mesh.faces.is_empty() {
        return Err(CombineError::geometry(path, "no triangles"));
    }

    Ok(mesh)
}

fn skip_section<'a>(lines: &mut impl Iterator<Item = (usize, &'a str)>) {
    for (_, line) in lines {
        if line == "end" {
            return;
        }
    }
}

fn parse_triangles<'a>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
    mesh: &mut MeshSource,
    welded: &mut HashMap<VertexKey, u32>,
    path: &Path,
) -> Result<(), CombineError> {
    loop {
        let Some((_, material)) = lines.next() else {
            // tolerate a missing trailing `end`
            return Ok(());
        };
        if material == "end" {
            return Ok(());
        }
        if material.is_empty() {
            continue;
        }

        let material = mesh.material_index(material);
        let mut verts = [0u32; 3];
        for slot in &mut verts {
            let (line_no, line) = lines
                .next()
                .ok_or_else(|| CombineError::geometry(path, "truncated triangle"))?;
            let (position, normal, uv) = parse_vertex(line).ok_or_else(|| {
                CombineError::geometry(path, format!("line {}: malformed vertex '{}'", line_no, line))
            })?;
            let uv = Vec2::new(uv.x, 1.0 - uv.y);

            let key = (
                position.to_array().map(f32::to_bits),
                normal.to_array().map(f32::to_bits),
                uv.to_array().map(f32::to_bits),
            );
            *slot = *welded.entry(key).or_insert_with(|| {
                mesh.positions.push(position);
                mesh.normals.push(normal);
                mesh.texcoords.push(uv);
                (mesh.positions.len() - 1) as u32
            });
        }

        mesh.faces.push(Face { verts, material });
    }
}

/// `bone px py pz nx ny nz u v [links...]`
fn parse_vertex(line: &str) -> Option<(Vec3, Vec3, Vec2)> {
    let mut fields = line.split_whitespace();
    fields.next()?.parse::<i32>().ok()?;
    let mut values = [0.0f32; 8];
    for value in &mut values {
        *value = fields.next()?.parse().ok()?;
    }
    Some((
        Vec3::new(values[0], values[1], values[2]),
        Vec3::new(values[3], values[4], values[5]),
        Vec2::new(values[6], values[7]),
    ))
}

fn static_header(out: &mut String) {
    out.push_str("version 1\n");
    out.push_str("nodes\n0 \"static_prop\" -1\nend\n");
    out.push_str("skeleton\ntime 0\n0 0.000000 0.000000 0.000000 0.000000 0.000000 0.000000\nend\n");
}

/// Write a mesh as a single-bone static mesh source
pub fn write_static_smd(path: &Path, mesh: &MeshSource) -> Result<(), CombineError> {
    let mut out = String::new();
    static_header(&mut out);

    out.push_str("triangles\n");
    for face in &mesh.faces {
        out.push_str(mesh.material_name(face));
        out.push('\n');
        for &v in &face.verts {
            let v = v as usize;
            let (p, n, uv) = (mesh.positions[v], mesh.normals[v], mesh.texcoords[v]);
            let _ = writeln!(
                out,
                "0\t\t{:.6} {:.6} {:.6}\t{:.6} {:.6} {:.6}\t{:.6} {:.6}",
                p.x,
                p.y,
                p.z,
                n.x,
                n.y,
                n.z,
                uv.x,
                1.0 - uv.y
            );
        }
    }
    out.push_str("end\n");

    std::fs::write(path, out).map_err(|e| CombineError::io(path, e))
}

/// Write the one-frame idle sequence every static model needs
pub fn write_idle_sequence(path: &Path) -> Result<(), CombineError> {
    let mut out = String::new();
    static_header(&mut out);
    std::fs::write(path, out).map_err(|e| CombineError::io(path, e))
}
