//! Meshes, input layouts and the built-in geometry.

use std::{
    collections::hash_map::DefaultHasher,
    f32::consts::PI,
    hash::{Hash, Hasher},
    sync::{Arc, OnceLock},
};

use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;

use crate::{
    buffer::{Buffer, BufferAllocation, BufferDesc, BufferUsages},
    hal::{Format, IndexBufferView, InputClassification, InputElement, PrimitiveTopology, VertexBufferView},
    material::Material,
    Device, Result,
};

/// Vertex layout and topology, as seen by pipeline creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputDesc {
    topology: PrimitiveTopology,
    elements: Vec<InputElement>,
    hash: u64,
}

impl InputDesc {
    pub fn new(topology: PrimitiveTopology, elements: Vec<InputElement>) -> Self {
        let mut hasher = DefaultHasher::new();
        topology.topology_type().hash(&mut hasher);
        elements.hash(&mut hasher);

        Self {
            topology,
            elements,
            hash: hasher.finish(),
        }
    }

    /// Only the topology type takes part, since that is all a pipeline
    /// state records.
    pub fn hash_key(&self) -> u64 {
        self.hash
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn elements(&self) -> &[InputElement] {
        &self.elements
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 4],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    pub fn new(position: [f32; 3], normal: [f32; 3], tangent: [f32; 4], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            tangent,
            uv,
        }
    }

    /// The input layout of a triangle list of these vertices.
    pub fn input_desc() -> &'static InputDesc {
        static DESC: OnceLock<InputDesc> = OnceLock::new();

        DESC.get_or_init(|| {
            let element = |name: &str, format| InputElement {
                semantic_name: name.to_owned(),
                semantic_index: 0,
                format,
                input_slot: 0,
                classification: InputClassification::PerVertex,
                instance_step_rate: 0,
            };

            InputDesc::new(
                PrimitiveTopology::TriangleList,
                vec![
                    element("POSITION", Format::R32G32B32Float),
                    element("NORMAL", Format::R32G32B32Float),
                    element("TANGENT", Format::R32G32B32A32Float),
                    element("TEXCOORD", Format::R32G32Float),
                ],
            )
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubMesh {
    pub base_vertex: i32,
    pub start_index: u32,
    pub index_count: u32,
}

/// Axis-aligned object space bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds {
    pub fn center(&self) -> [f32; 3] {
        [0, 1, 2].map(|i| (self.min[i] + self.max[i]) * 0.5)
    }

    pub fn extents(&self) -> [f32; 3] {
        [0, 1, 2].map(|i| (self.max[i] - self.min[i]) * 0.5)
    }
}

#[derive(Clone)]
struct MeshBuffers {
    vertices: Buffer,
    indices: Buffer,
}

/// Vertex and index data split into sub-meshes. GPU buffers are created on
/// first use after every change.
pub struct Mesh {
    name: String,
    allocation: BufferAllocation,
    vertices: Vec<Vertex>,
    indices: Vec<u16>,
    sub_meshes: Vec<SubMesh>,
    bounds: Bounds,
    buffers: Mutex<Option<MeshBuffers>>,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self::with_allocation(name, BufferAllocation::Heap(crate::AllocatorKind::PlacedDefault))
    }

    pub fn with_allocation(name: &str, allocation: BufferAllocation) -> Self {
        Self {
            name: name.to_owned(),
            allocation,
            vertices: Vec::new(),
            indices: Vec::new(),
            sub_meshes: Vec::new(),
            bounds: Bounds {
                min: [0.0; 3],
                max: [0.0; 3],
            },
            buffers: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    pub fn sub_mesh_count(&self) -> usize {
        self.sub_meshes.len()
    }

    pub fn sub_mesh(&self, index: usize) -> &SubMesh {
        &self.sub_meshes[index]
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn input_desc(&self) -> &'static InputDesc {
        Vertex::input_desc()
    }

    /// Appends a sub-mesh. Indices are relative to the first of `vertices`.
    pub fn add_sub_mesh(&mut self, vertices: &[Vertex], indices: &[u16]) {
        self.sub_meshes.push(SubMesh {
            base_vertex: self.vertices.len() as i32,
            start_index: self.indices.len() as u32,
            index_count: indices.len() as u32,
        });
        self.vertices.extend_from_slice(vertices);
        self.indices.extend_from_slice(indices);
        self.recalculate_bounds();
        self.invalidate();
    }

    pub fn clear_sub_meshes(&mut self) {
        self.sub_meshes.clear();
        self.vertices.clear();
        self.indices.clear();
        self.recalculate_bounds();
        self.invalidate();
    }

    /// Replaces every normal with the normalized sum of the normals of the
    /// faces that share the vertex.
    pub fn recalculate_normals(&mut self) {
        for vertex in &mut self.vertices {
            vertex.normal = [0.0; 3];
        }

        for sub_mesh in &self.sub_meshes {
            let start = sub_mesh.start_index as usize;
            let indices = &self.indices[start..start + sub_mesh.index_count as usize];

            for face in indices.chunks_exact(3) {
                let [a, b, c] = [face[0], face[1], face[2]].map(|i| (sub_mesh.base_vertex + i32::from(i)) as usize);
                let p0 = self.vertices[a].position;
                let normal = normalize(cross(
                    sub(self.vertices[b].position, p0),
                    sub(self.vertices[c].position, p0),
                ));

                for i in [a, b, c] {
                    self.vertices[i].normal = add(self.vertices[i].normal, normal);
                }
            }
        }

        for vertex in &mut self.vertices {
            vertex.normal = normalize(vertex.normal);
        }

        self.invalidate();
    }

    pub fn recalculate_bounds(&mut self) {
        let mut positions = self.vertices.iter().map(|v| v.position);

        self.bounds = match positions.next() {
            Some(first) => positions.fold(
                Bounds {
                    min: first,
                    max: first,
                },
                |bounds, p| Bounds {
                    min: [0, 1, 2].map(|i| bounds.min[i].min(p[i])),
                    max: [0, 1, 2].map(|i| bounds.max[i].max(p[i])),
                },
            ),
            None => Bounds {
                min: [0.0; 3],
                max: [0.0; 3],
            },
        };
    }

    fn invalidate(&mut self) {
        *self.buffers.get_mut() = None;
    }

    /// Vertex and index buffer views, uploading the data if it changed.
    pub fn buffer_views(&self, device: &Arc<Device>) -> Result<(VertexBufferView, IndexBufferView)> {
        let buffers = self.buffers(device)?;
        Ok((buffers.vertices.vbv(), buffers.indices.ibv()))
    }

    /// The uploaded vertex and index buffers.
    pub fn gpu_buffers(&self, device: &Arc<Device>) -> Result<(Buffer, Buffer)> {
        let buffers = self.buffers(device)?;
        Ok((buffers.vertices, buffers.indices))
    }

    fn buffers(&self, device: &Arc<Device>) -> Result<MeshBuffers> {
        let mut slot = self.buffers.lock();

        if let Some(buffers) = slot.as_ref() {
            return Ok(buffers.clone());
        }

        debug_assert!(!self.vertices.is_empty() && !self.indices.is_empty(), "{} is empty", self.name);

        let vertices = Buffer::with_allocation(
            device,
            &format!("{}Vertices", self.name),
            &BufferDesc::new(Vertex::STRIDE, self.vertices.len() as u32, BufferUsages::VERTEX),
            self.allocation,
        )?;
        vertices.set_data(0, bytemuck::cast_slice(&self.vertices))?;

        let indices = Buffer::with_allocation(
            device,
            &format!("{}Indices", self.name),
            &BufferDesc::new(2, self.indices.len() as u32, BufferUsages::INDEX),
            self.allocation,
        )?;
        indices.set_data(0, bytemuck::cast_slice(&self.indices))?;

        let buffers = MeshBuffers { vertices, indices };
        *slot = Some(buffers.clone());
        Ok(buffers)
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("name", &self.name)
            .field("vertices", &self.vertices.len())
            .field("indices", &self.indices.len())
            .field("sub_meshes", &self.sub_meshes)
            .finish()
    }
}

/// Meshes every device provides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Geometry {
    /// One triangle covering the viewport, in clip space.
    FullScreenTriangle,
    /// A unit cube centered on the origin.
    Cube,
    /// A sphere of radius 0.5 centered on the origin.
    Sphere,
}

impl Geometry {
    pub fn build(self) -> Mesh {
        let mut mesh = Mesh::new(match self {
            Geometry::FullScreenTriangle => "FullScreenTriangle",
            Geometry::Cube => "Cube",
            Geometry::Sphere => "Sphere",
        });

        match self {
            Geometry::FullScreenTriangle => {
                let normal = [0.0, 0.0, -1.0];
                let tangent = [1.0, 0.0, 0.0, 1.0];
                mesh.add_sub_mesh(
                    &[
                        Vertex::new([-1.0, -1.0, 0.0], normal, tangent, [0.0, 1.0]),
                        Vertex::new([-1.0, 3.0, 0.0], normal, tangent, [0.0, -1.0]),
                        Vertex::new([3.0, -1.0, 0.0], normal, tangent, [2.0, 1.0]),
                    ],
                    &[0, 1, 2],
                );
            }
            Geometry::Cube => add_cube(&mut mesh, 1.0, 1.0, 1.0),
            Geometry::Sphere => add_sphere(&mut mesh, 0.5, 40, 20),
        }

        mesh
    }
}

/// Appends a box with four vertices per face, so every face has its own
/// normal, tangent and uv corners.
pub fn add_cube(mesh: &mut Mesh, width: f32, height: f32, depth: f32) {
    let (w, h, d) = (0.5 * width, 0.5 * height, 0.5 * depth);

    // (normal, tangent, corners in uv order (0,1), (0,0), (1,0), (1,1))
    let faces: [([f32; 3], [f32; 3], [[f32; 3]; 4]); 6] = [
        ([0.0, 0.0, -1.0], [1.0, 0.0, 0.0], [[-w, -h, -d], [-w, h, -d], [w, h, -d], [w, -h, -d]]),
        ([0.0, 0.0, 1.0], [-1.0, 0.0, 0.0], [[w, -h, d], [w, h, d], [-w, h, d], [-w, -h, d]]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [[-w, h, -d], [-w, h, d], [w, h, d], [w, h, -d]]),
        ([0.0, -1.0, 0.0], [-1.0, 0.0, 0.0], [[w, -h, -d], [w, -h, d], [-w, -h, d], [-w, -h, -d]]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [[-w, -h, d], [-w, h, d], [-w, h, -d], [-w, -h, -d]]),
        ([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [[w, -h, -d], [w, h, -d], [w, h, d], [w, -h, d]]),
    ];
    let uvs = [[0.0, 1.0], [0.0, 0.0], [1.0, 0.0], [1.0, 1.0]];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, [tx, ty, tz], corners) in faces {
        let base = vertices.len() as u16;
        for (position, uv) in corners.into_iter().zip(uvs) {
            vertices.push(Vertex::new(position, normal, [tx, ty, tz, 1.0], uv));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    mesh.add_sub_mesh(&vertices, &indices);
}

/// Appends a UV sphere of `slices` segments around and `stacks` rings top to
/// bottom, then recalculates normals.
pub fn add_sphere(mesh: &mut Mesh, radius: f32, slices: u16, stacks: u16) {
    assert!(slices >= 3 && stacks >= 2);

    let pole = |y: f32, v: f32| Vertex::new([0.0, y, 0.0], [0.0; 3], [1.0, 0.0, 0.0, 1.0], [0.0, v]);
    let phi_step = PI / f32::from(stacks);
    let theta_step = 2.0 * PI / f32::from(slices);

    let mut vertices = vec![pole(radius, 0.0)];
    for i in 1..stacks {
        let phi = f32::from(i) * phi_step;
        for j in 0..=slices {
            let theta = f32::from(j) * theta_step;
            vertices.push(Vertex::new(
                [
                    radius * phi.sin() * theta.cos(),
                    radius * phi.cos(),
                    radius * phi.sin() * theta.sin(),
                ],
                [0.0; 3],
                [-phi.sin() * theta.sin(), 0.0, phi.sin() * theta.cos(), 1.0],
                [theta / (2.0 * PI), phi / PI],
            ));
        }
    }
    vertices.push(pole(-radius, 1.0));

    let ring = slices + 1;
    let mut indices = Vec::new();

    for i in 1..=slices {
        indices.extend_from_slice(&[0, i + 1, i]);
    }

    for i in 0..stacks - 2 {
        for j in 0..slices {
            let top = 1 + i * ring + j;
            let bottom = top + ring;
            indices.extend_from_slice(&[top, top + 1, bottom, bottom, top + 1, bottom + 1]);
        }
    }

    let south = vertices.len() as u16 - 1;
    let base = south - ring;
    for i in 0..slices {
        indices.extend_from_slice(&[south, base + i, base + i + 1]);
    }

    mesh.add_sub_mesh(&vertices, &indices);
    mesh.recalculate_normals();
}

/// A mesh placed in the world, drawn with one material per sub-mesh.
#[derive(Clone)]
pub struct MeshRenderer {
    pub active: bool,
    pub mesh: Arc<Mesh>,
    /// Indexed by sub-mesh. Sub-meshes past the end are not drawn.
    pub materials: Vec<Arc<Material>>,
    /// Row-major object to world transform, uploaded as the instance data.
    pub world: [[f32; 4]; 4],
}

impl MeshRenderer {
    pub const IDENTITY: [[f32; 4]; 4] = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];

    pub fn new(mesh: Arc<Mesh>, materials: Vec<Arc<Material>>) -> Self {
        Self {
            active: true,
            mesh,
            materials,
            world: Self::IDENTITY,
        }
    }
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn add(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let length = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if length > f32::EPSILON {
        v.map(|c| c / length)
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::null_device;

    #[test]
    fn vertex_layout() {
        assert_eq!(Vertex::STRIDE, 48);
        assert_eq!(Vertex::input_desc().elements().len(), 4);
        assert_eq!(Vertex::input_desc().topology(), PrimitiveTopology::TriangleList);
    }

    #[test]
    fn sub_meshes_are_appended() {
        let mut mesh = Mesh::new("two");
        add_cube(&mut mesh, 1.0, 1.0, 1.0);
        add_cube(&mut mesh, 2.0, 2.0, 2.0);

        assert_eq!(mesh.sub_mesh_count(), 2);
        assert_eq!(
            *mesh.sub_mesh(1),
            SubMesh {
                base_vertex: 24,
                start_index: 36,
                index_count: 36,
            }
        );
        assert_eq!(mesh.bounds().min, [-1.0; 3]);
        assert_eq!(mesh.bounds().max, [1.0; 3]);

        mesh.clear_sub_meshes();
        assert_eq!(mesh.sub_mesh_count(), 0);
        assert!(mesh.vertices().is_empty());
    }

    #[test]
    fn sphere_normals_point_outwards() {
        let mesh = Geometry::Sphere.build();
        assert_eq!(mesh.vertices().len(), 2 + 19 * 41);
        assert_eq!(mesh.indices().len(), 40 * 3 * 2 + 18 * 40 * 6);

        for vertex in mesh.vertices() {
            let p = normalize(vertex.position);
            let n = vertex.normal;
            let dot = p[0] * n[0] + p[1] * n[1] + p[2] * n[2];
            assert!(dot > 0.9, "{vertex:?}");
        }
    }

    #[test]
    fn cube_faces_are_flat() {
        let mut mesh = Geometry::Cube.build();
        let before: Vec<_> = mesh.vertices().iter().map(|v| v.normal).collect();
        mesh.recalculate_normals();

        for (vertex, normal) in mesh.vertices().iter().zip(before) {
            for i in 0..3 {
                assert!((vertex.normal[i] - normal[i]).abs() < 1e-5, "{vertex:?}");
            }
        }
    }

    #[test]
    fn buffers_are_uploaded_once() {
        let (device, _null) = null_device();
        let mesh = Geometry::FullScreenTriangle.build();

        let (vbv, ibv) = mesh.buffer_views(&device).unwrap();
        assert_eq!(vbv.size, 3 * 48);
        assert_eq!(vbv.stride, 48);
        assert_eq!(ibv.format, Format::R16Uint);

        let (vertices, indices) = mesh.gpu_buffers(&device).unwrap();
        assert_eq!(mesh.buffer_views(&device).unwrap().0, vbv);
        assert_eq!(
            vertices.read_back().unwrap(),
            bytemuck::cast_slice::<_, u8>(mesh.vertices()).to_vec()
        );
        assert_eq!(indices.read_back().unwrap(), vec![0, 0, 1, 0, 2, 0]);
    }
}
