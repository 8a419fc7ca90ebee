//! Simulation and geometry modules
//!
//! CPU-side models behind the scene:
//! - Heightfield: Damped wave equation with pointer perturbation
//! - Seeding: Fractal-noise and flat initial heightmaps
//! - Geometry: Plane and sphere mesh generation
//! - Raycast: Ray/triangle intersection for pointer picking

pub mod geometry;
pub mod heightfield;
pub mod raycast;
pub mod seeding;

pub use geometry::{MeshData, PlaneMesh, SphereMesh, Vertex};
pub use heightfield::{HeightfieldKernels, HeightfieldSimulation, PerturbationPoint, SimulationParams};
pub use raycast::Ray;
pub use seeding::{NoiseSeed, SeedMode};
