//! CPU reference backend for the compute grid.
//!
//! Runs every kernel texel by texel over plain `Vec<Texel>` storage. It shares
//! the GPU backend's semantics exactly:
//! - clamp-to-edge neighbour sampling
//! - reads come from current textures, writes go to the alternate
//! - parameters arrive as the raw bytes of a `Pod` uniform block
//!
//! Tests run the heightfield on this backend so that properties can be checked
//! without an adapter.

use std::cell::{Ref, RefCell};
use std::sync::Arc;

use bytemuck::Pod;

use super::{GridBackend, GridError, GridExtent, Texel};

/// Per-texel update rule evaluated by the CPU backend.
pub trait TexelKernel {
    /// Compute the new value of the texel addressed by `ctx`.
    fn texel(&self, ctx: &TexelContext<'_>) -> Texel;
}

impl<F> TexelKernel for F
where
    F: Fn(&TexelContext<'_>) -> Texel,
{
    fn texel(&self, ctx: &TexelContext<'_>) -> Texel {
        self(ctx)
    }
}

/// Read access handed to a kernel for one output texel.
pub struct TexelContext<'a> {
    x: u32,
    y: u32,
    extent: GridExtent,
    inputs: &'a [&'a [Texel]],
    params: &'a [u8],
}

impl<'a> TexelContext<'a> {
    /// Texel column.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Texel row.
    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn extent(&self) -> GridExtent {
        self.extent
    }

    /// Normalized coordinate of the texel centre, matching the GPU kernels'
    /// `(vec2(id) + 0.5) / dims`.
    pub fn uv(&self) -> [f32; 2] {
        [
            (self.x as f32 + 0.5) / self.extent.width as f32,
            (self.y as f32 + 0.5) / self.extent.height as f32,
        ]
    }

    /// Sample input `input` at an offset from this texel, clamped to the edge.
    ///
    /// Input 0 is the variable's own previous state; the rest follow the
    /// declared dependency order.
    pub fn sample(&self, input: usize, dx: i32, dy: i32) -> Texel {
        let max_x = self.extent.width as i64 - 1;
        let max_y = self.extent.height as i64 - 1;
        let sx = (self.x as i64 + dx as i64).clamp(0, max_x) as u32;
        let sy = (self.y as i64 + dy as i64).clamp(0, max_y) as u32;
        self.inputs[input][self.extent.index(sx, sy)]
    }

    /// Decode the pass's parameter block.
    ///
    /// The block size is validated against `P` when the parameters are set.
    pub fn params<P: Pod>(&self) -> P {
        bytemuck::pod_read_unaligned(&self.params[..std::mem::size_of::<P>()])
    }
}

/// Texel storage for the CPU backend.
#[derive(Debug)]
pub struct CpuTexture {
    extent: GridExtent,
    texels: RefCell<Vec<Texel>>,
}

impl CpuTexture {
    fn new(extent: GridExtent, texels: Vec<Texel>) -> Self {
        Self {
            extent,
            texels: RefCell::new(texels),
        }
    }

    pub fn extent(&self) -> GridExtent {
        self.extent
    }

    /// Borrow the texels in row-major order.
    pub fn texels(&self) -> Ref<'_, [Texel]> {
        Ref::map(self.texels.borrow(), |texels| texels.as_slice())
    }

    /// Copy the texels out.
    pub fn to_vec(&self) -> Vec<Texel> {
        self.texels.borrow().clone()
    }
}

/// Reference backend evaluating kernels on the CPU.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl GridBackend for CpuBackend {
    type Texture = CpuTexture;
    type Kernel = Arc<dyn TexelKernel>;
    type Program = Arc<dyn TexelKernel>;

    fn check_format(&self) -> Result<(), GridError> {
        Ok(())
    }

    fn create_texture(
        &mut self,
        _label: &str,
        extent: GridExtent,
        texels: &[Texel],
    ) -> Result<Self::Texture, GridError> {
        Ok(CpuTexture::new(extent, texels.to_vec()))
    }

    fn compile(
        &mut self,
        _label: &str,
        kernel: &Self::Kernel,
        _inputs: usize,
        _params_size: usize,
    ) -> Result<Self::Program, GridError> {
        Ok(Arc::clone(kernel))
    }

    fn dispatch(
        &mut self,
        program: &Self::Program,
        inputs: &[&Self::Texture],
        output: &Self::Texture,
        params: &[u8],
    ) {
        // Borrowing the output mutably first turns any read/write aliasing into
        // a RefCell panic instead of a silent in-place update.
        let mut out = output.texels.borrow_mut();
        let guards: Vec<Ref<'_, Vec<Texel>>> =
            inputs.iter().map(|texture| texture.texels.borrow()).collect();
        let slices: Vec<&[Texel]> = guards.iter().map(|guard| guard.as_slice()).collect();

        let extent = output.extent;
        for y in 0..extent.height {
            for x in 0..extent.width {
                let ctx = TexelContext {
                    x,
                    y,
                    extent,
                    inputs: &slices,
                    params,
                };
                out[extent.index(x, y)] = program.texel(&ctx);
            }
        }
    }

    fn write_texture(&mut self, texture: &Self::Texture, texels: &[Texel]) -> Result<(), GridError> {
        texture.texels.borrow_mut().copy_from_slice(texels);
        Ok(())
    }

    fn flush(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(extent: GridExtent, values: &[f32]) -> CpuTexture {
        let texels = values.iter().map(|&v| [v, 0.0, 0.0, 0.0]).collect();
        CpuTexture::new(extent, texels)
    }

    #[test]
    fn test_sampling_clamps_to_edge() {
        let extent = GridExtent::new(3, 2);
        let source = texture(extent, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let output = texture(extent, &[0.0; 6]);

        let left_neighbour: Arc<dyn TexelKernel> =
            Arc::new(|ctx: &TexelContext<'_>| ctx.sample(0, -1, 1));
        let mut backend = CpuBackend::new();
        backend.dispatch(&left_neighbour, &[&source], &output, &[]);

        let values: Vec<f32> = output.to_vec().iter().map(|t| t[0]).collect();
        // Row 0 reads row 1 shifted left; row 1 clamps to itself.
        assert_eq!(values, vec![4.0, 4.0, 5.0, 4.0, 4.0, 5.0]);
    }

    #[test]
    fn test_uv_is_texel_centre() {
        let extent = GridExtent::new(4, 2);
        let output = texture(extent, &[0.0; 8]);
        let uv_kernel: Arc<dyn TexelKernel> = Arc::new(|ctx: &TexelContext<'_>| {
            let [u, v] = ctx.uv();
            [u, v, 0.0, 0.0]
        });
        CpuBackend::new().dispatch(&uv_kernel, &[], &output, &[]);

        let texels = output.to_vec();
        assert_eq!(texels[0][0], 0.125);
        assert_eq!(texels[0][1], 0.25);
        assert_eq!(texels[7][0], 0.875);
        assert_eq!(texels[7][1], 0.75);
    }

    #[test]
    fn test_params_decoded_from_bytes() {
        let extent = GridExtent::new(1, 1);
        let output = texture(extent, &[0.0]);
        let kernel: Arc<dyn TexelKernel> = Arc::new(|ctx: &TexelContext<'_>| {
            let scale: [f32; 4] = ctx.params();
            scale
        });
        let params = [1.5_f32, 2.5, 3.5, 4.5];
        CpuBackend::new().dispatch(&kernel, &[], &output, bytemuck::bytes_of(&params));
        assert_eq!(output.to_vec()[0], params);
    }

    #[test]
    #[should_panic]
    fn test_aliased_output_panics() {
        let extent = GridExtent::new(2, 2);
        let source = texture(extent, &[0.0; 4]);
        let identity: Arc<dyn TexelKernel> =
            Arc::new(|ctx: &TexelContext<'_>| ctx.sample(0, 0, 0));
        CpuBackend::new().dispatch(&identity, &[&source], &source, &[]);
    }
}
