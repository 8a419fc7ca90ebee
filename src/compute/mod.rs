//! Ping-pong compute grid
//!
//! A generic state machine that runs per-texel update kernels over named
//! variables stored in double-buffered 4-channel textures:
//! - Variables: state textures with an update kernel and a typed uniform block
//! - Filters: auxiliary programs run on demand over a dedicated scratch pair
//! - Backends: wgpu compute shaders (`gpu`) or the CPU reference model (`cpu`)
//!
//! Every pass reads the *current* textures and writes an *alternate* one; the
//! labels only swap once all passes of a step have been recorded.

pub mod cpu;
pub mod gpu;
mod ping_pong;
mod schedule;

pub use cpu::{CpuBackend, CpuTexture, TexelContext, TexelKernel};
pub use gpu::{GpuBackend, GpuTexture, GridPrecision, WgslKernel};
pub use ping_pong::PingPong;

use bytemuck::Pod;

/// One 4-channel texel. Channel meaning is defined by each variable's kernel.
pub type Texel = [f32; 4];

/// Grid resolution in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridExtent {
    pub width: u32,
    pub height: u32,
}

impl GridExtent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Row-major index of texel (x, y).
    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Handle to a registered variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableId(usize);

/// Handle to a registered filter program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterId(usize);

/// Errors raised while building or running a compute grid.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("variable '{0}' is already registered")]
    DuplicateVariable(String),
    #[error("unknown variable id {0}")]
    UnknownVariable(usize),
    #[error("unknown filter id {0}")]
    UnknownFilter(usize),
    #[error("'{name}' expects {expected} texels, got {actual}")]
    TexelCount {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("parameter block for '{name}' is {actual} bytes, registered as {expected}")]
    ParamsSize {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("dependency cycle involving variable '{0}'")]
    DependencyCycle(String),
    #[error("compute grid used before init()")]
    NotInitialized,
    #[error("grid extent {width}x{height} is empty")]
    EmptyExtent { width: u32, height: u32 },
    #[error("texture format {format:?} cannot back a compute grid: {reason}")]
    UnsupportedFormat {
        format: wgpu::TextureFormat,
        reason: String,
    },
    #[error("kernel '{label}' failed to compile: {message}")]
    KernelCompilation { label: String, message: String },
    #[error("texture readback failed: {0}")]
    Readback(String),
}

/// Storage and execution seam between the grid state machine and a device.
pub trait GridBackend {
    /// One 4-channel texture of grid extent.
    type Texture;
    /// Kernel source as registered by the caller.
    type Kernel;
    /// Compiled form of a kernel bound to a fixed input count.
    type Program;

    /// Verify the backend can read and write its texel format.
    fn check_format(&self) -> Result<(), GridError>;

    /// Allocate a texture and fill it with `texels`.
    fn create_texture(
        &mut self,
        label: &str,
        extent: GridExtent,
        texels: &[Texel],
    ) -> Result<Self::Texture, GridError>;

    /// Compile `kernel` for `inputs` sampled textures and a uniform block of
    /// `params_size` bytes.
    fn compile(
        &mut self,
        label: &str,
        kernel: &Self::Kernel,
        inputs: usize,
        params_size: usize,
    ) -> Result<Self::Program, GridError>;

    /// Record one pass writing `output` from `inputs`.
    ///
    /// `output` is never one of `inputs`.
    fn dispatch(
        &mut self,
        program: &Self::Program,
        inputs: &[&Self::Texture],
        output: &Self::Texture,
        params: &[u8],
    );

    /// Overwrite a texture's contents.
    fn write_texture(&mut self, texture: &Self::Texture, texels: &[Texel]) -> Result<(), GridError>;

    /// Submit everything recorded since the last flush.
    fn flush(&mut self);
}

struct Variable<B: GridBackend> {
    name: String,
    kernel: B::Kernel,
    program: Option<B::Program>,
    textures: PingPong<B::Texture>,
    dependencies: Vec<VariableId>,
    params: Vec<u8>,
}

struct Filter<B: GridBackend> {
    name: String,
    kernel: B::Kernel,
    program: Option<B::Program>,
    params: Vec<u8>,
    scratch: Option<PingPong<B::Texture>>,
}

/// Named double-buffered variables advanced together by `compute()`.
// put id:'grid_state', label:'Ping-pong texel variables', input:'kernel_params.internal', output:'current_textures.gpu'
pub struct ComputeGrid<B: GridBackend> {
    backend: B,
    extent: GridExtent,
    variables: Vec<Variable<B>>,
    filters: Vec<Filter<B>>,
    order: Vec<usize>,
    initialized: bool,
}

impl<B: GridBackend> ComputeGrid<B> {
    /// Create an empty grid of the given extent.
    pub fn new(backend: B, extent: GridExtent) -> Self {
        Self {
            backend,
            extent,
            variables: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
            initialized: false,
        }
    }

    pub fn extent(&self) -> GridExtent {
        self.extent
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Register a state variable.
    ///
    /// # Arguments
    /// * `name` - Unique variable name
    /// * `initial` - Row-major texels copied into both buffers of the pair
    /// * `kernel` - Update kernel; input 0 is the variable's own current state
    /// * `params` - Uniform block; its size is fixed from here on
    pub fn add_variable<P: Pod>(
        &mut self,
        name: &str,
        initial: &[Texel],
        kernel: B::Kernel,
        params: &P,
    ) -> Result<VariableId, GridError> {
        if self.extent.is_empty() {
            return Err(GridError::EmptyExtent {
                width: self.extent.width,
                height: self.extent.height,
            });
        }
        if self.variables.iter().any(|v| v.name == name) {
            return Err(GridError::DuplicateVariable(name.to_string()));
        }
        self.check_texels(name, initial)?;

        let current = self
            .backend
            .create_texture(&format!("{name} A"), self.extent, initial)?;
        let alternate = self
            .backend
            .create_texture(&format!("{name} B"), self.extent, initial)?;

        let id = VariableId(self.variables.len());
        self.variables.push(Variable {
            name: name.to_string(),
            kernel,
            program: None,
            textures: PingPong::new(current, alternate),
            dependencies: Vec::new(),
            params: bytemuck::bytes_of(params).to_vec(),
        });
        self.initialized = false;
        Ok(id)
    }

    /// Declare the variables `var`'s kernel samples, in binding order after
    /// the variable itself.
    pub fn set_dependencies(&mut self, var: VariableId, deps: &[VariableId]) -> Result<(), GridError> {
        for dep in deps {
            self.variable_index(*dep)?;
        }
        let index = self.variable_index(var)?;
        self.variables[index].dependencies = deps.to_vec();
        self.initialized = false;
        Ok(())
    }

    /// Replace the uniform block of `var`. The size must match the block
    /// given at registration.
    pub fn set_params<P: Pod>(&mut self, var: VariableId, params: &P) -> Result<(), GridError> {
        let index = self.variable_index(var)?;
        let variable = &mut self.variables[index];
        replace_params(&variable.name, &mut variable.params, bytemuck::bytes_of(params))
    }

    /// Register an auxiliary single-input program run by `apply_filter`.
    pub fn add_filter<P: Pod>(
        &mut self,
        name: &str,
        kernel: B::Kernel,
        params: &P,
    ) -> Result<FilterId, GridError> {
        let id = FilterId(self.filters.len());
        self.filters.push(Filter {
            name: name.to_string(),
            kernel,
            program: None,
            params: bytemuck::bytes_of(params).to_vec(),
            scratch: None,
        });
        self.initialized = false;
        Ok(id)
    }

    /// Replace a filter's uniform block.
    pub fn set_filter_params<P: Pod>(&mut self, filter: FilterId, params: &P) -> Result<(), GridError> {
        let filter = self
            .filters
            .get_mut(filter.0)
            .ok_or(GridError::UnknownFilter(filter.0))?;
        replace_params(&filter.name, &mut filter.params, bytemuck::bytes_of(params))
    }

    /// Validate the texel format, order the variables and compile every
    /// program.
    // put id:'grid_init', label:'Compile grid kernels', input:'kernel_params.internal', output:'grid_programs.gpu'
    pub fn init(&mut self) -> Result<(), GridError> {
        self.backend.check_format()?;

        let dependencies: Vec<Vec<usize>> = self
            .variables
            .iter()
            .map(|v| v.dependencies.iter().map(|d| d.0).collect())
            .collect();
        self.order = schedule::dependency_order(&dependencies)
            .map_err(|stuck| GridError::DependencyCycle(self.variables[stuck].name.clone()))?;

        for variable in &mut self.variables {
            let program = self.backend.compile(
                &variable.name,
                &variable.kernel,
                1 + variable.dependencies.len(),
                variable.params.len(),
            )?;
            variable.program = Some(program);
        }

        let zeros = vec![[0.0; 4]; self.extent.texel_count()];
        for filter in &mut self.filters {
            let program = self
                .backend
                .compile(&filter.name, &filter.kernel, 1, filter.params.len())?;
            filter.program = Some(program);
            if filter.scratch.is_none() {
                let a = self
                    .backend
                    .create_texture(&format!("{} scratch A", filter.name), self.extent, &zeros)?;
                let b = self
                    .backend
                    .create_texture(&format!("{} scratch B", filter.name), self.extent, &zeros)?;
                filter.scratch = Some(PingPong::new(a, b));
            }
        }

        self.initialized = true;
        log::debug!(
            "Compute grid {}x{} ready: {} variables, {} filters",
            self.extent.width,
            self.extent.height,
            self.variables.len(),
            self.filters.len()
        );
        Ok(())
    }

    /// Advance every variable by one step.
    ///
    /// Dependencies read the previous step's state: all passes read current
    /// textures and the labels swap together once every pass is recorded.
    // put id:'grid_compute', label:'Run grid step', input:'current_textures.gpu', output:'current_textures.gpu'
    pub fn compute(&mut self) -> Result<(), GridError> {
        if !self.initialized {
            return Err(GridError::NotInitialized);
        }

        let Self {
            backend,
            variables,
            order,
            ..
        } = self;

        for &index in order.iter() {
            let variable = &variables[index];
            let program = variable.program.as_ref().ok_or(GridError::NotInitialized)?;

            let mut inputs: Vec<&B::Texture> = Vec::with_capacity(1 + variable.dependencies.len());
            inputs.push(variable.textures.current());
            for dep in &variable.dependencies {
                inputs.push(variables[dep.0].textures.current());
            }

            run_pass(backend, program, &inputs, variable.textures.alternate(), &variable.params);
        }
        backend.flush();

        for variable in variables.iter_mut() {
            variable.textures.swap();
        }
        Ok(())
    }

    /// Run `filter` over `var` for `passes` passes.
    ///
    /// The first pass reads the variable's current texture, intermediate
    /// passes bounce through the filter's scratch pair and the last pass
    /// writes the variable's alternate texture, which then becomes current.
    pub fn apply_filter(&mut self, filter: FilterId, var: VariableId, passes: u32) -> Result<(), GridError> {
        let index = self.variable_index(var)?;
        if filter.0 >= self.filters.len() {
            return Err(GridError::UnknownFilter(filter.0));
        }
        if !self.initialized {
            return Err(GridError::NotInitialized);
        }
        if passes == 0 {
            return Ok(());
        }

        let Self {
            backend,
            variables,
            filters,
            ..
        } = self;
        let filter = &mut filters[filter.0];
        let program = filter.program.as_ref().ok_or(GridError::NotInitialized)?;
        let scratch = filter.scratch.as_mut().ok_or(GridError::NotInitialized)?;
        let target = &mut variables[index];

        if passes == 1 {
            run_pass(
                backend,
                program,
                &[target.textures.current()],
                target.textures.alternate(),
                &filter.params,
            );
        } else {
            run_pass(
                backend,
                program,
                &[target.textures.current()],
                scratch.alternate(),
                &filter.params,
            );
            scratch.swap();
            for _ in 1..passes - 1 {
                run_pass(backend, program, &[scratch.current()], scratch.alternate(), &filter.params);
                scratch.swap();
            }
            run_pass(
                backend,
                program,
                &[scratch.current()],
                target.textures.alternate(),
                &filter.params,
            );
        }
        backend.flush();
        target.textures.swap();
        Ok(())
    }

    /// Overwrite both buffers of `var`, e.g. to reseed the simulation.
    pub fn write_variable(&mut self, var: VariableId, texels: &[Texel]) -> Result<(), GridError> {
        let index = self.variable_index(var)?;
        let name = self.variables[index].name.clone();
        self.check_texels(&name, texels)?;

        let textures = &self.variables[index].textures;
        for texture in textures.both() {
            self.backend.write_texture(texture, texels)?;
        }
        self.backend.flush();
        Ok(())
    }

    /// The most recently completed texture of `var`.
    ///
    /// # Panics
    /// If `var` was issued by a different grid.
    pub fn current_texture(&self, var: VariableId) -> &B::Texture {
        self.variables[var.0].textures.current()
    }

    /// Backend together with the current texture of `var`, for backend
    /// operations on a grid texture such as readback.
    ///
    /// # Panics
    /// If `var` was issued by a different grid.
    pub fn backend_and_current(&mut self, var: VariableId) -> (&mut B, &B::Texture) {
        (&mut self.backend, self.variables[var.0].textures.current())
    }

    /// The texture the next pass over `var` will write.
    ///
    /// # Panics
    /// If `var` was issued by a different grid.
    pub fn alternate_texture(&self, var: VariableId) -> &B::Texture {
        self.variables[var.0].textures.alternate()
    }

    /// Look up a variable by name.
    pub fn variable(&self, name: &str) -> Option<VariableId> {
        self.variables
            .iter()
            .position(|v| v.name == name)
            .map(VariableId)
    }

    /// Variable indices in the order `compute()` runs them.
    pub fn execution_order(&self) -> Vec<VariableId> {
        self.order.iter().copied().map(VariableId).collect()
    }

    fn variable_index(&self, var: VariableId) -> Result<usize, GridError> {
        if var.0 < self.variables.len() {
            Ok(var.0)
        } else {
            Err(GridError::UnknownVariable(var.0))
        }
    }

    fn check_texels(&self, name: &str, texels: &[Texel]) -> Result<(), GridError> {
        let expected = self.extent.texel_count();
        if texels.len() != expected {
            return Err(GridError::TexelCount {
                name: name.to_string(),
                expected,
                actual: texels.len(),
            });
        }
        Ok(())
    }
}

fn replace_params(name: &str, stored: &mut Vec<u8>, bytes: &[u8]) -> Result<(), GridError> {
    if stored.len() != bytes.len() {
        return Err(GridError::ParamsSize {
            name: name.to_string(),
            expected: stored.len(),
            actual: bytes.len(),
        });
    }
    stored.copy_from_slice(bytes);
    Ok(())
}

fn run_pass<B: GridBackend>(
    backend: &mut B,
    program: &B::Program,
    inputs: &[&B::Texture],
    output: &B::Texture,
    params: &[u8],
) {
    debug_assert!(
        !inputs.iter().any(|input| std::ptr::eq(*input, output)),
        "compute pass would write the texture it reads"
    );
    backend.dispatch(program, inputs, output, params);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn constant(value: f32, extent: GridExtent) -> Vec<Texel> {
        vec![[value, 0.0, 0.0, 0.0]; extent.texel_count()]
    }

    fn add_one() -> Arc<dyn TexelKernel> {
        Arc::new(|ctx: &TexelContext<'_>| {
            let t = ctx.sample(0, 0, 0);
            [t[0] + 1.0, t[1], t[2], t[3]]
        })
    }

    #[test]
    fn test_compute_before_init_fails() {
        let extent = GridExtent::new(2, 2);
        let mut grid = ComputeGrid::new(CpuBackend::new(), extent);
        grid.add_variable("a", &constant(0.0, extent), add_one(), &0.0_f32).unwrap();
        assert!(matches!(grid.compute(), Err(GridError::NotInitialized)));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let extent = GridExtent::new(2, 2);
        let mut grid = ComputeGrid::new(CpuBackend::new(), extent);
        grid.add_variable("a", &constant(0.0, extent), add_one(), &0.0_f32).unwrap();
        let result = grid.add_variable("a", &constant(0.0, extent), add_one(), &0.0_f32);
        assert!(matches!(result, Err(GridError::DuplicateVariable(_))));
    }

    #[test]
    fn test_wrong_texel_count_rejected() {
        let extent = GridExtent::new(4, 4);
        let mut grid = ComputeGrid::new(CpuBackend::new(), extent);
        let result = grid.add_variable("a", &[[0.0; 4]; 3], add_one(), &0.0_f32);
        assert!(matches!(
            result,
            Err(GridError::TexelCount { expected: 16, actual: 3, .. })
        ));
    }

    #[test]
    fn test_empty_extent_rejected() {
        let mut grid = ComputeGrid::new(CpuBackend::new(), GridExtent::new(0, 4));
        let result = grid.add_variable("a", &[], add_one(), &0.0_f32);
        assert!(matches!(result, Err(GridError::EmptyExtent { .. })));
    }

    #[test]
    fn test_params_size_validated() {
        let extent = GridExtent::new(2, 2);
        let mut grid = ComputeGrid::new(CpuBackend::new(), extent);
        let a = grid
            .add_variable("a", &constant(0.0, extent), add_one(), &[0.0_f32; 4])
            .unwrap();
        assert!(grid.set_params(a, &[1.0_f32; 4]).is_ok());
        assert!(matches!(
            grid.set_params(a, &1.0_f32),
            Err(GridError::ParamsSize { expected: 16, actual: 4, .. })
        ));
    }

    #[test]
    fn test_cycle_rejected_at_init() {
        let extent = GridExtent::new(2, 2);
        let mut grid = ComputeGrid::new(CpuBackend::new(), extent);
        let a = grid.add_variable("a", &constant(0.0, extent), add_one(), &0.0_f32).unwrap();
        let b = grid.add_variable("b", &constant(0.0, extent), add_one(), &0.0_f32).unwrap();
        grid.set_dependencies(a, &[b]).unwrap();
        grid.set_dependencies(b, &[a]).unwrap();
        assert!(matches!(grid.init(), Err(GridError::DependencyCycle(_))));
    }

    #[test]
    fn test_dependencies_read_previous_step() {
        let extent = GridExtent::new(1, 1);
        let mut grid = ComputeGrid::new(CpuBackend::new(), extent);
        let counter = grid
            .add_variable("counter", &constant(0.0, extent), add_one(), &0.0_f32)
            .unwrap();
        let copy: Arc<dyn TexelKernel> = Arc::new(|ctx: &TexelContext<'_>| ctx.sample(1, 0, 0));
        let mirror = grid
            .add_variable("mirror", &constant(0.0, extent), copy, &0.0_f32)
            .unwrap();
        grid.set_dependencies(mirror, &[counter]).unwrap();
        grid.init().unwrap();

        grid.compute().unwrap();
        grid.compute().unwrap();

        assert_eq!(grid.current_texture(counter).to_vec()[0][0], 2.0);
        // The mirror always lags the counter by one step.
        assert_eq!(grid.current_texture(mirror).to_vec()[0][0], 1.0);
    }

    #[test]
    fn test_filter_passes_compose() {
        let extent = GridExtent::new(2, 1);
        let mut grid = ComputeGrid::new(CpuBackend::new(), extent);
        let identity: Arc<dyn TexelKernel> = Arc::new(|ctx: &TexelContext<'_>| ctx.sample(0, 0, 0));
        let a = grid
            .add_variable("a", &constant(0.0, extent), identity, &0.0_f32)
            .unwrap();
        let bump = grid.add_filter("bump", add_one(), &0.0_f32).unwrap();
        grid.init().unwrap();

        for passes in [1_u32, 2, 3, 5] {
            let before = grid.current_texture(a).to_vec()[0][0];
            grid.apply_filter(bump, a, passes).unwrap();
            let after = grid.current_texture(a).to_vec()[0][0];
            assert_eq!(after - before, passes as f32);
        }
    }

    #[test]
    fn test_zero_filter_passes_is_noop() {
        let extent = GridExtent::new(2, 2);
        let mut grid = ComputeGrid::new(CpuBackend::new(), extent);
        let a = grid.add_variable("a", &constant(3.0, extent), add_one(), &0.0_f32).unwrap();
        let bump = grid.add_filter("bump", add_one(), &0.0_f32).unwrap();
        grid.init().unwrap();
        grid.apply_filter(bump, a, 0).unwrap();
        assert_eq!(grid.current_texture(a).to_vec(), constant(3.0, extent));
    }

    #[test]
    fn test_write_variable_resets_both_buffers() {
        let extent = GridExtent::new(2, 2);
        let mut grid = ComputeGrid::new(CpuBackend::new(), extent);
        let a = grid.add_variable("a", &constant(0.0, extent), add_one(), &0.0_f32).unwrap();
        grid.init().unwrap();
        grid.compute().unwrap();

        grid.write_variable(a, &constant(7.0, extent)).unwrap();
        assert_eq!(grid.current_texture(a).to_vec(), constant(7.0, extent));
        assert_eq!(grid.alternate_texture(a).to_vec(), constant(7.0, extent));
    }

    #[test]
    fn test_variable_lookup() {
        let extent = GridExtent::new(2, 2);
        let mut grid = ComputeGrid::new(CpuBackend::new(), extent);
        let a = grid.add_variable("height", &constant(0.0, extent), add_one(), &0.0_f32).unwrap();
        assert_eq!(grid.variable("height"), Some(a));
        assert_eq!(grid.variable("missing"), None);
    }
}
