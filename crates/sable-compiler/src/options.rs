use sable_codegen::EmitOptions;

/// Code quality of the generated bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationLevel {
    #[default]
    Debug,
    Release,
}

/// What kind of module is being produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
    /// Requires a static `Main` entry point
    #[default]
    ConsoleApplication,
    Library,
}

/// Settings of one compilation.
#[derive(Debug, Clone)]
pub struct CompilationOptions {
    pub optimization: OptimizationLevel,
    pub debug_info: bool,
    /// Compile types on a worker pool
    pub concurrent_build: bool,
    /// Worker count; 0 uses the available parallelism
    pub worker_threads: usize,
    pub output_kind: OutputKind,
    /// When false only diagnostics are produced
    pub emit: bool,
}

impl Default for CompilationOptions {
    fn default() -> Self {
        Self {
            optimization: OptimizationLevel::Debug,
            debug_info: true,
            concurrent_build: true,
            worker_threads: 0,
            output_kind: OutputKind::ConsoleApplication,
            emit: true,
        }
    }
}

impl CompilationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Optimized code without sequence points.
    pub fn release() -> Self {
        Self::default()
            .with_optimization(OptimizationLevel::Release)
            .with_debug_info(false)
    }

    pub fn with_optimization(mut self, level: OptimizationLevel) -> Self {
        self.optimization = level;
        self
    }

    pub fn with_debug_info(mut self, enabled: bool) -> Self {
        self.debug_info = enabled;
        self
    }

    pub fn with_concurrent_build(mut self, enabled: bool) -> Self {
        self.concurrent_build = enabled;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_output_kind(mut self, kind: OutputKind) -> Self {
        self.output_kind = kind;
        self
    }

    /// Report diagnostics without generating code.
    pub fn check_only(mut self) -> Self {
        self.emit = false;
        self
    }

    /// Number of threads the worker pool runs with.
    pub fn effective_threads(&self) -> usize {
        if !self.concurrent_build {
            return 1;
        }
        match self.worker_threads {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }
    }

    pub(crate) fn emit_options(&self) -> EmitOptions {
        EmitOptions {
            optimize: self.optimization == OptimizationLevel::Release,
            debug_info: self.debug_info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CompilationOptions::default();
        assert_eq!(options.optimization, OptimizationLevel::Debug);
        assert!(options.debug_info);
        assert!(options.concurrent_build);
        assert!(options.emit);
        assert_eq!(options.emit_options(), EmitOptions::default());
    }

    #[test]
    fn test_release_drops_debug_info() {
        let options = CompilationOptions::release();
        let emit = options.emit_options();
        assert!(emit.optimize);
        assert!(!emit.debug_info);
    }

    #[test]
    fn test_thread_count() {
        assert_eq!(CompilationOptions::new().with_concurrent_build(false).with_worker_threads(8).effective_threads(), 1);
        assert_eq!(CompilationOptions::new().with_worker_threads(3).effective_threads(), 3);
        assert!(CompilationOptions::new().effective_threads() >= 1);
    }
}
