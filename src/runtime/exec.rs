//! Unit program interpreter
//!
//! An [`Invocation`] runs the `main` proc of an entry unit against a
//! resolver. Every symbol it needs goes through that resolver, which is what
//! lets an interceptor observe real resolution.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::environment::Environment;
use super::error::ExecError;
use super::resolver::Resolver;
use super::unit::{Instruction, UnitProgram};

/// Maximum nesting of `call`/`load` chains
pub const MAX_CALL_DEPTH: usize = 256;

/// Which resolver an instruction goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// The invocation's resolver
    Current,
    /// The environment's ambient chain, bypassing a leaf install
    Ambient,
}

/// One execution of an entry point
pub struct Invocation {
    env: Arc<Environment>,
    resolver: Arc<dyn Resolver>,
    args: Arc<[String]>,
    cancel: CancellationToken,
    programs: HashMap<String, Arc<UnitProgram>>,
    initialized: HashSet<String>,
    max_depth: usize,
}

impl Invocation {
    /// Invocation resolving through the environment's current resolver
    pub fn new(env: Arc<Environment>, cancel: CancellationToken) -> Self {
        let resolver = env.current_resolver();
        Self::with_resolver(env, resolver, cancel)
    }

    pub fn with_resolver(
        env: Arc<Environment>,
        resolver: Arc<dyn Resolver>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            env,
            resolver,
            args: Arc::from(Vec::new()),
            cancel,
            programs: HashMap::new(),
            initialized: HashSet::new(),
            max_depth: MAX_CALL_DEPTH,
        }
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Load `entry_point` and run its `main` proc with `args`
    pub fn invoke_main(&mut self, entry_point: &str, args: &[String]) -> Result<(), ExecError> {
        self.args = Arc::from(args.to_vec());
        tracing::debug!(entry_point, resolver = self.resolver.label(), "Invoking entry point");
        let program = self.load(entry_point, Route::Current, 0)?;
        if !program.has_proc(UnitProgram::ENTRY_PROC) {
            return Err(ExecError::MissingProc {
                unit: program.name.clone(),
                proc_name: UnitProgram::ENTRY_PROC.to_string(),
            });
        }
        self.run_proc(&program, UnitProgram::ENTRY_PROC, 1)
    }

    fn check_cancelled(&self) -> Result<(), ExecError> {
        if self.cancel.is_cancelled() {
            Err(ExecError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Resolve a unit and parse it, without initialising it
    fn resolve(&mut self, name: &str, route: Route) -> Result<Arc<UnitProgram>, ExecError> {
        let artifact = match route {
            Route::Current => self.resolver.resolve_unit(name),
            Route::Ambient => self.env.ambient().resolve_unit(name),
        }
        .ok_or_else(|| ExecError::unresolved(name))?;
        self.env.mark_loaded(name);

        if let Some(program) = self.programs.get(name) {
            return Ok(Arc::clone(program));
        }
        let program = Arc::new(UnitProgram::parse(artifact.content())?);
        self.programs.insert(name.to_string(), Arc::clone(&program));
        Ok(program)
    }

    /// Resolve a unit and run its `init` proc the first time it is seen
    fn load(&mut self, name: &str, route: Route, depth: usize) -> Result<Arc<UnitProgram>, ExecError> {
        let program = self.resolve(name, route)?;
        if self.initialized.insert(name.to_string()) && program.has_proc(UnitProgram::INIT_PROC) {
            self.run_proc(&program, UnitProgram::INIT_PROC, depth + 1)?;
        }
        Ok(program)
    }

    fn run_proc(&mut self, program: &UnitProgram, proc_name: &str, depth: usize) -> Result<(), ExecError> {
        if depth > self.max_depth {
            return Err(ExecError::DepthExceeded(self.max_depth));
        }
        let body = program
            .proc_body(proc_name)
            .ok_or_else(|| ExecError::MissingProc {
                unit: program.name.clone(),
                proc_name: proc_name.to_string(),
            })?;
        for instruction in body {
            self.check_cancelled()?;
            self.execute(&program.name, instruction, depth)?;
        }
        Ok(())
    }

    fn execute(&mut self, unit: &str, instruction: &Instruction, depth: usize) -> Result<(), ExecError> {
        match instruction {
            Instruction::Load(name) => {
                self.load(name, Route::Current, depth)?;
            }
            Instruction::Lookup(name) => {
                self.load(name, Route::Ambient, depth)?;
            }
            Instruction::Call { unit, proc_name } => {
                let program = self.load(unit, Route::Current, depth)?;
                self.run_proc(&program, proc_name, depth + 1)?;
            }
            Instruction::Resource(suffix) => {
                let found = self.resolver.resolve_resources(suffix, true);
                tracing::trace!(unit, suffix = %suffix, found = found.len(), "Resource lookup");
            }
            Instruction::Resources(suffix) => {
                let found = self.resolver.resolve_resources(suffix, false);
                tracing::trace!(unit, suffix = %suffix, found = found.len(), "Resources lookup");
            }
            Instruction::Arg(index) => {
                let name = self
                    .args
                    .get(*index)
                    .cloned()
                    .ok_or(ExecError::MissingArgument { index: *index })?;
                self.load(&name, Route::Current, depth)?;
            }
            Instruction::Defer { millis, then } => {
                self.spawn_deferred(unit, *millis, (**then).clone());
            }
            Instruction::Fail(message) => {
                return Err(ExecError::Failed {
                    unit: unit.to_string(),
                    message: message.clone(),
                });
            }
        }
        Ok(())
    }

    /// Run `instruction` on a background thread after `millis`. It resolves
    /// through the resolver that loaded the owning unit; only `lookup` goes
    /// to the ambient chain as wired at that point.
    fn spawn_deferred(&self, unit: &str, millis: u64, instruction: Instruction) {
        let env = Arc::clone(&self.env);
        let resolver = Arc::clone(&self.resolver);
        let args = Arc::clone(&self.args);
        let cancel = self.cancel.clone();
        let owner = unit.to_string();
        let max_depth = self.max_depth;

        let spawned = thread::Builder::new()
            .name(format!("deferred-{unit}"))
            .spawn(move || {
                thread::sleep(Duration::from_millis(millis));
                if cancel.is_cancelled() {
                    return;
                }
                let mut deferred = Invocation::with_resolver(env, resolver, cancel).max_depth(max_depth);
                deferred.args = args;
                if let Err(e) = deferred.execute(&owner, &instruction, 1) {
                    tracing::warn!(unit = %owner, error = %e, "Deferred instruction failed");
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(unit, error = %e, "Failed to spawn deferred instruction");
        }
    }
}
